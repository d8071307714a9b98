// Copyright (c) Mysten Labs, Inc.
// Modifications Copyright (c) 2025 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

pub mod cache;
pub mod config;
pub mod generator;
pub mod metrics;
pub mod prometheus;
pub mod store;
#[cfg(test)]
mod test_util;
pub mod types;
pub mod validators;
pub mod vecengine;
pub mod vecfc;
pub mod vecmt;
