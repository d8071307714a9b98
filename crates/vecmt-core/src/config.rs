// Copyright (c) Mysten Labs, Inc.
// Modifications Copyright (c) 2025 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::{fs, io, path::Path};

use serde::{de::DeserializeOwned, Deserialize, Serialize};

pub trait ImportExport: Serialize + DeserializeOwned {
    fn load<P: AsRef<Path>>(path: P) -> Result<Self, io::Error> {
        let content = fs::read_to_string(&path)?;
        let object = serde_yaml::from_str(&content)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(object)
    }

    fn print<P: AsRef<Path>>(&self, path: P) -> Result<(), io::Error> {
        let content = serde_yaml::to_string(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(&path, content)
    }
}

/// Scales default cache sizes by `target / base`, e.g. by the share of memory
/// the operator allows the node to use.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheScale {
    base: u64,
    target: u64,
}

impl CacheScale {
    pub const fn identity() -> Self {
        Self { base: 1, target: 1 }
    }

    pub fn ratio(base: u64, target: u64) -> Self {
        assert!(base > 0, "Cache scale base must be positive");
        Self { base, target }
    }

    pub fn scale(&self, value: usize) -> usize {
        (value as u128 * self.target as u128 / self.base as u128) as usize
    }
}

impl Default for CacheScale {
    fn default() -> Self {
        Self::identity()
    }
}
