// Copyright (c) Mysten Labs, Inc.
// Modifications Copyright (c) 2025 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::{
    io,
    time::{Duration, Instant},
};

use super::{rocks::prefix_upper_bound, RocksStore};

const LOG_INTERVAL: Duration = Duration::from_secs(16);
// Ranges with fewer potential keys are compacted in one go
const SHORT_RANGE: u64 = 10_000;
const STEPS: u32 = 32;

/// Compacts the store one first-byte prefix at a time. Large prefixes are
/// split into growing sub-ranges so progress can be reported and memory use
/// stays bounded.
pub fn compact(store: &RocksStore, logging_name: &str) -> io::Result<()> {
    let mut last_log: Option<Instant> = None;
    let mut compact_range = |b: u8, start: Option<&[u8]>, end: Option<&[u8]>| -> io::Result<()> {
        if !logging_name.is_empty() && last_log.map_or(true, |t| t.elapsed() > LOG_INTERVAL) {
            tracing::info!(
                "Compacting DB {} until {}",
                logging_name,
                end.map_or_else(|| format!("{b:02x}ff.."), hex::encode)
            );
            last_log = Some(Instant::now());
        }
        store.compact_range(start, end)
    };

    for b in 0..=u8::MAX {
        let prefix = [b];
        let Some(first) = store.first_key_with_prefix(&prefix)? else {
            continue;
        };
        let Some(last) = store.last_key_with_prefix(&prefix)? else {
            continue;
        };
        let prefix_end = prefix_upper_bound(&prefix);

        let key_size = first.len().max(last.len()) - 1;
        let first = right_pad(&first[1..], key_size);
        let last = right_pad(&last[1..], key_size);
        let diff = sub(&last, &first);
        if is_less_than(&diff, SHORT_RANGE) {
            compact_range(b, Some(&prefix), prefix_end.as_deref())?;
            continue;
        }

        let mut prev = prefix.to_vec();
        for i in (1..=STEPS).rev() {
            let mut until = prefix.to_vec();
            until.extend(add_saturating(&first, &div_small(&diff, i)));
            compact_range(b, Some(&prev), Some(&until))?;
            prev = until;
        }
        // Tail including the last key itself
        compact_range(b, Some(&prev), prefix_end.as_deref())?;
    }
    Ok(())
}

fn right_pad(bytes: &[u8], size: usize) -> Vec<u8> {
    let mut padded = bytes.to_vec();
    padded.resize(size, 0);
    padded
}

// Big-endian unsigned arithmetic over equally sized byte strings

fn sub(a: &[u8], b: &[u8]) -> Vec<u8> {
    debug_assert_eq!(a.len(), b.len());
    let mut result = vec![0u8; a.len()];
    let mut borrow = 0i16;
    for i in (0..a.len()).rev() {
        let mut v = a[i] as i16 - b[i] as i16 - borrow;
        borrow = 0;
        if v < 0 {
            v += 256;
            borrow = 1;
        }
        result[i] = v as u8;
    }
    result
}

fn div_small(a: &[u8], divisor: u32) -> Vec<u8> {
    let mut result = vec![0u8; a.len()];
    let mut rem = 0u64;
    for (i, byte) in a.iter().enumerate() {
        let cur = (rem << 8) | *byte as u64;
        result[i] = (cur / divisor as u64) as u8;
        rem = cur % divisor as u64;
    }
    result
}

fn add_saturating(a: &[u8], b: &[u8]) -> Vec<u8> {
    debug_assert_eq!(a.len(), b.len());
    let mut result = vec![0u8; a.len()];
    let mut carry = 0u16;
    for i in (0..a.len()).rev() {
        let v = a[i] as u16 + b[i] as u16 + carry;
        result[i] = v as u8;
        carry = v >> 8;
    }
    if carry > 0 {
        return vec![u8::MAX; a.len()];
    }
    result
}

fn is_less_than(a: &[u8], value: u64) -> bool {
    let significant: Vec<u8> = a.iter().copied().skip_while(|b| *b == 0).collect();
    if significant.len() > 8 {
        return false;
    }
    let number = significant.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64);
    number < value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    #[test]
    fn byte_arithmetic() {
        assert_eq!(sub(&[1, 0], &[0, 1]), vec![0, 255]);
        assert_eq!(div_small(&[1, 0], 2), vec![0, 128]);
        assert_eq!(add_saturating(&[0, 255], &[0, 1]), vec![1, 0]);
        assert_eq!(add_saturating(&[255, 255], &[0, 1]), vec![255, 255]);
        assert!(is_less_than(&[0, 0, 0x27, 0x0f], 10_000));
        assert!(!is_less_than(&[0, 0, 0x27, 0x10], 10_000));
        assert!(!is_less_than(&[1, 0, 0, 0, 0, 0, 0, 0, 0], 10_000));
    }

    #[test]
    fn compaction_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        for i in 0u32..2000 {
            let mut key = b"S".to_vec();
            key.extend((i * 7919).to_be_bytes());
            store.put(&key, &i.to_be_bytes()).unwrap();
        }
        store.put(b"B", b"short").unwrap();
        store.put(b"\xff\xff", b"edge").unwrap();

        compact(&store, "test").unwrap();

        let mut key = b"S".to_vec();
        key.extend((1999u32 * 7919).to_be_bytes());
        assert_eq!(store.get(&key).unwrap(), Some(1999u32.to_be_bytes().to_vec()));
        assert_eq!(store.get(b"B").unwrap(), Some(b"short".to_vec()));
        assert_eq!(store.get(b"\xff\xff").unwrap(), Some(b"edge".to_vec()));
    }
}
