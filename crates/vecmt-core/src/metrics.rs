// Copyright (c) Mysten Labs, Inc.
// Modifications Copyright (c) 2025 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use prometheus::{
    register_int_counter_with_registry, register_int_gauge_with_registry, IntCounter, IntGauge,
    Opts, Registry,
};
use tokio::task::JoinHandle;

pub const NAMESPACE: &str = "vecmt";

/// Data directory name of nodes running without persistent storage.
pub const IN_MEMORY_DATADIR: &str = "inmemory";

pub const EVENTS_INDEXED_TOTAL: &str = "events_indexed_total";
pub const FORKS_OBSERVED_TOTAL: &str = "forks_observed_total";

pub struct Metrics {
    pub events_indexed_total: IntCounter,
    pub forks_observed_total: IntCounter,

    pub highest_before_time_cache_hits_total: IntCounter,
    pub highest_before_time_cache_misses_total: IntCounter,
    pub highest_before_time_reconstructed_total: IntCounter,

    pub db_size: IntGauge,
}

impl Metrics {
    pub fn new(registry: &Registry) -> Arc<Self> {
        let metrics = Self {
            events_indexed_total: register_int_counter_with_registry!(
                Opts::new(EVENTS_INDEXED_TOTAL, "Number of events added to the index")
                    .namespace(NAMESPACE),
                registry,
            )
            .unwrap(),
            forks_observed_total: register_int_counter_with_registry!(
                Opts::new(FORKS_OBSERVED_TOTAL, "Number of branches opened by forking validators")
                    .namespace(NAMESPACE),
                registry,
            )
            .unwrap(),
            highest_before_time_cache_hits_total: register_int_counter_with_registry!(
                Opts::new(
                    "highest_before_time_cache_hits_total",
                    "Highest-before time vectors served from the cache"
                )
                .namespace(NAMESPACE),
                registry,
            )
            .unwrap(),
            highest_before_time_cache_misses_total: register_int_counter_with_registry!(
                Opts::new(
                    "highest_before_time_cache_misses_total",
                    "Highest-before time vectors missing in the cache"
                )
                .namespace(NAMESPACE),
                registry,
            )
            .unwrap(),
            highest_before_time_reconstructed_total: register_int_counter_with_registry!(
                Opts::new(
                    "highest_before_time_reconstructed_total",
                    "Highest-before time vectors rebuilt from the parents"
                )
                .namespace(NAMESPACE),
                registry,
            )
            .unwrap(),
            db_size: register_int_gauge_with_registry!(
                Opts::new("db_size", "Size of the data directory in bytes").namespace(NAMESPACE),
                registry,
            )
            .unwrap(),
        };
        Arc::new(metrics)
    }

    /// Periodically updates the `db_size` gauge with the size of `datadir`.
    pub fn spawn_db_size_monitor(
        self: Arc<Self>,
        datadir: PathBuf,
        interval: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let dir = datadir.clone();
                let size = tokio::task::spawn_blocking(move || measure_dir_size(&dir))
                    .await
                    .unwrap_or_default();
                self.db_size.set(size as i64);
            }
        })
    }
}

/// Total size of the files below `datadir`, 0 for in-memory nodes or if the
/// directory can't be read.
pub fn measure_dir_size(datadir: &Path) -> u64 {
    if datadir.as_os_str().is_empty() || datadir == Path::new(IN_MEMORY_DATADIR) {
        return 0;
    }
    match dir_size(datadir) {
        Ok(size) => size,
        Err(e) => {
            tracing::error!("Failed to measure {}: {e}", datadir.display());
            0
        }
    }
}

fn dir_size(path: &Path) -> io::Result<u64> {
    let mut size = 0;
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            size += dir_size(&entry.path())?;
        } else if file_type.is_file() {
            size += entry.metadata()?.len();
        }
    }
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_are_namespaced() {
        let registry = Registry::new();
        let metrics = Metrics::new(&registry);
        metrics.events_indexed_total.inc();
        let names: Vec<_> = registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        assert!(names.contains(&"vecmt_events_indexed_total".to_string()));
        assert!(names.contains(&"vecmt_db_size".to_string()));
    }

    #[test]
    fn dir_size_counts_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a"), [0u8; 10]).unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested").join("b"), [0u8; 5]).unwrap();
        assert_eq!(measure_dir_size(dir.path()), 15);
        assert_eq!(measure_dir_size(Path::new(IN_MEMORY_DATADIR)), 0);
        assert_eq!(measure_dir_size(&dir.path().join("missing")), 0);
    }

    #[tokio::test]
    async fn db_size_monitor_updates_gauge() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a"), [0u8; 7]).unwrap();
        let metrics = Metrics::new(&Registry::new());
        let handle = metrics
            .clone()
            .spawn_db_size_monitor(dir.path().to_path_buf(), Duration::from_millis(10));
        for _ in 0..100 {
            if metrics.db_size.get() == 7 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.abort();
        assert_eq!(metrics.db_size.get(), 7);
    }
}
