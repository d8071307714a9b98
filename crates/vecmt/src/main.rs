// Copyright (c) Mysten Labs, Inc.
// Modifications Copyright (c) 2025 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use clap::{command, Parser};
use eyre::{ensure, eyre, Context, Result};
use prettytable::{format, row, Table as PrettyTable};
use prometheus::Registry;
use tracing_subscriber::{filter::LevelFilter, fmt, EnvFilter};
use vecmt_core::{
    config::{CacheScale, ImportExport},
    generator::DagGenerator,
    metrics::Metrics,
    prometheus::start_prometheus_server,
    store::{self, MemoryStore, RocksStore, Store},
    types::{Crit, DagEvent, Event},
    validators::Validators,
    vecmt::{Index, IndexConfig},
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[clap(subcommand)]
    operation: Operation,
}

#[derive(Parser)]
enum Operation {
    /// Index a random DAG and print the median times and cheaters observed by the last events.
    Simulate {
        #[clap(long, value_name = "INT", default_value_t = 4)]
        validators: usize,
        /// Validator set file, overrides `--validators`.
        #[clap(long, value_name = "FILE")]
        validators_path: Option<PathBuf>,
        #[clap(long, value_name = "INT", default_value_t = 1000)]
        events: usize,
        #[clap(long, value_name = "INT", default_value_t = 0)]
        cheaters: usize,
        #[clap(long, value_name = "INT", default_value_t = 0)]
        seed: u64,
        /// Index configuration file, defaults scaled by `--cache-scale` otherwise.
        #[clap(long, value_name = "FILE")]
        config_path: Option<PathBuf>,
        /// Multiplier of the default cache sizes.
        #[clap(long, value_name = "INT", default_value_t = 1)]
        cache_scale: u64,
        /// RocksDB directory, the vectors are kept in memory if omitted.
        #[clap(long, value_name = "DIR")]
        db: Option<PathBuf>,
        #[clap(long, value_name = "INT", default_value_t = 100)]
        flush_every: usize,
    },
    /// Compact a RocksDB vector store range by range.
    Compact {
        #[clap(long, value_name = "DIR")]
        db: PathBuf,
    },
    /// Serve the metrics and the size gauge of a data directory.
    Metrics {
        #[clap(long, value_name = "DIR", default_value = vecmt_core::metrics::IN_MEMORY_DATADIR)]
        datadir: PathBuf,
        #[clap(long, value_name = "ADDR", default_value_t = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9184))]
        address: SocketAddr,
        #[clap(long, value_name = "INT", default_value_t = 10)]
        interval_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Nice colored error messages.
    color_eyre::install()?;
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    fmt().with_env_filter(filter).init();

    // Parse the command line arguments.
    match Args::parse().operation {
        Operation::Simulate {
            validators,
            validators_path,
            events,
            cheaters,
            seed,
            config_path,
            cache_scale,
            db,
            flush_every,
        } => {
            let validators = match validators_path {
                Some(path) => Arc::new(Validators::load(&path).wrap_err(format!(
                    "Failed to load validators file '{}'",
                    path.display()
                ))?),
                None => {
                    ensure!(validators > 0, "At least one validator is needed");
                    Validators::new_test(vec![1; validators])
                }
            };
            let config = match config_path {
                Some(path) => IndexConfig::load(&path)
                    .wrap_err(format!("Failed to load config file '{}'", path.display()))?,
                None => IndexConfig::default_config(CacheScale::ratio(1, cache_scale)),
            };
            simulate(validators, events, cheaters, seed, config, db, flush_every)?
        }
        Operation::Compact { db } => compact(db)?,
        Operation::Metrics {
            datadir,
            address,
            interval_secs,
        } => serve_metrics(datadir, address, Duration::from_secs(interval_secs)).await?,
    }

    Ok(())
}

fn simulate(
    validators: Arc<Validators>,
    events: usize,
    cheaters: usize,
    seed: u64,
    config: IndexConfig,
    db: Option<PathBuf>,
    flush_every: usize,
) -> Result<()> {
    tracing::info!(
        "Simulating {events} events of {} validators, {cheaters} of them forking",
        validators.len()
    );
    let store: Arc<dyn Store> = match &db {
        Some(path) => Arc::new(
            RocksStore::open(path)
                .wrap_err(format!("Failed to open store '{}'", path.display()))?,
        ),
        None => Arc::new(MemoryStore::new()),
    };

    let registry = Registry::new();
    let metrics = Metrics::new(&registry);
    let crit: Crit = Arc::new(|e: eyre::Report| {
        tracing::error!("Critical error: {e:?}");
        std::process::exit(1);
    });
    let index = Index::new(crit, config)?.with_metrics(metrics.clone());

    let mut generator = DagGenerator::new(validators.clone(), cheaters, seed)?;
    index.reset(validators.clone(), store, generator.resolver());

    let mut last_by_creator = Vec::new();
    for i in 0..events {
        let event = generator.next_event();
        index
            .add(event.as_ref())
            .wrap_err(format!("Failed to index event {event}"))?;
        if (i + 1) % flush_every.max(1) == 0 {
            index.flush();
        }
        last_by_creator.retain(|e: &Arc<Event>| e.creator() != event.creator());
        last_by_creator.push(event);
    }
    index.flush();

    let mut table = PrettyTable::new();
    table.set_format(default_table_format());
    table.set_titles(row![bH4->"Latest Events"]);
    table.add_row(row![b->"Creator", b->"Seq", b->"Median time", b->"Cheaters"]);
    last_by_creator.sort_by_key(|e| e.creator());
    for event in &last_by_creator {
        let cheaters = index.cheaters(&event.id());
        table.add_row(row![
            event.creator(),
            event.seq(),
            index.median_time(&event.id(), 0),
            format!("{cheaters:?}")
        ]);
    }
    table.add_row(row![bH4->""]);
    table.add_row(row![b->"Events indexed:", H3->metrics.events_indexed_total.get()]);
    table.add_row(row![b->"Forks observed:", H3->metrics.forks_observed_total.get()]);
    table.add_row(row![b->"Branches:", H3->index.engine().branch_count()]);
    println!("\n");
    table.printstd();
    println!("\n");
    Ok(())
}

fn compact(db: PathBuf) -> Result<()> {
    let store = RocksStore::open(&db)
        .wrap_err(format!("Failed to open store '{}'", db.display()))?;
    store::compact(&store, &db.display().to_string())
        .wrap_err(format!("Failed to compact store '{}'", db.display()))?;
    store.sync().wrap_err("Failed to sync the store")?;
    Ok(())
}

async fn serve_metrics(datadir: PathBuf, address: SocketAddr, interval: Duration) -> Result<()> {
    let registry = Registry::new();
    let metrics = Metrics::new(&registry);
    let _monitor = metrics.spawn_db_size_monitor(datadir, interval);
    let (_, server) = start_prometheus_server(address, &registry)
        .await
        .wrap_err(format!("Failed to bind metrics server on {address}"))?;
    server
        .await
        .map_err(|e| eyre!("Metrics server panicked: {e}"))?
        .wrap_err("Metrics server failed")
}

fn default_table_format() -> format::TableFormat {
    format::FormatBuilder::new()
        .separators(
            &[
                format::LinePosition::Top,
                format::LinePosition::Bottom,
                format::LinePosition::Title,
            ],
            format::LineSeparator::new('-', '-', '-', '-'),
        )
        .padding(1, 1)
        .build()
}
