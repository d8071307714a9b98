// Copyright (c) Mysten Labs, Inc.
// Modifications Copyright (c) 2025 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::{io, net::SocketAddr};

use axum::{extract::State, http::StatusCode, routing::get, Router};
use prometheus::{Registry, TextEncoder};
use tokio::{net::TcpListener, task::JoinHandle};

pub const METRICS_ROUTE: &str = "/metrics";

/// Binds the exporter of `registry` and serves it in the background. Returns
/// the bound address, which differs from `address` when port 0 was requested.
pub async fn start_prometheus_server(
    address: SocketAddr,
    registry: &Registry,
) -> io::Result<(SocketAddr, JoinHandle<io::Result<()>>)> {
    let listener = TcpListener::bind(&address).await?;
    let local = listener.local_addr()?;
    let app = Router::new()
        .route(METRICS_ROUTE, get(metrics))
        .with_state(registry.clone());

    tracing::info!("Prometheus exporter listening on {local}{METRICS_ROUTE}");
    let handle = tokio::spawn(async move { axum::serve(listener, app).await });
    Ok((local, handle))
}

async fn metrics(State(registry): State<Registry>) -> Result<String, (StatusCode, String)> {
    TextEncoder
        .encode_to_string(&registry.gather())
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Unable to encode metrics: {e}"),
            )
        })
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use super::*;
    use crate::metrics::{Metrics, EVENTS_INDEXED_TOTAL, NAMESPACE};

    #[tokio::test]
    async fn metrics_are_encoded_as_text() {
        let registry = Registry::new();
        let index_metrics = Metrics::new(&registry);
        index_metrics.events_indexed_total.inc_by(3);

        let body = metrics(State(registry)).await.unwrap();
        assert!(body.contains(&format!("{NAMESPACE}_{EVENTS_INDEXED_TOTAL} 3")));
    }

    #[tokio::test]
    async fn exporter_binds_any_port() {
        let registry = Registry::new();
        let address = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        let (local, handle) = start_prometheus_server(address, &registry).await.unwrap();
        assert_ne!(local.port(), 0);
        handle.abort();
    }
}
