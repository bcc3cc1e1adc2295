// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Health and prometheus endpoints of the observer.

use crate::chain_syncer::ScannerState;
use axum::extract::State;
use axum::{http::StatusCode, routing::get, Json, Router};
use prometheus::{Encoder, Registry, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

pub const HEALTH_PATH: &str = "/health";
pub const METRICS_PATH: &str = "/metrics";

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ChainHealth {
    pub chain: String,
    pub healthy: bool,
    pub last_scanned_height: u64,
}

#[derive(Clone)]
pub struct ServerState {
    registry: Registry,
    chains: Arc<Vec<(String, Arc<ScannerState>)>>,
}

impl ServerState {
    pub fn new(registry: Registry, chains: Vec<(String, Arc<ScannerState>)>) -> Self {
        Self {
            registry,
            chains: Arc::new(chains),
        }
    }
}

pub fn run_server(socket_address: &SocketAddr, state: ServerState) -> tokio::task::JoinHandle<()> {
    let socket_address = *socket_address;
    tokio::spawn(async move {
        let listener = match tokio::net::TcpListener::bind(socket_address).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to bind metrics server to {}: {:?}", socket_address, e);
                return;
            }
        };
        info!("Metrics server listening on {}", socket_address);
        if let Err(e) = axum::serve(listener, make_router(state).into_make_service()).await {
            error!("Metrics server error: {:?}", e);
        }
    })
}

pub(crate) fn make_router(state: ServerState) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route(HEALTH_PATH, get(health_check))
        .route(METRICS_PATH, get(metrics))
        .with_state(state)
}

// 503 while any chain is unhealthy
async fn health_check(State(state): State<ServerState>) -> (StatusCode, Json<Vec<ChainHealth>>) {
    let chains: Vec<_> = state
        .chains
        .iter()
        .map(|(chain, scanner)| ChainHealth {
            chain: chain.clone(),
            healthy: scanner.is_healthy(),
            last_scanned_height: scanner.previous_block(),
        })
        .collect();
    let status = if chains.iter().all(|c| c.healthy) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(chains))
}

async fn metrics(State(state): State<ServerState>) -> (StatusCode, String) {
    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&state.registry.gather(), &mut buffer) {
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }
    (
        StatusCode::OK,
        String::from_utf8_lossy(&buffer).into_owned(),
    )
}
