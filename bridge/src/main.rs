// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use bridge_config::Config;
use bridge_observer::config::BridgeNodeConfig;
use bridge_observer::node::run_bridge_node;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(rename_all = "kebab-case")]
#[clap(name = env!("CARGO_BIN_NAME"))]
#[clap(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    #[clap(long)]
    pub config_path: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = BridgeNodeConfig::load(&args.config_path)?;
    let prometheus_registry = prometheus::Registry::new();
    info!(
        "Starting bridge observer for {} chains, metrics on port {}",
        config.chains.len(),
        config.metrics_port
    );

    let node = run_bridge_node(config, prometheus_registry).await?;
    let cancel = node.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            cancel.cancel();
        }
    });
    node.join().await;
    info!("Bridge observer stopped");
    Ok(())
}
