// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::chain_syncer::eth::EthChainConfig;
use crate::error::{BridgeError, BridgeResult};
use bridge_config::Config;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[serde_as]
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct BridgeNodeConfig {
    // The port of the metrics and health server.
    pub metrics_port: u16,
    // RocksDB directory. Without it every store lives in memory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,
    // Capacity of every hand-off queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    // How long coordination chain answers are reused.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(default = "default_coordination_cache_ttl")]
    pub coordination_cache_ttl: Duration,
    // Observed chains
    pub chains: Vec<EthChainConfig>,
}

fn default_queue_capacity() -> usize {
    1000
}

fn default_coordination_cache_ttl() -> Duration {
    Duration::from_secs(6)
}

impl Config for BridgeNodeConfig {}

impl BridgeNodeConfig {
    pub fn validate(&self) -> BridgeResult<()> {
        info!("Starting config validation");
        if self.chains.is_empty() {
            return Err(BridgeError::InvalidConfig(
                "at least one chain must be configured".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(BridgeError::InvalidConfig(
                "queue-capacity must be positive".to_string(),
            ));
        }
        let mut names = HashSet::new();
        for chain in &self.chains {
            chain.validate()?;
            if !names.insert(chain.chain_name.as_str()) {
                return Err(BridgeError::InvalidConfig(format!(
                    "chain {} is configured twice",
                    chain.chain_name
                )));
            }
        }
        info!("Config validation complete, {} chains", self.chains.len());
        Ok(())
    }
}
