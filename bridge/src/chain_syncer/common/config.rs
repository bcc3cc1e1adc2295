// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration shared by every chain's scanner.

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use std::time::Duration;

/// Timing of the block and mempool loops.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ScannerConfig {
    /// Approximate block time, converts wall-clock thresholds into block counts
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(default = "default_block_time")]
    pub block_time: Duration,

    /// Sleep when the tip has not advanced or a block fetch failed
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(default = "default_block_backoff")]
    pub block_backoff: Duration,

    /// Sleep when a mempool poll returned nothing
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(default = "default_mempool_backoff")]
    pub mempool_backoff: Duration,

    /// Lag (in wall-clock time) still considered healthy
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(default = "default_max_health_lag_time")]
    pub max_health_lag_time: Duration,

    /// How far behind consensus a locally stored cursor may resume from
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(default = "default_max_resume_lag_time")]
    pub max_resume_lag_time: Duration,

    /// Poll interval while waiting for the coordination chain to sync
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(default = "default_sync_poll_interval")]
    pub sync_poll_interval: Duration,

    /// How often the tracked fee is compared with the acknowledged one
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(default = "default_fee_check_interval")]
    pub fee_check_interval: Duration,
}

fn default_block_time() -> Duration {
    Duration::from_secs(12)
}

fn default_block_backoff() -> Duration {
    Duration::from_secs(3)
}

fn default_mempool_backoff() -> Duration {
    Duration::from_secs(5)
}

fn default_max_health_lag_time() -> Duration {
    Duration::from_secs(90)
}

fn default_max_resume_lag_time() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_sync_poll_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_fee_check_interval() -> Duration {
    Duration::from_secs(60 * 60)
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            block_time: default_block_time(),
            block_backoff: default_block_backoff(),
            mempool_backoff: default_mempool_backoff(),
            max_health_lag_time: default_max_health_lag_time(),
            max_resume_lag_time: default_max_resume_lag_time(),
            sync_poll_interval: default_sync_poll_interval(),
            fee_check_interval: default_fee_check_interval(),
        }
    }
}

impl ScannerConfig {
    /// Number of blocks produced in `duration`, at least one.
    pub fn blocks_in(&self, duration: Duration) -> u64 {
        let block_ms = self.block_time.as_millis().max(1);
        ((duration.as_millis() / block_ms) as u64).max(1)
    }

    pub fn max_health_lag_blocks(&self) -> u64 {
        self.blocks_in(self.max_health_lag_time)
    }

    pub fn max_resume_lag_blocks(&self) -> u64 {
        self.blocks_in(self.max_resume_lag_time)
    }

    pub fn fee_check_blocks(&self) -> u64 {
        self.blocks_in(self.fee_check_interval)
    }
}

/// Configuration for reorg detection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ReorgConfig {
    #[serde(default = "default_reorg_enabled")]
    pub enabled: bool,

    /// BlockMeta older than `tip - max_reorg_window` is pruned
    #[serde(default = "default_max_reorg_window")]
    pub max_reorg_window: u64,
}

fn default_reorg_enabled() -> bool {
    true
}

fn default_max_reorg_window() -> u64 {
    // ETH mainnet finality depth, doubled
    128
}

impl Default for ReorgConfig {
    fn default() -> Self {
        Self {
            enabled: default_reorg_enabled(),
            max_reorg_window: default_max_reorg_window(),
        }
    }
}
