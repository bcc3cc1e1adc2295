// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration types for confirmation depth

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use std::time::Duration;

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ConfirmationConfig {
    /// Chains with instant finality never wait for confirmations
    #[serde(default)]
    pub instant_finality: bool,

    /// Lower bound, reflects how often shallow reorgs happen
    #[serde(default = "default_min_confirmations")]
    pub min_confirmations: u64,

    #[serde(default)]
    pub max_confirmations: Option<u64>,

    /// How often held batches are re-checked against the chain tip
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(default = "default_check_interval")]
    pub check_interval: Duration,
}

fn default_min_confirmations() -> u64 {
    2
}

fn default_check_interval() -> Duration {
    Duration::from_secs(5)
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            instant_finality: false,
            min_confirmations: default_min_confirmations(),
            max_confirmations: None,
            check_interval: default_check_interval(),
        }
    }
}

impl ConfirmationConfig {
    /// Create config for a chain with instant finality
    pub fn instant() -> Self {
        Self {
            instant_finality: true,
            ..Default::default()
        }
    }

    /// Builder: set the confirmation bounds
    pub fn with_bounds(mut self, min: u64, max: Option<u64>) -> Self {
        self.min_confirmations = min;
        self.max_confirmations = max;
        self
    }

    /// Confirmations to require when the value at risk cannot be priced.
    pub fn fallback_confirmations(&self) -> u64 {
        self.max_confirmations.unwrap_or(self.min_confirmations)
    }

    pub fn clamp(&self, confirmations: u64) -> u64 {
        let at_least_min = confirmations.max(self.min_confirmations);
        match self.max_confirmations {
            Some(max) => at_least_min.min(max.max(self.min_confirmations)),
            None => at_least_min,
        }
    }
}
