// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Rolling-window outbound fee estimator.
//!
//! Every scanned block contributes one fee sample. Once the window is full the
//! estimate is `mean + 3 * stddev` over the window, rounded up to `resolution`.
//! Until then the previous estimate (initially `floor`) stays in place.

use ethers::types::U256;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

pub const GWEI: u64 = 1_000_000_000;

fn default_window_size() -> usize {
    40
}

fn default_resolution() -> u64 {
    GWEI
}

fn default_floor() -> u64 {
    GWEI
}

fn default_transfer_gas_limit() -> u64 {
    80_000
}

fn default_swap_gas_limit() -> u64 {
    400_000
}

/// Fee amounts are in wei.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GasConfig {
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    #[serde(default = "default_resolution")]
    pub resolution: u64,
    #[serde(default = "default_floor")]
    pub floor: u64,
    /// Always reported and used instead of the computed estimate when set
    #[serde(default)]
    pub fixed_rate: Option<u64>,
    #[serde(default = "default_transfer_gas_limit")]
    pub transfer_gas_limit: u64,
    #[serde(default = "default_swap_gas_limit")]
    pub swap_gas_limit: u64,
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            resolution: default_resolution(),
            floor: default_floor(),
            fixed_rate: None,
            transfer_gas_limit: default_transfer_gas_limit(),
            swap_gas_limit: default_swap_gas_limit(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GasEstimator {
    window: VecDeque<U256>,
    window_size: usize,
    resolution: U256,
    fixed_rate: Option<U256>,
    estimate: U256,
}

impl GasEstimator {
    pub fn new(config: &GasConfig) -> Self {
        let window_size = config.window_size.max(1);
        Self {
            window: VecDeque::with_capacity(window_size + 1),
            window_size,
            resolution: U256::from(config.resolution.max(1)),
            fixed_rate: config.fixed_rate.map(U256::from),
            estimate: U256::from(config.floor),
        }
    }

    pub fn is_window_full(&self) -> bool {
        self.window.len() >= self.window_size
    }

    pub fn samples(&self) -> usize {
        self.window.len()
    }

    /// Feed one per-block sample and return the estimate afterwards.
    pub fn add_sample(&mut self, sample: U256) -> U256 {
        self.window.push_back(sample);
        while self.window.len() > self.window_size {
            self.window.pop_front();
        }
        if self.is_window_full() {
            self.estimate = self.round_up(self.mean_plus_three_sigma());
        }
        self.estimate()
    }

    /// Current recommendation in wei.
    pub fn estimate(&self) -> U256 {
        self.fixed_rate.unwrap_or(self.estimate)
    }

    fn mean_plus_three_sigma(&self) -> U256 {
        let n = U256::from(self.window.len());
        let sum = self
            .window
            .iter()
            .fold(U256::zero(), |acc, s| acc.saturating_add(*s));
        let mean = sum / n;
        let squares = self.window.iter().fold(U256::zero(), |acc, s| {
            let diff = if *s > mean { *s - mean } else { mean - *s };
            acc.saturating_add(diff.saturating_mul(diff))
        });
        let std_dev = (squares / n).integer_sqrt();
        mean.saturating_add(std_dev.saturating_mul(U256::from(3u8)))
    }

    fn round_up(&self, value: U256) -> U256 {
        let rem = value % self.resolution;
        if rem.is_zero() {
            value
        } else {
            value - rem + self.resolution
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(window_size: usize) -> GasConfig {
        GasConfig {
            window_size,
            resolution: 10,
            floor: 100,
            ..Default::default()
        }
    }

    #[test]
    fn test_estimate_is_stable_until_window_fills() {
        let mut estimator = GasEstimator::new(&config(40));
        for i in 0..39u64 {
            assert_eq!(estimator.add_sample(U256::from(1_000 + i * 37)), U256::from(100));
        }
        assert!(!estimator.is_window_full());

        // 40 samples of 1000 + 39 * 37 / 2 on average
        let estimate = estimator.add_sample(U256::from(1_000 + 39 * 37));
        assert!(estimator.is_window_full());
        assert_ne!(estimate, U256::from(100));
        assert!(estimate > U256::from(1_000 + 39 * 37 / 2));
        assert!((estimate % U256::from(10)).is_zero());
    }

    #[test]
    fn test_constant_samples_have_no_spread() {
        let mut estimator = GasEstimator::new(&config(4));
        for _ in 0..4 {
            estimator.add_sample(U256::from(250));
        }
        assert_eq!(estimator.estimate(), U256::from(250));
    }

    #[test]
    fn test_mean_plus_three_sigma_rounded_up() {
        let mut estimator = GasEstimator::new(&config(4));
        // mean 25, variance 125, stddev floor(sqrt(125)) = 11 -> 25 + 33 = 58 -> 60
        for sample in [10u64, 20, 30, 40] {
            estimator.add_sample(U256::from(sample));
        }
        assert_eq!(estimator.estimate(), U256::from(60));
    }

    #[test]
    fn test_window_slides() {
        let mut estimator = GasEstimator::new(&config(2));
        estimator.add_sample(U256::from(1_000));
        estimator.add_sample(U256::from(1_000));
        assert_eq!(estimator.estimate(), U256::from(1_000));

        estimator.add_sample(U256::from(2_000));
        estimator.add_sample(U256::from(2_000));
        assert_eq!(estimator.samples(), 2);
        assert_eq!(estimator.estimate(), U256::from(2_000));
    }

    #[test]
    fn test_fixed_rate_overrides() {
        let mut estimator = GasEstimator::new(&GasConfig {
            fixed_rate: Some(7 * GWEI),
            window_size: 1,
            ..Default::default()
        });
        assert_eq!(estimator.add_sample(U256::from(99 * GWEI)), U256::from(7 * GWEI));
    }
}
