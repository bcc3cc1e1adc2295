// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration of one EVM chain.

use crate::chain_syncer::common::{ReorgConfig, ScannerConfig};
use crate::error::{BridgeError, BridgeResult};
use crate::finality::ConfirmationConfig;
use crate::gas_estimator::GasConfig;
use crate::types::MAX_TOKEN_DECIMALS;
use ethers::types::Address as EthAddress;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use std::time::Duration;

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EthChainConfig {
    /// Chain identifier used in logs, metrics and storage keys (e.g. "eth", "bsc")
    pub chain_name: String,

    pub rpc_url: String,

    /// Construction fails when the endpoint reports another chain id
    #[serde(default)]
    pub expected_chain_id: Option<u64>,

    /// Bridge contract whose logs are observed
    pub bridge_contract: String,

    /// Scan from this height instead of resuming
    #[serde(default)]
    pub start_height: Option<u64>,

    #[serde(default)]
    pub scanner: ScannerConfig,

    #[serde(default)]
    pub gas: GasConfig,

    #[serde(default)]
    pub confirmation: ConfirmationConfig,

    #[serde(default)]
    pub reorg: ReorgConfig,

    /// ERC-20 tokens whose events are accepted. The zero address stands for the
    /// native asset and is always accepted.
    #[serde(default)]
    pub token_whitelist: Vec<String>,

    /// Vault addresses included in solvency reports
    #[serde(default)]
    pub vaults: Vec<String>,

    #[serde(default = "default_native_symbol")]
    pub native_symbol: String,

    #[serde(default = "default_native_decimals")]
    pub native_decimals: u32,

    /// Maximum gap between pending and latest nonce before signing is refused
    #[serde(default = "default_max_pending_nonces")]
    pub max_pending_nonces: u64,

    /// Blocks further than this behind the tip skip fee and solvency reporting
    #[serde(default = "default_observation_flexibility_blocks")]
    pub observation_flexibility_blocks: u64,

    #[serde(default = "default_solvency_interval_blocks")]
    pub solvency_interval_blocks: u64,

    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout: Duration,

    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
}

fn default_native_symbol() -> String {
    "ETH".to_string()
}

fn default_native_decimals() -> u32 {
    18
}

fn default_max_pending_nonces() -> u64 {
    3
}

fn default_observation_flexibility_blocks() -> u64 {
    10
}

fn default_solvency_interval_blocks() -> u64 {
    100
}

fn default_rpc_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_max_concurrent_requests() -> usize {
    16
}

impl EthChainConfig {
    pub fn new(chain_name: &str, rpc_url: &str, bridge_contract: &str) -> Self {
        Self {
            chain_name: chain_name.to_string(),
            rpc_url: rpc_url.to_string(),
            expected_chain_id: None,
            bridge_contract: bridge_contract.to_string(),
            start_height: None,
            scanner: ScannerConfig::default(),
            gas: GasConfig::default(),
            confirmation: ConfirmationConfig::default(),
            reorg: ReorgConfig::default(),
            token_whitelist: Vec::new(),
            vaults: Vec::new(),
            native_symbol: default_native_symbol(),
            native_decimals: default_native_decimals(),
            max_pending_nonces: default_max_pending_nonces(),
            observation_flexibility_blocks: default_observation_flexibility_blocks(),
            solvency_interval_blocks: default_solvency_interval_blocks(),
            rpc_timeout: default_rpc_timeout(),
            max_concurrent_requests: default_max_concurrent_requests(),
        }
    }

    pub fn bridge_contract_address(&self) -> BridgeResult<EthAddress> {
        parse_address(&self.bridge_contract)
    }

    pub fn whitelisted_tokens(&self) -> BridgeResult<Vec<EthAddress>> {
        self.token_whitelist.iter().map(|a| parse_address(a)).collect()
    }

    pub fn vault_addresses(&self) -> BridgeResult<Vec<EthAddress>> {
        self.vaults.iter().map(|a| parse_address(a)).collect()
    }

    pub fn validate(&self) -> BridgeResult<()> {
        if self.chain_name.is_empty() {
            return Err(BridgeError::InvalidConfig(
                "chain-name cannot be empty".to_string(),
            ));
        }
        if self.rpc_url.is_empty() {
            return Err(BridgeError::InvalidConfig(format!(
                "[{}] rpc-url cannot be empty",
                self.chain_name
            )));
        }
        self.bridge_contract_address()?;
        self.whitelisted_tokens()?;
        self.vault_addresses()?;
        if self.gas.window_size == 0 || self.gas.resolution == 0 {
            return Err(BridgeError::InvalidConfig(format!(
                "[{}] gas window-size and resolution must be > 0",
                self.chain_name
            )));
        }
        if self.scanner.block_time.is_zero() {
            return Err(BridgeError::InvalidConfig(format!(
                "[{}] block-time must be > 0",
                self.chain_name
            )));
        }
        if let Some(max) = self.confirmation.max_confirmations {
            if max < self.confirmation.min_confirmations {
                return Err(BridgeError::InvalidConfig(format!(
                    "[{}] max-confirmations {} is below min-confirmations {}",
                    self.chain_name, max, self.confirmation.min_confirmations
                )));
            }
        }
        if self.reorg.enabled && self.reorg.max_reorg_window == 0 {
            return Err(BridgeError::InvalidConfig(format!(
                "[{}] max-reorg-window must be > 0 when reorg detection is enabled",
                self.chain_name
            )));
        }
        if self.native_decimals > MAX_TOKEN_DECIMALS {
            return Err(BridgeError::InvalidConfig(format!(
                "[{}] native-decimals {} exceeds {}",
                self.chain_name, self.native_decimals, MAX_TOKEN_DECIMALS
            )));
        }
        if self.solvency_interval_blocks == 0 {
            return Err(BridgeError::InvalidConfig(format!(
                "[{}] solvency-interval-blocks must be > 0",
                self.chain_name
            )));
        }
        Ok(())
    }
}

pub(crate) fn parse_address(address: &str) -> BridgeResult<EthAddress> {
    address
        .parse::<EthAddress>()
        .map_err(|e| BridgeError::InvalidConfig(format!("invalid address {}: {}", address, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONTRACT: &str = "0x0000000000000000000000000000000000000abc";

    #[test]
    fn test_defaults_from_minimal_yaml() {
        let yaml = r#"
chain-name: eth
rpc-url: http://localhost:8545
bridge-contract: "0x0000000000000000000000000000000000000abc"
gas:
  window-size: 20
scanner:
  block-time: 2000
"#;
        let config: EthChainConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.gas.window_size, 20);
        assert_eq!(config.gas.resolution, crate::gas_estimator::GWEI);
        assert_eq!(config.scanner.block_time, Duration::from_secs(2));
        assert_eq!(config.confirmation.min_confirmations, 2);
        assert_eq!(config.native_decimals, 18);
        assert_eq!(config.rpc_timeout, Duration::from_secs(10));
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = EthChainConfig::new("eth", "http://localhost:8545", "not-an-address");
        assert!(matches!(
            config.validate(),
            Err(BridgeError::InvalidConfig(_))
        ));

        config.bridge_contract = CONTRACT.to_string();
        config.validate().unwrap();

        config.confirmation.max_confirmations = Some(1);
        assert!(config.validate().is_err());
        config.confirmation.max_confirmations = Some(10);

        config.token_whitelist.push("0x123".to_string());
        assert!(config.validate().is_err());
        config.token_whitelist.clear();

        config.native_decimals = 80;
        assert!(config.validate().is_err());
        config.native_decimals = 18;

        config.rpc_url.clear();
        assert!(config.validate().is_err());
    }
}
