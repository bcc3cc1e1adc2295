// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Core confirmation policy traits

use crate::error::BridgeResult;
use crate::types::{Height, InboundBatch};
use async_trait::async_trait;
use ethers::types::U256;

/// Decides how many confirmations an inbound batch needs before it is relayed.
///
/// Policies are chain-pluggable: chains with very different finality models plug
/// in their own implementation instead of sharing one formula.
#[async_trait]
pub trait ConfirmationPolicy: Send + Sync {
    async fn required_confirmations(&self, batch: &InboundBatch) -> u64;
}

/// Whether `batch` may be relayed at `current_height`.
pub fn is_confirmation_ready(batch: &InboundBatch, current_height: Height) -> bool {
    current_height.saturating_sub(batch.height) >= batch.required_confirmations
}

/// Economic inputs of the value-at-risk policy.
///
/// All values are in the chain's native asset at internal precision.
#[async_trait]
pub trait SecuritySource: Send + Sync {
    /// Recent per-block reward plus fee budget of the chain.
    async fn block_reward_budget(&self, chain: &str) -> BridgeResult<U256>;

    /// Share of the budget considered available security, in basis points.
    async fn security_multiplier_bps(&self, chain: &str) -> BridgeResult<u64>;

    /// Price `amount` of `token` in the chain's native asset.
    async fn value_in_native(&self, chain: &str, token: &str, amount: U256) -> BridgeResult<U256>;
}

/// Every batch is final as soon as it is included.
#[derive(Debug, Default, Clone, Copy)]
pub struct InstantFinality;

#[async_trait]
impl ConfirmationPolicy for InstantFinality {
    async fn required_confirmations(&self, _batch: &InboundBatch) -> u64 {
        0
    }
}

/// Fixed depth for every non-mempool batch.
#[derive(Debug, Clone, Copy)]
pub struct FixedConfirmations(pub u64);

#[async_trait]
impl ConfirmationPolicy for FixedConfirmations {
    async fn required_confirmations(&self, batch: &InboundBatch) -> u64 {
        if batch.is_mempool() {
            0
        } else {
            self.0
        }
    }
}
