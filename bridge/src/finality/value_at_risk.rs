// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use super::config::ConfirmationConfig;
use super::policy::{ConfirmationPolicy, SecuritySource};
use crate::error::BridgeResult;
use crate::types::InboundBatch;
use async_trait::async_trait;
use ethers::types::U256;
use std::sync::Arc;
use tracing::{debug, warn};

const BPS_DENOMINATOR: u64 = 10_000;

/// `ceil(2 * value_at_risk / available_security)`, clamped to the configured bounds.
///
/// Available security is the chain's per-block reward budget scaled by a
/// basis-point multiplier. Mempool batches and instant-finality chains need no
/// confirmations. When the batch cannot be priced, or no security is available,
/// the configured maximum (or the minimum when there is none) is used.
pub struct ValueAtRiskPolicy {
    chain: String,
    config: ConfirmationConfig,
    source: Arc<dyn SecuritySource>,
}

impl ValueAtRiskPolicy {
    pub fn new(
        chain: impl Into<String>,
        config: ConfirmationConfig,
        source: Arc<dyn SecuritySource>,
    ) -> Self {
        Self {
            chain: chain.into(),
            config,
            source,
        }
    }

    async fn value_at_risk(&self, batch: &InboundBatch) -> BridgeResult<U256> {
        let mut total = U256::zero();
        for item in &batch.items {
            let value = self
                .source
                .value_in_native(&self.chain, &item.token, item.amount)
                .await?;
            total = total.saturating_add(value);
        }
        Ok(total)
    }

    async fn available_security(&self) -> BridgeResult<U256> {
        let budget = self.source.block_reward_budget(&self.chain).await?;
        let bps = self.source.security_multiplier_bps(&self.chain).await?;
        Ok(budget.saturating_mul(U256::from(bps)) / U256::from(BPS_DENOMINATOR))
    }

    async fn compute(&self, batch: &InboundBatch) -> BridgeResult<Option<u64>> {
        let available = self.available_security().await?;
        if available.is_zero() {
            return Ok(None);
        }
        let value = self.value_at_risk(batch).await?;
        let doubled = value.saturating_mul(U256::from(2u8));
        let (quotient, remainder) = doubled.div_mod(available);
        let confirmations = if remainder.is_zero() {
            quotient
        } else {
            quotient.saturating_add(U256::one())
        };
        Ok(Some(if confirmations > U256::from(u64::MAX) {
            u64::MAX
        } else {
            confirmations.as_u64()
        }))
    }
}

#[async_trait]
impl ConfirmationPolicy for ValueAtRiskPolicy {
    async fn required_confirmations(&self, batch: &InboundBatch) -> u64 {
        if batch.is_mempool() || self.config.instant_finality {
            return 0;
        }
        match self.compute(batch).await {
            Ok(Some(confirmations)) => {
                let required = self.config.clamp(confirmations);
                debug!(
                    "[{}] Batch at height {} requires {} confirmations (raw {})",
                    self.chain, batch.height, required, confirmations
                );
                required
            }
            Ok(None) => {
                warn!(
                    "[{}] No available security reported, using fallback confirmations",
                    self.chain
                );
                self.config.fallback_confirmations()
            }
            Err(e) => {
                warn!(
                    "[{}] Failed to price batch at height {}: {:?}, using fallback confirmations",
                    self.chain, batch.height, e
                );
                self.config.fallback_confirmations()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{test_item_with_amount, FakeSecuritySource};

    fn policy(source: FakeSecuritySource, config: ConfirmationConfig) -> ValueAtRiskPolicy {
        ValueAtRiskPolicy::new("eth", config, Arc::new(source))
    }

    fn batch(amounts: &[u64]) -> InboundBatch {
        let items = amounts
            .iter()
            .enumerate()
            .map(|(i, amount)| test_item_with_amount(&format!("tx{i}"), 10, *amount))
            .collect();
        InboundBatch::new_block("eth", 10, items)
    }

    #[tokio::test]
    async fn test_mempool_and_instant_finality_need_nothing() {
        let source = FakeSecuritySource::new(1_000, 10_000);
        let p = policy(source.clone(), ConfirmationConfig::default());
        let mempool = InboundBatch::new_mempool("eth", 10, batch(&[1_000_000]).items);
        assert_eq!(p.required_confirmations(&mempool).await, 0);

        let p = policy(source, ConfirmationConfig::instant());
        assert_eq!(p.required_confirmations(&batch(&[1_000_000])).await, 0);
    }

    #[tokio::test]
    async fn test_formula_rounds_up_and_clamps() {
        // available = 1000 * 5000 / 10000 = 500
        let source = FakeSecuritySource::new(1_000, 5_000);
        let p = policy(source, ConfirmationConfig::default().with_bounds(2, Some(50)));

        // 2 * 100 / 500 -> 1 -> min 2
        assert_eq!(p.required_confirmations(&batch(&[100])).await, 2);
        // 2 * 1300 / 500 = 5.2 -> 6
        assert_eq!(p.required_confirmations(&batch(&[1_000, 300])).await, 6);
        // 2 * 1_000_000 / 500 -> 4000 -> max 50
        assert_eq!(p.required_confirmations(&batch(&[1_000_000])).await, 50);
    }

    #[tokio::test]
    async fn test_more_value_never_needs_fewer_confirmations() {
        let source = FakeSecuritySource::new(777, 3_333);
        let p = policy(source, ConfirmationConfig::default());
        let mut last = 0;
        for amount in [0u64, 1, 50, 51, 99, 1_000, 12_345, 1_000_000] {
            let required = p.required_confirmations(&batch(&[amount])).await;
            assert!(required >= last, "{amount} needs {required} < {last}");
            last = required;
        }
    }

    #[tokio::test]
    async fn test_zero_security_falls_back() {
        let source = FakeSecuritySource::new(0, 10_000);
        let p = policy(source.clone(), ConfirmationConfig::default().with_bounds(2, Some(40)));
        assert_eq!(p.required_confirmations(&batch(&[1])).await, 40);

        let p = policy(source, ConfirmationConfig::default());
        assert_eq!(p.required_confirmations(&batch(&[1])).await, 2);
    }

    #[tokio::test]
    async fn test_pricing_failure_falls_back() {
        let source = FakeSecuritySource::new(1_000, 10_000);
        source.fail_pricing(true);
        let p = policy(source, ConfirmationConfig::default().with_bounds(3, Some(20)));
        assert_eq!(p.required_confirmations(&batch(&[1])).await, 20);
    }
}
