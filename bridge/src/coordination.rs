// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The coordination chain as seen from an observer node.
//!
//! The node reads consensus state through [`CoordinationClient`] and hands its
//! observations over through the bounded queues in [`BridgeQueues`].

use crate::error::{BridgeError, BridgeResult};
use crate::ttl_cache::TtlCache;
use crate::types::{
    Blame, ErrataBlock, Height, InboundBatch, NetworkFee, NetworkFeeRate, SolvencyReport,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[async_trait::async_trait]
pub trait CoordinationClient: Send + Sync {
    async fn get_block_height(&self) -> BridgeResult<Height>;

    /// Highest height of `chain` the coordination chain has accepted observations for.
    async fn get_last_observed_in_height(&self, chain: &str) -> BridgeResult<Height>;

    async fn is_synced(&self) -> BridgeResult<bool>;

    /// Last fee the coordination chain acknowledged for `chain`.
    async fn get_network_fee(&self, chain: &str) -> BridgeResult<Option<NetworkFeeRate>>;

    async fn has_network_fee(&self, chain: &str) -> BridgeResult<bool> {
        Ok(self.get_network_fee(chain).await?.is_some())
    }

    async fn post_keysign_failure(&self, blame: &Blame, height: Height, memo: &str)
        -> BridgeResult<()>;
}

/// Block until the coordination chain reports itself synced. Returns `false` when
/// cancelled first. Query errors are logged and polled again.
pub async fn wait_sync<C: CoordinationClient + ?Sized>(
    client: &C,
    poll_interval: Duration,
    cancel: &CancellationToken,
) -> bool {
    loop {
        match client.is_synced().await {
            Ok(true) => return true,
            Ok(false) => debug!("Coordination chain not synced yet"),
            Err(e) => warn!("Failed to query coordination sync status: {:?}", e),
        }
        tokio::select! {
            _ = cancel.cancelled() => return false,
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }
}

/// Producer side of the hand-off queues.
#[derive(Clone, Debug)]
pub struct BridgeQueues {
    pub inbound: mpsc::Sender<InboundBatch>,
    pub errata: mpsc::Sender<ErrataBlock>,
    pub network_fee: mpsc::Sender<NetworkFee>,
    pub solvency: mpsc::Sender<SolvencyReport>,
}

/// Consumer side of the hand-off queues.
#[derive(Debug)]
pub struct BridgeQueueReceivers {
    pub inbound: mpsc::Receiver<InboundBatch>,
    pub errata: mpsc::Receiver<ErrataBlock>,
    pub network_fee: mpsc::Receiver<NetworkFee>,
    pub solvency: mpsc::Receiver<SolvencyReport>,
}

impl BridgeQueues {
    pub fn new(capacity: usize) -> (Self, BridgeQueueReceivers) {
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        let (errata_tx, errata_rx) = mpsc::channel(capacity);
        let (fee_tx, fee_rx) = mpsc::channel(capacity);
        let (solvency_tx, solvency_rx) = mpsc::channel(capacity);
        (
            Self {
                inbound: inbound_tx,
                errata: errata_tx,
                network_fee: fee_tx,
                solvency: solvency_tx,
            },
            BridgeQueueReceivers {
                inbound: inbound_rx,
                errata: errata_rx,
                network_fee: fee_rx,
                solvency: solvency_rx,
            },
        )
    }
}

/// Push onto a bounded queue, giving up when `cancel` fires first.
pub async fn send_cancellable<T>(
    sender: &mpsc::Sender<T>,
    value: T,
    cancel: &CancellationToken,
    queue: &'static str,
) -> BridgeResult<bool> {
    tokio::select! {
        _ = cancel.cancelled() => Ok(false),
        result = sender.send(value) => {
            result.map_err(|_| BridgeError::QueueClosed(queue))?;
            Ok(true)
        }
    }
}

const HEIGHT_CACHE_KEY: &str = "coordination-height";

/// Caches the frequently polled read-only answers of another client.
pub struct CachedCoordinationClient<C: ?Sized> {
    inner: Arc<C>,
    heights: TtlCache<String, Height>,
    fees: TtlCache<String, Option<NetworkFeeRate>>,
}

impl<C: CoordinationClient + ?Sized> CachedCoordinationClient<C> {
    pub fn new(inner: Arc<C>, ttl: Duration) -> Self {
        Self {
            inner,
            heights: TtlCache::new(ttl),
            fees: TtlCache::new(ttl),
        }
    }
}

#[async_trait::async_trait]
impl<C: CoordinationClient + ?Sized> CoordinationClient for CachedCoordinationClient<C> {
    async fn get_block_height(&self) -> BridgeResult<Height> {
        let key = HEIGHT_CACHE_KEY.to_string();
        if let Some(height) = self.heights.get_if_valid(&key).await {
            return Ok(height);
        }
        let height = self.inner.get_block_height().await?;
        self.heights.update(key, height).await;
        Ok(height)
    }

    async fn get_last_observed_in_height(&self, chain: &str) -> BridgeResult<Height> {
        self.inner.get_last_observed_in_height(chain).await
    }

    async fn is_synced(&self) -> BridgeResult<bool> {
        self.inner.is_synced().await
    }

    async fn get_network_fee(&self, chain: &str) -> BridgeResult<Option<NetworkFeeRate>> {
        let key = chain.to_string();
        if let Some(fee) = self.fees.get_if_valid(&key).await {
            return Ok(fee);
        }
        let fee = self.inner.get_network_fee(chain).await?;
        self.fees.update(key, fee).await;
        Ok(fee)
    }

    async fn post_keysign_failure(
        &self,
        blame: &Blame,
        height: Height,
        memo: &str,
    ) -> BridgeResult<()> {
        self.inner.post_keysign_failure(blame, height, memo).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeysignFailureRecord {
    pub blame: Blame,
    pub height: Height,
    pub memo: String,
}

/// In-process coordinator for running a node without a coordination chain. It
/// reports itself synced, acknowledges every fee it receives and logs everything
/// else it is handed.
#[derive(Default)]
pub struct StandaloneCoordinator {
    height: AtomicU64,
    observed: RwLock<HashMap<String, Height>>,
    fees: RwLock<HashMap<String, NetworkFeeRate>>,
    keysign_failures: RwLock<Vec<KeysignFailureRecord>>,
}

impl StandaloneCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn keysign_failures(&self) -> Vec<KeysignFailureRecord> {
        self.keysign_failures.read().await.clone()
    }

    async fn record_batch(&self, batch: &InboundBatch) {
        let mut observed = self.observed.write().await;
        let entry = observed.entry(batch.chain.clone()).or_default();
        *entry = (*entry).max(batch.height);
        self.height.fetch_add(1, Ordering::Relaxed);
    }

    /// Drain all queues until cancelled or every producer is gone.
    pub fn spawn(
        self: Arc<Self>,
        mut receivers: BridgeQueueReceivers,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let (mut inbound, mut errata, mut fees, mut solvency) = (true, true, true, true);
            while inbound || errata || fees || solvency {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    batch = receivers.inbound.recv(), if inbound => match batch {
                        Some(batch) => {
                            info!(
                                "[{}] Relayed {:?} batch at height {} with {} items",
                                batch.chain,
                                batch.kind,
                                batch.height,
                                batch.items.len()
                            );
                            self.record_batch(&batch).await;
                        }
                        None => inbound = false,
                    },
                    block = receivers.errata.recv(), if errata => match block {
                        Some(block) => warn!(
                            "[{}] Errata for height {}: {:?}",
                            block.chain,
                            block.height,
                            block.txs.iter().map(|tx| tx.tx_id.as_str()).collect::<Vec<_>>()
                        ),
                        None => errata = false,
                    },
                    fee = receivers.network_fee.recv(), if fees => match fee {
                        Some(fee) => {
                            info!("[{}] Network fee at height {}: {:?}", fee.chain, fee.height, fee.fee);
                            self.fees.write().await.insert(fee.chain, fee.fee);
                        }
                        None => fees = false,
                    },
                    report = receivers.solvency.recv(), if solvency => match report {
                        Some(report) => info!(
                            "[{}] Solvency of vault {} at height {}: {:?}",
                            report.chain, report.vault, report.height, report.coins
                        ),
                        None => solvency = false,
                    },
                }
            }
            info!("Standalone coordinator stopped");
        })
    }
}

#[async_trait::async_trait]
impl CoordinationClient for StandaloneCoordinator {
    async fn get_block_height(&self) -> BridgeResult<Height> {
        Ok(self.height.load(Ordering::Relaxed))
    }

    async fn get_last_observed_in_height(&self, chain: &str) -> BridgeResult<Height> {
        Ok(self
            .observed
            .read()
            .await
            .get(chain)
            .copied()
            .unwrap_or_default())
    }

    async fn is_synced(&self) -> BridgeResult<bool> {
        Ok(true)
    }

    async fn get_network_fee(&self, chain: &str) -> BridgeResult<Option<NetworkFeeRate>> {
        Ok(self.fees.read().await.get(chain).copied())
    }

    async fn post_keysign_failure(
        &self,
        blame: &Blame,
        height: Height,
        memo: &str,
    ) -> BridgeResult<()> {
        warn!("Keysign failure at height {} for {}: {}", height, memo, blame);
        self.keysign_failures.write().await.push(KeysignFailureRecord {
            blame: blame.clone(),
            height,
            memo: memo.to_string(),
        });
        Ok(())
    }
}
