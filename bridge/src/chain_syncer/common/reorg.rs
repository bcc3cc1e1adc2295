// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Reorg detection and errata generation on top of the `BlockMeta` store.
//!
//! A fork is detected when the parent hash of a freshly fetched block does not match
//! the hash recorded for the previous height. The detector then re-checks every
//! customer transaction it still remembers, retracts the ones that disappeared or
//! failed, repairs the stored hashes and rescans heights whose block changed.
//! Running it again without further chain changes emits nothing.

use super::types::{SyncError, SyncResult};
use crate::coordination::send_cancellable;
use crate::metrics::BridgeMetrics;
use crate::storage::BlockMetaStore;
use crate::types::{ErrataBlock, ErrataTx, Height, InboundItem};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub height: Height,
    pub hash: String,
    pub parent_hash: String,
}

/// Liveness of a previously observed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Success,
    /// Known to the node but not mined yet; treated as still valid
    Pending,
    Missing,
    Failed,
}

impl TxStatus {
    pub fn is_gone(&self) -> bool {
        matches!(self, TxStatus::Missing | TxStatus::Failed)
    }
}

/// Chain queries the detector needs, implemented by each adapter.
#[async_trait::async_trait]
pub trait ChainView: Send + Sync {
    async fn block_header(&self, height: Height) -> SyncResult<Option<BlockHeader>>;

    async fn tx_status(&self, tx_id: &str) -> SyncResult<TxStatus>;

    /// Re-fetch `height` and parse its bridge events again.
    async fn rescan_block(&self, height: Height) -> SyncResult<Vec<InboundItem>>;
}

pub struct ReorgDetector {
    chain: String,
    metas: BlockMetaStore,
    errata_tx: mpsc::Sender<ErrataBlock>,
    cancel: CancellationToken,
    metrics: Option<Arc<BridgeMetrics>>,
}

impl ReorgDetector {
    pub fn new(
        chain: impl Into<String>,
        metas: BlockMetaStore,
        errata_tx: mpsc::Sender<ErrataBlock>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            chain: chain.into(),
            metas,
            errata_tx,
            cancel,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<BridgeMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn metas(&self) -> &BlockMetaStore {
        &self.metas
    }

    /// Compare `header` with the stored previous height and run the reorg protocol
    /// on mismatch. Returns items found by rescanning, to be merged into the batch
    /// being built for `header.height`.
    pub async fn process_new_block<V: ChainView + ?Sized>(
        &self,
        view: &V,
        header: &BlockHeader,
    ) -> SyncResult<Vec<InboundItem>> {
        let Some(prev_height) = header.height.checked_sub(1) else {
            return Ok(Vec::new());
        };
        let Some(prev) = self.metas.get(prev_height)? else {
            return Ok(Vec::new());
        };
        if prev.block_hash == header.parent_hash {
            return Ok(Vec::new());
        }

        warn!(
            "[{}] Reorg detected at height {}: stored hash {} != parent hash {}",
            self.chain, header.height, prev.block_hash, header.parent_hash
        );
        if let Some(metrics) = &self.metrics {
            metrics.reorgs_detected.with_label_values(&[&self.chain]).inc();
        }
        self.handle_reorg(view, header.height).await
    }

    /// Walk every stored `BlockMeta` below `current_height`, oldest first.
    pub async fn handle_reorg<V: ChainView + ?Sized>(
        &self,
        view: &V,
        current_height: Height,
    ) -> SyncResult<Vec<InboundItem>> {
        let mut rescan_heights = Vec::new();

        for mut meta in self.metas.all()? {
            if meta.height >= current_height {
                break;
            }
            let mut changed = false;

            let mut errata = Vec::new();
            for tx_id in meta.customer_tx_ids.clone() {
                let status = view.tx_status(&tx_id).await?;
                if status.is_gone() {
                    warn!(
                        "[{}] Observed tx {} at height {} is now {:?}, emitting errata",
                        self.chain, tx_id, meta.height, status
                    );
                    meta.customer_tx_ids.remove(&tx_id);
                    errata.push(ErrataTx {
                        tx_id,
                        chain: self.chain.clone(),
                    });
                }
            }
            for tx_id in meta.signed_tx_ids.clone() {
                let status = view.tx_status(&tx_id).await?;
                if status.is_gone() {
                    warn!(
                        "[{}] Broadcast tx {} at height {} is now {:?}",
                        self.chain, tx_id, meta.height, status
                    );
                    meta.signed_tx_ids.remove(&tx_id);
                    changed = true;
                }
            }

            if !errata.is_empty() {
                changed = true;
                self.send_errata(meta.height, errata).await?;
            }

            match view.block_header(meta.height).await? {
                Some(header) if header.hash != meta.block_hash => {
                    debug!(
                        "[{}] Height {} changed hash {} -> {}, marking for rescan",
                        self.chain, meta.height, meta.block_hash, header.hash
                    );
                    meta.block_hash = header.hash;
                    meta.parent_hash = header.parent_hash;
                    rescan_heights.push(meta.height);
                    changed = true;
                }
                Some(_) => {}
                None => {
                    debug!(
                        "[{}] Height {} no longer available, keeping stored hash",
                        self.chain, meta.height
                    );
                }
            }

            if changed {
                self.metas.save(&meta)?;
            }
        }

        let mut items = Vec::new();
        for height in rescan_heights {
            let rescanned = view.rescan_block(height).await?;
            if !rescanned.is_empty() {
                if let Some(mut meta) = self.metas.get(height)? {
                    for item in &rescanned {
                        meta.add_customer_tx(item.tx_id.clone());
                    }
                    self.metas.save(&meta)?;
                }
                info!(
                    "[{}] Rescan of height {} found {} bridge items",
                    self.chain,
                    height,
                    rescanned.len()
                );
            }
            items.extend(rescanned);
        }
        Ok(items)
    }

    /// The block meta is saved only after its errata was queued, so a push
    /// interrupted by the stop signal is emitted again on the next run.
    async fn send_errata(&self, height: Height, txs: Vec<ErrataTx>) -> SyncResult<()> {
        let count = txs.len() as u64;
        let errata = ErrataBlock {
            chain: self.chain.clone(),
            height,
            txs,
        };
        if !send_cancellable(&self.errata_tx, errata, &self.cancel, "errata").await? {
            return Err(SyncError::Cancelled);
        }
        if let Some(metrics) = &self.metrics {
            metrics
                .errata_txs
                .with_label_values(&[&self.chain])
                .inc_by(count);
        }
        Ok(())
    }
}
