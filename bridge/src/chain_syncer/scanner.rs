// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Chain-agnostic scanning engine.
//!
//! One [`BlockScanner`] drives one chain through its [`Fetcher`] with two
//! independent loops:
//!
//! - the block loop walks heights one by one, hands non-empty batches to the
//!   confirmation gate, persists the scan cursor and tracks chain health;
//! - the mempool loop keeps polling even while the chain is unhealthy.
//!
//! Both loops share only the atomics in [`ScannerState`].

use super::common::{Fetcher, ScannerConfig, SyncError, SyncResult};
use crate::coordination::{send_cancellable, wait_sync, CoordinationClient};
use crate::finality::ConfirmationPolicy;
use crate::metrics::BridgeMetrics;
use crate::storage::ScanCursorStore;
use crate::types::{BatchKind, Height, InboundBatch, NetworkFee};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Lag in blocks that is always healthy, whatever the block time.
const HEALTHY_LAG_BLOCKS: u64 = 3;

/// Progress and health shared between the loops, the adapter and health checks.
#[derive(Debug, Default)]
pub struct ScannerState {
    previous_block: AtomicU64,
    healthy: AtomicBool,
}

impl ScannerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Height already fully processed by the block loop.
    pub fn previous_block(&self) -> Height {
        self.previous_block.load(Ordering::Acquire)
    }

    pub fn set_previous_block(&self, height: Height) {
        self.previous_block.store(height, Ordering::Release);
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Release);
    }
}

/// Result of one block loop iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanStep {
    /// `height` was processed; `pushed` tells whether a batch was handed off
    Advanced { height: Height, pushed: bool },
    /// Chain tip has not reached the next height yet
    TipNotAdvanced { tip: Height },
    /// The endpoint does not serve the next height yet
    Unavailable { height: Height },
    /// Fetch failed, chain marked unhealthy
    Failed(SyncError),
    /// Stop signal raised while handing off
    Stopped,
}

pub struct BlockScanner<F: Fetcher + ?Sized> {
    chain: String,
    fetcher: Arc<F>,
    config: ScannerConfig,
    state: Arc<ScannerState>,
    cursors: ScanCursorStore,
    coordination: Arc<dyn CoordinationClient>,
    policy: Arc<dyn ConfirmationPolicy>,
    batch_tx: mpsc::Sender<InboundBatch>,
    fee_tx: Option<mpsc::Sender<NetworkFee>>,
    tip_tx: watch::Sender<Height>,
    start_height: Option<Height>,
    metrics: Option<Arc<BridgeMetrics>>,
}

impl<F: Fetcher + ?Sized + 'static> BlockScanner<F> {
    pub fn new(
        fetcher: Arc<F>,
        config: ScannerConfig,
        cursors: ScanCursorStore,
        coordination: Arc<dyn CoordinationClient>,
        policy: Arc<dyn ConfirmationPolicy>,
        batch_tx: mpsc::Sender<InboundBatch>,
    ) -> Self {
        let (tip_tx, _) = watch::channel(0);
        Self {
            chain: fetcher.chain().to_string(),
            fetcher,
            config,
            state: Arc::new(ScannerState::new()),
            cursors,
            coordination,
            policy,
            batch_tx,
            fee_tx: None,
            tip_tx,
            start_height: None,
            metrics: None,
        }
    }

    /// Share progress and health with the adapter.
    pub fn with_state(mut self, state: Arc<ScannerState>) -> Self {
        self.state = state;
        self
    }

    pub fn with_fee_queue(mut self, fee_tx: mpsc::Sender<NetworkFee>) -> Self {
        self.fee_tx = Some(fee_tx);
        self
    }

    pub fn with_start_height(mut self, start_height: Option<Height>) -> Self {
        self.start_height = start_height;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<BridgeMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn state(&self) -> Arc<ScannerState> {
        self.state.clone()
    }

    /// Chain tip as last seen by the block loop.
    pub fn tip_receiver(&self) -> watch::Receiver<Height> {
        self.tip_tx.subscribe()
    }

    /// Pick the first height to scan: an explicit start height, then consensus
    /// progress reconciled with local progress, then local progress, then the
    /// chain's current height. Returns `None` when cancelled while waiting.
    pub async fn resolve_start_height(&self, cancel: &CancellationToken) -> SyncResult<Option<Height>> {
        if let Some(height) = self.start_height {
            info!("[{}] Starting from configured height {}", self.chain, height);
            return Ok(Some(height));
        }

        let local = self.cursors.get(&self.chain)?;

        if !wait_sync(self.coordination.as_ref(), self.config.sync_poll_interval, cancel).await {
            return Ok(None);
        }
        match self.coordination.get_last_observed_in_height(&self.chain).await {
            Ok(consensus) if consensus > 0 => {
                let floor = consensus.saturating_sub(self.config.max_resume_lag_blocks());
                let start = match local {
                    Some(local) => (local + 1).max(floor),
                    None => consensus,
                };
                info!(
                    "[{}] Resuming at {} (consensus {}, local {:?})",
                    self.chain, start, consensus, local
                );
                return Ok(Some(start));
            }
            Ok(_) => debug!("[{}] No consensus progress yet", self.chain),
            Err(e) => warn!(
                "[{}] Failed to read last observed height: {:?}",
                self.chain, e
            ),
        }

        if let Some(local) = local {
            info!("[{}] Resuming after local cursor {}", self.chain, local);
            return Ok(Some(local + 1));
        }

        loop {
            match self.fetcher.current_height().await {
                Ok(height) => {
                    info!("[{}] Starting from current chain height {}", self.chain, height);
                    return Ok(Some(height));
                }
                Err(e) => warn!("[{}] Failed to read chain height: {:?}", self.chain, e),
            }
            if !self.sleep(self.config.block_backoff, cancel).await {
                return Ok(None);
            }
        }
    }

    /// One block loop iteration. Only storage failures are returned as errors.
    pub async fn scan_next_block(&self, cancel: &CancellationToken) -> SyncResult<ScanStep> {
        let next = self.state.previous_block() + 1;

        let tip = match self.fetcher.current_height().await {
            Ok(tip) => tip,
            Err(e) => {
                warn!("[{}] Failed to read chain tip: {:?}", self.chain, e);
                self.mark_unhealthy("height");
                return Ok(ScanStep::Failed(e));
            }
        };
        self.tip_tx.send_replace(tip);
        if let Some(metrics) = &self.metrics {
            metrics
                .chain_tip_height
                .with_label_values(&[&self.chain])
                .set(tip as i64);
        }
        if tip < next {
            return Ok(ScanStep::TipNotAdvanced { tip });
        }

        let batch = match self.fetcher.fetch_block(next, tip).await {
            Ok(batch) => batch,
            Err(SyncError::UnavailableBlock(height)) => {
                return Ok(ScanStep::Unavailable { height });
            }
            Err(SyncError::Storage(msg)) => return Err(SyncError::Storage(msg)),
            Err(SyncError::Cancelled) => return Ok(ScanStep::Stopped),
            Err(e) => {
                warn!("[{}] Failed to fetch block {}: {:?}", self.chain, next, e);
                self.mark_unhealthy("block");
                return Ok(ScanStep::Failed(e));
            }
        };

        let (current, replay) = batch.split_replayed();
        let mut pushed = false;
        for batch in replay.into_iter().chain(std::iter::once(current)) {
            if batch.is_empty() {
                continue;
            }
            match self.hand_off(batch, cancel).await? {
                true => pushed = true,
                false => return Ok(ScanStep::Stopped),
            }
        }

        self.state.set_previous_block(next);
        self.cursors
            .set(&self.chain, next)
            .map_err(|e| SyncError::Storage(e.to_string()))?;

        let lag = tip - next;
        let healthy = lag <= HEALTHY_LAG_BLOCKS || lag <= self.config.max_health_lag_blocks();
        if healthy != self.state.is_healthy() {
            info!(
                "[{}] Chain health changed to {} (lag {} blocks)",
                self.chain, healthy, lag
            );
        }
        self.state.set_healthy(healthy);
        if let Some(metrics) = &self.metrics {
            metrics
                .last_scanned_height
                .with_label_values(&[&self.chain])
                .set(next as i64);
            metrics
                .chain_healthy
                .with_label_values(&[&self.chain])
                .set(i64::from(healthy));
        }

        if next % self.config.fee_check_blocks() == 0 {
            self.check_network_fee(next, cancel).await;
        }

        Ok(ScanStep::Advanced {
            height: next,
            pushed,
        })
    }

    /// One mempool poll. Returns whether anything was handed off.
    pub async fn scan_mempool(&self, cancel: &CancellationToken) -> SyncResult<bool> {
        let next = self.state.previous_block() + 1;
        match self.fetcher.fetch_mempool(next).await {
            Ok(batch) if !batch.is_empty() => self.hand_off(batch, cancel).await,
            Ok(_) => Ok(false),
            Err(SyncError::Storage(msg)) => Err(SyncError::Storage(msg)),
            Err(e) => {
                debug!("[{}] Mempool poll failed: {:?}", self.chain, e);
                if let Some(metrics) = &self.metrics {
                    metrics
                        .fetch_errors
                        .with_label_values(&[&self.chain, "mempool"])
                        .inc();
                }
                Ok(false)
            }
        }
    }

    async fn hand_off(&self, mut batch: InboundBatch, cancel: &CancellationToken) -> SyncResult<bool> {
        batch.required_confirmations = self.policy.required_confirmations(&batch).await;
        let kind = match batch.kind {
            BatchKind::Block => "block",
            BatchKind::Mempool => "mempool",
            BatchKind::Replay => "replay",
        };
        let items = batch.items.len() as u64;
        debug!(
            "[{}] Handing off {} batch at height {} with {} items ({} confirmations)",
            self.chain, kind, batch.height, items, batch.required_confirmations
        );
        let sent = send_cancellable(&self.batch_tx, batch, cancel, "inbound")
            .await
            .map_err(|_| SyncError::ChannelClosed)?;
        if sent {
            if let Some(metrics) = &self.metrics {
                metrics
                    .inbound_batches
                    .with_label_values(&[&self.chain, kind])
                    .inc();
                metrics
                    .inbound_items
                    .with_label_values(&[&self.chain])
                    .inc_by(items);
            }
        }
        Ok(sent)
    }

    /// Push the adapter's fee when the coordination chain acknowledges another one.
    async fn check_network_fee(&self, height: Height, cancel: &CancellationToken) {
        let Some(fee_tx) = &self.fee_tx else {
            return;
        };
        let fee = self.fetcher.network_fee().await;
        if fee.transaction_rate == 0 {
            return;
        }
        let acknowledged = match self.coordination.get_network_fee(&self.chain).await {
            Ok(acknowledged) => acknowledged,
            Err(e) => {
                warn!("[{}] Failed to read acknowledged fee: {:?}", self.chain, e);
                return;
            }
        };
        if acknowledged == Some(fee) {
            return;
        }
        info!(
            "[{}] Fee {:?} differs from acknowledged {:?}, pushing update",
            self.chain, fee, acknowledged
        );
        let update = NetworkFee {
            chain: self.chain.clone(),
            height,
            fee,
        };
        if let Err(e) = send_cancellable(fee_tx, update, cancel, "network_fee").await {
            warn!("[{}] Failed to push fee update: {:?}", self.chain, e);
        }
    }

    fn mark_unhealthy(&self, kind: &str) {
        self.state.set_healthy(false);
        if let Some(metrics) = &self.metrics {
            metrics
                .fetch_errors
                .with_label_values(&[&self.chain, kind])
                .inc();
            metrics.chain_healthy.with_label_values(&[&self.chain]).set(0);
        }
    }

    /// Returns false when cancelled during the sleep.
    async fn sleep(&self, duration: Duration, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    async fn run_block_loop(&self, cancel: CancellationToken) {
        info!(
            "[{}] Block loop started after height {}",
            self.chain,
            self.state.previous_block()
        );
        while !cancel.is_cancelled() {
            let backoff = match self.scan_next_block(&cancel).await {
                Ok(ScanStep::Advanced { .. }) => continue,
                Ok(ScanStep::TipNotAdvanced { .. }) | Ok(ScanStep::Unavailable { .. }) => {
                    self.config.block_backoff
                }
                Ok(ScanStep::Failed(_)) => self.config.block_backoff,
                Ok(ScanStep::Stopped) => break,
                Err(e) => {
                    error!("[{}] Block loop stopped on unrecoverable error: {:?}", self.chain, e);
                    break;
                }
            };
            if !self.sleep(backoff, &cancel).await {
                break;
            }
        }
        info!("[{}] Block loop exited", self.chain);
    }

    async fn run_mempool_loop(&self, cancel: CancellationToken) {
        info!("[{}] Mempool loop started", self.chain);
        while !cancel.is_cancelled() {
            match self.scan_mempool(&cancel).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    error!("[{}] Mempool loop stopped on unrecoverable error: {:?}", self.chain, e);
                    break;
                }
            }
            if !self.sleep(self.config.mempool_backoff, &cancel).await {
                break;
            }
        }
        info!("[{}] Mempool loop exited", self.chain);
    }

    /// Resolve the start height and spawn both loops.
    pub async fn start(self, cancel: CancellationToken) -> SyncResult<ScannerHandle> {
        let start = self
            .resolve_start_height(&cancel)
            .await?
            .ok_or(SyncError::Cancelled)?;
        // height 0 is never scanned, the loop always looks at previous + 1
        let previous = start.max(1) - 1;
        self.state.set_previous_block(previous);
        if self.start_height.is_some() {
            info!(
                "[{}] Rescanning from explicit start height {}",
                self.chain, start
            );
            self.cursors
                .reset(&self.chain, previous)
                .map_err(|e| SyncError::Storage(e.to_string()))?;
        }

        let this = Arc::new(self);
        let block = {
            let this = this.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { this.run_block_loop(cancel).await })
        };
        let mempool = {
            let this = this.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { this.run_mempool_loop(cancel).await })
        };
        Ok(ScannerHandle {
            chain: this.chain.clone(),
            state: this.state.clone(),
            cancel,
            block,
            mempool,
        })
    }
}

/// Running scanner of one chain.
pub struct ScannerHandle {
    chain: String,
    state: Arc<ScannerState>,
    cancel: CancellationToken,
    block: JoinHandle<()>,
    mempool: JoinHandle<()>,
}

impl ScannerHandle {
    pub fn state(&self) -> Arc<ScannerState> {
        self.state.clone()
    }

    /// Raise the stop signal and wait for both loops to exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        self.join().await;
    }

    /// Wait for both loops without raising the stop signal.
    pub async fn join(self) {
        for (name, handle) in [("block", self.block), ("mempool", self.mempool)] {
            if let Err(e) = handle.await {
                error!("[{}] {} loop panicked: {:?}", self.chain, name, e);
            }
        }
    }
}
