// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Confirmation gate between the scanner and the relay queue.

use super::store::PendingBatchStore;
use crate::coordination::send_cancellable;
use crate::error::BridgeResult;
use crate::metrics::BridgeMetrics;
use crate::storage::SharedKvStore;
use crate::types::{Height, InboundBatch};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub struct ConfirmationGate {
    chain: String,
    store: Arc<PendingBatchStore>,
    relay_tx: mpsc::Sender<InboundBatch>,
    check_interval: Duration,
    metrics: Option<Arc<BridgeMetrics>>,
}

impl ConfirmationGate {
    /// Batches still held by a previous run are reloaded from `store`.
    pub fn new(
        chain: impl Into<String>,
        store: SharedKvStore,
        relay_tx: mpsc::Sender<InboundBatch>,
        check_interval: Duration,
    ) -> BridgeResult<Self> {
        let chain = chain.into();
        Ok(Self {
            store: Arc::new(PendingBatchStore::new(&chain, store)?),
            chain,
            relay_tx,
            check_interval,
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<BridgeMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn store(&self) -> Arc<PendingBatchStore> {
        self.store.clone()
    }

    /// Relay a batch that needs no confirmations. A block batch whose push is
    /// interrupted by the stop signal is held instead, so the next run relays it.
    async fn relay(&self, batch: InboundBatch, cancel: &CancellationToken) -> BridgeResult<bool> {
        if send_cancellable(&self.relay_tx, batch.clone(), cancel, "relay").await? {
            return Ok(true);
        }
        if !batch.is_mempool() {
            self.store.insert(batch).await?;
        }
        Ok(false)
    }

    async fn relay_ready(&self, tip: Height, cancel: &CancellationToken) -> BridgeResult<bool> {
        for pending in self.store.drain_ready(tip).await {
            if !send_cancellable(&self.relay_tx, pending.batch.clone(), cancel, "relay").await? {
                return Ok(false);
            }
            self.store.mark_relayed(&pending)?;
        }
        if let Some(metrics) = &self.metrics {
            metrics
                .pending_batches
                .with_label_values(&[&self.chain])
                .set(self.store.len().await as i64);
        }
        Ok(true)
    }

    /// Persist batches the scanner already handed off but the gate never read.
    async fn hold_unread(&self, batch_rx: &mut mpsc::Receiver<InboundBatch>) {
        batch_rx.close();
        while let Ok(batch) = batch_rx.try_recv() {
            if batch.is_mempool() {
                continue;
            }
            if let Err(e) = self.store.insert(batch).await {
                warn!("[{}] Failed to hold unread batch: {:?}", self.chain, e);
            }
        }
    }

    /// Batches that need no confirmations pass straight through; the rest are held
    /// until the chain tip published on `tip_rx` is deep enough.
    pub fn spawn(
        self,
        mut batch_rx: mpsc::Receiver<InboundBatch>,
        mut tip_rx: watch::Receiver<Height>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("[{}] Starting confirmation gate", self.chain);
            let mut interval = time::interval(self.check_interval);
            interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

            loop {
                let result = tokio::select! {
                    _ = cancel.cancelled() => break,
                    maybe_batch = batch_rx.recv() => {
                        let Some(batch) = maybe_batch else { break };
                        if batch.required_confirmations == 0 {
                            self.relay(batch, &cancel).await
                        } else {
                            match self.store.insert(batch).await {
                                Ok(()) => {
                                    let tip = *tip_rx.borrow();
                                    self.relay_ready(tip, &cancel).await
                                }
                                Err(e) => Err(e),
                            }
                        }
                    }
                    changed = tip_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let tip = *tip_rx.borrow_and_update();
                        self.relay_ready(tip, &cancel).await
                    }
                    _ = interval.tick() => {
                        let tip = *tip_rx.borrow();
                        self.relay_ready(tip, &cancel).await
                    }
                };
                match result {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => {
                        error!("[{}] Confirmation gate stopped: {:?}", self.chain, e);
                        break;
                    }
                }
            }
            self.hold_unread(&mut batch_rx).await;
            info!(
                "[{}] Confirmation gate exited with {} batches held",
                self.chain,
                self.store.len().await
            );
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryKvStore;
    use crate::test_utils::test_item;

    fn batch(height: Height, confirmations: u64) -> InboundBatch {
        let mut batch = InboundBatch::new_block("eth", height, vec![test_item("tx", height)]);
        batch.required_confirmations = confirmations;
        batch
    }

    fn gate(kv: &MemoryKvStore, relay_tx: mpsc::Sender<InboundBatch>) -> ConfirmationGate {
        ConfirmationGate::new("eth", Arc::new(kv.clone()), relay_tx, Duration::from_secs(3600))
            .unwrap()
    }

    #[tokio::test]
    async fn test_gate_holds_until_deep_enough() {
        let (in_tx, in_rx) = mpsc::channel(8);
        let (relay_tx, mut relay_rx) = mpsc::channel(8);
        let (tip_tx, tip_rx) = watch::channel(100u64);
        let cancel = CancellationToken::new();
        let gate = gate(&MemoryKvStore::new(), relay_tx);
        let store = gate.store();
        let handle = gate.spawn(in_rx, tip_rx, cancel.clone());

        in_tx.send(batch(100, 3)).await.unwrap();
        in_tx
            .send(InboundBatch::new_mempool("eth", 101, vec![test_item("m", 101)]))
            .await
            .unwrap();

        let first = relay_rx.recv().await.unwrap();
        assert!(first.is_mempool());
        assert_eq!(store.len().await, 1);

        tip_tx.send(103).unwrap();
        let second = relay_rx.recv().await.unwrap();
        assert_eq!(second.height, 100);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_held_batch_is_relayed_after_restart() {
        let kv = MemoryKvStore::new();
        let (relay_tx, mut relay_rx) = mpsc::channel(8);

        let (in_tx, in_rx) = mpsc::channel(8);
        let (_tip_tx, tip_rx) = watch::channel(11u64);
        let cancel = CancellationToken::new();
        let first = gate(&kv, relay_tx.clone());
        let store = first.store();
        let handle = first.spawn(in_rx, tip_rx, cancel.clone());
        in_tx.send(batch(11, 2)).await.unwrap();
        while store.is_empty().await {
            tokio::task::yield_now().await;
        }
        cancel.cancel();
        handle.await.unwrap();
        assert!(relay_rx.try_recv().is_err());

        let (_in_tx, in_rx) = mpsc::channel(8);
        let (tip_tx, tip_rx) = watch::channel(11u64);
        let cancel = CancellationToken::new();
        let second = gate(&kv, relay_tx);
        assert_eq!(second.store().len().await, 1);
        let handle = second.spawn(in_rx, tip_rx, cancel.clone());
        tip_tx.send(13).unwrap();
        let relayed = relay_rx.recv().await.unwrap();
        assert_eq!(relayed.height, 11);

        cancel.cancel();
        handle.await.unwrap();
        assert!(gate(&kv, mpsc::channel(1).0).store().is_empty().await);
    }

    #[tokio::test]
    async fn test_unread_batches_are_held_on_stop() {
        let kv = MemoryKvStore::new();
        let (in_tx, in_rx) = mpsc::channel(8);
        let (relay_tx, _relay_rx) = mpsc::channel(1);
        relay_tx.send(batch(1, 0)).await.unwrap();
        let (_tip_tx, tip_rx) = watch::channel(0u64);
        let cancel = CancellationToken::new();
        cancel.cancel();

        // handed off after the stop signal was raised, before the gate read them
        in_tx.send(batch(20, 2)).await.unwrap();
        in_tx.send(batch(21, 0)).await.unwrap();
        gate(&kv, relay_tx).spawn(in_rx, tip_rx, cancel).await.unwrap();

        let reopened = PendingBatchStore::new("eth", Arc::new(kv.clone())).unwrap();
        assert_eq!(reopened.len().await, 2);
        assert_eq!(reopened.lowest_height().await, Some(20));
    }

    #[tokio::test]
    async fn test_gate_exits_when_scanner_is_gone() {
        let (in_tx, in_rx) = mpsc::channel::<InboundBatch>(8);
        let (relay_tx, _relay_rx) = mpsc::channel(8);
        let (_tip_tx, tip_rx) = watch::channel(0u64);
        let handle = gate(&MemoryKvStore::new(), relay_tx).spawn(in_rx, tip_rx, CancellationToken::new());
        drop(in_tx);
        handle.await.unwrap();
    }
}
