// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Pending batch store - holds inbound batches until they are deep enough

use crate::error::BridgeResult;
use crate::finality::is_confirmation_ready;
use crate::storage::{decode, encode, SharedKvStore};
use crate::types::{Height, InboundBatch};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// A held batch and the key it is persisted under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingBatch {
    key: String,
    pub batch: InboundBatch,
}

/// Inbound batches still waiting for confirmations.
///
/// The scan cursor moves past a height as soon as its batch is handed to the
/// gate, so every held batch is written to the key/value store and only deleted
/// once it was relayed. A restart reloads whatever was still held.
pub struct PendingBatchStore {
    chain_name: String,
    store: SharedKvStore,
    next_seq: AtomicU64,
    batches_by_height: RwLock<BTreeMap<Height, Vec<PendingBatch>>>,
}

impl PendingBatchStore {
    /// Open the store of `chain_name`, loading batches held by a previous run.
    pub fn new(chain_name: &str, store: SharedKvStore) -> BridgeResult<Self> {
        let prefix = Self::prefix(chain_name);
        let mut batches_by_height: BTreeMap<Height, Vec<PendingBatch>> = BTreeMap::new();
        let mut next_seq = 0;
        for (key, value) in store.scan_prefix(prefix.as_bytes())? {
            let key = String::from_utf8_lossy(&key).into_owned();
            if let Some(seq) = key.rsplit('/').next().and_then(|s| s.parse::<u64>().ok()) {
                next_seq = next_seq.max(seq + 1);
            }
            let batch: InboundBatch = decode(&value)?;
            batches_by_height
                .entry(batch.height)
                .or_default()
                .push(PendingBatch { key, batch });
        }
        let loaded: usize = batches_by_height.values().map(Vec::len).sum();
        if loaded > 0 {
            info!(
                "[{}] Reloaded {} held batches from storage",
                chain_name, loaded
            );
        }
        Ok(Self {
            chain_name: chain_name.to_string(),
            store,
            next_seq: AtomicU64::new(next_seq),
            batches_by_height: RwLock::new(batches_by_height),
        })
    }

    fn prefix(chain_name: &str) -> String {
        format!("pending/{}/", chain_name)
    }

    pub async fn insert(&self, batch: InboundBatch) -> BridgeResult<()> {
        debug!(
            "[{}] Holding batch at height {} ({} items) for {} confirmations",
            self.chain_name,
            batch.height,
            batch.items.len(),
            batch.required_confirmations
        );
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let key = format!(
            "{}{:020}/{:020}",
            Self::prefix(&self.chain_name),
            batch.height,
            seq
        );
        self.store.put(key.as_bytes(), &encode(&batch)?)?;
        let mut batches = self.batches_by_height.write().await;
        batches
            .entry(batch.height)
            .or_default()
            .push(PendingBatch { key, batch });
        Ok(())
    }

    /// Remove and return the batches that are confirmation-ready at `current_height`,
    /// lowest height first. Stops at the first height that is not ready so batches
    /// leave in height order. They stay persisted until [`Self::mark_relayed`].
    pub async fn drain_ready(&self, current_height: Height) -> Vec<PendingBatch> {
        let mut batches = self.batches_by_height.write().await;
        let mut ready = Vec::new();
        while let Some(mut entry) = batches.first_entry() {
            if !entry
                .get()
                .iter()
                .all(|pending| is_confirmation_ready(&pending.batch, current_height))
            {
                break;
            }
            ready.append(entry.get_mut());
            entry.remove();
        }
        if !ready.is_empty() {
            debug!(
                "[{}] {} batches confirmation-ready at height {}",
                self.chain_name,
                ready.len(),
                current_height
            );
        }
        ready
    }

    pub fn mark_relayed(&self, pending: &PendingBatch) -> BridgeResult<()> {
        self.store.delete(pending.key.as_bytes())
    }

    pub async fn len(&self) -> usize {
        self.batches_by_height
            .read()
            .await
            .values()
            .map(Vec::len)
            .sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn lowest_height(&self) -> Option<Height> {
        self.batches_by_height.read().await.keys().next().copied()
    }
}
