// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use super::{decode, get_typed, put_typed, SharedKvStore};
use crate::error::BridgeResult;
use ethers::types::Bytes;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerCacheEntry {
    pub fingerprint: String,
    pub vault_key: String,
    pub broadcast_tx_id: String,
    /// Unix seconds
    pub last_seen_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct VaultLatest {
    tx_id: String,
    fingerprint: String,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Signed/broadcast status per outbound fingerprint of one chain, plus the
/// bookkeeping that goes with it: persisted checkpoints, pending broadcast markers
/// and the latest broadcast per vault.
#[derive(Clone)]
pub struct SignerCache {
    chain: String,
    store: SharedKvStore,
}

impl SignerCache {
    pub fn new(chain: impl Into<String>, store: SharedKvStore) -> Self {
        Self {
            chain: chain.into(),
            store,
        }
    }

    pub fn chain(&self) -> &str {
        &self.chain
    }

    fn fingerprint_key(&self, fingerprint: &str) -> String {
        format!("signer/{}/fp/{}", self.chain, fingerprint)
    }

    fn checkpoint_key(&self, fingerprint: &str) -> String {
        format!("signer/{}/checkpoint/{}", self.chain, fingerprint)
    }

    fn pending_prefix(&self) -> String {
        format!("signer/{}/pending/", self.chain)
    }

    fn pending_key(&self, tx_id: &str) -> String {
        format!("{}{}", self.pending_prefix(), tx_id.to_lowercase())
    }

    fn vault_key(&self, vault: &str) -> String {
        format!("signer/{}/vault/{}", self.chain, vault.to_lowercase())
    }

    pub fn get(&self, fingerprint: &str) -> BridgeResult<Option<SignerCacheEntry>> {
        get_typed(self.store.as_ref(), self.fingerprint_key(fingerprint).as_bytes())
    }

    pub fn has_signed(&self, fingerprint: &str) -> BridgeResult<bool> {
        Ok(self.get(fingerprint)?.is_some())
    }

    /// Record a confirmed broadcast. The first recorded tx id for a fingerprint
    /// wins; later calls only refresh `last_seen_at` and return the stored entry.
    pub fn set_signed(
        &self,
        fingerprint: &str,
        vault: &str,
        tx_id: &str,
    ) -> BridgeResult<SignerCacheEntry> {
        let entry = match self.get(fingerprint)? {
            Some(mut existing) => {
                existing.last_seen_at = now_secs();
                existing
            }
            None => SignerCacheEntry {
                fingerprint: fingerprint.to_string(),
                vault_key: vault.to_string(),
                broadcast_tx_id: tx_id.to_string(),
                last_seen_at: now_secs(),
            },
        };
        put_typed(
            self.store.as_ref(),
            self.fingerprint_key(fingerprint).as_bytes(),
            &entry,
        )?;
        put_typed(
            self.store.as_ref(),
            self.vault_key(&entry.vault_key).as_bytes(),
            &VaultLatest {
                tx_id: entry.broadcast_tx_id.clone(),
                fingerprint: fingerprint.to_string(),
            },
        )?;
        Ok(entry)
    }

    /// Operator cleanup, or removal of a tx found failed during reorg replay.
    pub fn remove(&self, fingerprint: &str) -> BridgeResult<()> {
        self.store.delete(self.fingerprint_key(fingerprint).as_bytes())?;
        self.store.delete(self.checkpoint_key(fingerprint).as_bytes())
    }

    pub fn latest_tx_for_vault(&self, vault: &str) -> BridgeResult<Option<String>> {
        let latest: Option<VaultLatest> =
            get_typed(self.store.as_ref(), self.vault_key(vault).as_bytes())?;
        Ok(latest.map(|l| l.tx_id))
    }

    pub fn record_checkpoint(&self, fingerprint: &str, checkpoint: &Bytes) -> BridgeResult<()> {
        put_typed(
            self.store.as_ref(),
            self.checkpoint_key(fingerprint).as_bytes(),
            checkpoint,
        )
    }

    pub fn checkpoint(&self, fingerprint: &str) -> BridgeResult<Option<Bytes>> {
        get_typed(self.store.as_ref(), self.checkpoint_key(fingerprint).as_bytes())
    }

    pub fn mark_pending(&self, tx_id: &str, fingerprint: &str) -> BridgeResult<()> {
        put_typed(
            self.store.as_ref(),
            self.pending_key(tx_id).as_bytes(),
            &fingerprint.to_string(),
        )
    }

    /// Drop the pending marker of a tx that showed up on chain. Returns the
    /// fingerprint it belonged to, if a marker existed.
    pub fn clear_pending(&self, tx_id: &str) -> BridgeResult<Option<String>> {
        let key = self.pending_key(tx_id);
        let fingerprint: Option<String> = get_typed(self.store.as_ref(), key.as_bytes())?;
        if fingerprint.is_some() {
            self.store.delete(key.as_bytes())?;
        }
        Ok(fingerprint)
    }

    /// Pending markers as `(tx id, fingerprint)`.
    pub fn pending(&self) -> BridgeResult<Vec<(String, String)>> {
        let prefix = self.pending_prefix();
        self.store
            .scan_prefix(prefix.as_bytes())?
            .into_iter()
            .map(|(key, value)| {
                let tx_id = String::from_utf8_lossy(&key[prefix.len()..]).into_owned();
                Ok((tx_id, decode::<String>(&value)?))
            })
            .collect()
    }
}
