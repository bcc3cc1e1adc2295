// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use super::{decode, get_typed, put_typed, SharedKvStore};
use crate::error::BridgeResult;
use crate::types::Height;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Per-height record used for reorg detection and errata.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlockMeta {
    pub height: Height,
    pub block_hash: String,
    pub parent_hash: String,
    /// Inbound transactions this node reported from the block
    pub customer_tx_ids: BTreeSet<String>,
    /// Outbound transactions this node broadcast that landed in the block
    pub signed_tx_ids: BTreeSet<String>,
}

impl BlockMeta {
    pub fn new(height: Height, block_hash: impl Into<String>, parent_hash: impl Into<String>) -> Self {
        Self {
            height,
            block_hash: block_hash.into(),
            parent_hash: parent_hash.into(),
            ..Default::default()
        }
    }

    pub fn add_customer_tx(&mut self, tx_id: impl Into<String>) {
        self.customer_tx_ids.insert(tx_id.into());
    }

    pub fn add_signed_tx(&mut self, tx_id: impl Into<String>) {
        self.signed_tx_ids.insert(tx_id.into());
    }

    /// Forget a transaction in either subset.
    pub fn remove_tx(&mut self, tx_id: &str) {
        self.customer_tx_ids.remove(tx_id);
        self.signed_tx_ids.remove(tx_id);
    }
}

/// `BlockMeta` records of one chain.
#[derive(Clone)]
pub struct BlockMetaStore {
    chain: String,
    store: SharedKvStore,
}

impl BlockMetaStore {
    pub fn new(chain: impl Into<String>, store: SharedKvStore) -> Self {
        Self {
            chain: chain.into(),
            store,
        }
    }

    fn prefix(&self) -> String {
        format!("blockmeta/{}/", self.chain)
    }

    fn key(&self, height: Height) -> String {
        format!("{}{:020}", self.prefix(), height)
    }

    pub fn get(&self, height: Height) -> BridgeResult<Option<BlockMeta>> {
        get_typed(self.store.as_ref(), self.key(height).as_bytes())
    }

    pub fn save(&self, meta: &BlockMeta) -> BridgeResult<()> {
        put_typed(self.store.as_ref(), self.key(meta.height).as_bytes(), meta)
    }

    /// Merge newly observed customer tx ids into whatever is stored at the height,
    /// overwriting hashes with the ones just seen.
    pub fn save_observed(
        &self,
        height: Height,
        block_hash: &str,
        parent_hash: &str,
        tx_ids: impl IntoIterator<Item = String>,
    ) -> BridgeResult<BlockMeta> {
        let mut meta = self
            .get(height)?
            .unwrap_or_else(|| BlockMeta::new(height, block_hash, parent_hash));
        meta.block_hash = block_hash.to_string();
        meta.parent_hash = parent_hash.to_string();
        meta.customer_tx_ids.extend(tx_ids);
        self.save(&meta)?;
        Ok(meta)
    }

    /// All stored records, oldest first.
    pub fn all(&self) -> BridgeResult<Vec<BlockMeta>> {
        self.store
            .scan_prefix(self.prefix().as_bytes())?
            .into_iter()
            .map(|(_, value)| decode(&value))
            .collect()
    }

    /// Delete every record with `height < below`. Returns how many were removed.
    pub fn prune_below(&self, below: Height) -> BridgeResult<usize> {
        let mut removed = 0;
        for meta in self.all()? {
            if meta.height >= below {
                break;
            }
            self.store.delete(self.key(meta.height).as_bytes())?;
            removed += 1;
        }
        Ok(removed)
    }
}
