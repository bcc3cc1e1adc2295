// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use super::{get_typed, put_typed, SharedKvStore};
use crate::error::BridgeResult;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMeta {
    pub address: String,
    pub symbol: String,
    pub decimals: u32,
}

#[derive(Clone)]
pub struct TokenMetaStore {
    chain: String,
    store: SharedKvStore,
}

impl TokenMetaStore {
    pub fn new(chain: impl Into<String>, store: SharedKvStore) -> Self {
        Self {
            chain: chain.into(),
            store,
        }
    }

    // addresses are stored lowercased so checksummed and plain spellings match
    fn key(&self, address: &str) -> String {
        format!("token/{}/{}", self.chain, address.to_lowercase())
    }

    pub fn get(&self, address: &str) -> BridgeResult<Option<TokenMeta>> {
        get_typed(self.store.as_ref(), self.key(address).as_bytes())
    }

    pub fn save(&self, meta: &TokenMeta) -> BridgeResult<()> {
        put_typed(self.store.as_ref(), self.key(&meta.address).as_bytes(), meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryKvStore;
    use std::sync::Arc;

    #[test]
    fn test_lookup_ignores_address_case() {
        let tokens = TokenMetaStore::new("eth", Arc::new(MemoryKvStore::new()));
        tokens
            .save(&TokenMeta {
                address: "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48".to_string(),
                symbol: "USDC".to_string(),
                decimals: 6,
            })
            .unwrap();
        let meta = tokens
            .get("0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48")
            .unwrap()
            .unwrap();
        assert_eq!(meta.decimals, 6);
    }
}
