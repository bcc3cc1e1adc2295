// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use super::KvStore;
use crate::error::{BridgeError, BridgeResult};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// In-memory [`KvStore`]. Used by tests and by nodes started without a `db-path`.
#[derive(Debug, Default, Clone)]
pub struct MemoryKvStore {
    inner: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|m| m.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> BridgeError {
    BridgeError::StorageError("memory store lock poisoned".to_string())
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &[u8]) -> BridgeResult<Option<Vec<u8>>> {
        let map = self.inner.read().map_err(|_| poisoned())?;
        Ok(map.get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> BridgeResult<()> {
        let mut map = self.inner.write().map_err(|_| poisoned())?;
        map.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> BridgeResult<()> {
        let mut map = self.inner.write().map_err(|_| poisoned())?;
        map.remove(key);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> BridgeResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let map = self.inner.read().map_err(|_| poisoned())?;
        Ok(map
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}
