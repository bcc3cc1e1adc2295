// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! RocksDB-backed [`KvStore`].

use super::KvStore;
use crate::error::{BridgeError, BridgeResult};
use rocksdb::{Direction, IteratorMode, Options, DB};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

fn storage_err(operation: &str, err: rocksdb::Error) -> BridgeError {
    BridgeError::StorageError(format!("rocksdb {operation}: {err}"))
}

#[derive(Clone)]
pub struct RocksKvStore {
    db: Arc<DB>,
}

impl RocksKvStore {
    pub fn open(path: impl AsRef<Path>) -> BridgeResult<Self> {
        let path = path.as_ref();
        let mut options = Options::default();
        options.create_if_missing(true);
        let db = DB::open(&options, path).map_err(|e| storage_err("open", e))?;
        info!("RocksKvStore opened path={}", path.display());
        Ok(Self { db: Arc::new(db) })
    }
}

impl KvStore for RocksKvStore {
    fn get(&self, key: &[u8]) -> BridgeResult<Option<Vec<u8>>> {
        self.db.get(key).map_err(|e| storage_err("get", e))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> BridgeResult<()> {
        self.db.put(key, value).map_err(|e| storage_err("put", e))
    }

    fn delete(&self, key: &[u8]) -> BridgeResult<()> {
        self.db.delete(key).map_err(|e| storage_err("delete", e))
    }

    fn scan_prefix(&self, prefix: &[u8]) -> BridgeResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut out = Vec::new();
        for entry in self
            .db
            .iterator(IteratorMode::From(prefix, Direction::Forward))
        {
            let (key, value) = entry.map_err(|e| storage_err("iterator", e))?;
            if !key.starts_with(prefix) {
                break;
            }
            out.push((key.to_vec(), value.to_vec()));
        }
        Ok(out)
    }
}
