// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Durable key/value storage for the observer.
//!
//! Every typed store below writes into one ordered [`KvStore`] and keys its records
//! with a per-chain prefix, so several chains can share one database without
//! collisions:
//!
//! ```text
//! blockmeta/<chain>/<height:020>   -> BlockMeta
//! signer/<chain>/fp/<fingerprint>  -> SignerCacheEntry
//! signer/<chain>/pending/<tx id>   -> fingerprint
//! signer/<chain>/vault/<vault>     -> latest broadcast tx id
//! signer/<chain>/checkpoint/<fp>   -> checkpoint bytes
//! cursor/<chain>                   -> ScanCursor
//! token/<chain>/<address>          -> TokenMeta
//! pending/<chain>/<height:020>/<seq:020> -> InboundBatch
//! ```
//!
//! Heights are zero padded so that a prefix scan returns them in ascending order.

mod block_meta;
mod memory;
#[cfg(feature = "rocksdb")]
mod rocks;
mod scan_cursor;
mod signer_cache;
mod token_meta;

pub use block_meta::{BlockMeta, BlockMetaStore};
pub use memory::MemoryKvStore;
#[cfg(feature = "rocksdb")]
pub use rocks::RocksKvStore;
pub use scan_cursor::{ScanCursor, ScanCursorStore};
pub use signer_cache::{SignerCache, SignerCacheEntry};
pub use token_meta::{TokenMeta, TokenMetaStore};

use crate::error::{BridgeError, BridgeResult};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;

/// Ordered key/value store with prefix scan.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &[u8]) -> BridgeResult<Option<Vec<u8>>>;

    fn put(&self, key: &[u8], value: &[u8]) -> BridgeResult<()>;

    fn delete(&self, key: &[u8]) -> BridgeResult<()>;

    /// All entries whose key starts with `prefix`, in ascending key order.
    fn scan_prefix(&self, prefix: &[u8]) -> BridgeResult<Vec<(Vec<u8>, Vec<u8>)>>;
}

pub type SharedKvStore = Arc<dyn KvStore>;

pub(crate) fn encode<T: Serialize>(value: &T) -> BridgeResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| BridgeError::StorageError(format!("encode: {e}")))
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> BridgeResult<T> {
    serde_json::from_slice(bytes).map_err(|e| BridgeError::StorageError(format!("decode: {e}")))
}

pub(crate) fn get_typed<T: DeserializeOwned>(
    store: &dyn KvStore,
    key: &[u8],
) -> BridgeResult<Option<T>> {
    store.get(key)?.map(|bytes| decode(&bytes)).transpose()
}

pub(crate) fn put_typed<T: Serialize>(store: &dyn KvStore, key: &[u8], value: &T) -> BridgeResult<()> {
    store.put(key, &encode(value)?)
}
