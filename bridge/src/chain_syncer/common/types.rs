// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The contract between the scanning engine and a chain adapter.

use crate::types::{Height, InboundBatch, NetworkFeeRate};

/// What a chain adapter must provide so the scanner can drive it.
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    /// Chain name used in logs, metrics and storage keys
    fn chain(&self) -> &str;

    /// Poll the mempool. An empty batch means nothing new.
    async fn fetch_mempool(&self, next_height: Height) -> SyncResult<InboundBatch>;

    /// Fetch the bridge-relevant content of `height`. Fails with
    /// [`SyncError::UnavailableBlock`] while the endpoint does not have it yet.
    async fn fetch_block(&self, height: Height, chain_tip: Height) -> SyncResult<InboundBatch>;

    async fn current_height(&self) -> SyncResult<Height>;

    /// Network fee as the adapter currently tracks it.
    async fn network_fee(&self) -> NetworkFeeRate;
}

/// Error type for sync operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Block {0} is not available yet")]
    UnavailableBlock(Height),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl SyncError {
    /// Whether this error is recoverable (should retry)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SyncError::Rpc(_)
                | SyncError::Timeout(_)
                | SyncError::UnavailableBlock(_)
                | SyncError::InvalidResponse(_)
        )
    }
}

impl From<crate::error::BridgeError> for SyncError {
    fn from(e: crate::error::BridgeError) -> Self {
        use crate::error::BridgeError;
        match e {
            BridgeError::StorageError(msg) => SyncError::Storage(msg),
            BridgeError::QueueClosed(_) => SyncError::ChannelClosed,
            BridgeError::ProviderError(msg) | BridgeError::TransientProviderError(msg) => {
                SyncError::Rpc(msg)
            }
            other => SyncError::Other(other.to_string()),
        }
    }
}

/// Result type for syncer operations
pub type SyncResult<T> = Result<T, SyncError>;
