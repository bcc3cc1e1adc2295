// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::chain_syncer::SyncError;
use crate::types::Blame;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    // Key/value storage failed; not retried
    #[error("storage error: {0}")]
    StorageError(String),
    // Transient chain provider error, retried on the next cycle
    #[error("transient provider error: {0}")]
    TransientProviderError(String),
    // Chain provider error
    #[error("provider error: {0}")]
    ProviderError(String),
    // Remote signer reported which parties are at fault
    #[error("keysign failed: {blame}")]
    KeysignFailure { blame: Blame },
    // Remote signer failed without blame information
    #[error("signing error: {0}")]
    SigningError(String),
    // Account has too many unconfirmed transactions
    #[error("pending nonce gap {gap} exceeds maximum {max}")]
    PendingNonceGapTooLarge { gap: u64, max: u64 },
    // Invalid or inconsistent configuration
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    // A required collaborator was not supplied at construction
    #[error("missing collaborator: {0}")]
    MissingCollaborator(&'static str),
    // Coordination chain request failed
    #[error("coordination chain error: {0}")]
    CoordinationError(String),
    // Hand-off queue was closed by its consumer
    #[error("queue closed: {0}")]
    QueueClosed(&'static str),
    // Uncategorized error
    #[error("{0}")]
    Generic(String),
}

impl BridgeError {
    /// Returns a short string identifying the error type for metrics labels
    pub fn error_type(&self) -> &'static str {
        match self {
            BridgeError::StorageError(_) => "storage_error",
            BridgeError::TransientProviderError(_) => "transient_provider_error",
            BridgeError::ProviderError(_) => "provider_error",
            BridgeError::KeysignFailure { .. } => "keysign_failure",
            BridgeError::SigningError(_) => "signing_error",
            BridgeError::PendingNonceGapTooLarge { .. } => "pending_nonce_gap",
            BridgeError::InvalidConfig(_) => "invalid_config",
            BridgeError::MissingCollaborator(_) => "missing_collaborator",
            BridgeError::CoordinationError(_) => "coordination_error",
            BridgeError::QueueClosed(_) => "queue_closed",
            BridgeError::Generic(_) => "generic",
        }
    }

    /// Whether the caller should retry on its next scheduling cycle.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BridgeError::TransientProviderError(_)
                | BridgeError::ProviderError(_)
                | BridgeError::SigningError(_)
                | BridgeError::PendingNonceGapTooLarge { .. }
                | BridgeError::CoordinationError(_)
        )
    }
}

impl From<ethers::providers::ProviderError> for BridgeError {
    fn from(e: ethers::providers::ProviderError) -> Self {
        BridgeError::ProviderError(format!("{:?}", e))
    }
}

impl From<SyncError> for BridgeError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::Storage(msg) => BridgeError::StorageError(msg),
            SyncError::Rpc(msg) | SyncError::Timeout(msg) => {
                BridgeError::TransientProviderError(msg)
            }
            SyncError::ChannelClosed => BridgeError::QueueClosed("sync"),
            other => BridgeError::ProviderError(other.to_string()),
        }
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
