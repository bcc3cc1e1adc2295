// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Outbound signing
//!
//! Each [`OutboundInstruction`] is identified by a fingerprint over its logical
//! content. A fingerprint is broadcast at most once: the [`SignerCache`] entry
//! written after a confirmed broadcast short-circuits every later attempt.
//!
//! ```text
//! instruction ─▶ fingerprint ─▶ SignerCache hit? ──yes──▶ skip
//!                                    │ no
//!                                    ▼
//!                  nonce gap check ─▶ build ─▶ RemoteSigner ─▶ broadcast
//!                                                  │              │
//!                                       blame ─▶ coordination    ▼
//!                                                         SignerCache entry
//! ```
//!
//! [`SignerCache`]: crate::storage::SignerCache

mod fingerprint;
mod outbound_signer;

pub use fingerprint::fingerprint;
pub use outbound_signer::{OutboundSigner, SignedOutbound};

use crate::error::BridgeResult;
use crate::types::{Blame, OutboundInstruction};
use async_trait::async_trait;
use ethers::types::Bytes;

/// Failure reported by the remote signing service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("keysign failed: {reason}")]
pub struct KeysignError {
    pub reason: String,
    /// Parties at fault, when the signing round could tell
    pub blame: Option<Blame>,
}

/// Threshold signing service holding the vault keys.
#[async_trait]
pub trait RemoteSigner: Send + Sync {
    /// Sign a 32-byte message hash with the key identified by `key_id`.
    /// The signature is `r || s || recovery_id`.
    async fn sign(&self, message_hash: [u8; 32], key_id: &str) -> Result<[u8; 65], KeysignError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountNonces {
    /// Next sequence number including unconfirmed transactions
    pub pending: u64,
    /// Next sequence number of the confirmed state
    pub finalized: u64,
}

impl AccountNonces {
    pub fn gap(&self) -> u64 {
        self.pending.saturating_sub(self.finalized)
    }
}

/// Chain-specific half of outbound signing.
#[async_trait]
pub trait OutboundChain: Send + Sync {
    type Unsigned: Send + Sync;

    fn chain(&self) -> &str;

    async fn account_nonces(&self, account: &str) -> BridgeResult<AccountNonces>;

    /// Build the unsigned transaction and the hash the remote signer signs.
    async fn build_tx(
        &self,
        instruction: &OutboundInstruction,
        nonce: u64,
    ) -> BridgeResult<(Self::Unsigned, [u8; 32])>;

    fn assemble(&self, unsigned: Self::Unsigned, signature: &[u8; 65]) -> BridgeResult<Bytes>;

    /// Submit signed bytes and return the transaction id. Errors meaning the
    /// transaction is already known to the chain count as success.
    async fn broadcast(&self, raw: &Bytes) -> BridgeResult<String>;
}
