// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use super::{fingerprint, KeysignError, OutboundChain, RemoteSigner};
use crate::coordination::CoordinationClient;
use crate::error::{BridgeError, BridgeResult};
use crate::metrics::BridgeMetrics;
use crate::storage::SignerCache;
use crate::types::OutboundInstruction;
use ethers::types::Bytes;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const MAX_TRACKED_FINGERPRINTS: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedOutbound {
    pub fingerprint: String,
    pub tx_id: String,
    pub raw: Bytes,
}

fn decode_checkpoint(checkpoint: &Bytes) -> Option<u64> {
    if checkpoint.is_empty() || checkpoint.len() > 8 {
        return None;
    }
    let mut buf = [0u8; 8];
    buf[8 - checkpoint.len()..].copy_from_slice(checkpoint);
    Some(u64::from_be_bytes(buf))
}

fn encode_checkpoint(nonce: u64) -> Bytes {
    Bytes::from(nonce.to_be_bytes().to_vec())
}

pub struct OutboundSigner<C: OutboundChain> {
    chain: Arc<C>,
    remote: Arc<dyn RemoteSigner>,
    coordination: Arc<dyn CoordinationClient>,
    cache: SignerCache,
    max_pending_nonces: u64,
    // one lock per fingerprint so concurrent callers see each other's result
    locks: Mutex<LruCache<String, Arc<Mutex<()>>>>,
    metrics: Option<Arc<BridgeMetrics>>,
}

impl<C: OutboundChain + 'static> OutboundSigner<C> {
    pub fn new(
        chain: Arc<C>,
        remote: Arc<dyn RemoteSigner>,
        coordination: Arc<dyn CoordinationClient>,
        cache: SignerCache,
        max_pending_nonces: u64,
    ) -> Self {
        Self {
            chain,
            remote,
            coordination,
            cache,
            max_pending_nonces,
            locks: Mutex::new(LruCache::new(
                NonZeroUsize::new(MAX_TRACKED_FINGERPRINTS).unwrap_or(NonZeroUsize::MIN),
            )),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<BridgeMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn cache(&self) -> &SignerCache {
        &self.cache
    }

    async fn lock_for(&self, fingerprint: &str) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .await
            .get_or_insert(fingerprint.to_string(), || Arc::new(Mutex::new(())))
            .clone()
    }

    /// Sign and broadcast `instruction` unless its fingerprint was broadcast
    /// before. Returns `None` for a skipped instruction.
    pub async fn sign_and_broadcast(
        &self,
        instruction: &OutboundInstruction,
    ) -> BridgeResult<Option<SignedOutbound>> {
        let chain = self.chain.chain().to_string();
        let fp = fingerprint(instruction);
        let entry = self.lock_for(&fp).await;
        let _guard = entry.lock().await;

        if let Some(signed) = self.cache.get(&fp)? {
            if let Some(metrics) = &self.metrics {
                metrics.signer_with_cache_hit.with_label_values(&[&chain]).inc();
            }
            info!(
                "[{}] Signer cache hit for {} (order {}), already broadcast as {}",
                chain, fp, instruction.order_id, signed.broadcast_tx_id
            );
            return Ok(None);
        }
        if let Some(metrics) = &self.metrics {
            metrics.signer_with_cache_miss.with_label_values(&[&chain]).inc();
        }

        let nonces = self.chain.account_nonces(&instruction.vault).await?;
        if nonces.gap() > self.max_pending_nonces {
            return Err(BridgeError::PendingNonceGapTooLarge {
                gap: nonces.gap(),
                max: self.max_pending_nonces,
            });
        }

        let stored = self.cache.checkpoint(&fp)?;
        let nonce = stored
            .as_ref()
            .or(instruction.checkpoint.as_ref())
            .and_then(decode_checkpoint)
            .unwrap_or(nonces.pending);
        if stored.is_none() {
            self.cache.record_checkpoint(&fp, &encode_checkpoint(nonce))?;
        }

        let (unsigned, sighash) = self.chain.build_tx(instruction, nonce).await?;
        let signature = match self.remote.sign(sighash, &instruction.vault).await {
            Ok(signature) => signature,
            Err(e) => return Err(self.keysign_failed(instruction, e).await),
        };
        let raw = self.chain.assemble(unsigned, &signature)?;

        let tx_id = match self.chain.broadcast(&raw).await {
            Ok(tx_id) => tx_id,
            Err(e) => {
                if let Some(metrics) = &self.metrics {
                    metrics
                        .broadcasts
                        .with_label_values(&[&chain, "failed"])
                        .inc();
                }
                warn!(
                    "[{}] Broadcast of {} (nonce {}) failed: {:?}",
                    chain, fp, nonce, e
                );
                return Err(e);
            }
        };

        let entry = self.cache.set_signed(&fp, &instruction.vault, &tx_id)?;
        self.cache.mark_pending(&entry.broadcast_tx_id, &fp)?;
        if let Some(metrics) = &self.metrics {
            metrics
                .broadcasts
                .with_label_values(&[&chain, "success"])
                .inc();
        }
        info!(
            "[{}] Broadcast {} for order {} with nonce {} as {}",
            chain, fp, instruction.order_id, nonce, entry.broadcast_tx_id
        );
        Ok(Some(SignedOutbound {
            fingerprint: fp,
            tx_id: entry.broadcast_tx_id,
            raw,
        }))
    }

    async fn keysign_failed(&self, instruction: &OutboundInstruction, e: KeysignError) -> BridgeError {
        let chain = self.chain.chain();
        let Some(blame) = e.blame else {
            return BridgeError::SigningError(e.reason);
        };
        error!(
            "[{}] Keysign for order {} failed, blaming [{}]: {}",
            chain,
            instruction.order_id,
            blame.blame_nodes.join(", "),
            e.reason
        );
        if let Some(metrics) = &self.metrics {
            metrics.keysign_failures.with_label_values(&[chain]).inc();
        }
        if let Err(post_err) = self
            .coordination
            .post_keysign_failure(&blame, instruction.height, &instruction.memo)
            .await
        {
            warn!(
                "[{}] Failed to post keysign failure for order {}: {:?}",
                chain, instruction.order_id, post_err
            );
        }
        BridgeError::KeysignFailure { blame }
    }

    /// Process instructions until the queue closes or `cancel` fires. Failed
    /// instructions are logged and left to the next scheduling cycle.
    pub fn spawn(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<OutboundInstruction>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let chain = self.chain.chain().to_string();
            info!("[{}] Starting outbound signer", chain);
            loop {
                let instruction = tokio::select! {
                    _ = cancel.cancelled() => break,
                    instruction = rx.recv() => match instruction {
                        Some(instruction) => instruction,
                        None => break,
                    },
                };
                if let Err(e) = self.sign_and_broadcast(&instruction).await {
                    if let Some(metrics) = &self.metrics {
                        metrics
                            .signer_errors
                            .with_label_values(&[&chain, e.error_type()])
                            .inc();
                    }
                    warn!(
                        "[{}] Outbound order {} not sent: {:?}",
                        chain, instruction.order_id, e
                    );
                }
            }
            info!("[{}] Outbound signer exited", chain);
        })
    }
}
