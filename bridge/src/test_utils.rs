// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! In-memory fakes of the observer's collaborators, for unit tests.

use crate::chain_syncer::common::{BlockHeader, ChainView, Fetcher, SyncError, SyncResult, TxStatus};
use crate::coordination::{CoordinationClient, KeysignFailureRecord};
use crate::error::{BridgeError, BridgeResult};
use crate::finality::SecuritySource;
use crate::signer::{AccountNonces, KeysignError, OutboundChain, RemoteSigner};
use crate::types::{
    Blame, Height, InboundBatch, InboundItem, NetworkFeeRate, OutboundInstruction,
};
use async_trait::async_trait;
use ethers::types::{Bytes, U256};
use ethers::utils::keccak256;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const TEST_VAULT: &str = "0x1111111111111111111111111111111111111111";
pub const TEST_RECIPIENT: &str = "0x2222222222222222222222222222222222222222";
pub const NATIVE_TOKEN: &str = "0x0000000000000000000000000000000000000000";

pub fn test_item(tx_id: &str, height: Height) -> InboundItem {
    test_item_with_amount(tx_id, height, 100_000_000)
}

pub fn test_item_with_amount(tx_id: &str, height: Height, amount: u64) -> InboundItem {
    InboundItem {
        tx_id: tx_id.to_string(),
        height,
        sender: TEST_RECIPIENT.to_string(),
        vault: TEST_VAULT.to_string(),
        token: NATIVE_TOKEN.to_string(),
        amount: U256::from(amount),
        order_id: format!("order-{tx_id}"),
        payload: Bytes::default(),
        method: "deposit".to_string(),
        log_index: 0,
    }
}

pub fn test_instruction(order_id: &str) -> OutboundInstruction {
    OutboundInstruction {
        chain: "eth".to_string(),
        height: 100,
        memo: format!("OUT:{order_id}"),
        order_id: order_id.to_string(),
        vault: TEST_VAULT.to_string(),
        to: TEST_RECIPIENT.to_string(),
        amount: U256::from(150_000_000u64),
        token: NATIVE_TOKEN.to_string(),
        method: "transfer_out".to_string(),
        payload: Bytes::default(),
        checkpoint: None,
        gas_rate: None,
    }
}

/// Scripted chain for driving the block scanner.
pub struct FakeFetcher {
    chain: String,
    tip: AtomicU64,
    tip_fails: AtomicBool,
    blocks: Mutex<HashMap<Height, Vec<InboundItem>>>,
    unavailable: Mutex<HashSet<Height>>,
    failures: Mutex<HashMap<Height, SyncError>>,
    mempool: Mutex<VecDeque<Vec<InboundItem>>>,
    fee: Mutex<NetworkFeeRate>,
    block_fetches: AtomicUsize,
    mempool_polls: AtomicUsize,
}

impl FakeFetcher {
    pub fn new(chain: &str) -> Self {
        Self {
            chain: chain.to_string(),
            tip: AtomicU64::new(0),
            tip_fails: AtomicBool::new(false),
            blocks: Mutex::new(HashMap::new()),
            unavailable: Mutex::new(HashSet::new()),
            failures: Mutex::new(HashMap::new()),
            mempool: Mutex::new(VecDeque::new()),
            fee: Mutex::new(NetworkFeeRate::default()),
            block_fetches: AtomicUsize::new(0),
            mempool_polls: AtomicUsize::new(0),
        }
    }

    pub fn set_tip(&self, height: Height) {
        self.tip.store(height, Ordering::SeqCst);
    }

    pub fn fail_tip(&self, fail: bool) {
        self.tip_fails.store(fail, Ordering::SeqCst);
    }

    pub fn set_block(&self, height: Height, items: Vec<InboundItem>) {
        self.blocks.lock().unwrap().insert(height, items);
    }

    pub fn set_unavailable(&self, height: Height) {
        self.unavailable.lock().unwrap().insert(height);
    }

    pub fn fail_block(&self, height: Height, error: SyncError) {
        self.failures.lock().unwrap().insert(height, error);
    }

    /// Items returned by the next mempool poll.
    pub fn push_mempool(&self, items: Vec<InboundItem>) {
        self.mempool.lock().unwrap().push_back(items);
    }

    pub fn set_fee(&self, fee: NetworkFeeRate) {
        *self.fee.lock().unwrap() = fee;
    }

    pub fn block_fetches(&self) -> usize {
        self.block_fetches.load(Ordering::SeqCst)
    }

    pub fn mempool_polls(&self) -> usize {
        self.mempool_polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    fn chain(&self) -> &str {
        &self.chain
    }

    async fn fetch_mempool(&self, next_height: Height) -> SyncResult<InboundBatch> {
        self.mempool_polls.fetch_add(1, Ordering::SeqCst);
        let items = self.mempool.lock().unwrap().pop_front().unwrap_or_default();
        Ok(InboundBatch::new_mempool(&self.chain, next_height, items))
    }

    async fn fetch_block(&self, height: Height, _chain_tip: Height) -> SyncResult<InboundBatch> {
        self.block_fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.failures.lock().unwrap().get(&height) {
            return Err(error.clone());
        }
        if self.unavailable.lock().unwrap().contains(&height) {
            return Err(SyncError::UnavailableBlock(height));
        }
        let items = self
            .blocks
            .lock()
            .unwrap()
            .get(&height)
            .cloned()
            .unwrap_or_default();
        Ok(InboundBatch::new_block(&self.chain, height, items))
    }

    async fn current_height(&self) -> SyncResult<Height> {
        if self.tip_fails.load(Ordering::SeqCst) {
            return Err(SyncError::Rpc("node unreachable".to_string()));
        }
        Ok(self.tip.load(Ordering::SeqCst))
    }

    async fn network_fee(&self) -> NetworkFeeRate {
        *self.fee.lock().unwrap()
    }
}

/// Chain state for the reorg detector. Unknown transactions are reported as
/// successful and unknown heights as missing.
#[derive(Default)]
pub struct FakeChainView {
    headers: Mutex<HashMap<Height, BlockHeader>>,
    statuses: Mutex<HashMap<String, TxStatus>>,
    rescans: Mutex<HashMap<Height, Vec<InboundItem>>>,
    status_queries: AtomicUsize,
    rescans_served: AtomicUsize,
}

impl FakeChainView {
    pub fn set_header(&self, header: BlockHeader) {
        self.headers.lock().unwrap().insert(header.height, header);
    }

    pub fn set_status(&self, tx_id: &str, status: TxStatus) {
        self.statuses
            .lock()
            .unwrap()
            .insert(tx_id.to_string(), status);
    }

    pub fn set_rescan(&self, height: Height, items: Vec<InboundItem>) {
        self.rescans.lock().unwrap().insert(height, items);
    }

    pub fn status_queries(&self) -> usize {
        self.status_queries.load(Ordering::SeqCst)
    }

    pub fn rescans_served(&self) -> usize {
        self.rescans_served.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainView for FakeChainView {
    async fn block_header(&self, height: Height) -> SyncResult<Option<BlockHeader>> {
        Ok(self.headers.lock().unwrap().get(&height).cloned())
    }

    async fn tx_status(&self, tx_id: &str) -> SyncResult<TxStatus> {
        self.status_queries.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .get(tx_id)
            .copied()
            .unwrap_or(TxStatus::Success))
    }

    async fn rescan_block(&self, height: Height) -> SyncResult<Vec<InboundItem>> {
        self.rescans_served.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .rescans
            .lock()
            .unwrap()
            .get(&height)
            .cloned()
            .unwrap_or_default())
    }
}

/// Coordination chain stand-in. Synced from the first poll unless told otherwise.
#[derive(Default)]
pub struct FakeCoordination {
    block_height: AtomicU64,
    synced_after: AtomicU64,
    sync_polls: AtomicU64,
    fee_queries: AtomicUsize,
    observed: Mutex<HashMap<String, Height>>,
    fees: Mutex<HashMap<String, NetworkFeeRate>>,
    keysign_failures: Mutex<Vec<KeysignFailureRecord>>,
}

impl FakeCoordination {
    pub fn set_block_height(&self, height: Height) {
        self.block_height.store(height, Ordering::SeqCst);
    }

    /// Report synced from the `polls`-th `is_synced` call on.
    pub fn set_synced_after(&self, polls: u64) {
        self.synced_after.store(polls, Ordering::SeqCst);
    }

    pub fn set_last_observed(&self, chain: &str, height: Height) {
        self.observed
            .lock()
            .unwrap()
            .insert(chain.to_string(), height);
    }

    pub fn set_network_fee(&self, chain: &str, fee: NetworkFeeRate) {
        self.fees.lock().unwrap().insert(chain.to_string(), fee);
    }

    pub fn sync_polls(&self) -> u64 {
        self.sync_polls.load(Ordering::SeqCst)
    }

    pub fn fee_queries(&self) -> usize {
        self.fee_queries.load(Ordering::SeqCst)
    }

    pub fn keysign_failures(&self) -> Vec<KeysignFailureRecord> {
        self.keysign_failures.lock().unwrap().clone()
    }
}

#[async_trait]
impl CoordinationClient for FakeCoordination {
    async fn get_block_height(&self) -> BridgeResult<Height> {
        Ok(self.block_height.load(Ordering::SeqCst))
    }

    async fn get_last_observed_in_height(&self, chain: &str) -> BridgeResult<Height> {
        Ok(self
            .observed
            .lock()
            .unwrap()
            .get(chain)
            .copied()
            .unwrap_or_default())
    }

    async fn is_synced(&self) -> BridgeResult<bool> {
        let polls = self.sync_polls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(polls >= self.synced_after.load(Ordering::SeqCst))
    }

    async fn get_network_fee(&self, chain: &str) -> BridgeResult<Option<NetworkFeeRate>> {
        self.fee_queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.fees.lock().unwrap().get(chain).copied())
    }

    async fn post_keysign_failure(
        &self,
        blame: &Blame,
        height: Height,
        memo: &str,
    ) -> BridgeResult<()> {
        self.keysign_failures
            .lock()
            .unwrap()
            .push(KeysignFailureRecord {
                blame: blame.clone(),
                height,
                memo: memo.to_string(),
            });
        Ok(())
    }
}

/// Prices every token 1:1 against the native asset.
#[derive(Clone)]
pub struct FakeSecuritySource {
    budget: U256,
    bps: u64,
    pricing_fails: Arc<AtomicBool>,
}

impl FakeSecuritySource {
    pub fn new(budget: u64, bps: u64) -> Self {
        Self {
            budget: U256::from(budget),
            bps,
            pricing_fails: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn fail_pricing(&self, fail: bool) {
        self.pricing_fails.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SecuritySource for FakeSecuritySource {
    async fn block_reward_budget(&self, _chain: &str) -> BridgeResult<U256> {
        Ok(self.budget)
    }

    async fn security_multiplier_bps(&self, _chain: &str) -> BridgeResult<u64> {
        Ok(self.bps)
    }

    async fn value_in_native(&self, _chain: &str, token: &str, amount: U256) -> BridgeResult<U256> {
        if self.pricing_fails.load(Ordering::SeqCst) {
            return Err(BridgeError::ProviderError(format!("no price for {token}")));
        }
        Ok(amount)
    }
}

/// Outbound chain whose "transactions" are the sighash followed by the signature.
pub struct FakeOutboundChain {
    chain: String,
    nonces: Mutex<AccountNonces>,
    built_nonces: Mutex<Vec<u64>>,
    broadcasts: Mutex<Vec<Bytes>>,
    broadcast_error: Mutex<Option<BridgeError>>,
}

impl FakeOutboundChain {
    pub fn new(chain: &str) -> Self {
        Self {
            chain: chain.to_string(),
            nonces: Mutex::new(AccountNonces {
                pending: 0,
                finalized: 0,
            }),
            built_nonces: Mutex::new(vec![]),
            broadcasts: Mutex::new(vec![]),
            broadcast_error: Mutex::new(None),
        }
    }

    pub fn set_nonces(&self, nonces: AccountNonces) {
        *self.nonces.lock().unwrap() = nonces;
    }

    pub fn fail_broadcast(&self, error: Option<BridgeError>) {
        *self.broadcast_error.lock().unwrap() = error;
    }

    pub fn built_nonces(&self) -> Vec<u64> {
        self.built_nonces.lock().unwrap().clone()
    }

    pub fn broadcasts(&self) -> Vec<Bytes> {
        self.broadcasts.lock().unwrap().clone()
    }
}

#[async_trait]
impl OutboundChain for FakeOutboundChain {
    type Unsigned = [u8; 32];

    fn chain(&self) -> &str {
        &self.chain
    }

    async fn account_nonces(&self, _account: &str) -> BridgeResult<AccountNonces> {
        Ok(*self.nonces.lock().unwrap())
    }

    async fn build_tx(
        &self,
        instruction: &OutboundInstruction,
        nonce: u64,
    ) -> BridgeResult<([u8; 32], [u8; 32])> {
        self.built_nonces.lock().unwrap().push(nonce);
        let sighash = keccak256(format!("{}:{}", instruction.order_id, nonce));
        Ok((sighash, sighash))
    }

    fn assemble(&self, unsigned: [u8; 32], signature: &[u8; 65]) -> BridgeResult<Bytes> {
        let mut raw = unsigned.to_vec();
        raw.extend_from_slice(signature);
        Ok(Bytes::from(raw))
    }

    async fn broadcast(&self, raw: &Bytes) -> BridgeResult<String> {
        if let Some(error) = self.broadcast_error.lock().unwrap().clone() {
            return Err(error);
        }
        self.broadcasts.lock().unwrap().push(raw.clone());
        Ok(format!("0x{}", hex::encode(keccak256(raw))))
    }
}

#[derive(Default)]
pub struct FakeRemoteSigner {
    calls: AtomicUsize,
    delay: Mutex<Duration>,
    failure: Mutex<Option<KeysignError>>,
}

impl FakeRemoteSigner {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn fail_with(&self, failure: Option<KeysignError>) {
        *self.failure.lock().unwrap() = failure;
    }
}

#[async_trait]
impl RemoteSigner for FakeRemoteSigner {
    async fn sign(&self, message_hash: [u8; 32], _key_id: &str) -> Result<[u8; 65], KeysignError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(failure) = self.failure.lock().unwrap().clone() {
            return Err(failure);
        }
        let mut signature = [0u8; 65];
        signature[..32].copy_from_slice(&message_hash);
        signature[32..64].copy_from_slice(&message_hash);
        Ok(signature)
    }
}
