// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! EVM chain adapter: the [`Fetcher`] the scanner drives and the [`ChainView`]
//! the reorg detector queries.

use super::config::EthChainConfig;
use super::parser::{bridge_event_topics, BridgeEvent};
use super::token::TokenRegistry;
use crate::chain_syncer::common::{
    BlockHeader, ChainView, Fetcher, ReorgDetector, SyncError, SyncResult, TxStatus,
};
use crate::chain_syncer::scanner::ScannerState;
use crate::coordination::{send_cancellable, BridgeQueues};
use crate::error::{BridgeError, BridgeResult};
use crate::gas_estimator::{GasEstimator, GWEI};
use crate::metrics::BridgeMetrics;
use crate::storage::{BlockMetaStore, SharedKvStore, SignerCache, TokenMetaStore};
use crate::types::{
    to_internal_amount, CoinBalance, Height, InboundBatch, InboundItem, NetworkFee,
    NetworkFeeRate, SolvencyReport,
};
use ethers::providers::{JsonRpcClient, Middleware, Provider, ProviderError, RpcError};
use ethers::types::{
    Address as EthAddress, Block, BlockNumber, Filter, Log, Transaction, ValueOrArray, H256, U256,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Run one chain RPC under `timeout`. Errors answered by the node itself
/// (reverts, rejected transactions) are `ProviderError`; timeouts and transport
/// failures are `TransientProviderError`.
pub(crate) async fn call_with_timeout<T, F>(
    chain: &str,
    timeout: Duration,
    method: &str,
    call: F,
) -> BridgeResult<T>
where
    F: Future<Output = Result<T, ProviderError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) if e.as_error_response().is_some() => Err(BridgeError::ProviderError(
            format!("[{}] {}: {:?}", chain, method, e),
        )),
        Ok(Err(e)) => Err(BridgeError::TransientProviderError(format!(
            "[{}] {}: {:?}",
            chain, method, e
        ))),
        Err(_) => Err(BridgeError::TransientProviderError(format!(
            "[{}] {} timed out after {:?}",
            chain, method, timeout
        ))),
    }
}

pub struct EthChainClient<P> {
    config: EthChainConfig,
    provider: Arc<Provider<P>>,
    contract: EthAddress,
    vaults: Vec<EthAddress>,
    tokens: TokenRegistry<P>,
    detector: ReorgDetector,
    signer_cache: SignerCache,
    gas: Mutex<GasEstimator>,
    last_reported_fee: Mutex<Option<U256>>,
    fee_tx: mpsc::Sender<NetworkFee>,
    solvency_tx: mpsc::Sender<SolvencyReport>,
    state: Arc<ScannerState>,
    cancel: CancellationToken,
    metrics: Option<Arc<BridgeMetrics>>,
}

impl<P> EthChainClient<P>
where
    P: JsonRpcClient + 'static,
{
    pub fn new(
        config: EthChainConfig,
        provider: Arc<Provider<P>>,
        store: SharedKvStore,
        queues: &BridgeQueues,
        state: Arc<ScannerState>,
        cancel: CancellationToken,
    ) -> BridgeResult<Self> {
        config.validate()?;
        let chain = config.chain_name.clone();
        let tokens = TokenRegistry::new(
            &chain,
            provider.clone(),
            TokenMetaStore::new(&chain, store.clone()),
            config.whitelisted_tokens()?,
            &config.native_symbol,
            config.native_decimals,
        )
        .with_rpc_timeout(config.rpc_timeout);
        let detector = ReorgDetector::new(
            &chain,
            BlockMetaStore::new(&chain, store.clone()),
            queues.errata.clone(),
            cancel.clone(),
        );
        Ok(Self {
            contract: config.bridge_contract_address()?,
            vaults: config.vault_addresses()?,
            gas: Mutex::new(GasEstimator::new(&config.gas)),
            last_reported_fee: Mutex::new(None),
            signer_cache: SignerCache::new(&chain, store),
            fee_tx: queues.network_fee.clone(),
            solvency_tx: queues.solvency.clone(),
            config,
            provider,
            tokens,
            detector,
            state,
            cancel,
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<BridgeMetrics>) -> Self {
        self.detector = self.detector.with_metrics(metrics.clone());
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &EthChainConfig {
        &self.config
    }

    pub fn provider(&self) -> Arc<Provider<P>> {
        self.provider.clone()
    }

    pub fn tokens(&self) -> &TokenRegistry<P> {
        &self.tokens
    }

    pub fn signer_cache(&self) -> &SignerCache {
        &self.signer_cache
    }

    pub fn block_metas(&self) -> &BlockMetaStore {
        self.detector.metas()
    }

    /// Current gas price recommendation in wei.
    pub async fn gas_price(&self) -> U256 {
        self.gas.lock().await.estimate()
    }

    /// Read the endpoint's chain id and compare it with the configured one.
    pub async fn verify_chain_id(&self) -> BridgeResult<u64> {
        let chain_id = self
            .call("eth_chainId", self.provider.get_chainid())
            .await?
            .as_u64();
        if let Some(expected) = self.config.expected_chain_id {
            if expected != chain_id {
                return Err(BridgeError::InvalidConfig(format!(
                    "[{}] endpoint reports chain id {}, expected {}",
                    self.config.chain_name, chain_id, expected
                )));
            }
        }
        info!(
            "[{}] Connected to chain id {}",
            self.config.chain_name, chain_id
        );
        Ok(chain_id)
    }

    /// [`call_with_timeout`] with this chain's configured timeout.
    pub(crate) async fn call<T, F>(&self, method: &str, call: F) -> BridgeResult<T>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        call_with_timeout(&self.config.chain_name, self.config.rpc_timeout, method, call).await
    }

    /// Run one RPC call under the configured per-call timeout.
    async fn rpc<T, F>(&self, method: &str, call: F) -> SyncResult<T>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        match tokio::time::timeout(self.config.rpc_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(SyncError::Rpc(format!("{}: {:?}", method, e))),
            Err(_) => Err(SyncError::Timeout(format!(
                "{} after {:?}",
                method, self.config.rpc_timeout
            ))),
        }
    }

    pub(crate) fn log_filter(&self, height: Height) -> Filter {
        Filter::new()
            .from_block(height)
            .to_block(height)
            .address(self.contract)
            .topic0(ValueOrArray::Array(
                bridge_event_topics().into_iter().map(Some).collect(),
            ))
    }

    async fn fetch_logs(&self, height: Height) -> SyncResult<Vec<Log>> {
        let filter = self.log_filter(height);
        let logs = self.rpc("eth_getLogs", self.provider.get_logs(&filter)).await?;
        Ok(logs
            .into_iter()
            .filter(|log| log.address == self.contract && log.removed != Some(true))
            .collect())
    }

    /// Parse bridge logs into items. Logs that fail to decode, move tokens off
    /// the whitelist or round down to zero are dropped.
    async fn parse_logs(&self, height: Height, logs: Vec<Log>) -> SyncResult<Vec<InboundItem>> {
        let mut items = Vec::new();
        for log in logs {
            let Some(tx_hash) = log.transaction_hash else {
                self.drop_item(height, "log without tx hash");
                continue;
            };
            let event = match BridgeEvent::decode(&log) {
                Ok(event) => event,
                Err(e) => {
                    self.drop_item(height, &format!("{:?}: {}", tx_hash, e));
                    continue;
                }
            };
            let token = match self.tokens.get(event.token).await {
                Ok(Some(token)) => token,
                Ok(None) => {
                    self.drop_item(
                        height,
                        &format!("{:?}: token {:?} not whitelisted", tx_hash, event.token),
                    );
                    continue;
                }
                // the block is retried when the token could not be read at all
                Err(e @ (BridgeError::TransientProviderError(_) | BridgeError::StorageError(_))) => {
                    return Err(e.into())
                }
                Err(e) => {
                    warn!(
                        "[{}] Unusable token {:?} in {:?}: {}",
                        self.config.chain_name, event.token, tx_hash, e
                    );
                    self.drop_item(height, &format!("{:?}: {}", tx_hash, e));
                    continue;
                }
            };
            let log_index = log.log_index.map(|i| i.low_u64()).unwrap_or_default();
            match event.into_item(format!("{:?}", tx_hash), height, log_index, token.decimals) {
                Some(item) => items.push(item),
                None => self.drop_item(height, &format!("{:?}: zero amount", tx_hash)),
            }
        }
        Ok(items)
    }

    fn drop_item(&self, height: Height, reason: &str) {
        debug!(
            "[{}] Dropping bridge log at height {}: {}",
            self.config.chain_name, height, reason
        );
        if let Some(metrics) = &self.metrics {
            metrics
                .dropped_items
                .with_label_values(&[&self.config.chain_name])
                .inc();
        }
    }

    /// Base fee plus the median priority fee of the block's transactions.
    fn block_fee_sample(block: &Block<Transaction>) -> Option<U256> {
        let base_fee = block.base_fee_per_gas.unwrap_or_default();
        let mut tips: Vec<U256> = block
            .transactions
            .iter()
            .filter_map(|tx| match tx.max_priority_fee_per_gas {
                Some(tip) => Some(tip),
                None => tx.gas_price.map(|price| price.saturating_sub(base_fee)),
            })
            .collect();
        if tips.is_empty() {
            return None;
        }
        tips.sort();
        Some(base_fee.saturating_add(tips[tips.len() / 2]))
    }

    async fn update_gas(&self, block: &Block<Transaction>) {
        let Some(sample) = Self::block_fee_sample(block) else {
            return;
        };
        let estimate = self.gas.lock().await.add_sample(sample);
        if let Some(metrics) = &self.metrics {
            metrics
                .gas_estimate_wei
                .with_label_values(&[&self.config.chain_name])
                .set(i64::try_from(estimate.low_u64()).unwrap_or(i64::MAX));
        }
    }

    fn fee_rate(&self, estimate: U256) -> NetworkFeeRate {
        let gwei = U256::from(GWEI);
        let (quotient, remainder) = estimate.div_mod(gwei);
        let rate = if remainder.is_zero() {
            quotient
        } else {
            quotient + 1
        };
        NetworkFeeRate {
            transaction_size: self.config.gas.transfer_gas_limit,
            swap_size: self.config.gas.swap_gas_limit,
            transaction_rate: rate.low_u64(),
        }
    }

    /// Push the smoothed fee when it moved by at least one resolution step.
    async fn report_fee(&self, height: Height) -> SyncResult<()> {
        let estimate = self.gas.lock().await.estimate();
        if estimate.is_zero() {
            return Ok(());
        }
        let mut last = self.last_reported_fee.lock().await;
        let resolution = U256::from(self.config.gas.resolution);
        let changed = match *last {
            None => true,
            Some(prev) => {
                let diff = if prev > estimate {
                    prev - estimate
                } else {
                    estimate - prev
                };
                diff >= resolution
            }
        };
        if !changed {
            return Ok(());
        }
        let fee = NetworkFee {
            chain: self.config.chain_name.clone(),
            height,
            fee: self.fee_rate(estimate),
        };
        debug!(
            "[{}] Reporting network fee {:?} at height {}",
            self.config.chain_name, fee.fee, height
        );
        if send_cancellable(&self.fee_tx, fee, &self.cancel, "network_fee").await? {
            *last = Some(estimate);
            if let Some(metrics) = &self.metrics {
                metrics
                    .network_fee_reports
                    .with_label_values(&[&self.config.chain_name])
                    .inc();
            }
        }
        Ok(())
    }

    /// Native balances of the configured vaults, only while the chain is healthy.
    async fn report_solvency(&self, height: Height) -> SyncResult<()> {
        if self.vaults.is_empty()
            || !self.state.is_healthy()
            || height % self.config.solvency_interval_blocks != 0
        {
            return Ok(());
        }
        let native = self.tokens.native();
        for vault in &self.vaults {
            let balance = self
                .rpc(
                    "eth_getBalance",
                    self.provider.get_balance(*vault, Some(height.into())),
                )
                .await?;
            let report = SolvencyReport {
                chain: self.config.chain_name.clone(),
                height,
                vault: format!("{:?}", vault),
                coins: vec![CoinBalance {
                    token: native.address.clone(),
                    amount: to_internal_amount(balance, native.decimals),
                }],
            };
            if !send_cancellable(&self.solvency_tx, report, &self.cancel, "solvency").await? {
                return Ok(());
            }
            if let Some(metrics) = &self.metrics {
                metrics
                    .solvency_reports
                    .with_label_values(&[&self.config.chain_name])
                    .inc();
            }
        }
        Ok(())
    }

    fn header_of<T>(height: Height, block: &Block<T>) -> Option<BlockHeader> {
        Some(BlockHeader {
            height,
            hash: format!("{:?}", block.hash?),
            parent_hash: format!("{:?}", block.parent_hash),
        })
    }
}

#[async_trait::async_trait]
impl<P> ChainView for EthChainClient<P>
where
    P: JsonRpcClient + 'static,
{
    async fn block_header(&self, height: Height) -> SyncResult<Option<BlockHeader>> {
        let block = self
            .rpc("eth_getBlockByNumber", self.provider.get_block(height))
            .await?;
        Ok(block.and_then(|b| Self::header_of(height, &b)))
    }

    async fn tx_status(&self, tx_id: &str) -> SyncResult<TxStatus> {
        let Ok(hash) = tx_id.parse::<H256>() else {
            return Ok(TxStatus::Missing);
        };
        let receipt = self
            .rpc(
                "eth_getTransactionReceipt",
                self.provider.get_transaction_receipt(hash),
            )
            .await?;
        if let Some(receipt) = receipt {
            return Ok(match receipt.status.map(|s| s.as_u64()) {
                Some(1) | None => TxStatus::Success,
                Some(_) => TxStatus::Failed,
            });
        }
        let tx = self
            .rpc(
                "eth_getTransactionByHash",
                self.provider.get_transaction(hash),
            )
            .await?;
        Ok(if tx.is_some() {
            TxStatus::Pending
        } else {
            TxStatus::Missing
        })
    }

    async fn rescan_block(&self, height: Height) -> SyncResult<Vec<InboundItem>> {
        let logs = self.fetch_logs(height).await?;
        self.parse_logs(height, logs).await
    }
}

#[async_trait::async_trait]
impl<P> Fetcher for EthChainClient<P>
where
    P: JsonRpcClient + 'static,
{
    fn chain(&self) -> &str {
        &self.config.chain_name
    }

    /// EVM mempools are not observed for inbound items. The poll only resolves
    /// pending broadcast markers of transactions the endpoint no longer knows.
    async fn fetch_mempool(&self, next_height: Height) -> SyncResult<InboundBatch> {
        for (tx_id, fingerprint) in self.signer_cache.pending()? {
            let Ok(hash) = tx_id.parse::<H256>() else {
                continue;
            };
            let tx = self
                .rpc(
                    "eth_getTransactionByHash",
                    self.provider.get_transaction(hash),
                )
                .await?;
            if tx.is_none() {
                warn!(
                    "[{}] Broadcast tx {} for {} was dropped from the mempool",
                    self.config.chain_name, tx_id, fingerprint
                );
                self.signer_cache.clear_pending(&tx_id)?;
            }
        }
        Ok(InboundBatch::new_mempool(
            &self.config.chain_name,
            next_height,
            Vec::new(),
        ))
    }

    async fn fetch_block(&self, height: Height, chain_tip: Height) -> SyncResult<InboundBatch> {
        let block = self
            .rpc(
                "eth_getBlockByNumber",
                self.provider.get_block_with_txs(height),
            )
            .await?
            .ok_or(SyncError::UnavailableBlock(height))?;
        let header = Self::header_of(height, &block).ok_or(SyncError::UnavailableBlock(height))?;

        let replayed = if self.config.reorg.enabled {
            self.detector.process_new_block(self, &header).await?
        } else {
            Vec::new()
        };

        let logs = self.fetch_logs(height).await?;
        let mut confirmed_outbound = Vec::new();
        for tx_hash in logs.iter().filter_map(|log| log.transaction_hash) {
            let tx_id = format!("{:?}", tx_hash);
            if let Some(fingerprint) = self.signer_cache.clear_pending(&tx_id)? {
                debug!(
                    "[{}] Outbound {} for {} confirmed at height {}",
                    self.config.chain_name, tx_id, fingerprint, height
                );
                confirmed_outbound.push(tx_id);
            }
        }
        let items = self.parse_logs(height, logs).await?;

        self.update_gas(&block).await;

        let metas = self.detector.metas();
        let mut meta = metas.save_observed(
            height,
            &header.hash,
            &header.parent_hash,
            items.iter().map(|item| item.tx_id.clone()),
        )?;
        if !confirmed_outbound.is_empty() {
            for tx_id in confirmed_outbound {
                meta.add_signed_tx(tx_id);
            }
            metas.save(&meta)?;
        }
        if height > self.config.reorg.max_reorg_window {
            metas.prune_below(height - self.config.reorg.max_reorg_window)?;
        }

        if chain_tip.saturating_sub(height) <= self.config.observation_flexibility_blocks {
            self.report_fee(height).await?;
            self.report_solvency(height).await?;
        }

        let mut all = items;
        all.extend(replayed);
        Ok(InboundBatch::new_block(&self.config.chain_name, height, all))
    }

    async fn current_height(&self) -> SyncResult<Height> {
        let height = self
            .rpc("eth_blockNumber", self.provider.get_block_number())
            .await?;
        Ok(height.as_u64())
    }

    async fn network_fee(&self) -> NetworkFeeRate {
        let estimate = self.gas.lock().await.estimate();
        self.fee_rate(estimate)
    }
}

/// Block number tag used for nonce queries.
pub(crate) fn block_tag(pending: bool) -> Option<ethers::types::BlockId> {
    Some(if pending {
        BlockNumber::Pending.into()
    } else {
        BlockNumber::Latest.into()
    })
}
