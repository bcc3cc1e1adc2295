// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Whitelisted token metadata, read from ERC-20 contracts once and persisted.

use super::client::call_with_timeout;
use crate::error::{BridgeError, BridgeResult};
use crate::storage::{TokenMeta, TokenMetaStore};
use crate::types::MAX_TOKEN_DECIMALS;
use ethers::abi::{self, ParamType};
use ethers::providers::{JsonRpcClient, Middleware, Provider};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address as EthAddress, TransactionRequest, U256};
use ethers::utils::id;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

const DECIMALS_SIGNATURE: &str = "decimals()";
const SYMBOL_SIGNATURE: &str = "symbol()";
const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// Read-only ERC-20 call of a no-argument function.
pub(crate) fn erc20_call(token: EthAddress, signature: &str) -> TypedTransaction {
    TransactionRequest::new()
        .to(token)
        .data(id(signature).to_vec())
        .into()
}

pub struct TokenRegistry<P> {
    chain: String,
    provider: Arc<Provider<P>>,
    store: TokenMetaStore,
    whitelist: HashSet<EthAddress>,
    native: TokenMeta,
    cache: RwLock<HashMap<EthAddress, TokenMeta>>,
    rpc_timeout: Duration,
}

impl<P> TokenRegistry<P>
where
    P: JsonRpcClient + 'static,
{
    pub fn new(
        chain: impl Into<String>,
        provider: Arc<Provider<P>>,
        store: TokenMetaStore,
        whitelist: impl IntoIterator<Item = EthAddress>,
        native_symbol: &str,
        native_decimals: u32,
    ) -> Self {
        Self {
            chain: chain.into(),
            provider,
            store,
            whitelist: whitelist.into_iter().collect(),
            native: TokenMeta {
                address: format!("{:?}", EthAddress::zero()),
                symbol: native_symbol.to_string(),
                decimals: native_decimals,
            },
            cache: RwLock::new(HashMap::new()),
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
        }
    }

    pub fn with_rpc_timeout(mut self, rpc_timeout: Duration) -> Self {
        self.rpc_timeout = rpc_timeout;
        self
    }

    pub fn is_accepted(&self, token: &EthAddress) -> bool {
        token.is_zero() || self.whitelist.contains(token)
    }

    pub fn native(&self) -> &TokenMeta {
        &self.native
    }

    /// Metadata of `token`, `None` when it is not whitelisted.
    pub async fn get(&self, token: EthAddress) -> BridgeResult<Option<TokenMeta>> {
        if token.is_zero() {
            return Ok(Some(self.native.clone()));
        }
        if !self.whitelist.contains(&token) {
            return Ok(None);
        }
        if let Some(meta) = self.cache.read().await.get(&token) {
            return Ok(Some(meta.clone()));
        }

        let address = format!("{:?}", token);
        let meta = match self.store.get(&address)? {
            Some(meta) => meta,
            None => {
                let meta = self.fetch(token).await?;
                info!(
                    "[{}] Loaded token {} ({}, {} decimals)",
                    self.chain, address, meta.symbol, meta.decimals
                );
                self.store.save(&meta)?;
                meta
            }
        };
        self.cache.write().await.insert(token, meta.clone());
        Ok(Some(meta))
    }

    async fn fetch(&self, token: EthAddress) -> BridgeResult<TokenMeta> {
        let decimals_call = erc20_call(token, DECIMALS_SIGNATURE);
        let raw = call_with_timeout(
            &self.chain,
            self.rpc_timeout,
            "eth_call decimals()",
            self.provider.call(&decimals_call, None),
        )
        .await?;
        let decimals = abi::decode(&[ParamType::Uint(8)], &raw)
            .ok()
            .and_then(|mut tokens| tokens.pop())
            .and_then(|t| t.into_uint())
            .ok_or_else(|| {
                BridgeError::ProviderError(format!("bad decimals() answer from {:?}", token))
            })?;
        if decimals > U256::from(MAX_TOKEN_DECIMALS) {
            return Err(BridgeError::ProviderError(format!(
                "token {:?} reports {} decimals, at most {} are supported",
                token, decimals, MAX_TOKEN_DECIMALS
            )));
        }

        // Some tokens return bytes32 symbols; those are stored without a symbol
        let symbol_call = erc20_call(token, SYMBOL_SIGNATURE);
        let symbol = match call_with_timeout(
            &self.chain,
            self.rpc_timeout,
            "eth_call symbol()",
            self.provider.call(&symbol_call, None),
        )
        .await
        {
            Ok(raw) => abi::decode(&[ParamType::String], &raw)
                .ok()
                .and_then(|mut tokens| tokens.pop())
                .and_then(|t| t.into_string())
                .unwrap_or_default(),
            Err(e) => {
                warn!("[{}] symbol() failed for {:?}: {:?}", self.chain, token, e);
                String::new()
            }
        };

        Ok(TokenMeta {
            address: format!("{:?}", token),
            symbol,
            decimals: decimals.low_u32(),
        })
    }
}
