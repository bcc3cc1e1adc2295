// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Data model shared by the scanning engine, the chain adapters and the signer.

use ethers::types::{Bytes, U256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Block height on an observed chain.
pub type Height = u64;

/// Decimal precision every amount is rescaled to before it leaves an adapter.
pub const INTERNAL_DECIMALS: u32 = 8;

/// Largest token precision the bridge accepts.
pub const MAX_TOKEN_DECIMALS: u32 = 36;

// 10^77 is the largest power of ten a U256 holds
const MAX_U256_EXP10: u32 = 77;

/// Where an inbound batch came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchKind {
    /// Produced by scanning a block at its height
    Block,
    /// Produced by a mempool poll, never needs confirmations
    Mempool,
    /// Items re-observed at an older height after a reorg rescan
    Replay,
}

/// A single observed bridge event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundItem {
    pub tx_id: String,
    pub height: Height,
    pub sender: String,
    pub vault: String,
    pub token: String,
    /// Amount in `INTERNAL_DECIMALS` precision
    pub amount: U256,
    /// Chain-native unique id of the bridge operation. `(chain, order_id)` is the
    /// idempotency key downstream.
    pub order_id: String,
    pub payload: Bytes,
    pub method: String,
    pub log_index: u64,
}

/// Everything observed at one height (or in one mempool poll).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundBatch {
    pub chain: String,
    pub height: Height,
    pub items: Vec<InboundItem>,
    pub kind: BatchKind,
    pub required_confirmations: u64,
}

impl InboundBatch {
    pub fn new_block(chain: impl Into<String>, height: Height, items: Vec<InboundItem>) -> Self {
        Self {
            chain: chain.into(),
            height,
            items,
            kind: BatchKind::Block,
            required_confirmations: 0,
        }
    }

    pub fn new_mempool(chain: impl Into<String>, height: Height, items: Vec<InboundItem>) -> Self {
        Self {
            chain: chain.into(),
            height,
            items,
            kind: BatchKind::Mempool,
            required_confirmations: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_mempool(&self) -> bool {
        self.kind == BatchKind::Mempool
    }

    pub fn tx_ids(&self) -> BTreeSet<String> {
        self.items.iter().map(|item| item.tx_id.clone()).collect()
    }

    /// Split items that belong to an older height (reorg rescans merged into this
    /// batch) into a separate replay batch stamped with the highest replayed height.
    pub fn split_replayed(mut self) -> (Self, Option<Self>) {
        let height = self.height;
        let (current, replayed): (Vec<_>, Vec<_>) = self
            .items
            .into_iter()
            .partition(|item| item.height >= height);
        self.items = current;
        if replayed.is_empty() {
            return (self, None);
        }
        let replay_height = replayed
            .iter()
            .map(|item| item.height)
            .max()
            .unwrap_or(height);
        let replay = Self {
            chain: self.chain.clone(),
            height: replay_height,
            items: replayed,
            kind: BatchKind::Replay,
            required_confirmations: 0,
        };
        (self, Some(replay))
    }
}

/// Instruction decided on the coordination chain for this node to sign and send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundInstruction {
    pub chain: String,
    pub height: Height,
    pub memo: String,
    pub order_id: String,
    pub vault: String,
    pub to: String,
    /// Amount in `INTERNAL_DECIMALS` precision
    pub amount: U256,
    /// Token address on the destination chain, zero address for the native asset
    pub token: String,
    pub method: String,
    pub payload: Bytes,
    /// Opaque signer-side state, for EVM chains the big-endian nonce
    #[serde(default)]
    pub checkpoint: Option<Bytes>,
    /// Gas price override in wei. Not part of the fingerprint.
    #[serde(default)]
    pub gas_rate: Option<U256>,
}

/// Retraction of a previously reported observation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ErrataTx {
    pub tx_id: String,
    pub chain: String,
}

/// Errata grouped by the height the transactions were originally observed at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrataBlock {
    pub chain: String,
    pub height: Height,
    pub txs: Vec<ErrataTx>,
}

/// Network fee as reported to the coordination chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NetworkFeeRate {
    /// Gas units of a plain transfer
    pub transaction_size: u64,
    /// Gas units of a contract call carrying a payload
    pub swap_size: u64,
    /// Gas price in gwei
    pub transaction_rate: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkFee {
    pub chain: String,
    pub height: Height,
    pub fee: NetworkFeeRate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinBalance {
    pub token: String,
    pub amount: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolvencyReport {
    pub chain: String,
    pub height: Height,
    pub vault: String,
    pub coins: Vec<CoinBalance>,
}

/// Which signers a failed keysign round blames.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Blame {
    pub fail_reason: String,
    pub is_unicast: bool,
    pub blame_nodes: Vec<String>,
}

impl Blame {
    pub fn is_empty(&self) -> bool {
        self.fail_reason.is_empty() && self.blame_nodes.is_empty()
    }
}

impl fmt::Display for Blame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "reason: {}, unicast: {}, nodes: [{}]",
            self.fail_reason,
            self.is_unicast,
            self.blame_nodes.join(", ")
        )
    }
}

/// Rescale an integer amount between decimal precisions using exact powers of ten.
pub fn convert_decimals(amount: U256, from_decimals: u32, to_decimals: u32) -> U256 {
    match from_decimals.cmp(&to_decimals) {
        std::cmp::Ordering::Equal => amount,
        std::cmp::Ordering::Greater => {
            let shift = from_decimals - to_decimals;
            if shift > MAX_U256_EXP10 {
                return U256::zero();
            }
            amount / U256::exp10(shift as usize)
        }
        std::cmp::Ordering::Less => {
            let shift = to_decimals - from_decimals;
            if amount.is_zero() {
                return amount;
            }
            if shift > MAX_U256_EXP10 {
                return U256::MAX;
            }
            amount.saturating_mul(U256::exp10(shift as usize))
        }
    }
}

/// Chain-native amount to internal precision.
pub fn to_internal_amount(amount: U256, chain_decimals: u32) -> U256 {
    convert_decimals(amount, chain_decimals, INTERNAL_DECIMALS)
}

/// Internal precision back to the chain-native amount.
pub fn from_internal_amount(amount: U256, chain_decimals: u32) -> U256 {
    convert_decimals(amount, INTERNAL_DECIMALS, chain_decimals)
}
