// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Strict decoders for the bridge contract's events.

use crate::types::{to_internal_amount, Height, InboundItem};
use ethers::abi::{self, ParamType, Token};
use ethers::types::{Address as EthAddress, Bytes, Log, H256, U256};
use ethers::utils::keccak256;
use once_cell::sync::Lazy;

pub const DEPOSIT_EVENT: &str = "Deposit(address,address,address,uint256,bytes32,bytes)";
pub const TRANSFER_OUT_EVENT: &str = "TransferOut(address,address,address,uint256,bytes32,bytes)";
pub const VAULT_TRANSFER_EVENT: &str = "VaultTransfer(address,address,address,uint256,bytes32)";

pub static DEPOSIT_TOPIC: Lazy<H256> = Lazy::new(|| H256::from(keccak256(DEPOSIT_EVENT)));
pub static TRANSFER_OUT_TOPIC: Lazy<H256> =
    Lazy::new(|| H256::from(keccak256(TRANSFER_OUT_EVENT)));
pub static VAULT_TRANSFER_TOPIC: Lazy<H256> =
    Lazy::new(|| H256::from(keccak256(VAULT_TRANSFER_EVENT)));

/// Topics the log filter asks for.
pub fn bridge_event_topics() -> Vec<H256> {
    vec![*DEPOSIT_TOPIC, *TRANSFER_OUT_TOPIC, *VAULT_TRANSFER_TOPIC]
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventParseError {
    #[error("unknown event topic {0:?}")]
    UnknownTopic(Option<H256>),
    #[error("expected {expected} topics, got {actual}")]
    TopicCount { expected: usize, actual: usize },
    #[error("malformed event data: {0}")]
    Data(String),
    #[error("log has no transaction hash")]
    MissingTxHash,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEventKind {
    /// A customer locked funds into a vault
    Deposit,
    /// A vault paid out an outbound instruction
    TransferOut,
    /// Funds moved between vaults during rotation
    VaultTransfer,
}

impl BridgeEventKind {
    pub fn method(&self) -> &'static str {
        match self {
            BridgeEventKind::Deposit => "deposit",
            BridgeEventKind::TransferOut => "transfer_out",
            BridgeEventKind::VaultTransfer => "vault_transfer",
        }
    }
}

/// A decoded bridge event, amounts still in token precision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeEvent {
    pub kind: BridgeEventKind,
    pub vault: EthAddress,
    /// Depositor, payee or receiving vault depending on the kind
    pub counterparty: EthAddress,
    pub token: EthAddress,
    pub amount: U256,
    pub order_id: H256,
    pub payload: Bytes,
}

fn topic_address(topic: &H256) -> EthAddress {
    EthAddress::from(*topic)
}

fn check_topics(log: &Log, expected: usize) -> Result<(), EventParseError> {
    if log.topics.len() != expected {
        return Err(EventParseError::TopicCount {
            expected,
            actual: log.topics.len(),
        });
    }
    Ok(())
}

fn decode_data(types: &[ParamType], data: &[u8]) -> Result<Vec<Token>, EventParseError> {
    abi::decode(types, data).map_err(|e| EventParseError::Data(e.to_string()))
}

fn take_address(token: Token) -> Result<EthAddress, EventParseError> {
    token
        .into_address()
        .ok_or_else(|| EventParseError::Data("expected address".to_string()))
}

fn take_uint(token: Token) -> Result<U256, EventParseError> {
    token
        .into_uint()
        .ok_or_else(|| EventParseError::Data("expected uint256".to_string()))
}

fn take_bytes32(token: Token) -> Result<H256, EventParseError> {
    match token {
        Token::FixedBytes(bytes) if bytes.len() == 32 => Ok(H256::from_slice(&bytes)),
        _ => Err(EventParseError::Data("expected bytes32".to_string())),
    }
}

fn take_bytes(token: Token) -> Result<Bytes, EventParseError> {
    token
        .into_bytes()
        .map(Bytes::from)
        .ok_or_else(|| EventParseError::Data("expected bytes".to_string()))
}

impl BridgeEvent {
    pub fn decode(log: &Log) -> Result<Self, EventParseError> {
        let topic = log.topics.first().copied();
        match topic {
            Some(t) if t == *DEPOSIT_TOPIC => {
                check_topics(log, 4)?;
                let mut data = decode_data(
                    &[ParamType::Uint(256), ParamType::FixedBytes(32), ParamType::Bytes],
                    &log.data,
                )?
                .into_iter();
                Ok(Self {
                    kind: BridgeEventKind::Deposit,
                    vault: topic_address(&log.topics[1]),
                    token: topic_address(&log.topics[2]),
                    counterparty: topic_address(&log.topics[3]),
                    amount: take_uint(next(&mut data)?)?,
                    order_id: take_bytes32(next(&mut data)?)?,
                    payload: take_bytes(next(&mut data)?)?,
                })
            }
            Some(t) if t == *TRANSFER_OUT_TOPIC => {
                check_topics(log, 3)?;
                let mut data = decode_data(
                    &[
                        ParamType::Address,
                        ParamType::Uint(256),
                        ParamType::FixedBytes(32),
                        ParamType::Bytes,
                    ],
                    &log.data,
                )?
                .into_iter();
                Ok(Self {
                    kind: BridgeEventKind::TransferOut,
                    vault: topic_address(&log.topics[1]),
                    counterparty: topic_address(&log.topics[2]),
                    token: take_address(next(&mut data)?)?,
                    amount: take_uint(next(&mut data)?)?,
                    order_id: take_bytes32(next(&mut data)?)?,
                    payload: take_bytes(next(&mut data)?)?,
                })
            }
            Some(t) if t == *VAULT_TRANSFER_TOPIC => {
                check_topics(log, 3)?;
                let mut data = decode_data(
                    &[
                        ParamType::Address,
                        ParamType::Uint(256),
                        ParamType::FixedBytes(32),
                    ],
                    &log.data,
                )?
                .into_iter();
                Ok(Self {
                    kind: BridgeEventKind::VaultTransfer,
                    vault: topic_address(&log.topics[1]),
                    counterparty: topic_address(&log.topics[2]),
                    token: take_address(next(&mut data)?)?,
                    amount: take_uint(next(&mut data)?)?,
                    order_id: take_bytes32(next(&mut data)?)?,
                    payload: Bytes::default(),
                })
            }
            other => Err(EventParseError::UnknownTopic(other)),
        }
    }

    /// Rescale to internal precision. `None` when nothing is left after rescaling.
    pub fn into_item(
        self,
        tx_id: String,
        height: Height,
        log_index: u64,
        token_decimals: u32,
    ) -> Option<InboundItem> {
        let amount = to_internal_amount(self.amount, token_decimals);
        if amount.is_zero() {
            return None;
        }
        Some(InboundItem {
            tx_id,
            height,
            sender: format!("{:?}", self.counterparty),
            vault: format!("{:?}", self.vault),
            token: format!("{:?}", self.token),
            amount,
            order_id: format!("{:?}", self.order_id),
            payload: self.payload,
            method: self.kind.method().to_string(),
            log_index,
        })
    }
}

fn next(data: &mut impl Iterator<Item = Token>) -> Result<Token, EventParseError> {
    data.next()
        .ok_or_else(|| EventParseError::Data("missing field".to_string()))
}
