// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Reference adapter for EVM chains
//!
//! - `EthChainClient`: block, mempool and reorg queries behind the `Fetcher`
//!   and `ChainView` traits, plus gas tracking and solvency reports
//! - `EthOutboundChain`: builds, assembles and broadcasts `transferOut` payouts
//! - `EthChainConfig`: per-chain configuration

mod client;
mod config;
mod outbound;
mod parser;
mod token;

pub use client::EthChainClient;
pub use config::EthChainConfig;
pub use outbound::EthOutboundChain;
pub use parser::{BridgeEvent, BridgeEventKind, EventParseError};
pub use token::TokenRegistry;
