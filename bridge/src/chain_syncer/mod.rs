// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Chain Syncer Module
//!
//! Observation side of the bridge: one [`BlockScanner`] per chain drives a
//! chain adapter through the [`Fetcher`] contract and hands the batches it
//! produces to the coordination layer.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                          BlockScanner                                 │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │                                                                       │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌──────────────────┐   │
//! │  │  Block loop     │   │  Fetcher        │   │ Confirmation     │   │
//! │  │                 │──▶│  (chain adapter)│──▶│ policy           │   │
//! │  │  - Cursor       │   │  - Reorg detect │   │  - Stamp batch   │   │
//! │  │  - Health       │   │  - Parse events │   │                  │   │
//! │  └─────────────────┘   └─────────────────┘   └──────────────────┘   │
//! │  ┌─────────────────┐                                                 │
//! │  │  Mempool loop   │   Output: InboundBatch, ErrataBlock,            │
//! │  └─────────────────┘           NetworkFee, SolvencyReport            │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Adapters own everything chain specific. The scanner only knows heights,
//! batches and the health of the chain.

// Common types and utilities shared across all chains
pub mod common;

// EVM reference adapter
pub mod eth;

pub mod scanner;

pub use common::*;
pub use scanner::{BlockScanner, ScanStep, ScannerHandle, ScannerState};
