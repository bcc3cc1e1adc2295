// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Pending Batches Module
//!
//! Holds inbound batches that still need confirmations and releases them to the
//! relay queue once the chain tip is deep enough.
//!
//! ```text
//! BlockScanner ──batch──▶ ConfirmationGate ──ready batch──▶ relay queue
//!                              │      ▲
//!                              ▼      │ tip (watch)
//!                     PendingBatchStore ──▶ pending/<chain>/ (KvStore)
//! ```
//!
//! Mempool batches and batches requiring zero confirmations skip the store.
//! Held batches are persisted until relayed, so a restart picks them up again.

mod gate;
mod store;

pub use gate::ConfirmationGate;
pub use store::PendingBatchStore;
