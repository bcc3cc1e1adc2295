// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Confirmation depth policy
//!
//! Required confirmations are sized to the value an inbound batch moves relative
//! to the economic security of the source chain:
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                ConfirmationPolicy (trait)                         │
//! │  + required_confirmations(batch) -> u64                           │
//! └───────────────────────────────────────────────────────────────────┘
//!            │                        │                     │
//!            ▼                        ▼                     ▼
//!   ┌──────────────────┐   ┌──────────────────┐   ┌──────────────────┐
//!   │ ValueAtRisk      │   │ InstantFinality  │   │ Fixed            │
//!   │ ceil(2*v/avail)  │   │ always 0         │   │ Confirmations    │
//!   │ clamp [min, max] │   │                  │   │                  │
//!   └──────────────────┘   └──────────────────┘   └──────────────────┘
//! ```
//!
//! A batch is relayed once `tip - batch.height >= required_confirmations`.

mod config;
mod policy;
mod value_at_risk;

pub use config::ConfirmationConfig;
pub use policy::{
    is_confirmation_ready, ConfirmationPolicy, FixedConfirmations, InstantFinality,
    SecuritySource,
};
pub use value_at_risk::ValueAtRiskPolicy;
