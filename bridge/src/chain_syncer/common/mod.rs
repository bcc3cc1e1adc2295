// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Chain-agnostic pieces shared by every adapter.

mod config;
mod reorg;
mod types;

pub use config::*;
pub use reorg::*;
pub use types::*;
