// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::types::OutboundInstruction;
use ethers::abi::{encode, Token};
use ethers::utils::keccak256;

/// Identity of an instruction for dedup purposes.
///
/// Covers the logical content only. `height`, `gas_rate` and `checkpoint` change
/// between retries of the same payout and are left out. Fields are ABI encoded,
/// which length-prefixes every string, so no two field splits hash alike.
pub fn fingerprint(instruction: &OutboundInstruction) -> String {
    let canonical = encode(&[
        Token::String(instruction.chain.clone()),
        Token::String(instruction.vault.to_lowercase()),
        Token::String(instruction.to.to_lowercase()),
        Token::String(instruction.token.to_lowercase()),
        Token::Uint(instruction.amount),
        Token::String(instruction.memo.clone()),
        Token::String(instruction.order_id.clone()),
        Token::String(instruction.method.clone()),
        Token::Bytes(instruction.payload.to_vec()),
    ]);
    format!("0x{}", hex::encode(keccak256(canonical)))
}
