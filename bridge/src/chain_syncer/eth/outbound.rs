// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Outbound payouts through the bridge contract's `transferOut`.

use super::client::{block_tag, EthChainClient};
use super::config::parse_address;
use crate::error::{BridgeError, BridgeResult};
use crate::signer::{AccountNonces, OutboundChain};
use crate::types::{from_internal_amount, OutboundInstruction};
use async_trait::async_trait;
use ethers::abi::{self, Token};
use ethers::providers::{JsonRpcClient, Middleware};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Bytes, Signature, TransactionRequest, H256, U256};
use ethers::utils::{id, keccak256};
use std::sync::Arc;
use tracing::info;

pub(crate) const TRANSFER_OUT_SIGNATURE: &str = "transferOut(address,address,uint256,bytes32,bytes)";

// Node answers for a transaction that is already in the pool or mined
const ALREADY_BROADCAST: &[&str] = &[
    "already known",
    "nonce too low",
    "replacement transaction underpriced",
];

/// Order ids are bytes32 on chain. Ids that are not hex encoded are hashed.
fn order_id_bytes(order_id: &str) -> H256 {
    order_id
        .parse::<H256>()
        .unwrap_or_else(|_| H256::from(keccak256(order_id.as_bytes())))
}

pub struct EthOutboundChain<P> {
    client: Arc<EthChainClient<P>>,
    chain_id: u64,
}

impl<P> EthOutboundChain<P>
where
    P: JsonRpcClient + 'static,
{
    pub fn new(client: Arc<EthChainClient<P>>, chain_id: u64) -> Self {
        Self { client, chain_id }
    }

    fn transfer_out_calldata(
        &self,
        instruction: &OutboundInstruction,
        token: Token,
        amount: U256,
    ) -> BridgeResult<Vec<u8>> {
        let to = parse_address(&instruction.to)?;
        let mut data = id(TRANSFER_OUT_SIGNATURE).to_vec();
        data.extend(abi::encode(&[
            Token::Address(to),
            token,
            Token::Uint(amount),
            Token::FixedBytes(order_id_bytes(&instruction.order_id).as_bytes().to_vec()),
            Token::Bytes(instruction.payload.to_vec()),
        ]));
        Ok(data)
    }
}

#[async_trait]
impl<P> OutboundChain for EthOutboundChain<P>
where
    P: JsonRpcClient + 'static,
{
    type Unsigned = TypedTransaction;

    fn chain(&self) -> &str {
        &self.client.config().chain_name
    }

    async fn account_nonces(&self, account: &str) -> BridgeResult<AccountNonces> {
        let address = parse_address(account)?;
        let provider = self.client.provider();
        let pending = self
            .client
            .call(
                "eth_getTransactionCount",
                provider.get_transaction_count(address, block_tag(true)),
            )
            .await?;
        let finalized = self
            .client
            .call(
                "eth_getTransactionCount",
                provider.get_transaction_count(address, block_tag(false)),
            )
            .await?;
        Ok(AccountNonces {
            pending: pending.as_u64(),
            finalized: finalized.as_u64(),
        })
    }

    async fn build_tx(
        &self,
        instruction: &OutboundInstruction,
        nonce: u64,
    ) -> BridgeResult<(TypedTransaction, [u8; 32])> {
        let config = self.client.config();
        let vault = parse_address(&instruction.vault)?;
        let token = parse_address(&instruction.token)?;
        let meta = self.client.tokens().get(token).await?.ok_or_else(|| {
            BridgeError::InvalidConfig(format!(
                "[{}] token {} is not whitelisted",
                config.chain_name, instruction.token
            ))
        })?;
        let amount = from_internal_amount(instruction.amount, meta.decimals);
        let value = if token.is_zero() { amount } else { U256::zero() };
        let gas_limit = if instruction.payload.is_empty() {
            config.gas.transfer_gas_limit
        } else {
            config.gas.swap_gas_limit
        };
        let gas_price = match instruction.gas_rate {
            Some(rate) => rate,
            None => self.client.gas_price().await,
        };

        let tx: TypedTransaction = TransactionRequest::new()
            .from(vault)
            .to(config.bridge_contract_address()?)
            .value(value)
            .data(self.transfer_out_calldata(instruction, Token::Address(token), amount)?)
            .gas(gas_limit)
            .gas_price(gas_price)
            .nonce(nonce)
            .chain_id(self.chain_id)
            .into();
        let sighash = tx.sighash();
        Ok((tx, sighash.0))
    }

    fn assemble(&self, unsigned: TypedTransaction, signature: &[u8; 65]) -> BridgeResult<Bytes> {
        // accept both 0/1 and 27/28 recovery ids
        let recovery_id = match signature[64] {
            v @ (0 | 1) => v as u64,
            v @ (27 | 28) => v as u64 - 27,
            other => {
                return Err(BridgeError::SigningError(format!(
                    "invalid recovery id {}",
                    other
                )))
            }
        };
        let signature = Signature {
            r: U256::from_big_endian(&signature[..32]),
            s: U256::from_big_endian(&signature[32..64]),
            v: recovery_id + 35 + 2 * self.chain_id,
        };
        Ok(unsigned.rlp_signed(&signature))
    }

    async fn broadcast(&self, raw: &Bytes) -> BridgeResult<String> {
        let chain = self.chain();
        let provider = self.client.provider();
        let sent = self
            .client
            .call("eth_sendRawTransaction", async {
                provider
                    .send_raw_transaction(raw.clone())
                    .await
                    .map(|pending| pending.tx_hash())
            })
            .await;
        match sent {
            Ok(tx_hash) => Ok(format!("{:?}", tx_hash)),
            Err(e) => {
                let message = e.to_string().to_lowercase();
                if ALREADY_BROADCAST.iter().any(|m| message.contains(m)) {
                    let tx_hash = H256::from(keccak256(raw));
                    info!(
                        "[{}] Transaction {:?} was already broadcast: {}",
                        chain, tx_hash, message
                    );
                    return Ok(format!("{:?}", tx_hash));
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain_syncer::eth::client::tests::{config, contract, setup, Setup};
    use crate::chain_syncer::eth::token::tests::mock_erc20;
    use crate::coordination::CoordinationClient;
    use crate::eth_mock_provider::EthMockProvider;
    use crate::metrics::BridgeMetrics;
    use crate::signer::{OutboundSigner, RemoteSigner};
    use crate::storage::{MemoryKvStore, SignerCache};
    use crate::test_utils::{test_instruction, FakeCoordination, FakeRemoteSigner, TEST_VAULT};
    use ethers::abi::ParamType;
    use ethers::signers::{LocalWallet, Signer};
    use ethers::types::{Address as EthAddress, Transaction};
    use ethers::utils::rlp;

    const CHAIN_ID: u64 = 1;
    const GWEI_20: u64 = 20_000_000_000;
    const WALLET_KEY: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    fn decode_transfer_out(data: &[u8]) -> Vec<Token> {
        assert_eq!(&data[..4], &id(TRANSFER_OUT_SIGNATURE));
        abi::decode(
            &[
                ParamType::Address,
                ParamType::Address,
                ParamType::Uint(256),
                ParamType::FixedBytes(32),
                ParamType::Bytes,
            ],
            &data[4..],
        )
        .unwrap()
    }

    fn outbound_chain(setup: Setup) -> (EthOutboundChain<EthMockProvider>, EthMockProvider) {
        (EthOutboundChain::new(Arc::new(setup.client), CHAIN_ID), setup.mock)
    }

    #[tokio::test]
    async fn test_native_payout_rescales_and_sets_value() {
        let (chain, _mock) = outbound_chain(setup(config()));
        let mut instruction = test_instruction("order-1");
        instruction.gas_rate = Some(U256::from(30_000_000_000u64));

        let (tx, sighash) = chain.build_tx(&instruction, 7).await.unwrap();
        assert_eq!(sighash, tx.sighash().0);
        let wei = U256::from(1_500_000_000_000_000_000u128);
        assert_eq!(tx.value(), Some(&wei));
        assert_eq!(tx.nonce(), Some(&U256::from(7)));
        assert_eq!(tx.gas(), Some(&U256::from(config().gas.transfer_gas_limit)));
        assert_eq!(tx.gas_price(), Some(U256::from(30_000_000_000u64)));
        assert_eq!(tx.to_addr(), Some(&contract()));
        assert_eq!(tx.chain_id(), Some(CHAIN_ID.into()));

        let tokens = decode_transfer_out(tx.data().unwrap());
        assert_eq!(tokens[2], Token::Uint(wei));
        assert_eq!(tokens[1], Token::Address(EthAddress::zero()));
    }

    #[tokio::test]
    async fn test_erc20_payout_uses_token_decimals_and_swap_gas() {
        let usdc = EthAddress::repeat_byte(0x42);
        let mut cfg = config();
        cfg.token_whitelist = vec![format!("{:?}", usdc)];
        let setup = setup(cfg.clone());
        mock_erc20(&setup.mock, usdc, "USDC", 6);
        let (chain, _mock) = outbound_chain(setup);

        let mut instruction = test_instruction("order-2");
        instruction.token = format!("{:?}", usdc);
        instruction.payload = Bytes::from(vec![1, 2, 3]);
        let (tx, _) = chain.build_tx(&instruction, 0).await.unwrap();

        assert_eq!(tx.value(), Some(&U256::zero()));
        assert_eq!(tx.gas(), Some(&U256::from(cfg.gas.swap_gas_limit)));
        let tokens = decode_transfer_out(tx.data().unwrap());
        assert_eq!(tokens[1], Token::Address(usdc));
        assert_eq!(tokens[2], Token::Uint(U256::from(1_500_000u64)));
        assert_eq!(tokens[3], Token::FixedBytes(order_id_bytes("order-2").as_bytes().to_vec()));
        assert_eq!(tokens[4], Token::Bytes(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn test_unlisted_token_is_rejected() {
        let (chain, _mock) = outbound_chain(setup(config()));
        let mut instruction = test_instruction("order-3");
        instruction.token = format!("{:?}", EthAddress::repeat_byte(9));
        let err = chain.build_tx(&instruction, 0).await.unwrap_err();
        assert!(matches!(err, BridgeError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_assembled_transaction_recovers_signer() {
        let (chain, _mock) = outbound_chain(setup(config()));
        let wallet: LocalWallet = WALLET_KEY.parse().unwrap();
        let mut instruction = test_instruction("order-4");
        instruction.vault = format!("{:?}", wallet.address());
        instruction.gas_rate = Some(U256::from(GWEI_20));

        let (tx, sighash) = chain.build_tx(&instruction, 3).await.unwrap();
        let signature = wallet.sign_hash(H256(sighash)).unwrap();
        let mut raw_signature = [0u8; 65];
        signature.r.to_big_endian(&mut raw_signature[..32]);
        signature.s.to_big_endian(&mut raw_signature[32..64]);
        raw_signature[64] = signature.v as u8;

        let raw = chain.assemble(tx, &raw_signature).unwrap();
        let decoded: Transaction = rlp::decode(&raw).unwrap();
        assert_eq!(decoded.recover_from().unwrap(), wallet.address());
        assert_eq!(decoded.nonce, U256::from(3));
        assert_eq!(decoded.to, Some(contract()));

        raw_signature[64] = 5;
        let (tx, _) = chain.build_tx(&instruction, 3).await.unwrap();
        assert!(chain.assemble(tx, &raw_signature).is_err());
    }

    #[tokio::test]
    async fn test_nonces_read_pending_and_latest() {
        let (chain, mock) = outbound_chain(setup(config()));
        let vault: EthAddress = TEST_VAULT.parse().unwrap();
        mock.add_response("eth_getTransactionCount", (vault, "pending"), U256::from(9))
            .unwrap();
        mock.add_response("eth_getTransactionCount", (vault, "latest"), U256::from(7))
            .unwrap();
        let nonces = chain.account_nonces(TEST_VAULT).await.unwrap();
        assert_eq!(nonces, AccountNonces { pending: 9, finalized: 7 });
        assert_eq!(nonces.gap(), 2);
    }

    #[tokio::test]
    async fn test_stalled_node_times_out_outbound_calls() {
        let mut config = config();
        config.rpc_timeout = std::time::Duration::from_millis(50);
        let (chain, mock) = outbound_chain(setup(config));
        mock.add_method_delay("eth_getTransactionCount", std::time::Duration::from_secs(5));
        mock.add_method_delay("eth_sendRawTransaction", std::time::Duration::from_secs(5));
        mock.add_method_response("eth_getTransactionCount", U256::from(9))
            .unwrap();
        mock.add_method_response("eth_sendRawTransaction", H256::repeat_byte(0xab))
            .unwrap();

        let err = chain.account_nonces(TEST_VAULT).await.unwrap_err();
        assert!(matches!(err, BridgeError::TransientProviderError(ref msg) if msg.contains("timed out")));
        let err = chain.broadcast(&Bytes::from(vec![0xf8, 0x01])).await.unwrap_err();
        assert!(matches!(err, BridgeError::TransientProviderError(ref msg) if msg.contains("timed out")));
    }

    #[tokio::test]
    async fn test_already_known_broadcast_counts_as_success() {
        let (chain, mock) = outbound_chain(setup(config()));
        let raw = Bytes::from(vec![0xf8, 0x01, 0x02]);

        mock.add_method_error("eth_sendRawTransaction", -32000, "already known");
        let tx_id = chain.broadcast(&raw).await.unwrap();
        assert_eq!(tx_id, format!("{:?}", H256::from(keccak256(&raw))));

        mock.remove_method_response("eth_sendRawTransaction");
        mock.add_method_error("eth_sendRawTransaction", -32000, "insufficient funds for gas");
        assert!(chain.broadcast(&raw).await.is_err());

        mock.remove_method_response("eth_sendRawTransaction");
        let hash = H256::repeat_byte(0xab);
        mock.add_method_response("eth_sendRawTransaction", hash).unwrap();
        assert_eq!(chain.broadcast(&raw).await.unwrap(), format!("{:?}", hash));
    }

    #[tokio::test]
    async fn test_signer_broadcasts_payout_once() {
        let (chain, mock) = outbound_chain(setup(config()));
        let vault: EthAddress = TEST_VAULT.parse().unwrap();
        mock.add_response("eth_getTransactionCount", (vault, "pending"), U256::from(4))
            .unwrap();
        mock.add_response("eth_getTransactionCount", (vault, "latest"), U256::from(4))
            .unwrap();
        mock.add_method_response("eth_sendRawTransaction", H256::repeat_byte(0xcd))
            .unwrap();

        let remote: Arc<dyn RemoteSigner> = Arc::new(FakeRemoteSigner::default());
        let coordination: Arc<dyn CoordinationClient> = Arc::new(FakeCoordination::default());
        let signer = OutboundSigner::new(
            Arc::new(chain),
            remote,
            coordination,
            SignerCache::new("eth", Arc::new(MemoryKvStore::new())),
            3,
        )
        .with_metrics(Arc::new(BridgeMetrics::new_for_testing()));

        let mut instruction = test_instruction("order-9");
        instruction.gas_rate = Some(U256::from(GWEI_20));
        let signed = signer.sign_and_broadcast(&instruction).await.unwrap().unwrap();
        assert_eq!(signed.tx_id, format!("{:?}", H256::repeat_byte(0xcd)));

        instruction.gas_rate = Some(U256::from(2 * GWEI_20));
        assert!(signer.sign_and_broadcast(&instruction).await.unwrap().is_none());
        assert_eq!(mock.request_count("eth_sendRawTransaction"), 1);
    }
}
