//! The chain-facing seam of the watcher: the read-only RPC operations the scan
//! loop and the parsers need, and the plain data they exchange.

use alloy_primitives::{Address, B256, Bytes, TxHash, U64, U256, hex};
use anyhow::Result;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;

use crate::events::{balanceOfCall, decimalsCall, symbolCall};
use crate::receipts::BatchReceiptClient;
use crate::rpc::RpcClient;

/// A transaction body as returned by a full block fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTransaction {
    pub hash: TxHash,
    pub from: Address,
    pub to: Option<Address>,
    pub value: U256,
    pub input: Bytes,
    pub gas_price: Option<u128>,
}

impl ChainTransaction {
    /// Lowercase calldata with a `0x` prefix.
    pub fn input_hex(&self) -> String {
        hex::encode_prefixed(&self.input)
    }

    pub fn touches(&self, address: &Address) -> bool {
        self.from == *address || self.to.as_ref() == Some(address)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReceiptLog {
    pub address: Address,
    #[serde(default)]
    pub topics: Vec<B256>,
    #[serde(default)]
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainReceipt {
    pub transaction_hash: TxHash,
    /// Absent on pre-Byzantium receipts, which carry a state root instead.
    #[serde(default)]
    pub status: Option<U64>,
    pub gas_used: U256,
    #[serde(default)]
    pub effective_gas_price: Option<U256>,
    #[serde(default)]
    pub logs: Vec<ReceiptLog>,
}

impl ChainReceipt {
    pub fn succeeded(&self) -> bool {
        self.status.is_none_or(|status| status == U64::from(1))
    }

    /// Wei paid for gas, preferring the receipt's effective price.
    pub fn gas_cost(&self, transaction: &ChainTransaction) -> U256 {
        let price = self
            .effective_gas_price
            .or_else(|| transaction.gas_price.map(U256::from))
            .unwrap_or_default();
        self.gas_used.saturating_mul(price)
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn block_number(&self) -> Result<u64>;

    async fn block_transactions(&self, number: u64) -> Result<Vec<ChainTransaction>>;

    /// One entry per hash, in input order. `None` marks a receipt that is not available yet.
    async fn transaction_receipts(&self, hashes: &[TxHash]) -> Result<Vec<Option<ChainReceipt>>>;

    async fn native_balance(&self, owner: Address) -> Result<U256>;

    async fn token_decimals(&self, token: Address) -> Result<u8>;

    async fn token_symbol(&self, token: Address) -> Result<String>;

    async fn token_balance(&self, token: Address, owner: Address) -> Result<U256>;
}

/// The production chain client for one endpoint.
pub struct EvmChain {
    rpc: RpcClient,
    receipts: BatchReceiptClient,
}

impl EvmChain {
    pub fn new(rpc_url: &str) -> Result<Self> {
        Ok(EvmChain {
            rpc: RpcClient::new(rpc_url)?,
            receipts: BatchReceiptClient::new(rpc_url)?,
        })
    }
}

#[async_trait]
impl ChainClient for EvmChain {
    async fn block_number(&self) -> Result<u64> {
        self.rpc.get_latest_block().await
    }

    async fn block_transactions(&self, number: u64) -> Result<Vec<ChainTransaction>> {
        self.rpc.get_block_transactions(number).await
    }

    async fn transaction_receipts(&self, hashes: &[TxHash]) -> Result<Vec<Option<ChainReceipt>>> {
        self.receipts.get_receipts(hashes).await
    }

    async fn native_balance(&self, owner: Address) -> Result<U256> {
        self.rpc.get_balance(owner).await
    }

    async fn token_decimals(&self, token: Address) -> Result<u8> {
        self.rpc.call_contract(token, decimalsCall {}).await
    }

    async fn token_symbol(&self, token: Address) -> Result<String> {
        self.rpc.call_contract(token, symbolCall {}).await
    }

    async fn token_balance(&self, token: Address, owner: Address) -> Result<U256> {
        self.rpc.call_contract(token, balanceOfCall { owner }).await
    }
}
