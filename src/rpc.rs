use alloy::network::TransactionResponse;
use alloy::providers::fillers::FillProvider;
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::{BlockNumberOrTag, TransactionRequest};
use alloy::sol_types::SolCall;
use alloy_primitives::{Address, Bytes, U256};
use anyhow::{Context, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tokio_retry::Retry;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::warn;

use crate::chain::ChainTransaction;

type AlloyFullProvider = FillProvider<
    alloy::providers::fillers::JoinFill<
        alloy::providers::Identity,
        alloy::providers::fillers::JoinFill<
            alloy::providers::fillers::GasFiller,
            alloy::providers::fillers::JoinFill<
                alloy::providers::fillers::BlobGasFiller,
                alloy::providers::fillers::JoinFill<
                    alloy::providers::fillers::NonceFiller,
                    alloy::providers::fillers::ChainIdFiller,
                >,
            >,
        >,
    >,
    alloy::providers::RootProvider,
>;

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A reqwest client whose requests fail once `timeout` has elapsed, so a stalled
/// server surfaces as an error instead of hanging the caller.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT.min(timeout))
        .timeout(timeout)
        .build()
        .context("Failed to build HTTP client")
}

/// Read-only access to one endpoint. Each request gets a timeout and a short
/// backoff retry; anything that still fails is returned to the scan loop.
#[derive(Clone)]
pub struct RpcClient {
    provider: AlloyFullProvider,
    url: String,
    max_retries: usize,
}

impl RpcClient {
    pub fn new(rpc_url: &str) -> Result<Self> {
        let parsed_url = rpc_url
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid RPC URL: {}", rpc_url))?;
        let provider: AlloyFullProvider = ProviderBuilder::new().connect_http(parsed_url);

        Ok(RpcClient {
            provider,
            url: rpc_url.to_string(),
            max_retries: 3,
        })
    }

    fn get_retry_strategy(&self) -> impl Iterator<Item = Duration> + use<> {
        ExponentialBackoff::from_millis(100)
            .factor(2)
            .max_delay(Duration::from_secs(5))
            .map(jitter)
            .take(self.max_retries)
    }

    async fn with_retry<T, F, Fut>(&self, method: &'static str, request: F) -> Result<T>
    where
        F: Fn(AlloyFullProvider) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        Retry::spawn(self.get_retry_strategy(), || {
            let future = request(self.provider.clone());
            async move {
                match timeout(REQUEST_TIMEOUT, future).await {
                    Ok(Ok(result)) => Ok(result),
                    Ok(Err(e)) => {
                        warn!("RPC {} failed on {}: {}", method, self.url, e);
                        Err(e)
                    }
                    Err(_) => {
                        warn!(
                            "RPC {} timed out after {} seconds on {}",
                            method,
                            REQUEST_TIMEOUT.as_secs(),
                            self.url
                        );
                        Err(anyhow::anyhow!(
                            "Request timeout after {} seconds",
                            REQUEST_TIMEOUT.as_secs()
                        ))
                    }
                }
            }
        })
        .await
    }

    pub async fn get_latest_block(&self) -> Result<u64> {
        self.with_retry("eth_blockNumber", |provider| async move {
            Ok(provider.get_block_number().await?)
        })
        .await
    }

    pub async fn get_block_transactions(&self, number: u64) -> Result<Vec<ChainTransaction>> {
        let block = self
            .with_retry("eth_getBlockByNumber", |provider| async move {
                Ok(provider
                    .get_block_by_number(BlockNumberOrTag::Number(number))
                    .full()
                    .await?)
            })
            .await?
            .ok_or_else(|| anyhow::anyhow!("Block {} not found on {}", number, self.url))?;

        let transactions = block
            .transactions
            .txns()
            .map(|tx| ChainTransaction {
                hash: TransactionResponse::tx_hash(tx),
                from: TransactionResponse::from(tx),
                to: alloy::consensus::Transaction::to(tx),
                value: alloy::consensus::Transaction::value(tx),
                input: alloy::consensus::Transaction::input(tx).clone(),
                gas_price: tx
                    .effective_gas_price
                    .or_else(|| alloy::consensus::Transaction::gas_price(tx)),
            })
            .collect();

        Ok(transactions)
    }

    pub async fn get_balance(&self, owner: Address) -> Result<U256> {
        self.with_retry("eth_getBalance", |provider| async move {
            Ok(provider.get_balance(owner).await?)
        })
        .await
    }

    pub async fn call_contract<C>(&self, address: Address, call: C) -> Result<C::Return>
    where
        C: SolCall,
    {
        let input = Bytes::from(call.abi_encode());
        let output = self
            .with_retry("eth_call", |provider| {
                let request = TransactionRequest::default()
                    .to(address)
                    .input(input.clone().into());
                async move { Ok(provider.call(request).await?) }
            })
            .await?;

        Ok(C::abi_decode_returns(&output)?)
    }
}
