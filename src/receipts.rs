//! Receipt lookups as JSON-RPC batch calls.
//!
//! Hashes are sent in chunks of at most [`MAX_BATCH_SIZE`]. A `null` result is a
//! receipt that is not mined yet and comes back as `None`; any transport error or
//! malformed chunk response fails the whole call.

use alloy_primitives::TxHash;
use anyhow::{Context, Result};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::chain::ChainReceipt;
use crate::rpc::{REQUEST_TIMEOUT, http_client};
use std::time::Duration;

pub const MAX_BATCH_SIZE: usize = 100;

#[derive(Serialize)]
struct BatchRequest<'a> {
    jsonrpc: &'static str,
    id: usize,
    method: &'static str,
    params: [&'a TxHash; 1],
}

#[derive(Deserialize)]
struct BatchResponse {
    id: usize,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Clone)]
pub struct BatchReceiptClient {
    client: reqwest::Client,
    url: reqwest::Url,
}

impl BatchReceiptClient {
    pub fn new(rpc_url: &str) -> Result<Self> {
        Self::with_timeout(rpc_url, REQUEST_TIMEOUT)
    }

    pub fn with_timeout(rpc_url: &str, timeout: Duration) -> Result<Self> {
        let url = rpc_url
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid RPC URL: {}", rpc_url))?;
        Ok(BatchReceiptClient {
            client: http_client(timeout)?,
            url,
        })
    }

    pub async fn get_receipts(&self, hashes: &[TxHash]) -> Result<Vec<Option<ChainReceipt>>> {
        let chunks = hashes
            .chunks(MAX_BATCH_SIZE)
            .enumerate()
            .map(|(index, chunk)| self.fetch_chunk(index * MAX_BATCH_SIZE, chunk));

        let receipts = try_join_all(chunks).await?.into_iter().flatten().collect();
        Ok(receipts)
    }

    async fn fetch_chunk(
        &self,
        first_id: usize,
        hashes: &[TxHash],
    ) -> Result<Vec<Option<ChainReceipt>>> {
        let requests: Vec<_> = hashes
            .iter()
            .enumerate()
            .map(|(offset, hash)| BatchRequest {
                jsonrpc: "2.0",
                id: first_id + offset,
                method: "eth_getTransactionReceipt",
                params: [hash],
            })
            .collect();

        let responses: Vec<BatchResponse> = self
            .client
            .post(self.url.clone())
            .json(&requests)
            .send()
            .await
            .context("Receipt batch request failed")?
            .error_for_status()
            .context("Receipt batch request rejected")?
            .json()
            .await
            .context("Malformed receipt batch response")?;

        debug!(
            first_id,
            requested = hashes.len(),
            received = responses.len(),
            "Fetched receipt batch"
        );

        let mut receipts: Vec<Option<Option<ChainReceipt>>> = vec![None; hashes.len()];
        for response in responses {
            let slot = response
                .id
                .checked_sub(first_id)
                .and_then(|offset| receipts.get_mut(offset))
                .ok_or_else(|| anyhow::anyhow!("Unexpected id {} in receipt batch", response.id))?;

            if let Some(error) = response.error {
                anyhow::bail!("Receipt request {} failed: {}", response.id, error);
            }

            // null means the transaction has not been mined yet
            let receipt = response
                .result
                .map(serde_json::from_value::<ChainReceipt>)
                .transpose()
                .with_context(|| format!("Malformed receipt for id {}", response.id))?;
            *slot = Some(receipt);
        }

        receipts
            .into_iter()
            .zip(hashes)
            .map(|(receipt, hash)| {
                receipt.ok_or_else(|| anyhow::anyhow!("No response for receipt of {}", hash))
            })
            .collect()
    }
}
