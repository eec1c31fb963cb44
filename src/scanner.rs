use crate::chain::{ChainClient, ChainReceipt, ChainTransaction};
use crate::config::{EndpointConfig, WalletConfig};
use crate::events::decode_transfer_logs;
use crate::notifier::Notifier;
use crate::parser::{ParseContext, ParserKind, parse_transaction};
use alloy_primitives::TxHash;
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// The last block a scan task has fully processed. Never moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanCursor(u64);

impl ScanCursor {
    pub fn new(block: u64) -> Self {
        ScanCursor(block)
    }

    pub fn block(&self) -> u64 {
        self.0
    }

    pub fn advance_to(&mut self, block: u64) {
        self.0 = self.0.max(block);
    }
}

/// Follows the chain head for one (wallet, endpoint) pair and notifies about
/// every relevant transaction in the new blocks.
pub struct WalletScanner {
    wallet: Arc<WalletConfig>,
    endpoint: Arc<EndpointConfig>,
    chain: Arc<dyn ChainClient>,
    notifier: Arc<Notifier>,
    poll_interval: Duration,
    retry_delay: Duration,
    // Hashes notified since the cursor last advanced.
    notified: HashSet<TxHash>,
}

impl WalletScanner {
    pub fn new(
        wallet: Arc<WalletConfig>,
        endpoint: Arc<EndpointConfig>,
        chain: Arc<dyn ChainClient>,
        notifier: Arc<Notifier>,
        poll_interval: Duration,
        retry_delay: Duration,
    ) -> Self {
        WalletScanner {
            wallet,
            endpoint,
            chain,
            notifier,
            poll_interval,
            retry_delay,
            notified: HashSet::new(),
        }
    }

    /// Runs until `cancel` fires. Scanning starts at the current head; older
    /// blocks are never looked at.
    pub async fn run(mut self, cancel: CancellationToken) {
        let Some(mut cursor) = self.initial_cursor(&cancel).await else {
            info!(wallet = %self.wallet.name, endpoint = %self.endpoint.name, "Scan cancelled before start");
            return;
        };

        info!(
            wallet = %self.wallet.name,
            endpoint = %self.endpoint.name,
            address = %self.wallet.address,
            "Starting scan from block {}",
            cursor.block()
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let delay = match self.scan_pass(&mut cursor).await {
                Ok(()) => self.poll_interval,
                Err(e) => {
                    error!(
                        wallet = %self.wallet.name,
                        endpoint = %self.endpoint.name,
                        "Scan pass failed after block {}, retrying in {:?}: {:#}",
                        cursor.block(),
                        self.retry_delay,
                        e
                    );
                    self.retry_delay
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(delay) => {}
            }
        }

        info!(
            wallet = %self.wallet.name,
            endpoint = %self.endpoint.name,
            "Scan stopped at block {}",
            cursor.block()
        );
    }

    async fn initial_cursor(&self, cancel: &CancellationToken) -> Option<ScanCursor> {
        loop {
            if cancel.is_cancelled() {
                return None;
            }

            match self.chain.block_number().await {
                Ok(head) => return Some(ScanCursor::new(head)),
                Err(e) => warn!(
                    wallet = %self.wallet.name,
                    endpoint = %self.endpoint.name,
                    "Failed to read chain head, retrying in {:?}: {:#}",
                    self.retry_delay,
                    e
                ),
            }

            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = sleep(self.retry_delay) => {}
            }
        }
    }

    /// Processes every block after the cursor up to the current head. The
    /// cursor only moves once the whole range went through.
    pub async fn scan_pass(&mut self, cursor: &mut ScanCursor) -> Result<()> {
        let head = self
            .chain
            .block_number()
            .await
            .context("Failed to read chain head")?;

        if head <= cursor.block() {
            debug!(
                wallet = %self.wallet.name,
                endpoint = %self.endpoint.name,
                "No new blocks after {}",
                cursor.block()
            );
            return Ok(());
        }

        let from = cursor.block() + 1;
        debug!(
            wallet = %self.wallet.name,
            endpoint = %self.endpoint.name,
            "Scanning blocks {} to {}",
            from,
            head
        );

        for number in from..=head {
            self.scan_block(number).await?;
        }

        cursor.advance_to(head);
        self.notified.clear();
        Ok(())
    }

    async fn scan_block(&mut self, number: u64) -> Result<()> {
        let transactions = self
            .chain
            .block_transactions(number)
            .await
            .with_context(|| format!("Failed to fetch block {number}"))?;
        if transactions.is_empty() {
            return Ok(());
        }

        let hashes: Vec<TxHash> = transactions.iter().map(|tx| tx.hash).collect();
        let receipts = self
            .chain
            .transaction_receipts(&hashes)
            .await
            .with_context(|| format!("Failed to fetch receipts for block {number}"))?;
        if receipts.len() != transactions.len() {
            anyhow::bail!(
                "Block {} has {} transactions but {} receipts",
                number,
                transactions.len(),
                receipts.len()
            );
        }

        for (transaction, receipt) in transactions.iter().zip(receipts) {
            if self.notified.contains(&transaction.hash)
                || !self.is_relevant(transaction, receipt.as_ref())
            {
                continue;
            }

            match receipt {
                None => debug!(
                    wallet = %self.wallet.name,
                    tx = %transaction.hash,
                    "No receipt yet, skipping"
                ),
                Some(receipt) if !receipt.succeeded() => debug!(
                    wallet = %self.wallet.name,
                    tx = %transaction.hash,
                    "Transaction reverted, skipping"
                ),
                Some(receipt) => self.handle_transaction(transaction, &receipt).await?,
            }
        }

        Ok(())
    }

    /// A transaction matters when the wallet sent it, received it, or shows up
    /// in one of its ERC20 `Transfer` logs.
    fn is_relevant(&self, transaction: &ChainTransaction, receipt: Option<&ChainReceipt>) -> bool {
        let address = &self.wallet.address;
        if transaction.touches(address) {
            return true;
        }

        receipt.is_some_and(|receipt| {
            decode_transfer_logs(&receipt.logs)
                .iter()
                .any(|log| log.event.from == *address || log.event.to == *address)
        })
    }

    async fn handle_transaction(
        &mut self,
        transaction: &ChainTransaction,
        receipt: &ChainReceipt,
    ) -> Result<()> {
        let kind = ParserKind::classify(&transaction.input_hex());
        let ctx = ParseContext {
            chain: self.chain.as_ref(),
            transaction,
            receipt,
            wallet: &self.wallet,
            endpoint: &self.endpoint,
        };

        match parse_transaction(kind, &ctx).await {
            Ok(Some(bundle)) if !bundle.records.is_empty() => {
                self.notifier
                    .notify(&bundle, &self.wallet, &self.endpoint)
                    .await;
                self.notified.insert(transaction.hash);
            }
            Ok(_) => debug!(
                wallet = %self.wallet.name,
                tx = %transaction.hash,
                ?kind,
                "Nothing to report"
            ),
            Err(e) if e.is_transaction_local() => warn!(
                wallet = %self.wallet.name,
                endpoint = %self.endpoint.name,
                tx = %transaction.hash,
                ?kind,
                "Skipping transaction: {:#}",
                e
            ),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to parse {}", transaction.hash));
            }
        }

        Ok(())
    }
}
