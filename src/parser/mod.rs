//! Turns a relevant transaction into the records a notification is built from.
//!
//! [`ParserKind::classify`] picks a parser from the calldata selector and
//! [`parse_transaction`] runs it. Parsers only read from the chain.

mod default;
mod erc20;
mod gnosis_safe;

use alloy_primitives::{Address, TxHash, U256};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::calldata::{
    CalldataError, ERC20_TRANSFER_SELECTOR, SAFE_EXEC_TRANSACTION_SELECTOR, SAFE_MULTI_SEND_SELECTOR,
};
use crate::chain::{ChainClient, ChainReceipt, ChainTransaction};
use crate::config::{EndpointConfig, WalletConfig};
use crate::format::{NATIVE_DECIMALS, scale_units};

pub use default::parse_native_transfer;
pub use erc20::{TokenAmounts, parse_erc20_transfer};
pub use gnosis_safe::parse_safe_transaction;

#[derive(Error, Debug)]
pub enum ParseError {
    /// The calldata does not have the shape its selector promises.
    #[error("calldata decode failed: {0}")]
    Decode(#[from] CalldataError),

    /// A value could not be represented after scaling.
    #[error("amount conversion failed: {0}")]
    Amount(#[source] anyhow::Error),

    /// A chain read failed; the whole scan pass should be retried.
    #[error("chain request failed: {0}")]
    Chain(#[source] anyhow::Error),
}

impl ParseError {
    /// Decode and amount errors are specific to one transaction and never heal on retry.
    pub fn is_transaction_local(&self) -> bool {
        !matches!(self, ParseError::Chain(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TransactionType {
    Send,
    Receive,
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionType::Send => write!(f, "Send"),
            TransactionType::Receive => write!(f, "Receive"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    pub kind: TransactionType,
    pub counterparty: Address,
    pub amount: Decimal,
    pub symbol: String,
    pub new_balance: Decimal,
    /// The raw payload a Safe record was decoded from.
    pub additional_data: Option<String>,
}

/// Everything one notification needs about one on-chain transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionDisplayBundle {
    pub title: String,
    pub records: Vec<TransactionRecord>,
    pub url: Option<String>,
    /// In native units.
    pub gas_cost: Decimal,
    pub transaction_hash: TxHash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserKind {
    Default,
    Erc20,
    GnosisSafe,
}

impl ParserKind {
    /// Picks the parser for a `0x`-prefixed calldata string. The ERC20 check
    /// runs before the Safe check; anything unrecognized is a native transfer.
    pub fn classify(input: &str) -> Self {
        let selector = input.get(..10).map(str::to_ascii_lowercase);
        match selector.as_deref() {
            Some(ERC20_TRANSFER_SELECTOR) => ParserKind::Erc20,
            Some(SAFE_EXEC_TRANSACTION_SELECTOR) | Some(SAFE_MULTI_SEND_SELECTOR) => {
                ParserKind::GnosisSafe
            }
            _ => ParserKind::Default,
        }
    }
}

/// Inputs shared by every parser.
pub struct ParseContext<'a> {
    pub chain: &'a dyn ChainClient,
    pub transaction: &'a ChainTransaction,
    pub receipt: &'a ChainReceipt,
    pub wallet: &'a WalletConfig,
    pub endpoint: &'a EndpointConfig,
}

impl ParseContext<'_> {
    fn new_bundle(&self) -> Result<TransactionDisplayBundle, ParseError> {
        let hash = self.transaction.hash.to_string();
        let gas_cost = scale_units(self.receipt.gas_cost(self.transaction), NATIVE_DECIMALS)
            .map_err(ParseError::Amount)?;

        Ok(TransactionDisplayBundle {
            title: format!("New {} Transaction", self.wallet.name),
            records: Vec::new(),
            url: self.endpoint.explorer_link(&hash),
            gas_cost,
            transaction_hash: self.transaction.hash,
        })
    }

    async fn native_balance(&self) -> Result<Decimal, ParseError> {
        let balance = self
            .chain
            .native_balance(self.wallet.address)
            .await
            .map_err(ParseError::Chain)?;
        scale_native(balance)
    }
}

fn scale_native(raw: U256) -> Result<Decimal, ParseError> {
    scale_units(raw, NATIVE_DECIMALS).map_err(ParseError::Amount)
}

/// Runs the parser selected for the transaction. `None` means there is
/// nothing to notify about.
pub async fn parse_transaction(
    kind: ParserKind,
    ctx: &ParseContext<'_>,
) -> Result<Option<TransactionDisplayBundle>, ParseError> {
    match kind {
        ParserKind::Default => parse_native_transfer(ctx).await.map(Some),
        ParserKind::Erc20 => parse_erc20_transfer(ctx).await,
        ParserKind::GnosisSafe => parse_safe_transaction(ctx).await,
    }
}
