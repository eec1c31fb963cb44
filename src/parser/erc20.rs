use alloy_primitives::{Address, U256};
use rust_decimal::Decimal;

use super::{ParseContext, ParseError, TransactionDisplayBundle, TransactionRecord, TransactionType};
use crate::events::decode_transfer_logs;
use crate::format::scale_units;

/// Token metadata and the wallet's balance, read from the token contract.
#[derive(Debug, Clone)]
pub struct TokenAmounts {
    pub symbol: String,
    pub decimals: u8,
    pub balance: Decimal,
}

impl TokenAmounts {
    pub async fn resolve(ctx: &ParseContext<'_>, token: Address) -> Result<Self, ParseError> {
        let (decimals, symbol, raw_balance) = futures::try_join!(
            ctx.chain.token_decimals(token),
            ctx.chain.token_symbol(token),
            ctx.chain.token_balance(token, ctx.wallet.address),
        )
        .map_err(ParseError::Chain)?;

        Ok(TokenAmounts {
            balance: scale_units(raw_balance, decimals).map_err(ParseError::Amount)?,
            symbol,
            decimals,
        })
    }

    pub fn scale(&self, raw: U256) -> Result<Decimal, ParseError> {
        scale_units(raw, self.decimals).map_err(ParseError::Amount)
    }
}

/// Reports the first ERC20 `Transfer` log of the receipt. Returns `None` when
/// the receipt has no decodable transfer.
pub async fn parse_erc20_transfer(
    ctx: &ParseContext<'_>,
) -> Result<Option<TransactionDisplayBundle>, ParseError> {
    let Some(transfer) = decode_transfer_logs(&ctx.receipt.logs).into_iter().next() else {
        return Ok(None);
    };

    let mut bundle = ctx.new_bundle()?;

    let (kind, counterparty) = if ctx.wallet.is_address(&transfer.event.from) {
        (TransactionType::Send, transfer.event.to)
    } else {
        (TransactionType::Receive, transfer.event.from)
    };

    let token = TokenAmounts::resolve(ctx, transfer.token).await?;

    bundle.records.push(TransactionRecord {
        kind,
        counterparty,
        amount: token.scale(transfer.event.value)?,
        symbol: token.symbol,
        new_balance: token.balance,
        additional_data: None,
    });

    Ok(Some(bundle))
}
