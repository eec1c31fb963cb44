use alloy_primitives::Address;

use super::{ParseContext, ParseError, TransactionDisplayBundle, TransactionRecord, TransactionType, scale_native};

/// Treats the transaction as a plain transfer of the endpoint's native token.
pub async fn parse_native_transfer(
    ctx: &ParseContext<'_>,
) -> Result<TransactionDisplayBundle, ParseError> {
    let mut bundle = ctx.new_bundle()?;
    let tx = ctx.transaction;

    let (kind, counterparty) = if ctx.wallet.is_address(&tx.from) {
        // contract creations have no recipient
        (TransactionType::Send, tx.to.unwrap_or(Address::ZERO))
    } else {
        (TransactionType::Receive, tx.from)
    };

    let amount = scale_native(tx.value)?;
    let new_balance = ctx.native_balance().await?;

    bundle.records.push(TransactionRecord {
        kind,
        counterparty,
        amount,
        symbol: ctx.endpoint.native_token.clone(),
        new_balance,
        additional_data: None,
    });

    Ok(bundle)
}
