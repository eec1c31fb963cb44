use super::erc20::TokenAmounts;
use super::{ParseContext, ParseError, TransactionDisplayBundle, TransactionRecord, TransactionType, scale_native};
use crate::calldata::{SAFE_EXEC_TRANSACTION_SELECTOR, SafeSend, decode_multi_send, decode_single_send};

/// Parses a Safe `execTransaction` or `multiSend` call. The Safe is always the
/// sender, so every record is a `Send`.
pub async fn parse_safe_transaction(
    ctx: &ParseContext<'_>,
) -> Result<Option<TransactionDisplayBundle>, ParseError> {
    let input = ctx.transaction.input_hex();

    let sends = if input.starts_with(SAFE_EXEC_TRANSACTION_SELECTOR) {
        vec![decode_single_send(&input)?]
    } else {
        decode_multi_send(&input)?
    };

    if sends.is_empty() {
        return Ok(None);
    }

    let mut bundle = ctx.new_bundle()?;
    for send in sends {
        bundle.records.push(safe_send_record(ctx, send).await?);
    }

    Ok(Some(bundle))
}

async fn safe_send_record(
    ctx: &ParseContext<'_>,
    send: SafeSend,
) -> Result<TransactionRecord, ParseError> {
    match &send.token_transfer {
        Some(transfer) => {
            let token = TokenAmounts::resolve(ctx, send.to).await?;
            Ok(TransactionRecord {
                kind: TransactionType::Send,
                counterparty: transfer.recipient,
                amount: token.scale(transfer.amount)?,
                symbol: token.symbol,
                new_balance: token.balance,
                additional_data: Some(send.calldata),
            })
        }
        None => Ok(TransactionRecord {
            kind: TransactionType::Send,
            counterparty: send.to,
            amount: scale_native(send.value)?,
            symbol: ctx.endpoint.native_token.clone(),
            new_balance: ctx.native_balance().await?,
            additional_data: Some(send.calldata),
        }),
    }
}
