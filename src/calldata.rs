//! Fixed-offset decoding of Gnosis Safe calldata.
//!
//! All offsets count hex characters of the `0x`-prefixed calldata string, not
//! bytes. They follow the ABI layout of `execTransaction`: the `to` word starts
//! right after the selector, `value` follows it, and the bytes of the inner
//! `data` argument begin after the ten head words and the length word.

use alloy_primitives::{Address, U256};
use thiserror::Error;

pub const ERC20_TRANSFER_SELECTOR: &str = "0xa9059cbb";
pub const SAFE_EXEC_TRANSACTION_SELECTOR: &str = "0x6a761202";
pub const SAFE_MULTI_SEND_SELECTOR: &str = "0x8d80ff0a";

const SELECTOR_LEN: usize = 10;
const ADDRESS_LEN: usize = 40;
const WORD_LEN: usize = 64;

const DESTINATION_OFFSET: usize = 34;
const VALUE_OFFSET: usize = 74;
const INNER_SELECTOR_OFFSET: usize = 714;
const TOKEN_RECIPIENT_OFFSET: usize = 746;
const TOKEN_AMOUNT_OFFSET: usize = 786;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CalldataError {
    #[error("calldata too short: needed {needed} hex characters, got {actual}")]
    Truncated { needed: usize, actual: usize },

    #[error("invalid address at offset {offset}")]
    InvalidAddress { offset: usize },

    #[error("invalid number at offset {offset}")]
    InvalidNumber { offset: usize },
}

/// The token leg of a Safe transaction whose inner call is an ERC20 `transfer`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenTransfer {
    pub recipient: Address,
    pub amount: U256,
}

/// One decoded `execTransaction` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafeSend {
    /// Recipient of the native value, or the token contract for token transfers.
    pub to: Address,
    pub value: U256,
    pub token_transfer: Option<TokenTransfer>,
    /// The normalized calldata this send was decoded from.
    pub calldata: String,
}

fn slice(input: &str, offset: usize, len: usize) -> Result<&str, CalldataError> {
    input
        .get(offset..offset + len)
        .ok_or(CalldataError::Truncated {
            needed: offset + len,
            actual: input.len(),
        })
}

fn read_address(input: &str, offset: usize) -> Result<Address, CalldataError> {
    slice(input, offset, ADDRESS_LEN)?
        .parse()
        .map_err(|_| CalldataError::InvalidAddress { offset })
}

fn read_word(input: &str, offset: usize) -> Result<U256, CalldataError> {
    let word = slice(input, offset, WORD_LEN)?;
    U256::from_str_radix(word, 16).map_err(|_| CalldataError::InvalidNumber { offset })
}

fn with_prefix(input: &str) -> String {
    let input = input.to_ascii_lowercase();
    if input.starts_with("0x") {
        input
    } else {
        format!("0x{input}")
    }
}

/// Decodes a single `execTransaction` call.
pub fn decode_single_send(input: &str) -> Result<SafeSend, CalldataError> {
    let calldata = with_prefix(input);

    let to = read_address(&calldata, DESTINATION_OFFSET)?;
    let value = read_word(&calldata, VALUE_OFFSET)?;

    let inner_selector = slice(&calldata, INNER_SELECTOR_OFFSET, SELECTOR_LEN)?;
    let token_transfer = if inner_selector.starts_with(&ERC20_TRANSFER_SELECTOR[2..]) {
        Some(TokenTransfer {
            recipient: read_address(&calldata, TOKEN_RECIPIENT_OFFSET)?,
            amount: read_word(&calldata, TOKEN_AMOUNT_OFFSET)?,
        })
    } else {
        None
    };

    Ok(SafeSend {
        to,
        value,
        token_transfer,
        calldata,
    })
}

/// Splits a `multiSend` call into the embedded `execTransaction` payloads.
///
/// Everything after the outer selector is scanned for the exec selector; each
/// match runs up to the next match or the end of the input. Only byte-aligned
/// matches count.
pub fn split_multi_send(input: &str) -> Vec<String> {
    let calldata = with_prefix(input);
    let needle = &SAFE_EXEC_TRANSACTION_SELECTOR[2..];
    let body = calldata.get(SELECTOR_LEN..).unwrap_or_default();

    let starts: Vec<usize> = body
        .match_indices(needle)
        .map(|(index, _)| index)
        .filter(|index| index % 2 == 0)
        .collect();

    starts
        .iter()
        .enumerate()
        .map(|(i, &start)| {
            let end = starts.get(i + 1).copied().unwrap_or(body.len());
            format!("0x{}", &body[start..end])
        })
        .collect()
}

/// Decodes every `execTransaction` payload embedded in a `multiSend` call, in
/// encounter order.
pub fn decode_multi_send(input: &str) -> Result<Vec<SafeSend>, CalldataError> {
    split_multi_send(input)
        .iter()
        .map(|payload| decode_single_send(payload))
        .collect()
}
