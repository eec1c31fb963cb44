use alloy::sol;
use alloy::sol_types::SolEvent;

use crate::chain::ReceiptLog;

sol! {
    #[derive(Debug)]
    event Transfer(address indexed from, address indexed to, uint256 value);

    function decimals() external view returns (uint8);
    function symbol() external view returns (string);
    function balanceOf(address owner) external view returns (uint256);
    function transfer(address to, uint256 amount) external returns (bool);

    function execTransaction(
        address to,
        uint256 value,
        bytes data,
        uint8 operation,
        uint256 safeTxGas,
        uint256 baseGas,
        uint256 gasPrice,
        address gasToken,
        address refundReceiver,
        bytes signatures
    ) external payable returns (bool success);

    function multiSend(bytes transactions) external payable;
}

/// A decoded ERC20 `Transfer` together with the token contract that emitted it.
#[derive(Debug, Clone)]
pub struct TokenTransferLog {
    pub token: alloy_primitives::Address,
    pub event: Transfer,
}

pub fn decode_transfer_event(log: &ReceiptLog) -> anyhow::Result<Transfer> {
    let decoded = Transfer::decode_raw_log(log.topics.iter().copied(), &log.data)?;
    Ok(decoded)
}

/// Decodes every log carrying the ERC20 `Transfer` signature, in log order.
/// Logs with the same topic but a different shape (ERC721) are dropped.
pub fn decode_transfer_logs(logs: &[ReceiptLog]) -> Vec<TokenTransferLog> {
    logs.iter()
        .filter(|log| log.topics.first() == Some(&Transfer::SIGNATURE_HASH))
        .filter_map(|log| {
            decode_transfer_event(log)
                .ok()
                .map(|event| TokenTransferLog {
                    token: log.address,
                    event,
                })
        })
        .collect()
}
