use alloy_primitives::U256;
use alloy_primitives::utils::format_units;
use rust_decimal::Decimal;
use std::str::FromStr;

pub const NATIVE_DECIMALS: u8 = 18;

/// Scales a raw integer amount by `10^-decimals`.
pub fn scale_units(raw: U256, decimals: u8) -> anyhow::Result<Decimal> {
    let formatted = format_units(raw, decimals)?;
    Decimal::from_str(&formatted)
        .map_err(|e| anyhow::anyhow!("Amount {} out of range: {}", formatted, e))
}

/// Renders with a fixed number of decimals and `,` thousands separators.
/// Works for the whole `Decimal` range.
pub fn format_amount(value: Decimal, decimals: u32) -> String {
    let rounded = value.round_dp(decimals);
    let digits = rounded.abs().to_string();
    let (integer, fraction) = digits.split_once('.').unwrap_or((digits.as_str(), ""));

    let mut grouped = String::with_capacity(digits.len() + integer.len() / 3 + decimals as usize + 2);
    if rounded.is_sign_negative() && !rounded.is_zero() {
        grouped.push('-');
    }
    for (i, digit) in integer.chars().enumerate() {
        if i > 0 && (integer.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    if decimals > 0 {
        grouped.push('.');
        grouped.push_str(fraction);
        for _ in fraction.len()..decimals as usize {
            grouped.push('0');
        }
    }
    grouped
}

/// Token amounts are shown with four decimals.
pub fn format_token(value: Decimal) -> String {
    format_amount(value, 4)
}

pub fn format_usd(value: Decimal) -> String {
    format!("${}", format_amount(value, 2))
}

/// USD keeps the `$` prefix; other currencies get their code as a suffix.
pub fn format_fiat(value: Decimal, currency: &str) -> String {
    if currency.eq_ignore_ascii_case("usd") {
        format_usd(value)
    } else {
        format!("{} {}", format_amount(value, 2), currency.to_uppercase())
    }
}

pub fn truncate(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let mut truncated: String = value.chars().take(max_chars.saturating_sub(1)).collect();
    truncated.push('…');
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_units() {
        assert_eq!(
            scale_units(U256::from(1_000_000), 6).unwrap(),
            Decimal::from_str("1").unwrap()
        );
        assert_eq!(
            scale_units(U256::from(1_500_000_000_000_000_000u128), NATIVE_DECIMALS).unwrap(),
            Decimal::from_str("1.5").unwrap()
        );
        assert_eq!(scale_units(U256::from(42), 0).unwrap(), Decimal::from(42));
    }

    #[test]
    fn test_scale_units_rejects_unrepresentable_amounts() {
        assert!(scale_units(U256::MAX, 0).is_err());
    }

    #[test]
    fn test_format_token_uses_four_decimals_and_grouping() {
        assert_eq!(format_token(Decimal::from_str("1").unwrap()), "1.0000");
        assert_eq!(format_token(Decimal::from_str("1234567.891249").unwrap()), "1,234,567.8912");
        assert_eq!(format_token(Decimal::from_str("-999.99995").unwrap()), "-1,000.0000");
        assert_eq!(format_token(Decimal::ZERO), "0.0000");
    }

    #[test]
    fn test_format_usd() {
        assert_eq!(format_usd(Decimal::from_str("1234.5").unwrap()), "$1,234.50");
    }

    #[test]
    fn test_format_handles_the_full_decimal_range() {
        assert_eq!(
            format_token(Decimal::from_str("1000000000000000000000000000").unwrap()),
            "1,000,000,000,000,000,000,000,000,000.0000"
        );
        assert_eq!(
            format_usd(Decimal::MAX),
            "$79,228,162,514,264,337,593,543,950,335.00"
        );
        assert_eq!(
            format_token(Decimal::MIN),
            "-79,228,162,514,264,337,593,543,950,335.0000"
        );
        assert_eq!(format_amount(Decimal::from_str("12.5").unwrap(), 0), "12");
    }

    #[test]
    fn test_format_fiat() {
        assert_eq!(format_fiat(Decimal::from(2), "usd"), "$2.00");
        assert_eq!(format_fiat(Decimal::from(1234), "eur"), "1,234.00 EUR");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdef", 4), "abc…");
    }
}
