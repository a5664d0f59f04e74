//! Value amounts
//!
//! Balances are unsigned integers in the smallest indivisible unit. One whole
//! unit is 10^18 of them, the same scale wallets use for native value.

use thiserror::Error;

/// An amount in the smallest indivisible unit.
pub type Amount = u128;

/// Decimal places between a whole unit and the smallest unit.
pub const UNIT_DECIMALS: u32 = 18;

/// Smallest units per whole unit.
pub const ONE_UNIT: Amount = 10u128.pow(UNIT_DECIMALS);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmountError {
    #[error("Empty amount")]
    Empty,

    #[error("Invalid character in amount: {0:?}")]
    InvalidCharacter(char),

    #[error("Too many decimal places (maximum {UNIT_DECIMALS})")]
    TooPrecise,

    #[error("Amount overflows")]
    Overflow,
}

/// Parse a decimal string such as `"1.5"` into smallest units.
///
/// Only plain digits with at most one decimal point are accepted: no sign,
/// no exponent, no separators.
pub fn parse_units(s: &str) -> Result<Amount, AmountError> {
    let s = s.trim();
    if s.is_empty() || s == "." {
        return Err(AmountError::Empty);
    }

    let (whole, frac) = match s.split_once('.') {
        Some((w, f)) => (w, f),
        None => (s, ""),
    };
    if let Some(c) = whole.chars().chain(frac.chars()).find(|c| !c.is_ascii_digit()) {
        return Err(AmountError::InvalidCharacter(c));
    }
    if frac.len() > UNIT_DECIMALS as usize {
        return Err(AmountError::TooPrecise);
    }

    let mut value: Amount = 0;
    for b in whole.bytes() {
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add(Amount::from(b - b'0')))
            .ok_or(AmountError::Overflow)?;
    }
    value = value.checked_mul(ONE_UNIT).ok_or(AmountError::Overflow)?;

    let mut frac_value: Amount = 0;
    for b in frac.bytes() {
        frac_value = frac_value * 10 + Amount::from(b - b'0');
    }
    frac_value *= 10u128.pow(UNIT_DECIMALS - frac.len() as u32);

    value.checked_add(frac_value).ok_or(AmountError::Overflow)
}

/// Format smallest units as a decimal string, e.g. `1.5` or `2.0`.
pub fn format_units(amount: Amount) -> String {
    let whole = amount / ONE_UNIT;
    let frac = amount % ONE_UNIT;
    if frac == 0 {
        return format!("{}.0", whole);
    }
    let digits = format!("{:0width$}", frac, width = UNIT_DECIMALS as usize);
    format!("{}.{}", whole, digits.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_whole_and_fractional() {
        assert_eq!(parse_units("1").unwrap(), ONE_UNIT);
        assert_eq!(parse_units("1.0").unwrap(), ONE_UNIT);
        assert_eq!(parse_units("0.5").unwrap(), ONE_UNIT / 2);
        assert_eq!(parse_units(".25").unwrap(), ONE_UNIT / 4);
        assert_eq!(parse_units("3.").unwrap(), 3 * ONE_UNIT);
        assert_eq!(parse_units("0.000000000000000001").unwrap(), 1);
        assert_eq!(parse_units(" 2.5 ").unwrap(), 5 * ONE_UNIT / 2);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert_eq!(parse_units(""), Err(AmountError::Empty));
        assert_eq!(parse_units("."), Err(AmountError::Empty));
        assert_eq!(parse_units("-1"), Err(AmountError::InvalidCharacter('-')));
        assert_eq!(parse_units("1e18"), Err(AmountError::InvalidCharacter('e')));
        assert_eq!(parse_units("1.2.3"), Err(AmountError::InvalidCharacter('.')));
        assert_eq!(
            parse_units("0.0000000000000000001"),
            Err(AmountError::TooPrecise)
        );
    }

    #[test]
    fn test_parse_overflow_fails_closed() {
        // u128::MAX is about 3.4e38 smallest units, i.e. 3.4e20 whole units.
        assert_eq!(
            parse_units("340282366920938463464"),
            Err(AmountError::Overflow)
        );
        assert!(parse_units("340282366920938463463").is_ok());
    }

    #[test]
    fn test_format_units() {
        assert_eq!(format_units(0), "0.0");
        assert_eq!(format_units(ONE_UNIT), "1.0");
        assert_eq!(format_units(ONE_UNIT + ONE_UNIT / 2), "1.5");
        assert_eq!(format_units(1), "0.000000000000000001");
    }
}
