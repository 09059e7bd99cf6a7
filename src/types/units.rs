//! Unit Conversion Utilities
//!
//! Amounts move through the engine as integer base units (satoshi, wei,
//! sun, token base units). These helpers convert to and from the decimal
//! strings shown to people.

use thiserror::Error;

/// Satoshis per Bitcoin
pub const SATS_PER_BTC: u64 = 100_000_000;

/// Unit conversion errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UnitsError {
    #[error("invalid amount: {0}")]
    Invalid(String),

    #[error("too many decimal places: {0} (max {1})")]
    Precision(String, u8),

    #[error("amount overflows: {0}")]
    Overflow(String),
}

/// Format base units as a decimal string, trimming trailing zeros
///
/// `format_units(1_500_000_000_000_000_000, 18) == "1.5"`
pub fn format_units(value: u128, decimals: u8) -> String {
    if decimals == 0 {
        return value.to_string();
    }

    let digits = value.to_string();
    let decimals = decimals as usize;
    let (int_part, frac_part) = if digits.len() > decimals {
        let split = digits.len() - decimals;
        (digits[..split].to_string(), digits[split..].to_string())
    } else {
        ("0".to_string(), format!("{:0>width$}", digits, width = decimals))
    };

    let frac = frac_part.trim_end_matches('0');
    if frac.is_empty() {
        int_part
    } else {
        format!("{}.{}", int_part, frac)
    }
}

/// Parse a decimal string into base units
pub fn parse_units(s: &str, decimals: u8) -> Result<u128, UnitsError> {
    let s = s.trim().replace('_', "");
    if s.is_empty() {
        return Err(UnitsError::Invalid(s));
    }

    let (int_part, frac_part) = match s.split_once('.') {
        Some((i, f)) => (i, f),
        None => (s.as_str(), ""),
    };

    if int_part.is_empty() && frac_part.is_empty() {
        return Err(UnitsError::Invalid(s.clone()));
    }
    if !int_part.chars().all(|c| c.is_ascii_digit()) || !frac_part.chars().all(|c| c.is_ascii_digit()) {
        return Err(UnitsError::Invalid(s.clone()));
    }

    let frac_trimmed = frac_part.trim_end_matches('0');
    if frac_trimmed.len() > decimals as usize {
        return Err(UnitsError::Precision(s.clone(), decimals));
    }

    let scale = 10u128
        .checked_pow(decimals as u32)
        .ok_or_else(|| UnitsError::Overflow(s.clone()))?;

    let int_value: u128 = if int_part.is_empty() {
        0
    } else {
        int_part.parse().map_err(|_| UnitsError::Overflow(s.clone()))?
    };

    let frac_value: u128 = if frac_trimmed.is_empty() {
        0
    } else {
        let padded = format!("{:0<width$}", frac_trimmed, width = decimals as usize);
        padded.parse().map_err(|_| UnitsError::Overflow(s.clone()))?
    };

    int_value
        .checked_mul(scale)
        .and_then(|v| v.checked_add(frac_value))
        .ok_or(UnitsError::Overflow(s))
}

/// Convert BTC to satoshis with proper rounding
pub fn btc_to_sats(btc: f64) -> u64 {
    (btc * SATS_PER_BTC as f64).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_units() {
        assert_eq!(format_units(0, 18), "0");
        assert_eq!(format_units(1_500_000_000_000_000_000, 18), "1.5");
        assert_eq!(format_units(1, 8), "0.00000001");
        assert_eq!(format_units(123_456_789, 8), "1.23456789");
        assert_eq!(format_units(2_000_000, 6), "2");
        assert_eq!(format_units(42, 0), "42");
    }

    #[test]
    fn test_parse_units() {
        assert_eq!(parse_units("1.5", 18).unwrap(), 1_500_000_000_000_000_000);
        assert_eq!(parse_units("0.00000001", 8).unwrap(), 1);
        assert_eq!(parse_units("2", 6).unwrap(), 2_000_000);
        assert_eq!(parse_units(".5", 1).unwrap(), 5);
        assert_eq!(parse_units("1.50", 1).unwrap(), 15);
    }

    #[test]
    fn test_parse_units_rejects_bad_input() {
        assert!(matches!(parse_units("", 8), Err(UnitsError::Invalid(_))));
        assert!(matches!(parse_units("-1", 8), Err(UnitsError::Invalid(_))));
        assert!(matches!(parse_units("1.2.3", 8), Err(UnitsError::Invalid(_))));
        assert!(matches!(parse_units("0.000000001", 8), Err(UnitsError::Precision(_, 8))));
        assert!(matches!(
            parse_units("999999999999999999999999999999999999999", 18),
            Err(UnitsError::Overflow(_))
        ));
    }

    #[test]
    fn test_btc_to_sats() {
        assert_eq!(btc_to_sats(0.0), 0);
        assert_eq!(btc_to_sats(0.00000001), 1);
        assert_eq!(btc_to_sats(1.5), 150_000_000);
        assert_eq!(btc_to_sats(0.1), 10_000_000);
    }
}
