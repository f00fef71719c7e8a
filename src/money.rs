//! Money Conversion Module
//!
//! Conversion between display amounts (`Decimal`, as carried by ledger intents)
//! and the integer base units each rail settles in.
//!
//! ## Scale factors
//! - BTC: 10^8 (satoshi)
//! - ETH: 10^18 (wei)
//! - Bank: 10^2 (cents), sent to the bank as an unscaled integer string
//!
//! Conversions never round: an amount with more fractional digits than the
//! rail supports is rejected.

use rust_decimal::prelude::*;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Money conversion errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Precision overflow: provided {provided} decimals, max allowed {max}")]
    PrecisionOverflow { provided: u32, max: u32 },

    #[error("Amount must be positive")]
    InvalidAmount,

    #[error("Amount too large, would overflow")]
    Overflow,

    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

// ============================================================================
// Display → Base units
// ============================================================================

/// Convert a display amount into integer base units.
///
/// # Example
/// ```rust
/// use rust_decimal::Decimal;
/// use settlement_bridge::money::to_base_units;
///
/// let sats = to_base_units(Decimal::new(15, 1), 8).unwrap();
/// assert_eq!(sats, 150_000_000);
/// ```
pub fn to_base_units(amount: Decimal, decimals: u32) -> Result<u128, MoneyError> {
    if amount.is_sign_negative() || amount.is_zero() {
        return Err(MoneyError::InvalidAmount);
    }

    let amount = amount.normalize();
    if amount.scale() > decimals {
        return Err(MoneyError::PrecisionOverflow {
            provided: amount.scale(),
            max: decimals,
        });
    }

    // mantissa * 10^(decimals - scale), computed in u128 to cover wei amounts
    let mantissa = u128::try_from(amount.mantissa()).map_err(|_| MoneyError::InvalidAmount)?;
    let shift = decimals - amount.scale();
    10u128
        .checked_pow(shift)
        .and_then(|factor| mantissa.checked_mul(factor))
        .ok_or(MoneyError::Overflow)
}

/// Parse a display amount string (e.g. "1.5") into base units.
pub fn parse_amount(amount_str: &str, decimals: u32) -> Result<u128, MoneyError> {
    let amount_str = amount_str.trim();
    if amount_str.is_empty() {
        return Err(MoneyError::InvalidFormat("empty string".into()));
    }
    let amount = Decimal::from_str(amount_str)
        .map_err(|e| MoneyError::InvalidFormat(format!("{}: {}", amount_str, e)))?;
    to_base_units(amount, decimals)
}

// ============================================================================
// Base units → Display
// ============================================================================

/// Convert integer base units back into a display amount.
pub fn from_base_units(value: u128, decimals: u32) -> Result<Decimal, MoneyError> {
    let value = i128::try_from(value).map_err(|_| MoneyError::Overflow)?;
    Decimal::try_from_i128_with_scale(value, decimals)
        .map(|d| d.normalize())
        .map_err(|_| MoneyError::Overflow)
}

/// Render an amount as the unscaled integer string legacy systems expect
/// (`100.5` at 2 decimals → `"10050"`).
pub fn to_unscaled(amount: Decimal, decimals: u32) -> Result<String, MoneyError> {
    to_base_units(amount, decimals).map(|units| units.to_string())
}

/// Parse a JSON number or string carrying a display amount.
pub fn decimal_from_json(value: &serde_json::Value) -> Result<Decimal, MoneyError> {
    let text = match value {
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s.clone(),
        other => return Err(MoneyError::InvalidFormat(other.to_string())),
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|e| MoneyError::InvalidFormat(format!("{}: {}", text, e)))
}
