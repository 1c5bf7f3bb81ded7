//! Money checks and card masking.
//!
//! Amounts are plain [`Decimal`] values in the store currency; these helpers hold
//! the sign rules shared by order creation, line items and procurement costs.

use rust_decimal::Decimal;

/// A monetary amount violated a sign rule.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MoneyError {
    /// Amount must be strictly greater than zero.
    #[error("{field} must be greater than zero (got {value})")]
    NotPositive {
        /// Field being validated.
        field: &'static str,
        /// Offending value.
        value: Decimal,
    },
    /// Amount must not be negative.
    #[error("{field} cannot be negative (got {value})")]
    Negative {
        /// Field being validated.
        field: &'static str,
        /// Offending value.
        value: Decimal,
    },
}

/// Require `value > 0`.
///
/// # Errors
///
/// Returns [`MoneyError::NotPositive`] for zero or negative amounts.
pub fn ensure_positive(field: &'static str, value: Decimal) -> Result<Decimal, MoneyError> {
    if value <= Decimal::ZERO {
        return Err(MoneyError::NotPositive { field, value });
    }
    Ok(value)
}

/// Require `value >= 0`.
///
/// # Errors
///
/// Returns [`MoneyError::Negative`] for negative amounts.
pub fn ensure_non_negative(field: &'static str, value: Decimal) -> Result<Decimal, MoneyError> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(MoneyError::Negative { field, value });
    }
    Ok(value)
}

/// Mask a card number down to its last four digits (`"**** 4242"`).
///
/// Non-digit characters are ignored. Inputs with fewer than four digits are
/// fully masked.
#[must_use]
pub fn mask_card_number(number: &str) -> String {
    let digits: Vec<char> = number.chars().filter(char::is_ascii_digit).collect();
    if digits.len() < 4 {
        return "****".to_owned();
    }
    let last4: String = digits.iter().skip(digits.len() - 4).collect();
    format!("**** {last4}")
}
