//! Human-readable quantities for numeric resource fields.
//!
//! Size and bandwidth limits use binary multipliers (`1K == 1024`) while IOPS
//! limits use decimal multipliers (`1K == 1000`). A bare integer and a suffixed
//! value that denote the same amount normalise to the same stored integer, so
//! `"1G"` and `1073741824` compare equal for a binary field.

use thiserror::Error;

const SUFFIXES: [char; 5] = ['K', 'M', 'G', 'T', 'P'];

/// Multiplier family used when expanding a unit suffix.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UnitBase {
    /// Powers of 1024, used for sizes and bandwidth.
    Binary,
    /// Powers of 1000, used for IOPS.
    Decimal,
}

impl UnitBase {
    const fn radix(self) -> u64 {
        match self {
            Self::Binary => 1024,
            Self::Decimal => 1000,
        }
    }
}

/// Errors raised while parsing a quantity.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum QuantityError {
    /// Raised when the value is blank.
    #[error("quantity must not be empty")]
    Empty,
    /// Raised when the value is not an integer with an optional unit suffix.
    #[error("invalid quantity '{value}': expected an integer with an optional K, M, G, T or P suffix")]
    Invalid {
        /// Raw value supplied by the caller.
        value: String,
    },
    /// Raised when the expanded value does not fit the stored integer.
    #[error("quantity '{value}' is too large")]
    Overflow {
        /// Raw value supplied by the caller.
        value: String,
    },
}

/// Parses `value` into base units using the multipliers of `base`.
///
/// Suffixes are case-insensitive. Whitespace around the value is ignored.
///
/// # Errors
///
/// Returns [`QuantityError`] when the value is empty, malformed, or too large.
pub fn parse_quantity(value: &str, base: UnitBase) -> Result<u64, QuantityError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(QuantityError::Empty);
    }

    let (digits, exponent) = split_suffix(trimmed);
    if digits.is_empty() || !digits.bytes().all(|byte| byte.is_ascii_digit()) {
        return Err(QuantityError::Invalid {
            value: trimmed.to_owned(),
        });
    }

    let overflow = || QuantityError::Overflow {
        value: trimmed.to_owned(),
    };
    let number = digits.parse::<u64>().map_err(|_| overflow())?;
    let multiplier = base.radix().checked_pow(exponent).ok_or_else(overflow)?;
    number.checked_mul(multiplier).ok_or_else(overflow)
}

fn split_suffix(value: &str) -> (&str, u32) {
    for (exponent, suffix) in (1_u32..).zip(SUFFIXES) {
        if let Some(digits) = value
            .strip_suffix(suffix)
            .or_else(|| value.strip_suffix(suffix.to_ascii_lowercase()))
        {
            return (digits, exponent);
        }
    }
    (value, 0)
}
