//! Fee estimation.
//!
//! The fee for a transaction is `ceil(serialized_length * fee_rate)`. The
//! only way to know the length is to build the thing, signatures included,
//! so [`estimate_fee`] finalizes the draft and measures it. Any change to the
//! inputs or outputs invalidates the previous estimate.
//!
//! The rate is an exact fraction rather than an `f64`: `1.1` is not
//! representable in binary floating point, and `200 * 1.1` in IEEE arithmetic
//! rounds up to 221 instead of 220.

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use super::builder::DraftTransaction;
use super::encoding::EncodingError;
use crate::config::{DEFAULT_FEE_RATE_DENOMINATOR, DEFAULT_FEE_RATE_NUMERATOR};

/// Largest number of fractional digits accepted when parsing a rate.
const MAX_FRACTION_DIGITS: usize = 18;

/// Errors from constructing or parsing a [`FeeRate`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeeRateError {
    #[error("fee rate denominator must be non-zero")]
    ZeroDenominator,

    #[error("invalid fee rate {0:?}: expected a non-negative decimal like \"1.1\" or a fraction like \"11/10\"")]
    Invalid(String),
}

/// Satoshis per byte, as an exact reduced fraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FeeRate {
    numerator: u64,
    denominator: u64,
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

impl FeeRate {
    /// Builds `numerator / denominator` satoshis per byte, reduced.
    pub fn new(numerator: u64, denominator: u64) -> Result<Self, FeeRateError> {
        if denominator == 0 {
            return Err(FeeRateError::ZeroDenominator);
        }
        let divisor = gcd(numerator, denominator).max(1);
        Ok(Self {
            numerator: numerator / divisor,
            denominator: denominator / divisor,
        })
    }

    /// A whole number of satoshis per byte.
    pub fn per_byte(sats: u64) -> Self {
        Self {
            numerator: sats,
            denominator: 1,
        }
    }

    pub fn numerator(&self) -> u64 {
        self.numerator
    }

    pub fn denominator(&self) -> u64 {
        self.denominator
    }

    /// `ceil(size * rate)`, saturating at `u64::MAX`.
    pub fn fee_for_size(&self, size: usize) -> u64 {
        let num = size as u128 * u128::from(self.numerator);
        let den = u128::from(self.denominator);
        u64::try_from(num.div_ceil(den)).unwrap_or(u64::MAX)
    }
}

impl Default for FeeRate {
    fn default() -> Self {
        Self {
            numerator: DEFAULT_FEE_RATE_NUMERATOR,
            denominator: DEFAULT_FEE_RATE_DENOMINATOR,
        }
    }
}

impl FromStr for FeeRate {
    type Err = FeeRateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || FeeRateError::Invalid(s.to_string());
        let s = s.trim();

        if let Some((num, den)) = s.split_once('/') {
            let num = num.trim().parse::<u64>().map_err(|_| invalid())?;
            let den = den.trim().parse::<u64>().map_err(|_| invalid())?;
            return Self::new(num, den);
        }

        let (whole, fraction) = s.split_once('.').unwrap_or((s, ""));
        let all_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if (whole.is_empty() && fraction.is_empty())
            || !all_digits(whole)
            || !all_digits(fraction)
            || fraction.len() > MAX_FRACTION_DIGITS
        {
            return Err(invalid());
        }

        let scale = 10u64.pow(fraction.len() as u32);
        let whole: u64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| invalid())?
        };
        let fraction: u64 = if fraction.is_empty() {
            0
        } else {
            fraction.parse().map_err(|_| invalid())?
        };
        let numerator = whole
            .checked_mul(scale)
            .and_then(|n| n.checked_add(fraction))
            .ok_or_else(invalid)?;
        Self::new(numerator, scale)
    }
}

impl fmt::Display for FeeRate {
    /// Decimal when the fraction terminates, `n/d` otherwise.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.numerator / self.denominator;
        let rest = self.numerator % self.denominator;
        if rest == 0 {
            return write!(f, "{whole}.0");
        }
        for digits in 1..=MAX_FRACTION_DIGITS as u32 {
            let scale = 10u64.pow(digits);
            if scale % self.denominator == 0 {
                let fraction = u128::from(rest) * u128::from(scale) / u128::from(self.denominator);
                return write!(f, "{whole}.{fraction:0width$}", width = digits as usize);
            }
        }
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

impl Serialize for FeeRate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FeeRate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct FeeRateVisitor;

        impl Visitor<'_> for FeeRateVisitor {
            type Value = FeeRate;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a fee rate such as \"1.1\", \"11/10\" or 1.1")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<FeeRate, E> {
                v.parse().map_err(E::custom)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<FeeRate, E> {
                Ok(FeeRate::per_byte(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<FeeRate, E> {
                u64::try_from(v)
                    .map(FeeRate::per_byte)
                    .map_err(|_| E::custom("fee rate must not be negative"))
            }

            // Floats go through their shortest decimal rendering, so 1.1
            // becomes exactly 11/10.
            fn visit_f64<E: de::Error>(self, v: f64) -> Result<FeeRate, E> {
                if !v.is_finite() || v < 0.0 {
                    return Err(E::custom("fee rate must be a finite non-negative number"));
                }
                v.to_string().parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(FeeRateVisitor)
    }
}

/// Finalizes `draft` (signing every input) and prices its serialized size.
///
/// # Errors
///
/// Whatever finalization reports, typically
/// [`EncodingError::MissingUnlocking`] for an input without a template.
pub fn estimate_fee(draft: &DraftTransaction, rate: FeeRate) -> Result<u64, EncodingError> {
    let size = draft.serialized_size()?;
    Ok(rate.fee_for_size(size))
}
