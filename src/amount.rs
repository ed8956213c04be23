//! FIL amounts with exact 18-decimal precision.
//!
//! The explorer reports values as unsigned integer strings in attoFIL.
//! Balances routinely exceed `u64::MAX`, so amounts are carried as a
//! [`BigUint`] count of attoFIL and only rendered as decimals at the edges
//! (database text column, log lines, status output).

use std::fmt;
use std::iter::Sum;
use std::ops::Add;
use std::str::FromStr;

use num_bigint::BigUint;
use thiserror::Error;

/// Number of decimal places between attoFIL and FIL.
pub const FIL_DECIMALS: usize = 18;

/// 10^18 attoFIL per FIL.
const ATTO_PER_FIL: u64 = 1_000_000_000_000_000_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AmountError {
    #[error("empty amount")]
    Empty,
    #[error("invalid amount '{0}'")]
    Invalid(String),
}

/// A non-negative FIL quantity stored as attoFIL.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FilAmount(BigUint);

impl FilAmount {
    pub fn zero() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn from_whole(fil: u64) -> Self {
        Self(BigUint::from(fil) * scale())
    }

    pub fn is_zero(&self) -> bool {
        self.0 == BigUint::default()
    }

    /// Whole FIL part (`value div 10^18`).
    pub fn whole(&self) -> BigUint {
        &self.0 / scale()
    }

    /// Fractional part in attoFIL (`value mod 10^18`).
    pub fn fraction(&self) -> BigUint {
        &self.0 % scale()
    }

    /// Render with all 18 fraction digits, the `DECIMAL(36,18)` text form
    /// kept in the ledger.
    pub fn to_fixed_string(&self) -> String {
        format!(
            "{}.{:0>width$}",
            self.whole(),
            self.fraction().to_string(),
            width = FIL_DECIMALS
        )
    }
}

fn scale() -> BigUint {
    BigUint::from(ATTO_PER_FIL)
}

/// Strictly parse an attoFIL integer string.
pub fn parse_atto(raw: &str) -> Result<FilAmount, AmountError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AmountError::Empty);
    }
    if !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AmountError::Invalid(raw.to_string()));
    }
    trimmed
        .parse::<BigUint>()
        .map(FilAmount)
        .map_err(|_| AmountError::Invalid(raw.to_string()))
}

/// Convert an attoFIL string to a FIL amount, coercing anything unparseable
/// to zero.
///
/// Use [`parse_atto`] when the caller needs to tell "zero" apart from
/// "malformed".
pub fn to_decimal(raw: &str) -> FilAmount {
    match parse_atto(raw) {
        Ok(amount) => amount,
        Err(e) => {
            tracing::warn!(raw = %raw, error = %e, "Unparseable transfer value, using 0");
            FilAmount::zero()
        }
    }
}

impl fmt::Display for FilAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fixed = self.to_fixed_string();
        let trimmed = fixed.trim_end_matches('0').trim_end_matches('.');
        f.pad(trimmed)
    }
}

/// Parses the decimal FIL form (`"1.5"`, `"12"`, `"0.000000000000000001"`).
impl FromStr for FilAmount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(AmountError::Empty);
        }
        let (whole, frac) = s.split_once('.').unwrap_or((s, ""));
        let digits_only = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if whole.is_empty() || !digits_only(whole) || !digits_only(frac) {
            return Err(AmountError::Invalid(s.to_string()));
        }
        if frac.len() > FIL_DECIMALS {
            return Err(AmountError::Invalid(s.to_string()));
        }

        let whole: BigUint = whole
            .parse()
            .map_err(|_| AmountError::Invalid(s.to_string()))?;
        let frac: BigUint = if frac.is_empty() {
            BigUint::default()
        } else {
            format!("{:0<width$}", frac, width = FIL_DECIMALS)
                .parse()
                .map_err(|_| AmountError::Invalid(s.to_string()))?
        };
        Ok(Self(whole * scale() + frac))
    }
}

impl Add for FilAmount {
    type Output = FilAmount;

    fn add(self, rhs: FilAmount) -> FilAmount {
        FilAmount(self.0 + rhs.0)
    }
}

impl Sum for FilAmount {
    fn sum<I: Iterator<Item = FilAmount>>(iter: I) -> Self {
        iter.fold(FilAmount::zero(), |acc, x| acc + x)
    }
}
