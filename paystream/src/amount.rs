//! Amount normalization
//!
//! Converts between display units (e.g. `100 FUND`) and base integer units
//! (`100000000000nund`), and parses the ledger's coin strings. Parsing is
//! exact decimal arithmetic; no floating point touches an amount.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::{error::ValidationError, state::Amount};

/// Denomination of the streamed coin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Denom {
    /// Base (integer) denomination used on the ledger
    pub base: String,
    /// Display symbol
    pub display: String,
    /// Decimal places between display and base units
    pub exponent: u32,
}

impl Default for Denom {
    fn default() -> Self {
        Self {
            base: "nund".to_string(),
            display: "FUND".to_string(),
            exponent: 9,
        }
    }
}

impl Denom {
    /// Base units in one display unit, `None` when it does not fit in an
    /// [`Amount`].
    pub fn unit(&self) -> Option<Amount> {
        10u128.checked_pow(self.exponent)
    }

    /// Build a coin of this denomination.
    pub fn coin(&self, amount: Amount) -> Coin {
        Coin {
            amount,
            denom: self.base.clone(),
        }
    }
}

/// Parse a display-unit amount string into base units.
///
/// Accepts an optional trailing display symbol (`"1.5 FUND"`).
pub fn parse_amount(display: &str, denom: &Denom) -> Result<Amount, ValidationError> {
    let invalid = |why: &str| ValidationError::InvalidAmount(format!("{:?}: {}", display, why));

    let value = display.trim();
    let value = value
        .strip_suffix(denom.display.as_str())
        .unwrap_or(value)
        .trim();

    if value.is_empty() {
        return Err(invalid("empty"));
    }
    if value.starts_with('-') {
        return Err(invalid("negative"));
    }

    let (int_part, frac_part) = value.split_once('.').unwrap_or((value, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(invalid("no digits"));
    }
    if !int_part.chars().chain(frac_part.chars()).all(|c| c.is_ascii_digit()) {
        return Err(invalid("not a decimal number"));
    }
    if frac_part.len() > denom.exponent as usize {
        return Err(invalid("more decimal places than the denomination allows"));
    }

    let int_value: Amount = if int_part.is_empty() {
        0
    } else {
        int_part
            .parse()
            .map_err(|_| ValidationError::AmountOverflow)?
    };
    let frac_value: Amount = if frac_part.is_empty() {
        0
    } else {
        let digits: Amount = frac_part
            .parse()
            .map_err(|_| ValidationError::AmountOverflow)?;
        10u128
            .checked_pow(denom.exponent - frac_part.len() as u32)
            .and_then(|scale| digits.checked_mul(scale))
            .ok_or(ValidationError::AmountOverflow)?
    };

    denom
        .unit()
        .and_then(|unit| int_value.checked_mul(unit))
        .and_then(|v| v.checked_add(frac_value))
        .ok_or(ValidationError::AmountOverflow)
}

/// Format base units as a display amount, e.g. `"100.000000000 FUND"`.
pub fn format_amount(amount: Amount, denom: &Denom) -> String {
    if denom.exponent == 0 {
        return format!("{} {}", amount, denom.display);
    }
    // Every amount is below a unit too large to represent.
    let (whole, frac) = match denom.unit() {
        Some(unit) => (amount / unit, amount % unit),
        None => (0, amount),
    };
    format!(
        "{}.{:0width$} {}",
        whole,
        frac,
        denom.display,
        width = denom.exponent as usize
    )
}

/// An amount with its denomination, in the ledger's `"<amount><denom>"` form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub amount: Amount,
    pub denom: String,
}

impl Coin {
    /// Amount, checking the denomination.
    pub fn amount_in(&self, denom: &Denom) -> Result<Amount, ValidationError> {
        if self.denom != denom.base {
            return Err(ValidationError::DenomMismatch {
                expected: denom.base.clone(),
                actual: self.denom.clone(),
            });
        }
        Ok(self.amount)
    }
}

impl FromStr for Coin {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| ValidationError::InvalidAmount(format!("{:?}: missing denom", s)))?;
        let (digits, denom) = s.split_at(split);
        if digits.is_empty() {
            return Err(ValidationError::InvalidAmount(format!(
                "{:?}: missing amount",
                s
            )));
        }
        let denom = denom.trim();
        if !denom
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '/' || c == '-' || c == '_' || c == '.')
        {
            return Err(ValidationError::InvalidAmount(format!(
                "{:?}: bad denom",
                s
            )));
        }

        Ok(Coin {
            amount: digits.parse().map_err(|_| ValidationError::AmountOverflow)?,
            denom: denom.to_string(),
        })
    }
}

impl fmt::Display for Coin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.denom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_amount() {
        let denom = Denom::default();
        assert_eq!(parse_amount("100", &denom).unwrap(), 100_000_000_000);
        assert_eq!(parse_amount("0.5", &denom).unwrap(), 500_000_000);
        assert_eq!(parse_amount("1.5 FUND", &denom).unwrap(), 1_500_000_000);
        assert_eq!(parse_amount(".000000001", &denom).unwrap(), 1);
        assert_eq!(parse_amount("0", &denom).unwrap(), 0);
    }

    #[test]
    fn test_parse_amount_rejects_bad_input() {
        let denom = Denom::default();
        assert!(parse_amount("", &denom).is_err());
        assert!(parse_amount("-1", &denom).is_err());
        assert!(parse_amount("1e9", &denom).is_err());
        assert!(parse_amount("0.0000000001", &denom).is_err());
        assert!(parse_amount(".", &denom).is_err());
        assert_eq!(
            parse_amount("999999999999999999999999999999999999999", &denom),
            Err(ValidationError::AmountOverflow)
        );
    }

    #[test]
    fn test_format_amount() {
        let denom = Denom::default();
        assert_eq!(format_amount(100_000_000_000, &denom), "100.000000000 FUND");
        assert_eq!(format_amount(1, &denom), "0.000000001 FUND");
    }

    #[test]
    fn test_oversized_exponent_does_not_panic() {
        let denom = Denom {
            base: "atto".to_string(),
            display: "BIG".to_string(),
            exponent: 40,
        };
        assert_eq!(denom.unit(), None);
        assert_eq!(Denom::default().unit(), Some(1_000_000_000));

        assert_eq!(
            parse_amount("1", &denom),
            Err(ValidationError::AmountOverflow)
        );
        assert_eq!(
            parse_amount("0.5", &denom),
            Err(ValidationError::AmountOverflow)
        );
        assert_eq!(
            format_amount(5, &denom),
            format!("0.{:0>40} BIG", 5)
        );
    }

    #[test]
    fn test_coin_parse() {
        let coin: Coin = "100000000000nund".parse().unwrap();
        assert_eq!(coin.amount, 100_000_000_000);
        assert_eq!(coin.denom, "nund");
        assert_eq!(coin.to_string(), "100000000000nund");
        assert_eq!(coin.amount_in(&Denom::default()).unwrap(), 100_000_000_000);

        let other: Coin = "5ibc/ABC123".parse().unwrap();
        assert!(matches!(
            other.amount_in(&Denom::default()),
            Err(ValidationError::DenomMismatch { .. })
        ));

        assert!("nund".parse::<Coin>().is_err());
        assert!("100".parse::<Coin>().is_err());
        assert!("".parse::<Coin>().is_err());
    }
}
