//! Flow rate math
//!
//! Pure integer functions shared by previews, projections, and
//! reconciliation checks. Every division rounds down, which is also what the
//! ledger does, so client and ledger results must agree bit-for-bit.

use std::{fmt, str::FromStr};

use crate::{
    error::ValidationError,
    period::Period,
    state::{Amount, Timestamp},
};

/// Fixed-point precision of ledger decimals (18 fractional digits).
pub const DECIMAL_PRECISION: u32 = 18;

const DECIMAL_SCALE: u128 = 10u128.pow(DECIMAL_PRECISION);

/// Base units per second that spread `amount` over `duration` periods.
///
/// Rounds down, so the receiver never gets more than `amount` over the full
/// duration; the remainder stays in the deposit.
pub fn compute_flow_rate(
    amount: Amount,
    period: Period,
    duration: u64,
) -> Result<u64, ValidationError> {
    if duration == 0 {
        return Err(ValidationError::ZeroDuration);
    }

    let total_seconds = period.seconds() as u128 * duration as u128;
    u64::try_from(amount / total_seconds).map_err(|_| ValidationError::AmountOverflow)
}

/// Projected time at which `deposit` is fully accrued at `flow_rate`.
///
/// `None` means the deposit never runs out (zero rate).
pub fn compute_deposit_zero_time(
    deposit: Amount,
    flow_rate: u64,
    now: Timestamp,
) -> Option<Timestamp> {
    if flow_rate == 0 {
        return None;
    }

    let seconds_left = deposit / flow_rate as u128;
    let seconds_left = i64::try_from(seconds_left).unwrap_or(i64::MAX);
    Some(now.saturating_add(seconds_left))
}

/// Split a claim into `(validator_fee, net)`.
///
/// `validator_fee + net == claim_amount` always holds.
pub fn compute_validator_fee(claim_amount: Amount, fee: FeeFraction) -> (Amount, Amount) {
    let validator_fee = fee.apply(claim_amount);
    (validator_fee, claim_amount - validator_fee)
}

/// Exact rational in `[0, 1]` taken by validators from each claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeFraction {
    numerator: u128,
    denominator: u128,
}

impl FeeFraction {
    /// No fee.
    pub const ZERO: FeeFraction = FeeFraction {
        numerator: 0,
        denominator: 1,
    };

    /// Build from a ratio. The denominator is capped at 10^18 so that
    /// applying the fraction cannot overflow.
    pub fn from_ratio(numerator: u128, denominator: u128) -> Result<Self, ValidationError> {
        if denominator == 0 || denominator > DECIMAL_SCALE {
            return Err(ValidationError::InvalidFeeFraction(format!(
                "{}/{}",
                numerator, denominator
            )));
        }
        if numerator > denominator {
            return Err(ValidationError::InvalidFeeFraction(format!(
                "{}/{} exceeds 1",
                numerator, denominator
            )));
        }
        Ok(Self {
            numerator,
            denominator,
        })
    }

    /// Numerator of the ratio.
    pub fn numerator(&self) -> u128 {
        self.numerator
    }

    /// Denominator of the ratio.
    pub fn denominator(&self) -> u128 {
        self.denominator
    }

    /// `floor(amount * self)` without overflowing.
    pub fn apply(&self, amount: Amount) -> Amount {
        let whole = amount / self.denominator;
        let rest = amount % self.denominator;
        // rest < denominator <= 10^18 and numerator <= denominator, so the
        // product stays below 10^36.
        whole * self.numerator + rest * self.numerator / self.denominator
    }
}

impl Default for FeeFraction {
    fn default() -> Self {
        Self::ZERO
    }
}

impl FromStr for FeeFraction {
    type Err = ValidationError;

    /// Parse a ledger decimal such as `"0.010000000000000000"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::InvalidFeeFraction(s.to_string());
        let s_trimmed = s.trim();

        let (int_part, frac_part) = match s_trimmed.split_once('.') {
            Some((i, f)) => (i, f),
            None => (s_trimmed, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }
        if frac_part.len() > DECIMAL_PRECISION as usize {
            return Err(invalid());
        }
        if !int_part.chars().chain(frac_part.chars()).all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }

        let int_value: u128 = if int_part.is_empty() {
            0
        } else {
            int_part.parse().map_err(|_| invalid())?
        };
        let frac_value: u128 = if frac_part.is_empty() {
            0
        } else {
            let digits: u128 = frac_part.parse().map_err(|_| invalid())?;
            digits * 10u128.pow(DECIMAL_PRECISION - frac_part.len() as u32)
        };

        let numerator = int_value
            .checked_mul(DECIMAL_SCALE)
            .and_then(|v| v.checked_add(frac_value))
            .ok_or_else(invalid)?;
        Self::from_ratio(numerator, DECIMAL_SCALE)
    }
}

impl fmt::Display for FeeFraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scaled = self.numerator * (DECIMAL_SCALE / self.denominator)
            + self.numerator * (DECIMAL_SCALE % self.denominator) / self.denominator;
        write!(
            f,
            "{}.{:0width$}",
            scaled / DECIMAL_SCALE,
            scaled % DECIMAL_SCALE,
            width = DECIMAL_PRECISION as usize
        )
    }
}
