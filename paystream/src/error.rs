//! Error types for payment stream transitions.
//!
//! Four buckets, one per place a transition can go wrong:
//! - [`ValidationError`]: rejected locally, never reaches the network
//! - [`Rejection`]: the ledger looked at the transition and refused it
//! - [`Unreachable`]: no ledger decision was observed; the effect is unknown
//! - [`ReconciliationError`]: the ledger accepted the transition but its
//!   events cannot be applied safely

use displaydoc::Display;
use std::{fmt, time::Duration};
use thiserror::Error;

use crate::state::Amount;

/// Input errors detected before any network call.
#[derive(Clone, Debug, Display, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// Receiver cannot be the same account as the sender
    SelfAsReceiver,

    /// Amount must be greater than zero
    NonPositiveAmount,

    /// Amount {needed} exceeds the known balance of {available}
    InsufficientBalance { needed: Amount, available: Amount },

    /// Duration must be at least one period
    ZeroDuration,

    /// Unknown stream period: {0}
    UnknownPeriod(String),

    /// Invalid amount: {0}
    InvalidAmount(String),

    /// Amount does not fit in the base denomination
    AmountOverflow,

    /// Expected denomination {expected}, got {actual}
    DenomMismatch { expected: String, actual: String },

    /// Flow rate rounds down to zero for this funding amount and duration
    ZeroFlowRate,

    /// Invalid validator fee fraction: {0}
    InvalidFeeFraction(String),

    /// Stream has been terminated and accepts no further transitions
    StreamTerminated,

    /// No stream exists yet between this sender and receiver
    StreamNotInitialized,

    /// Transition targets stream {sender} -> {receiver}, which this client does not track
    ForeignStream { sender: String, receiver: String },

    /// Account {account} is not the {role} of this stream
    WrongRole { account: String, role: &'static str },

    /// Flow rate quote has not been confirmed by the ledger
    UnconfirmedQuote,
}

/// User-facing category for a ledger-side rejection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RejectionCategory {
    /// A stream for this sender/receiver pair already exists.
    StreamExists,
    /// The ledger refused a stream whose receiver is its sender.
    ReceiverIsSender,
    /// Not enough funds at settlement time.
    InsufficientFunds,
    /// The stream the transition refers to does not exist.
    StreamNotFound,
    /// Execution ran out of gas.
    OutOfGas { wanted: u64, used: u64 },
    /// No known pattern matched; the raw log is shown as-is.
    Other,
}

/// A transition the ledger evaluated and refused.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rejection {
    /// Mapped category.
    pub category: RejectionCategory,
    /// Ledger result code (non-zero).
    pub code: u32,
    /// Raw ledger log, kept for diagnostics.
    pub raw_log: String,
}

impl Rejection {
    /// Map a raw ledger log onto the rejection taxonomy.
    pub fn from_raw_log(code: u32, raw_log: impl Into<String>) -> Self {
        let raw_log = raw_log.into();
        let lower = raw_log.to_ascii_lowercase();

        let category = if lower.contains("stream exists") {
            RejectionCategory::StreamExists
        } else if lower.contains("receiver cannot be same as sender") {
            RejectionCategory::ReceiverIsSender
        } else if lower.contains("insufficient funds") {
            RejectionCategory::InsufficientFunds
        } else if lower.contains("not found") {
            RejectionCategory::StreamNotFound
        } else {
            RejectionCategory::Other
        };

        Self {
            category,
            code,
            raw_log,
        }
    }

    /// Rejection for a transaction that used more gas than it asked for.
    pub fn out_of_gas(code: u32, wanted: u64, used: u64, raw_log: impl Into<String>) -> Self {
        Self {
            category: RejectionCategory::OutOfGas { wanted, used },
            code,
            raw_log: raw_log.into(),
        }
    }

    /// Message suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match &self.category {
            RejectionCategory::StreamExists => "Stream from this sender to receiver already exists. \
                 Use the update stream function if you wish to modify it"
                .to_string(),
            RejectionCategory::ReceiverIsSender => {
                "Receiver address cannot be same as sender address".to_string()
            }
            RejectionCategory::InsufficientFunds => {
                "Insufficient funds to settle this transition".to_string()
            }
            RejectionCategory::StreamNotFound => {
                "No stream exists for this sender and receiver".to_string()
            }
            RejectionCategory::OutOfGas { wanted, used } => {
                format!("Out of gas. Gas Wanted: {}, Gas Used: {}", wanted, used)
            }
            RejectionCategory::Other if self.raw_log.is_empty() => "Transaction Failed".to_string(),
            RejectionCategory::Other => self.raw_log.clone(),
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for Rejection {}

/// Transport or signing failure before a ledger decision was observed.
///
/// Never read this as "the transition did not happen": re-query the stream
/// before deciding to resubmit.
#[derive(Clone, Debug, Display, Error, PartialEq, Eq)]
pub enum Unreachable {
    /// Fee estimation failed: {0}
    FeeEstimation(String),

    /// Signing failed: {0}
    Signing(String),

    /// Broadcast failed: {0}
    Broadcast(String),

    /// Ledger query failed: {0}
    Query(String),

    /// No ledger confirmation within {0:?}
    Timeout(Duration),
}

/// A successful transition whose events cannot be applied.
#[derive(Clone, Debug, Display, Error, PartialEq, Eq)]
pub enum ReconciliationError {
    /// Transition result carries no `{0}` event for this stream
    MissingEvent(&'static str),

    /// Event `{kind}` is missing attribute `{key}`
    MissingAttribute { kind: String, key: &'static str },

    /// Event `{kind}` attribute `{key}` is malformed: {value}
    MalformedAttribute {
        kind: String,
        key: &'static str,
        value: String,
    },

    /// Reconciled state violates an invariant: {0}
    InvariantViolation(String),

    /// Client flow rate {local} disagrees with ledger flow rate {ledger}
    FlowRateDrift { local: u64, ledger: u64 },
}

/// Umbrella error for lifecycle operations.
#[derive(Clone, Debug, Display, Error, PartialEq, Eq)]
pub enum StreamError {
    /// Validation failed: {0}
    Validation(#[from] ValidationError),

    /// Ledger unreachable: {0}
    Unreachable(#[from] Unreachable),

    /// Reconciliation failed: {0}
    Reconciliation(#[from] ReconciliationError),

    /// Transaction {tx_hash} was applied but could not be reconciled: {source}
    Unreconciled {
        tx_hash: String,
        source: ReconciliationError,
    },
}

impl StreamError {
    /// Hash of a transaction the ledger applied, when the error happened
    /// after inclusion.
    pub fn tx_hash(&self) -> Option<&str> {
        match self {
            StreamError::Unreconciled { tx_hash, .. } => Some(tx_hash),
            _ => None,
        }
    }
}

/// Result type for lifecycle operations.
pub type StreamResult<T> = Result<T, StreamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_mapping() {
        let r = Rejection::from_raw_log(
            18,
            "failed to execute message; message index: 0: stream exists",
        );
        assert_eq!(r.category, RejectionCategory::StreamExists);
        assert!(r.user_message().starts_with("Stream from this sender"));

        let r = Rejection::from_raw_log(18, "receiver cannot be same as sender: invalid request");
        assert_eq!(r.category, RejectionCategory::ReceiverIsSender);

        let r = Rejection::from_raw_log(5, "1000nund is smaller than 5000nund: insufficient funds");
        assert_eq!(r.category, RejectionCategory::InsufficientFunds);
    }

    #[test]
    fn test_unmapped_rejection_passes_raw_log_through() {
        let r = Rejection::from_raw_log(7, "some new business rule");
        assert_eq!(r.category, RejectionCategory::Other);
        assert_eq!(r.to_string(), "some new business rule");

        let r = Rejection::from_raw_log(7, "");
        assert_eq!(r.to_string(), "Transaction Failed");
    }

    #[test]
    fn test_out_of_gas_message() {
        let r = Rejection::out_of_gas(11, 200_000, 250_000, "out of gas");
        assert_eq!(
            r.to_string(),
            "Out of gas. Gas Wanted: 200000, Gas Used: 250000"
        );
    }

    #[test]
    fn test_error_display() {
        let err = ValidationError::InsufficientBalance {
            needed: 10,
            available: 5,
        };
        assert_eq!(err.to_string(), "Amount 10 exceeds the known balance of 5");

        let err = ReconciliationError::MissingAttribute {
            kind: "claim_stream".to_string(),
            key: "remaining_deposit",
        };
        assert_eq!(
            err.to_string(),
            "Event `claim_stream` is missing attribute `remaining_deposit`"
        );

        let err: StreamError = ValidationError::StreamTerminated.into();
        assert!(matches!(err, StreamError::Validation(_)));
        assert_eq!(err.tx_hash(), None);

        let err = StreamError::Unreconciled {
            tx_hash: "ABC123".to_string(),
            source: ReconciliationError::MissingEvent("create_stream"),
        };
        assert_eq!(err.tx_hash(), Some("ABC123"));
        assert_eq!(
            err.to_string(),
            "Transaction ABC123 was applied but could not be reconciled: \
             Transition result carries no `create_stream` event for this stream"
        );
        assert!(std::error::Error::source(&err).is_some());
    }
}
