//! Ledger event decoding
//!
//! A successful transition returns a list of typed events, each a bag of
//! string attributes. [`TransitionEvent::decode`] turns one raw
//! [`LedgerEvent`] into a strongly-typed payload, failing loudly when an
//! attribute the event type always carries is missing or malformed.

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::{
    amount::Coin,
    error::ReconciliationError,
    state::Timestamp,
};

/// `stream_deposit`: emitted on create and top-up.
pub const STREAM_DEPOSIT: &str = "stream_deposit";
/// `create_stream`
pub const CREATE_STREAM: &str = "create_stream";
/// `claim_stream`: emitted on claim and on any forced settlement.
pub const CLAIM_STREAM: &str = "claim_stream";
/// `update_flow_rate`
pub const UPDATE_FLOW_RATE: &str = "update_flow_rate";
/// `cancel_stream`
pub const CANCEL_STREAM: &str = "cancel_stream";

/// Every event type the stream module emits.
pub const STREAM_EVENT_KINDS: [&str; 5] = [
    CREATE_STREAM,
    STREAM_DEPOSIT,
    CLAIM_STREAM,
    CANCEL_STREAM,
    UPDATE_FLOW_RATE,
];

/// One key/value attribute of a ledger event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventAttribute {
    pub key: String,
    pub value: String,
}

/// Raw event as returned by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub attributes: Vec<EventAttribute>,
}

impl LedgerEvent {
    /// Build an event from `(key, value)` pairs.
    pub fn new(kind: &str, attributes: &[(&str, &str)]) -> Self {
        Self {
            kind: kind.to_string(),
            attributes: attributes
                .iter()
                .map(|(key, value)| EventAttribute {
                    key: key.to_string(),
                    value: value.to_string(),
                })
                .collect(),
        }
    }

    /// First value for `key`.
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.key == key)
            .map(|a| a.value.as_str())
    }

    fn required(&self, key: &'static str) -> Result<&str, ReconciliationError> {
        self.attr(key)
            .ok_or_else(|| ReconciliationError::MissingAttribute {
                kind: self.kind.clone(),
                key,
            })
    }

    fn malformed(&self, key: &'static str, value: &str) -> ReconciliationError {
        ReconciliationError::MalformedAttribute {
            kind: self.kind.clone(),
            key,
            value: value.to_string(),
        }
    }

    fn account(&self, key: &'static str) -> Result<String, ReconciliationError> {
        let value = self.required(key)?.trim();
        if value.is_empty() {
            return Err(self.malformed(key, value));
        }
        Ok(value.to_string())
    }

    fn integer(&self, key: &'static str) -> Result<u64, ReconciliationError> {
        let value = self.required(key)?;
        value.trim().parse().map_err(|_| self.malformed(key, value))
    }

    fn coin(&self, key: &'static str) -> Result<Coin, ReconciliationError> {
        let value = self.required(key)?;
        // Empty coin sets are rendered as an empty string.
        if value.trim().is_empty() {
            return Ok(Coin {
                amount: 0,
                denom: String::new(),
            });
        }
        value.parse().map_err(|_| self.malformed(key, value))
    }

    fn timestamp(&self, key: &'static str) -> Result<Timestamp, ReconciliationError> {
        let value = self.required(key)?;
        parse_timestamp(value).ok_or_else(|| self.malformed(key, value))
    }
}

/// Parse a ledger timestamp.
///
/// Accepts Unix seconds, RFC 3339, and the ledger's
/// `"2024-05-01 12:00:00.5 +0000 UTC"` rendering.
pub fn parse_timestamp(value: &str) -> Option<Timestamp> {
    let value = value.trim();

    if let Ok(seconds) = value.parse::<i64>() {
        return Some(seconds);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.timestamp());
    }

    // Drop the trailing zone abbreviation, keep the numeric offset.
    let mut parts = value.split_whitespace();
    if let (Some(date), Some(time), Some(offset)) = (parts.next(), parts.next(), parts.next()) {
        let joined = format!("{} {} {}", date, time, offset);
        if let Ok(dt) = DateTime::parse_from_str(&joined, "%Y-%m-%d %H:%M:%S%.f %z") {
            return Some(dt.timestamp());
        }
    }

    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|dt| dt.and_utc().timestamp())
}

/// Funds added to a stream's deposit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositEvent {
    pub sender: String,
    pub receiver: String,
    pub amount_deposited: Coin,
    pub deposit_zero_time: Timestamp,
}

/// A new stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateEvent {
    pub sender: String,
    pub receiver: String,
    pub flow_rate: u64,
}

/// A settlement to the receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimEvent {
    pub sender: String,
    pub receiver: String,
    pub amount_received: Coin,
    pub validator_fee: Coin,
    pub remaining_deposit: Coin,
    /// Gross settled amount, when the ledger reports it
    pub claim_total: Option<Coin>,
}

/// A rate change, with the settlement it forced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateFlowRateEvent {
    pub sender: String,
    pub receiver: String,
    pub old_flow_rate: u64,
    pub new_flow_rate: u64,
    pub deposit_zero_time: Timestamp,
    pub remaining_deposit: Coin,
}

/// A cancelled stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelEvent {
    pub sender: String,
    pub receiver: String,
    pub refund_amount: Coin,
}

/// Closed set of events a stream transition can emit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionEvent {
    Deposit(DepositEvent),
    Create(CreateEvent),
    Claim(ClaimEvent),
    UpdateFlowRate(UpdateFlowRateEvent),
    Cancel(CancelEvent),
    /// Anything else the transaction emitted (fees, transfers, ...)
    Unknown { kind: String },
}

impl TransitionEvent {
    /// Decode one raw event.
    pub fn decode(event: &LedgerEvent) -> Result<Self, ReconciliationError> {
        let decoded = match event.kind.as_str() {
            STREAM_DEPOSIT => TransitionEvent::Deposit(DepositEvent {
                sender: event.account("sender")?,
                receiver: event.account("receiver")?,
                amount_deposited: event.coin("amount_deposited")?,
                deposit_zero_time: event.timestamp("deposit_zero_time")?,
            }),
            CREATE_STREAM => TransitionEvent::Create(CreateEvent {
                sender: event.account("sender")?,
                receiver: event.account("receiver")?,
                flow_rate: event.integer("flow_rate")?,
            }),
            CLAIM_STREAM => TransitionEvent::Claim(ClaimEvent {
                sender: event.account("sender")?,
                receiver: event.account("receiver")?,
                amount_received: event.coin("amount_received")?,
                validator_fee: event.coin("validator_fee")?,
                remaining_deposit: event.coin("remaining_deposit")?,
                claim_total: match event.attr("claim_total") {
                    Some(_) => Some(event.coin("claim_total")?),
                    None => None,
                },
            }),
            UPDATE_FLOW_RATE => TransitionEvent::UpdateFlowRate(UpdateFlowRateEvent {
                sender: event.account("sender")?,
                receiver: event.account("receiver")?,
                old_flow_rate: event.integer("old_flow_rate")?,
                new_flow_rate: event.integer("new_flow_rate")?,
                deposit_zero_time: event.timestamp("deposit_zero_time")?,
                remaining_deposit: event.coin("remaining_deposit")?,
            }),
            CANCEL_STREAM => TransitionEvent::Cancel(CancelEvent {
                sender: event.account("sender")?,
                receiver: event.account("receiver")?,
                refund_amount: event.coin("refund_amount")?,
            }),
            other => TransitionEvent::Unknown {
                kind: other.to_string(),
            },
        };
        Ok(decoded)
    }

    /// Decode every stream event for the given pair, skipping events of
    /// other pairs and non-stream events.
    pub fn decode_for_pair(
        events: &[LedgerEvent],
        sender: &str,
        receiver: &str,
    ) -> Result<Vec<TransitionEvent>, ReconciliationError> {
        let mut decoded = Vec::new();
        for event in events {
            if !is_stream_event(&event.kind) {
                continue;
            }
            if event.attr("sender") != Some(sender) || event.attr("receiver") != Some(receiver) {
                continue;
            }
            decoded.push(TransitionEvent::decode(event)?);
        }
        Ok(decoded)
    }

    /// Ledger event type this variant was decoded from.
    pub fn kind(&self) -> &str {
        match self {
            TransitionEvent::Deposit(_) => STREAM_DEPOSIT,
            TransitionEvent::Create(_) => CREATE_STREAM,
            TransitionEvent::Claim(_) => CLAIM_STREAM,
            TransitionEvent::UpdateFlowRate(_) => UPDATE_FLOW_RATE,
            TransitionEvent::Cancel(_) => CANCEL_STREAM,
            TransitionEvent::Unknown { kind } => kind,
        }
    }
}

/// Whether an event type belongs to the stream module.
pub fn is_stream_event(kind: &str) -> bool {
    STREAM_EVENT_KINDS.contains(&kind)
}
