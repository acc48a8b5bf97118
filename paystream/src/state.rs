//! Stream data model
//!
//! A [`StreamState`] is the authoritative-shaped snapshot of one directed
//! funding relationship. Claimable and remaining amounts are never stored
//! here; see [`crate::projection`].

use serde::{Deserialize, Serialize};

/// Base-denomination amount (e.g. nund).
pub type Amount = u128;

/// Unix timestamp in seconds.
pub type Timestamp = i64;

/// Snapshot of one sender → receiver stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamState {
    /// Funding account
    pub sender: String,
    /// Receiving account
    pub receiver: String,
    /// Base units accruing to the receiver per second; zero when inactive
    pub flow_rate: u64,
    /// Remaining base units backing the stream as of `last_outflow_time`
    pub deposit: Amount,
    /// Ledger's hint for when the deposit runs dry at the current rate
    pub deposit_zero_time: Timestamp,
    /// Time of the last settlement
    pub last_outflow_time: Timestamp,
}

impl StreamState {
    /// The cancelled/exhausted representation of a stream.
    pub fn terminated(sender: &str, receiver: &str, settled_at: Timestamp) -> Self {
        Self {
            sender: sender.to_string(),
            receiver: receiver.to_string(),
            flow_rate: 0,
            deposit: 0,
            deposit_zero_time: settled_at,
            last_outflow_time: settled_at,
        }
    }

    /// Whether this is the zero-rate, zero-deposit state.
    pub fn is_terminated(&self) -> bool {
        self.flow_rate == 0 && self.deposit == 0
    }

    /// Whether this state belongs to the given pair.
    pub fn is_pair(&self, sender: &str, receiver: &str) -> bool {
        self.sender == sender && self.receiver == receiver
    }

    /// Check the structural invariants a reconciled state must satisfy.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.sender.is_empty() || self.receiver.is_empty() {
            return Err("sender and receiver must be set".to_string());
        }
        if self.sender == self.receiver {
            return Err(format!("sender {} equals receiver", self.sender));
        }
        if self.deposit_zero_time < self.last_outflow_time && self.flow_rate > 0 && self.deposit > 0
        {
            return Err(format!(
                "deposit zero time {} precedes last outflow {} with {} still deposited",
                self.deposit_zero_time, self.last_outflow_time, self.deposit
            ));
        }
        Ok(())
    }
}

/// Coarse status of a stream, derived from its state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    /// No stream has been created yet
    Uninitialized,
    /// Streaming (possibly with an exhausted deposit awaiting settlement)
    Active,
    /// Cancelled: zero rate and zero deposit
    Terminated,
}

impl StreamStatus {
    /// Status of an optional state.
    pub fn of(state: Option<&StreamState>) -> Self {
        match state {
            None => StreamStatus::Uninitialized,
            Some(s) if s.is_terminated() => StreamStatus::Terminated,
            Some(_) => StreamStatus::Active,
        }
    }
}
