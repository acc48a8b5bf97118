//! Ledger collaborator interfaces
//!
//! The ledger is external: this crate only queries it and submits signed
//! transitions to it. Signing is a separate seam so keys can live in a
//! wallet the crate never sees.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    amount::Coin,
    error::Unreachable,
    events::LedgerEvent,
    flow_rate::FeeFraction,
    history::StreamTx,
    period::Period,
    state::{Amount, StreamState, Timestamp},
    transition::{Transition, UnsignedTransition},
};

/// Module parameters that affect client-side math.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamParams {
    /// Share of every claim kept by validators
    pub validator_fee: FeeFraction,
}

/// Page size used when none is given.
pub const DEFAULT_PAGE_LIMIT: u64 = 50;

/// One page of a listing query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// Key returned with the previous page, `None` for the first
    pub key: Option<String>,
    pub limit: u64,
    /// Ask the ledger to count every item
    pub count_total: bool,
    pub reverse: bool,
}

impl PageRequest {
    pub fn first(limit: u64) -> Self {
        Self {
            key: None,
            limit: limit.max(1),
            count_total: true,
            reverse: false,
        }
    }

    /// The page after this one.
    pub fn next(&self, key: String) -> Self {
        Self {
            key: Some(key),
            count_total: false,
            ..self.clone()
        }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::first(DEFAULT_PAGE_LIMIT)
    }
}

/// Streams from one page of the ledger's stream list.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StreamPage {
    pub streams: Vec<StreamState>,
    /// `None` on the last page
    pub next_key: Option<String>,
    /// Total count, when requested
    pub total: Option<u64>,
}

/// Fee and gas limit to sign with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeHint {
    pub amount: Coin,
    pub gas: u64,
}

/// A transition signed by its signer, ready to broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransition {
    pub transition: Transition,
    pub fee: FeeHint,
    /// Encoded, signed transaction
    pub tx_bytes: Vec<u8>,
}

/// Raw result of an included or rejected transaction, as returned by a
/// broadcast or a transaction search.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BroadcastResult {
    /// Zero on success
    pub code: u32,
    pub raw_log: String,
    pub tx_hash: String,
    pub height: u64,
    /// Time of the block that included the transaction
    pub block_time: Timestamp,
    pub gas_wanted: u64,
    pub gas_used: u64,
    pub events: Vec<LedgerEvent>,
}

/// Read-only ledger queries.
#[async_trait]
pub trait LedgerQuery: Send + Sync {
    /// Current stream for the pair, `None` when none exists.
    async fn query_stream(
        &self,
        sender: &str,
        receiver: &str,
    ) -> Result<Option<StreamState>, Unreachable>;

    /// The ledger's own flow rate for the given funding.
    async fn query_calculate_flow_rate(
        &self,
        amount: &Coin,
        period: Period,
        duration: u64,
    ) -> Result<u64, Unreachable>;

    /// One page of every stream on the ledger.
    async fn query_streams(&self, page: &PageRequest) -> Result<StreamPage, Unreachable>;

    /// Every included transaction that emitted a stream event for the
    /// pair, oldest first.
    async fn query_stream_history(
        &self,
        sender: &str,
        receiver: &str,
    ) -> Result<Vec<StreamTx>, Unreachable>;

    async fn query_params(&self) -> Result<StreamParams, Unreachable>;

    async fn query_balance(&self, address: &str, denom: &str) -> Result<Amount, Unreachable>;
}

/// Transaction submission.
#[async_trait]
pub trait LedgerSubmit: Send + Sync {
    /// Fee and gas the ledger expects for this transition.
    async fn estimate_fee(&self, tx: &UnsignedTransition) -> Result<FeeHint, Unreachable>;

    /// Broadcast and wait for inclusion.
    ///
    /// `Err` means no result was observed. A result with a non-zero code is
    /// a rejection and comes back as `Ok`.
    async fn broadcast(&self, tx: SignedTransition) -> Result<BroadcastResult, Unreachable>;
}

/// Holds the keys for one account.
#[async_trait]
pub trait Signer: Send + Sync {
    fn address(&self) -> &str;

    async fn sign(
        &self,
        tx: UnsignedTransition,
        fee: FeeHint,
    ) -> Result<SignedTransition, Unreachable>;
}
