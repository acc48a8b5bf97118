//! Paystream
//!
//! Accounting and transition engine for continuous payment streams backed by
//! an external ledger. A sender funds a deposit and a flow rate; the
//! receiver's claimable balance grows every second until the deposit runs
//! out.
//!
//! ## Trust Model
//!
//! - Projections ([`projection::project`]) are advisory and never settle
//!   anything
//! - Only ledger events from a successful transition change local state
//!   ([`reconcile::EventReconciler`])
//! - Rejections and unknown outcomes are returned as data and leave state
//!   untouched
//! - No automatic retries: refresh from the ledger before resubmitting

pub mod amount;
pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod flow_rate;
pub mod history;
pub mod ledger;
pub mod lifecycle;
pub mod logging;
pub mod period;
pub mod projection;
pub mod reconcile;
pub mod rpc;
pub mod state;
pub mod transition;

pub use amount::{Coin, Denom};
pub use config::ClientConfig;
pub use error::{
    ReconciliationError, Rejection, RejectionCategory, StreamError, StreamResult, Unreachable,
    ValidationError,
};
pub use executor::{TransactionExecutor, TxOutcome, TxReference};
pub use flow_rate::FeeFraction;
pub use history::{list_all_streams, StreamTx};
pub use ledger::{LedgerQuery, LedgerSubmit, PageRequest, Signer, StreamPage};
pub use lifecycle::StreamLifecycle;
pub use period::Period;
pub use projection::{project, Projection, ProjectionTicker};
pub use rpc::RpcLedger;
pub use state::{Amount, StreamState, StreamStatus, Timestamp};
pub use transition::{FlowRateQuote, Transition, TransitionKind, TransitionRequest};
