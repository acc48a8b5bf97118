//! Transaction execution
//!
//! Runs fee estimation, signing and broadcast in order, under one caller
//! deadline, and classifies what came back. Nothing here retries: an
//! [`TxOutcome::Unreachable`] means the effect on the ledger is unknown and
//! the caller must re-query before deciding anything.

use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

use crate::{
    amount::Denom,
    error::{Rejection, Unreachable},
    events::LedgerEvent,
    ledger::{BroadcastResult, FeeHint, LedgerSubmit, Signer},
    state::Timestamp,
    transition::{Transition, UnsignedTransition},
};

/// Where an accepted transition landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReference {
    pub hash: String,
    pub height: u64,
    /// Block time, the settlement time of the transition
    pub block_time: Timestamp,
}

/// Result of one submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxOutcome {
    /// Accepted and included.
    Success {
        events: Vec<LedgerEvent>,
        tx_reference: TxReference,
    },
    /// Evaluated and refused by the ledger.
    Rejected(Rejection),
    /// No ledger decision was observed.
    Unreachable(Unreachable),
}

impl TxOutcome {
    /// Classify a raw broadcast result.
    pub fn classify(result: BroadcastResult) -> Self {
        if result.code == 0 {
            return TxOutcome::Success {
                events: result.events,
                tx_reference: TxReference {
                    hash: result.tx_hash,
                    height: result.height,
                    block_time: result.block_time,
                },
            };
        }

        let rejection = if result.gas_used > result.gas_wanted {
            Rejection::out_of_gas(result.code, result.gas_wanted, result.gas_used, result.raw_log)
        } else {
            Rejection::from_raw_log(result.code, result.raw_log)
        };
        TxOutcome::Rejected(rejection)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TxOutcome::Success { .. })
    }

    pub fn tx_reference(&self) -> Option<&TxReference> {
        match self {
            TxOutcome::Success { tx_reference, .. } => Some(tx_reference),
            _ => None,
        }
    }
}

/// Submits transitions for one signer.
pub struct TransactionExecutor<L, S> {
    ledger: Arc<L>,
    signer: Arc<S>,
    denom: Denom,
    fallback_fee: Option<FeeHint>,
}

impl<L, S> TransactionExecutor<L, S>
where
    L: LedgerSubmit,
    S: Signer,
{
    pub fn new(ledger: Arc<L>, signer: Arc<S>, denom: Denom) -> Self {
        Self {
            ledger,
            signer,
            denom,
            fallback_fee: None,
        }
    }

    /// Sign with this fee when the ledger cannot estimate one.
    pub fn with_fallback_fee(mut self, fee: Option<FeeHint>) -> Self {
        self.fallback_fee = fee;
        self
    }

    pub fn signer_address(&self) -> &str {
        self.signer.address()
    }

    /// Submit `transition`, giving up after `deadline`.
    ///
    /// A deadline that expires before a result is observed yields
    /// [`Unreachable::Timeout`], never a rejection.
    pub async fn submit(&self, transition: Transition, deadline: Duration) -> TxOutcome {
        let kind = transition.kind();
        match tokio::time::timeout(deadline, self.execute(transition)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(%kind, ?deadline, "transition not confirmed before deadline");
                TxOutcome::Unreachable(Unreachable::Timeout(deadline))
            }
        }
    }

    async fn execute(&self, transition: Transition) -> TxOutcome {
        let kind = transition.kind();
        if transition.signer() != self.signer.address() {
            return TxOutcome::Unreachable(Unreachable::Signing(format!(
                "{} must be signed by {}, signer is {}",
                kind,
                transition.signer(),
                self.signer.address()
            )));
        }

        let unsigned = UnsignedTransition::new(transition, self.denom.clone());

        let fee = match self.ledger.estimate_fee(&unsigned).await {
            Ok(fee) => fee,
            Err(e) => match &self.fallback_fee {
                Some(fallback) => {
                    warn!(%kind, "fee estimation failed, using fallback fee: {}", e);
                    fallback.clone()
                }
                None => return TxOutcome::Unreachable(e),
            },
        };
        debug!(%kind, fee = %fee.amount, gas = fee.gas, "fee estimated");

        let signed = match self.signer.sign(unsigned, fee).await {
            Ok(signed) => signed,
            Err(e) => return TxOutcome::Unreachable(e),
        };

        let result = match self.ledger.broadcast(signed).await {
            Ok(result) => result,
            Err(e) => {
                warn!(%kind, "broadcast failed: {}", e);
                return TxOutcome::Unreachable(e);
            }
        };

        let outcome = TxOutcome::classify(result);
        match &outcome {
            TxOutcome::Success { tx_reference, .. } => {
                info!(
                    %kind,
                    tx_hash = %tx_reference.hash,
                    height = tx_reference.height,
                    "transition accepted"
                )
            }
            TxOutcome::Rejected(rejection) => {
                info!(%kind, code = rejection.code, "transition rejected: {}", rejection)
            }
            TxOutcome::Unreachable(_) => {}
        }
        outcome
    }
}
