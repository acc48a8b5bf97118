//! Event reconciliation
//!
//! After a successful transition, the ledger's events are the only source of
//! truth. [`EventReconciler::reconcile`] builds the next [`StreamState`] from
//! them, replacing whatever the client had projected. It never guesses: a
//! missing event, a missing attribute, or a result that breaks a stream
//! invariant is an error and the caller keeps its previous state.
//!
//! Settlement time is the block time of the transaction. A top-up whose
//! result also carries a `claim_stream` event for the pair means the ledger
//! settled the owed amount before adding funds; the settlement resets
//! `last_outflow_time`.

use tracing::{debug, error};

use crate::{
    amount::{Coin, Denom},
    error::ReconciliationError,
    events::{
        CancelEvent, ClaimEvent, CreateEvent, DepositEvent, LedgerEvent, TransitionEvent,
        UpdateFlowRateEvent, CANCEL_STREAM, CLAIM_STREAM, CREATE_STREAM, STREAM_DEPOSIT,
        UPDATE_FLOW_RATE,
    },
    state::{Amount, StreamState, Timestamp},
    transition::{Transition, TransitionKind},
};

/// Applies transition events to stream state.
#[derive(Debug, Clone)]
pub struct EventReconciler {
    denom: Denom,
}

/// Stream events of one transaction, one slot per type.
#[derive(Default)]
struct Decoded {
    deposit: Option<DepositEvent>,
    create: Option<CreateEvent>,
    claim: Option<ClaimEvent>,
    update: Option<UpdateFlowRateEvent>,
    cancel: Option<CancelEvent>,
}

impl Decoded {
    fn collect(events: Vec<TransitionEvent>) -> Self {
        let mut decoded = Decoded::default();
        // First event of each type wins.
        for event in events {
            match event {
                TransitionEvent::Deposit(e) => {
                    decoded.deposit.get_or_insert(e);
                }
                TransitionEvent::Create(e) => {
                    decoded.create.get_or_insert(e);
                }
                TransitionEvent::Claim(e) => {
                    decoded.claim.get_or_insert(e);
                }
                TransitionEvent::UpdateFlowRate(e) => {
                    decoded.update.get_or_insert(e);
                }
                TransitionEvent::Cancel(e) => {
                    decoded.cancel.get_or_insert(e);
                }
                TransitionEvent::Unknown { .. } => {}
            }
        }
        decoded
    }
}

impl EventReconciler {
    pub fn new(denom: Denom) -> Self {
        Self { denom }
    }

    /// Next state after `transition` succeeded with `events`, settled at
    /// `settled_at`.
    ///
    /// Failures are logged here, so callers only need to surface them.
    pub fn reconcile(
        &self,
        transition: &Transition,
        prior: Option<&StreamState>,
        events: &[LedgerEvent],
        settled_at: Timestamp,
    ) -> Result<StreamState, ReconciliationError> {
        let kind = transition.kind();
        let result = self
            .apply(transition, prior, events, settled_at)
            .and_then(|state| {
                state
                    .check_invariants()
                    .map_err(ReconciliationError::InvariantViolation)?;
                Ok(state)
            });

        match &result {
            Ok(state) => debug!(
                %kind,
                sender = %state.sender,
                receiver = %state.receiver,
                flow_rate = state.flow_rate,
                deposit = %state.deposit,
                "reconciled stream state"
            ),
            Err(e) => error!(
                %kind,
                sender = transition.sender(),
                receiver = transition.receiver(),
                "reconciliation failed, keeping previous state: {}",
                e
            ),
        }
        result
    }

    fn apply(
        &self,
        transition: &Transition,
        prior: Option<&StreamState>,
        events: &[LedgerEvent],
        settled_at: Timestamp,
    ) -> Result<StreamState, ReconciliationError> {
        let sender = transition.sender();
        let receiver = transition.receiver();
        let decoded = Decoded::collect(TransitionEvent::decode_for_pair(events, sender, receiver)?);
        let kind = transition.kind();

        if let Some(claim) = &decoded.claim {
            self.check_claim_total(claim)?;
        }

        match kind {
            TransitionKind::Create => {
                let create = decoded
                    .create
                    .ok_or(ReconciliationError::MissingEvent(CREATE_STREAM))?;
                let deposit = decoded
                    .deposit
                    .ok_or(ReconciliationError::MissingEvent(STREAM_DEPOSIT))?;

                Ok(StreamState {
                    sender: sender.to_string(),
                    receiver: receiver.to_string(),
                    flow_rate: create.flow_rate,
                    deposit: self.amount(
                        &deposit.amount_deposited,
                        STREAM_DEPOSIT,
                        "amount_deposited",
                    )?,
                    deposit_zero_time: deposit.deposit_zero_time,
                    last_outflow_time: settled_at,
                })
            }

            TransitionKind::TopUp => {
                let prior = require_prior(kind, prior)?;
                let deposit = decoded
                    .deposit
                    .ok_or(ReconciliationError::MissingEvent(STREAM_DEPOSIT))?;
                let added =
                    self.amount(&deposit.amount_deposited, STREAM_DEPOSIT, "amount_deposited")?;

                let (base, last_outflow_time) = match &decoded.claim {
                    // The ledger settled what was owed before adding funds.
                    Some(claim) => (
                        self.amount(&claim.remaining_deposit, CLAIM_STREAM, "remaining_deposit")?,
                        settled_at,
                    ),
                    None => (prior.deposit, prior.last_outflow_time),
                };
                let new_deposit = base.checked_add(added).ok_or_else(|| {
                    ReconciliationError::InvariantViolation(format!(
                        "deposit {} + {} overflows",
                        base, added
                    ))
                })?;

                Ok(StreamState {
                    deposit: new_deposit,
                    deposit_zero_time: deposit.deposit_zero_time,
                    last_outflow_time,
                    ..prior.clone()
                })
            }

            TransitionKind::UpdateFlowRate => {
                let prior = require_prior(kind, prior)?;
                let update = decoded
                    .update
                    .ok_or(ReconciliationError::MissingEvent(UPDATE_FLOW_RATE))?;
                if update.old_flow_rate != prior.flow_rate {
                    return Err(ReconciliationError::InvariantViolation(format!(
                        "ledger replaced flow rate {}, local state had {}",
                        update.old_flow_rate, prior.flow_rate
                    )));
                }

                Ok(StreamState {
                    flow_rate: update.new_flow_rate,
                    deposit: self.amount(
                        &update.remaining_deposit,
                        UPDATE_FLOW_RATE,
                        "remaining_deposit",
                    )?,
                    deposit_zero_time: update.deposit_zero_time,
                    last_outflow_time: settled_at,
                    ..prior.clone()
                })
            }

            TransitionKind::Claim => {
                let prior = require_prior(kind, prior)?;
                let claim = decoded
                    .claim
                    .ok_or(ReconciliationError::MissingEvent(CLAIM_STREAM))?;
                let remaining =
                    self.amount(&claim.remaining_deposit, CLAIM_STREAM, "remaining_deposit")?;
                if remaining > prior.deposit {
                    return Err(ReconciliationError::InvariantViolation(format!(
                        "claim left {} deposited, more than the {} before it",
                        remaining, prior.deposit
                    )));
                }

                Ok(StreamState {
                    deposit: remaining,
                    last_outflow_time: settled_at,
                    ..prior.clone()
                })
            }

            TransitionKind::Cancel => {
                let cancel = decoded
                    .cancel
                    .ok_or(ReconciliationError::MissingEvent(CANCEL_STREAM))?;
                self.amount(&cancel.refund_amount, CANCEL_STREAM, "refund_amount")?;

                Ok(StreamState::terminated(sender, receiver, settled_at))
            }
        }
    }

    /// Amount of a coin attribute in the streamed denomination.
    fn amount(
        &self,
        coin: &Coin,
        kind: &'static str,
        key: &'static str,
    ) -> Result<Amount, ReconciliationError> {
        if coin.amount == 0 && coin.denom.is_empty() {
            return Ok(0);
        }
        coin.amount_in(&self.denom)
            .map_err(|_| ReconciliationError::MalformedAttribute {
                kind: kind.to_string(),
                key,
                value: coin.to_string(),
            })
    }

    fn check_claim_total(&self, claim: &ClaimEvent) -> Result<(), ReconciliationError> {
        let received = self.amount(&claim.amount_received, CLAIM_STREAM, "amount_received")?;
        let fee = self.amount(&claim.validator_fee, CLAIM_STREAM, "validator_fee")?;

        if let Some(total) = &claim.claim_total {
            let total = self.amount(total, CLAIM_STREAM, "claim_total")?;
            if received.checked_add(fee) != Some(total) {
                return Err(ReconciliationError::InvariantViolation(format!(
                    "claim total {} is not received {} plus fee {}",
                    total, received, fee
                )));
            }
        }
        Ok(())
    }
}

fn require_prior(
    kind: TransitionKind,
    prior: Option<&StreamState>,
) -> Result<&StreamState, ReconciliationError> {
    prior.ok_or_else(|| {
        ReconciliationError::InvariantViolation(format!(
            "no prior stream state to apply {} to",
            kind
        ))
    })
}
