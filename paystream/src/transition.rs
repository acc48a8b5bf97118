//! Transition building
//!
//! Turns user intent (display-unit amounts, periods, counterparties) into one
//! of the five ledger transitions, rejecting anything invalid before a
//! network call is made. Flow rate changes go through a [`FlowRateQuote`]
//! first so the caller can show the rate and the pending settlement before
//! confirming.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

use crate::{
    amount::{parse_amount, Denom},
    error::{ReconciliationError, ValidationError},
    flow_rate::{compute_deposit_zero_time, compute_flow_rate, compute_validator_fee, FeeFraction},
    period::Period,
    projection::{project, Projection},
    state::{Amount, StreamState, Timestamp},
};

/// Message type prefix of the stream module.
const MSG_PREFIX: &str = "/mainchain.stream.v1";

/// The five ways a stream's authoritative state changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    Create,
    TopUp,
    UpdateFlowRate,
    Cancel,
    Claim,
}

impl TransitionKind {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            TransitionKind::Create => "create",
            TransitionKind::TopUp => "top_up",
            TransitionKind::UpdateFlowRate => "update_flow_rate",
            TransitionKind::Cancel => "cancel",
            TransitionKind::Claim => "claim",
        }
    }

    /// Ledger message type URL.
    pub fn type_url(&self) -> String {
        let msg = match self {
            TransitionKind::Create => "MsgCreateStream",
            TransitionKind::TopUp => "MsgTopUpDeposit",
            TransitionKind::UpdateFlowRate => "MsgUpdateFlowRate",
            TransitionKind::Cancel => "MsgCancelStream",
            TransitionKind::Claim => "MsgClaimStream",
        };
        format!("{}.{}", MSG_PREFIX, msg)
    }

    /// Which side of the stream signs this transition.
    pub fn signer_role(&self) -> &'static str {
        match self {
            TransitionKind::Claim => "receiver",
            _ => "sender",
        }
    }
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A validated transition, amounts in base units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transition {
    Create {
        sender: String,
        receiver: String,
        deposit: Amount,
        flow_rate: u64,
    },
    TopUp {
        sender: String,
        receiver: String,
        amount: Amount,
    },
    UpdateFlowRate {
        sender: String,
        receiver: String,
        flow_rate: u64,
    },
    Cancel {
        sender: String,
        receiver: String,
    },
    Claim {
        sender: String,
        receiver: String,
    },
}

impl Transition {
    pub fn kind(&self) -> TransitionKind {
        match self {
            Transition::Create { .. } => TransitionKind::Create,
            Transition::TopUp { .. } => TransitionKind::TopUp,
            Transition::UpdateFlowRate { .. } => TransitionKind::UpdateFlowRate,
            Transition::Cancel { .. } => TransitionKind::Cancel,
            Transition::Claim { .. } => TransitionKind::Claim,
        }
    }

    pub fn sender(&self) -> &str {
        match self {
            Transition::Create { sender, .. }
            | Transition::TopUp { sender, .. }
            | Transition::UpdateFlowRate { sender, .. }
            | Transition::Cancel { sender, .. }
            | Transition::Claim { sender, .. } => sender,
        }
    }

    pub fn receiver(&self) -> &str {
        match self {
            Transition::Create { receiver, .. }
            | Transition::TopUp { receiver, .. }
            | Transition::UpdateFlowRate { receiver, .. }
            | Transition::Cancel { receiver, .. }
            | Transition::Claim { receiver, .. } => receiver,
        }
    }

    /// Account that must sign this transition.
    pub fn signer(&self) -> &str {
        match self.kind() {
            TransitionKind::Claim => self.receiver(),
            _ => self.sender(),
        }
    }

    /// Ledger message body.
    pub fn to_message(&self, denom: &Denom) -> Value {
        let type_url = self.kind().type_url();
        match self {
            Transition::Create {
                sender,
                receiver,
                deposit,
                flow_rate,
            } => json!({
                "@type": type_url,
                "sender": sender,
                "receiver": receiver,
                "deposit": { "denom": denom.base, "amount": deposit.to_string() },
                "flow_rate": flow_rate.to_string(),
            }),
            Transition::TopUp {
                sender,
                receiver,
                amount,
            } => json!({
                "@type": type_url,
                "sender": sender,
                "receiver": receiver,
                "deposit": { "denom": denom.base, "amount": amount.to_string() },
            }),
            Transition::UpdateFlowRate {
                sender,
                receiver,
                flow_rate,
            } => json!({
                "@type": type_url,
                "sender": sender,
                "receiver": receiver,
                "flow_rate": flow_rate.to_string(),
            }),
            Transition::Cancel { sender, receiver } | Transition::Claim { sender, receiver } => {
                json!({
                    "@type": type_url,
                    "sender": sender,
                    "receiver": receiver,
                })
            }
        }
    }
}

/// A transition ready for fee estimation and signing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTransition {
    pub transition: Transition,
    pub denom: Denom,
}

impl UnsignedTransition {
    pub fn new(transition: Transition, denom: Denom) -> Self {
        Self { transition, denom }
    }

    pub fn signer(&self) -> &str {
        self.transition.signer()
    }

    pub fn message(&self) -> Value {
        self.transition.to_message(&self.denom)
    }
}

/// Rate preview shown to the user before a create or a rate change.
///
/// A quote only carries a submittable rate once [`FlowRateQuote::confirm`]
/// has checked it against the ledger's own calculation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlowRateQuote {
    /// Funding amount the rate was derived from, in base units
    pub funding_amount: Amount,
    pub period: Period,
    pub duration: u64,
    client_flow_rate: u64,
    ledger_flow_rate: Option<u64>,
    /// Total the rate streams over the whole duration (at most the funding amount)
    pub streamed_total: Amount,
    /// Validator share of `streamed_total`
    pub validator_fee: Amount,
    /// Receiver share of `streamed_total`
    pub net_receivable: Amount,
    /// When the deposit would run dry at the quoted rate
    pub deposit_zero_time: Option<Timestamp>,
    /// For rate changes: what the old rate owes and will settle first
    pub pending_settlement: Option<Projection>,
}

impl FlowRateQuote {
    /// Rate computed locally.
    pub fn client_flow_rate(&self) -> u64 {
        self.client_flow_rate
    }

    /// Rate the ledger confirmed, `None` until confirmed.
    pub fn ledger_flow_rate(&self) -> Option<u64> {
        self.ledger_flow_rate
    }

    pub fn is_confirmed(&self) -> bool {
        self.ledger_flow_rate.is_some()
    }

    /// The rate to submit, `None` until confirmed.
    pub fn flow_rate(&self) -> Option<u64> {
        self.ledger_flow_rate
    }

    /// Record the ledger's answer, failing when it disagrees with ours.
    pub fn confirm(mut self, ledger_flow_rate: u64) -> Result<Self, ReconciliationError> {
        if ledger_flow_rate != self.client_flow_rate {
            return Err(ReconciliationError::FlowRateDrift {
                local: self.client_flow_rate,
                ledger: ledger_flow_rate,
            });
        }
        self.ledger_flow_rate = Some(ledger_flow_rate);
        Ok(self)
    }
}

/// User intent, display-unit amounts as typed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionRequest {
    Create {
        receiver: String,
        amount: String,
        period: Period,
        duration: u64,
    },
    TopUp {
        receiver: String,
        amount: String,
    },
    /// Submit a rate previously shown to the user.
    UpdateFlowRate {
        receiver: String,
        quote: FlowRateQuote,
    },
    Cancel {
        receiver: String,
    },
    Claim {
        sender: String,
    },
}

impl TransitionRequest {
    pub fn kind(&self) -> TransitionKind {
        match self {
            TransitionRequest::Create { .. } => TransitionKind::Create,
            TransitionRequest::TopUp { .. } => TransitionKind::TopUp,
            TransitionRequest::UpdateFlowRate { .. } => TransitionKind::UpdateFlowRate,
            TransitionRequest::Cancel { .. } => TransitionKind::Cancel,
            TransitionRequest::Claim { .. } => TransitionKind::Claim,
        }
    }
}

/// Validates and normalizes transitions for one local account.
#[derive(Debug, Clone)]
pub struct TransitionBuilder {
    account: String,
    denom: Denom,
    known_balance: Option<Amount>,
}

impl TransitionBuilder {
    pub fn new(account: impl Into<String>, denom: Denom) -> Self {
        Self {
            account: account.into(),
            denom,
            known_balance: None,
        }
    }

    /// Advisory balance to check funding amounts against.
    pub fn with_known_balance(mut self, balance: Option<Amount>) -> Self {
        self.known_balance = balance;
        self
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn denom(&self) -> &Denom {
        &self.denom
    }

    /// Build any transition from a request.
    pub fn build(
        &self,
        request: &TransitionRequest,
        current: Option<&StreamState>,
    ) -> Result<Transition, ValidationError> {
        match request {
            TransitionRequest::Create {
                receiver,
                amount,
                period,
                duration,
            } => self.create(receiver, amount, *period, *duration, current),
            TransitionRequest::TopUp { receiver, amount } => self.top_up(receiver, amount, current),
            TransitionRequest::UpdateFlowRate { receiver, quote } => {
                self.update_flow_rate(receiver, quote, current)
            }
            TransitionRequest::Cancel { receiver } => self.cancel(receiver, current),
            TransitionRequest::Claim { sender } => self.claim(sender, current),
        }
    }

    pub fn create(
        &self,
        receiver: &str,
        amount: &str,
        period: Period,
        duration: u64,
        current: Option<&StreamState>,
    ) -> Result<Transition, ValidationError> {
        self.check_preconditions(TransitionKind::Create, &self.account, receiver, current)?;
        let deposit = self.funding_amount(amount)?;
        let flow_rate = compute_flow_rate(deposit, period, duration)?;
        if flow_rate == 0 {
            return Err(ValidationError::ZeroFlowRate);
        }

        Ok(Transition::Create {
            sender: self.account.clone(),
            receiver: receiver.to_string(),
            deposit,
            flow_rate,
        })
    }

    /// Adds funds without touching the rate. If the deposit is already
    /// exhausted the ledger settles the owed amount as part of the top-up.
    pub fn top_up(
        &self,
        receiver: &str,
        amount: &str,
        current: Option<&StreamState>,
    ) -> Result<Transition, ValidationError> {
        self.check_preconditions(TransitionKind::TopUp, &self.account, receiver, current)?;
        let amount = self.funding_amount(amount)?;

        Ok(Transition::TopUp {
            sender: self.account.clone(),
            receiver: receiver.to_string(),
            amount,
        })
    }

    pub fn update_flow_rate(
        &self,
        receiver: &str,
        quote: &FlowRateQuote,
        current: Option<&StreamState>,
    ) -> Result<Transition, ValidationError> {
        self.check_preconditions(TransitionKind::UpdateFlowRate, &self.account, receiver, current)?;
        let flow_rate = quote.flow_rate().ok_or(ValidationError::UnconfirmedQuote)?;
        if flow_rate == 0 {
            return Err(ValidationError::ZeroFlowRate);
        }

        Ok(Transition::UpdateFlowRate {
            sender: self.account.clone(),
            receiver: receiver.to_string(),
            flow_rate,
        })
    }

    pub fn cancel(
        &self,
        receiver: &str,
        current: Option<&StreamState>,
    ) -> Result<Transition, ValidationError> {
        self.check_preconditions(TransitionKind::Cancel, &self.account, receiver, current)?;

        Ok(Transition::Cancel {
            sender: self.account.clone(),
            receiver: receiver.to_string(),
        })
    }

    /// Claim as the receiver. The ledger settles at execution time.
    pub fn claim(
        &self,
        sender: &str,
        current: Option<&StreamState>,
    ) -> Result<Transition, ValidationError> {
        self.check_preconditions(TransitionKind::Claim, sender, &self.account, current)?;

        Ok(Transition::Claim {
            sender: sender.to_string(),
            receiver: self.account.clone(),
        })
    }

    /// Local half of a create preview. The quote is unconfirmed until
    /// [`FlowRateQuote::confirm`] records the ledger's rate.
    pub fn quote_create(
        &self,
        amount: &str,
        period: Period,
        duration: u64,
        now: Timestamp,
        fee: FeeFraction,
    ) -> Result<FlowRateQuote, ValidationError> {
        let funding_amount = self.funding_amount(amount)?;
        let flow_rate = compute_flow_rate(funding_amount, period, duration)?;
        if flow_rate == 0 {
            return Err(ValidationError::ZeroFlowRate);
        }

        Ok(build_quote(
            funding_amount,
            period,
            duration,
            flow_rate,
            compute_deposit_zero_time(funding_amount, flow_rate, now),
            None,
            fee,
        ))
    }

    /// Local half of a rate-change preview, including what the current rate
    /// owes as of `now`.
    pub fn quote_update_flow_rate(
        &self,
        receiver: &str,
        amount: &str,
        period: Period,
        duration: u64,
        current: Option<&StreamState>,
        now: Timestamp,
        fee: FeeFraction,
    ) -> Result<FlowRateQuote, ValidationError> {
        let state = self.check_preconditions(
            TransitionKind::UpdateFlowRate,
            &self.account,
            receiver,
            current,
        )?;
        // The amount only sizes the rate; nothing is deposited, so no
        // balance check.
        let funding_amount = parse_positive(amount, &self.denom)?;
        let flow_rate = compute_flow_rate(funding_amount, period, duration)?;
        if flow_rate == 0 {
            return Err(ValidationError::ZeroFlowRate);
        }

        let pending = state.map(|s| project(s, now, fee));
        let remaining = pending.map(|p| p.remaining_deposit).unwrap_or_default();

        Ok(build_quote(
            funding_amount,
            period,
            duration,
            flow_rate,
            compute_deposit_zero_time(remaining, flow_rate, now),
            pending,
            fee,
        ))
    }

    /// Parse, require positive, and check against the known balance.
    fn funding_amount(&self, amount: &str) -> Result<Amount, ValidationError> {
        let amount = parse_positive(amount, &self.denom)?;
        if let Some(available) = self.known_balance {
            if amount > available {
                return Err(ValidationError::InsufficientBalance {
                    needed: amount,
                    available,
                });
            }
        }
        Ok(amount)
    }

    /// State-machine and role checks. Returns the current state when one
    /// exists.
    fn check_preconditions<'s>(
        &self,
        kind: TransitionKind,
        sender: &str,
        receiver: &str,
        current: Option<&'s StreamState>,
    ) -> Result<Option<&'s StreamState>, ValidationError> {
        if sender == receiver {
            return Err(ValidationError::SelfAsReceiver);
        }

        let state = match current {
            Some(state) if state.is_terminated() => return Err(ValidationError::StreamTerminated),
            Some(state) => state,
            // Only create may start from nothing.
            None if kind == TransitionKind::Create => return Ok(None),
            None => return Err(ValidationError::StreamNotInitialized),
        };

        if !state.is_pair(sender, receiver) {
            return Err(ValidationError::ForeignStream {
                sender: sender.to_string(),
                receiver: receiver.to_string(),
            });
        }

        let expected = match kind.signer_role() {
            "receiver" => &state.receiver,
            _ => &state.sender,
        };
        if *expected != self.account {
            return Err(ValidationError::WrongRole {
                account: self.account.clone(),
                role: kind.signer_role(),
            });
        }

        Ok(Some(state))
    }
}

fn parse_positive(amount: &str, denom: &Denom) -> Result<Amount, ValidationError> {
    if amount.trim().starts_with('-') {
        return Err(ValidationError::NonPositiveAmount);
    }
    match parse_amount(amount, denom)? {
        0 => Err(ValidationError::NonPositiveAmount),
        value => Ok(value),
    }
}

fn build_quote(
    funding_amount: Amount,
    period: Period,
    duration: u64,
    flow_rate: u64,
    deposit_zero_time: Option<Timestamp>,
    pending_settlement: Option<Projection>,
    fee: FeeFraction,
) -> FlowRateQuote {
    let total_seconds = period.seconds() as u128 * duration as u128;
    let streamed_total = flow_rate as u128 * total_seconds;
    let (validator_fee, net_receivable) = compute_validator_fee(streamed_total, fee);

    FlowRateQuote {
        funding_amount,
        period,
        duration,
        client_flow_rate: flow_rate,
        ledger_flow_rate: None,
        streamed_total,
        validator_fee,
        net_receivable,
        deposit_zero_time,
        pending_settlement,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SENDER: &str = "und1sc4wry4kwypu4ddj9nme70dw3ka6wyhv7sc3vx";
    const RECEIVER: &str = "und17tc3wwr8ksz5tzgl2t4wmpdmaxx0pn7vvz8j3h";
    const T: Timestamp = 1_700_000_000;

    fn builder() -> TransitionBuilder {
        TransitionBuilder::new(SENDER, Denom::default())
    }

    fn active() -> StreamState {
        StreamState {
            sender: SENDER.to_string(),
            receiver: RECEIVER.to_string(),
            flow_rate: 38_051,
            deposit: 100_000_000_000,
            deposit_zero_time: T + 2_628_051,
            last_outflow_time: T,
        }
    }

    #[test]
    fn test_create_computes_flow_rate() {
        let tx = builder()
            .create(RECEIVER, "100", Period::Month, 1, None)
            .unwrap();
        assert_eq!(
            tx,
            Transition::Create {
                sender: SENDER.to_string(),
                receiver: RECEIVER.to_string(),
                deposit: 100_000_000_000,
                flow_rate: 38_051,
            }
        );
        assert_eq!(tx.signer(), SENDER);
    }

    #[test]
    fn test_create_validation() {
        let b = builder();
        assert_eq!(
            b.create(SENDER, "100", Period::Month, 1, None),
            Err(ValidationError::SelfAsReceiver)
        );
        assert_eq!(
            b.create(RECEIVER, "0", Period::Month, 1, None),
            Err(ValidationError::NonPositiveAmount)
        );
        assert_eq!(
            b.create(RECEIVER, "-5", Period::Month, 1, None),
            Err(ValidationError::NonPositiveAmount)
        );
        assert_eq!(
            b.create(RECEIVER, "100", Period::Month, 0, None),
            Err(ValidationError::ZeroDuration)
        );
        assert_eq!(
            b.create(RECEIVER, "0.000001", Period::Year, 1, None),
            Err(ValidationError::ZeroFlowRate)
        );

        let poor = builder().with_known_balance(Some(1_000));
        assert_eq!(
            poor.create(RECEIVER, "100", Period::Month, 1, None),
            Err(ValidationError::InsufficientBalance {
                needed: 100_000_000_000,
                available: 1_000,
            })
        );
    }

    #[test]
    fn test_terminated_rejects_everything() {
        let cancelled = StreamState::terminated(SENDER, RECEIVER, T);
        let b = builder();
        let requests = vec![
            TransitionRequest::Create {
                receiver: RECEIVER.to_string(),
                amount: "1".to_string(),
                period: Period::Day,
                duration: 1,
            },
            TransitionRequest::TopUp {
                receiver: RECEIVER.to_string(),
                amount: "1".to_string(),
            },
            TransitionRequest::Cancel {
                receiver: RECEIVER.to_string(),
            },
        ];
        for request in requests {
            assert_eq!(
                b.build(&request, Some(&cancelled)),
                Err(ValidationError::StreamTerminated)
            );
        }

        let receiver = TransitionBuilder::new(RECEIVER, Denom::default());
        assert_eq!(
            receiver.claim(SENDER, Some(&cancelled)),
            Err(ValidationError::StreamTerminated)
        );
    }

    #[test]
    fn test_requires_existing_stream() {
        assert_eq!(
            builder().top_up(RECEIVER, "1", None),
            Err(ValidationError::StreamNotInitialized)
        );
        assert_eq!(
            builder().cancel(RECEIVER, None),
            Err(ValidationError::StreamNotInitialized)
        );
    }

    #[test]
    fn test_role_checks() {
        let state = active();

        // The sender cannot claim its own stream.
        let err = builder().claim(SENDER, Some(&state)).unwrap_err();
        assert_eq!(err, ValidationError::SelfAsReceiver);

        // The receiver cannot top up or cancel.
        let receiver = TransitionBuilder::new(RECEIVER, Denom::default());
        assert!(matches!(
            receiver.cancel(SENDER, Some(&state)),
            Err(ValidationError::ForeignStream { .. })
        ));

        let tx = receiver.claim(SENDER, Some(&state)).unwrap();
        assert_eq!(tx.signer(), RECEIVER);
        assert_eq!(tx.kind(), TransitionKind::Claim);
    }

    #[test]
    fn test_top_up_and_cancel() {
        let state = active();
        let tx = builder().top_up(RECEIVER, "1.5", Some(&state)).unwrap();
        assert_eq!(
            tx,
            Transition::TopUp {
                sender: SENDER.to_string(),
                receiver: RECEIVER.to_string(),
                amount: 1_500_000_000,
            }
        );

        let tx = builder().cancel(RECEIVER, Some(&state)).unwrap();
        assert_eq!(tx.kind(), TransitionKind::Cancel);
    }

    #[test]
    fn test_quote_update_includes_pending_settlement() {
        let state = active();
        let fee: FeeFraction = "0.01".parse().unwrap();
        let quote = builder()
            .quote_update_flow_rate(RECEIVER, "200", Period::Month, 1, Some(&state), T + 1_000, fee)
            .unwrap();

        assert_eq!(quote.client_flow_rate(), 76_103);
        let pending = quote.pending_settlement.unwrap();
        assert_eq!(pending.claimable, 38_051_000);
        assert_eq!(
            quote.deposit_zero_time,
            Some(T + 1_000 + ((100_000_000_000u128 - 38_051_000) / 76_103) as i64)
        );

        let tx = builder()
            .update_flow_rate(RECEIVER, &quote.confirm(76_103).unwrap(), Some(&state))
            .unwrap();
        assert_eq!(
            tx,
            Transition::UpdateFlowRate {
                sender: SENDER.to_string(),
                receiver: RECEIVER.to_string(),
                flow_rate: 76_103,
            }
        );
    }

    #[test]
    fn test_update_requires_confirmed_quote() {
        let state = active();
        let quote = builder()
            .quote_update_flow_rate(
                RECEIVER,
                "200",
                Period::Month,
                1,
                Some(&state),
                T + 1_000,
                FeeFraction::ZERO,
            )
            .unwrap();
        assert!(!quote.is_confirmed());
        assert_eq!(quote.flow_rate(), None);

        assert_eq!(
            builder().update_flow_rate(RECEIVER, &quote, Some(&state)),
            Err(ValidationError::UnconfirmedQuote)
        );

        let request = TransitionRequest::UpdateFlowRate {
            receiver: RECEIVER.to_string(),
            quote,
        };
        assert_eq!(
            builder().build(&request, Some(&state)),
            Err(ValidationError::UnconfirmedQuote)
        );
    }

    #[test]
    fn test_quote_confirm_detects_drift() {
        let quote = builder()
            .quote_create("100", Period::Month, 1, T, FeeFraction::ZERO)
            .unwrap();
        assert_eq!(quote.streamed_total, 38_051 * 2_628_000);
        assert_eq!(quote.deposit_zero_time, Some(T + 2_628_051));
        assert_eq!(quote.ledger_flow_rate(), None);

        let confirmed = quote.clone().confirm(38_051).unwrap();
        assert!(confirmed.is_confirmed());
        assert_eq!(confirmed.flow_rate(), Some(38_051));

        assert_eq!(
            quote.confirm(38_052),
            Err(ReconciliationError::FlowRateDrift {
                local: 38_051,
                ledger: 38_052,
            })
        );
    }

    #[test]
    fn test_message_shape() {
        let tx = builder()
            .create(RECEIVER, "100", Period::Month, 1, None)
            .unwrap();
        let msg = tx.to_message(&Denom::default());
        assert_eq!(msg["@type"], "/mainchain.stream.v1.MsgCreateStream");
        assert_eq!(msg["deposit"]["amount"], "100000000000");
        assert_eq!(msg["deposit"]["denom"], "nund");
        assert_eq!(msg["flow_rate"], "38051");
    }
}
