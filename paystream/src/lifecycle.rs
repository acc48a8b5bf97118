//! Stream lifecycle
//!
//! [`StreamLifecycle`] owns the local view of one sender → receiver stream
//! and is the only thing that changes it. Every transition goes
//! builder → executor → reconciler; the state only moves on a successful,
//! reconciled outcome, and it moves by publishing a whole new snapshot.
//!
//! The lifecycle does not serialize callers. Run one transition at a time
//! per stream, and after an [`TxOutcome::Unreachable`] call
//! [`StreamLifecycle::refresh`] before deciding to resubmit.

use std::{sync::Arc, time::Duration};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::{
    amount::Denom,
    config::ClientConfig,
    error::{StreamError, StreamResult, ValidationError},
    executor::{TransactionExecutor, TxOutcome},
    history::StreamTx,
    ledger::{LedgerQuery, LedgerSubmit, Signer, StreamParams},
    period::Period,
    projection::{project, Clock, Projection, ProjectionTicker, SystemClock},
    reconcile::EventReconciler,
    state::{Amount, StreamState, StreamStatus, Timestamp},
    transition::{FlowRateQuote, TransitionBuilder, TransitionKind, TransitionRequest},
};

/// Local state machine for one stream, driven by one signer.
pub struct StreamLifecycle<L, S> {
    ledger: Arc<L>,
    executor: TransactionExecutor<L, S>,
    builder: TransitionBuilder,
    reconciler: EventReconciler,
    sender: String,
    receiver: String,
    params: StreamParams,
    deadline: Duration,
    clock: Arc<dyn Clock>,
    state: watch::Sender<Option<Arc<StreamState>>>,
}

impl<L, S> StreamLifecycle<L, S>
where
    L: LedgerQuery + LedgerSubmit + 'static,
    S: Signer + 'static,
{
    /// Lifecycle for a stream not known to exist yet.
    pub fn new(
        ledger: Arc<L>,
        signer: Arc<S>,
        sender: impl Into<String>,
        receiver: impl Into<String>,
        config: &ClientConfig,
    ) -> Self {
        let account = signer.address().to_string();
        let executor = TransactionExecutor::new(ledger.clone(), signer, config.denom.clone())
            .with_fallback_fee(config.fallback_fee_hint());
        let (state, _) = watch::channel(None);

        Self {
            ledger,
            executor,
            builder: TransitionBuilder::new(account, config.denom.clone()),
            reconciler: EventReconciler::new(config.denom.clone()),
            sender: sender.into(),
            receiver: receiver.into(),
            params: StreamParams::default(),
            deadline: config.submit_deadline(),
            clock: Arc::new(SystemClock),
            state,
        }
    }

    /// Lifecycle for an existing stream, loaded from the ledger along with
    /// the module parameters.
    pub async fn attach(
        ledger: Arc<L>,
        signer: Arc<S>,
        sender: impl Into<String>,
        receiver: impl Into<String>,
        config: &ClientConfig,
    ) -> StreamResult<Self> {
        let mut lifecycle = Self::new(ledger, signer, sender, receiver, config);
        lifecycle.refresh_params().await?;
        lifecycle.refresh().await?;
        Ok(lifecycle)
    }

    /// Use `clock` for previews and projection ticks.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Default deadline for submissions.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn receiver(&self) -> &str {
        &self.receiver
    }

    pub fn denom(&self) -> &Denom {
        self.builder.denom()
    }

    pub fn params(&self) -> StreamParams {
        self.params
    }

    /// Last reconciled state, `None` while uninitialized.
    pub fn current_state(&self) -> Option<Arc<StreamState>> {
        self.state.borrow().clone()
    }

    pub fn status(&self) -> StreamStatus {
        StreamStatus::of(self.current_state().as_deref())
    }

    /// Advisory view of the stream at `now`.
    pub fn current_projection(&self, now: Timestamp) -> Option<Projection> {
        self.current_state()
            .map(|state| project(&state, now, self.params.validator_fee))
    }

    /// Receiver of state snapshots.
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<StreamState>>> {
        self.state.subscribe()
    }

    /// Start a display refresh loop over this stream's snapshots.
    pub fn projection_ticker(&self, every: Duration) -> ProjectionTicker {
        ProjectionTicker::spawn(
            self.subscribe(),
            self.params.validator_fee,
            every,
            self.clock.clone(),
        )
    }

    /// Advisory balance checked before funding transitions.
    pub fn set_known_balance(&mut self, balance: Option<Amount>) {
        self.builder = self.builder.clone().with_known_balance(balance);
    }

    /// Load the signer's balance from the ledger.
    pub async fn refresh_balance(&mut self) -> StreamResult<Amount> {
        let balance = self
            .ledger
            .query_balance(self.builder.account(), &self.builder.denom().base)
            .await?;
        self.set_known_balance(Some(balance));
        Ok(balance)
    }

    /// Load module parameters (validator fee) from the ledger.
    pub async fn refresh_params(&mut self) -> StreamResult<StreamParams> {
        self.params = self.ledger.query_params().await?;
        Ok(self.params)
    }

    /// Replace local state with what the ledger has now.
    pub async fn refresh(&self) -> StreamResult<Option<Arc<StreamState>>> {
        let queried = self
            .ledger
            .query_stream(&self.sender, &self.receiver)
            .await?
            .map(Arc::new);

        if let Some(state) = &queried {
            if !state.is_pair(&self.sender, &self.receiver) {
                return Err(ValidationError::ForeignStream {
                    sender: state.sender.clone(),
                    receiver: state.receiver.clone(),
                }
                .into());
            }
        }

        info!(
            sender = %self.sender,
            receiver = %self.receiver,
            found = queried.is_some(),
            "refreshed stream from ledger"
        );
        self.state.send_replace(queried.clone());
        Ok(queried)
    }

    /// Every transaction that touched this stream, oldest first.
    pub async fn history(&self) -> StreamResult<Vec<StreamTx>> {
        let history = self
            .ledger
            .query_stream_history(&self.sender, &self.receiver)
            .await?;
        info!(
            sender = %self.sender,
            receiver = %self.receiver,
            txs = history.len(),
            "loaded stream history"
        );
        Ok(history)
    }

    /// Validate, submit and reconcile one transition.
    ///
    /// Validation and reconciliation failures are `Err`. Ledger rejections
    /// and unreachable outcomes are returned as data and leave the state
    /// untouched. A reconciliation failure carries the applied transaction's
    /// hash in [`StreamError::Unreconciled`].
    pub async fn request_transition(&self, request: TransitionRequest) -> StreamResult<TxOutcome> {
        self.request_transition_with_deadline(request, self.deadline)
            .await
    }

    pub async fn request_transition_with_deadline(
        &self,
        request: TransitionRequest,
        deadline: Duration,
    ) -> StreamResult<TxOutcome> {
        let prior = self.current_state();
        let transition = self.builder.build(&request, prior.as_deref())?;
        if transition.sender() != self.sender || transition.receiver() != self.receiver {
            return Err(ValidationError::ForeignStream {
                sender: transition.sender().to_string(),
                receiver: transition.receiver().to_string(),
            }
            .into());
        }

        let kind = transition.kind();
        if kind == TransitionKind::TopUp {
            let exhausted = self
                .current_projection(self.clock.now())
                .map(|p| p.deposit_exhausted_since_last_check)
                .unwrap_or(false);
            if exhausted {
                info!(
                    sender = %self.sender,
                    receiver = %self.receiver,
                    "deposit exhausted, the ledger settles the owed amount with this top-up"
                );
            }
        }

        let outcome = self.executor.submit(transition.clone(), deadline).await;

        match &outcome {
            TxOutcome::Success {
                events,
                tx_reference,
            } => {
                let next = self
                    .reconciler
                    .reconcile(&transition, prior.as_deref(), events, tx_reference.block_time)
                    .map_err(|source| {
                        error!(
                            %kind,
                            tx_hash = %tx_reference.hash,
                            height = tx_reference.height,
                            "applied transition not reconciled, refresh before resubmitting: {}",
                            source
                        );
                        StreamError::Unreconciled {
                            tx_hash: tx_reference.hash.clone(),
                            source,
                        }
                    })?;
                info!(
                    %kind,
                    tx_hash = %tx_reference.hash,
                    flow_rate = next.flow_rate,
                    deposit = %next.deposit,
                    "stream state reconciled"
                );
                self.state.send_replace(Some(Arc::new(next)));
            }
            TxOutcome::Rejected(rejection) => {
                warn!(%kind, code = rejection.code, "transition rejected: {}", rejection);
            }
            TxOutcome::Unreachable(cause) => {
                warn!(
                    %kind,
                    "transition outcome unknown ({}), refresh before resubmitting",
                    cause
                );
            }
        }

        Ok(outcome)
    }

    /// Create the stream, funding it with `amount` display units streamed
    /// over `duration` periods.
    pub async fn create(
        &self,
        amount: &str,
        period: Period,
        duration: u64,
    ) -> StreamResult<TxOutcome> {
        self.request_transition(TransitionRequest::Create {
            receiver: self.receiver.clone(),
            amount: amount.to_string(),
            period,
            duration,
        })
        .await
    }

    pub async fn top_up(&self, amount: &str) -> StreamResult<TxOutcome> {
        self.request_transition(TransitionRequest::TopUp {
            receiver: self.receiver.clone(),
            amount: amount.to_string(),
        })
        .await
    }

    /// Submit a rate the user confirmed from
    /// [`preview_update_flow_rate`](Self::preview_update_flow_rate).
    pub async fn update_flow_rate(&self, quote: FlowRateQuote) -> StreamResult<TxOutcome> {
        self.request_transition(TransitionRequest::UpdateFlowRate {
            receiver: self.receiver.clone(),
            quote,
        })
        .await
    }

    pub async fn cancel(&self) -> StreamResult<TxOutcome> {
        self.request_transition(TransitionRequest::Cancel {
            receiver: self.receiver.clone(),
        })
        .await
    }

    pub async fn claim(&self) -> StreamResult<TxOutcome> {
        self.request_transition(TransitionRequest::Claim {
            sender: self.sender.clone(),
        })
        .await
    }

    /// Rate and fee preview for a create, confirmed against the ledger.
    pub async fn preview_create(
        &self,
        amount: &str,
        period: Period,
        duration: u64,
    ) -> StreamResult<FlowRateQuote> {
        let quote = self.builder.quote_create(
            amount,
            period,
            duration,
            self.clock.now(),
            self.params.validator_fee,
        )?;
        self.confirm_quote(quote).await
    }

    /// Rate preview for a rate change, with what the current rate owes and
    /// will settle first.
    pub async fn preview_update_flow_rate(
        &self,
        amount: &str,
        period: Period,
        duration: u64,
    ) -> StreamResult<FlowRateQuote> {
        let current = self.current_state();
        let quote = self.builder.quote_update_flow_rate(
            &self.receiver,
            amount,
            period,
            duration,
            current.as_deref(),
            self.clock.now(),
            self.params.validator_fee,
        )?;
        self.confirm_quote(quote).await
    }

    async fn confirm_quote(&self, quote: FlowRateQuote) -> StreamResult<FlowRateQuote> {
        let coin = self.builder.denom().coin(quote.funding_amount);
        let period = quote.period;
        let ledger_rate = self
            .ledger
            .query_calculate_flow_rate(&coin, period, quote.duration)
            .await?;

        quote.confirm(ledger_rate).map_err(|e| {
            error!(%coin, %period, "flow rate preview disagrees with the ledger: {}", e);
            StreamError::from(e)
        })
    }
}
