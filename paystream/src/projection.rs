//! Flow projection
//!
//! [`project`] derives what a stream owes right now from its last
//! reconciled state. It is pure: no clock, no I/O, no hidden state, so it can
//! be called at any cadence and always gives the same answer for the same
//! inputs. [`ProjectionTicker`] is the display-refresh loop around it.

use serde::{Deserialize, Serialize};
use std::{
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::debug;

use crate::{
    flow_rate::{compute_validator_fee, FeeFraction},
    state::{Amount, StreamState, Timestamp},
};

/// Derived, display-only view of a stream at one instant.
///
/// Advisory: only reconciled ledger values are settlement truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Projection {
    /// Instant this projection was computed for
    pub at: Timestamp,
    /// Accrued and unsettled, capped by the deposit
    pub claimable: Amount,
    /// Validator share of `claimable`
    pub validator_fee: Amount,
    /// Receiver share of `claimable`
    pub net_receivable: Amount,
    /// Deposit left after `claimable` is settled
    pub remaining_deposit: Amount,
    /// The projected zero time has passed with an unsettled amount, so the
    /// next mutating transition will settle first
    pub deposit_exhausted_since_last_check: bool,
}

/// Project `state` at `now`.
pub fn project(state: &StreamState, now: Timestamp, fee: FeeFraction) -> Projection {
    let elapsed = now.saturating_sub(state.last_outflow_time).max(0) as u128;
    let raw_claimable = (state.flow_rate as u128).saturating_mul(elapsed);
    let claimable = raw_claimable.min(state.deposit);
    let remaining_deposit = state.deposit - claimable;
    let (validator_fee, net_receivable) = compute_validator_fee(claimable, fee);

    Projection {
        at: now,
        claimable,
        validator_fee,
        net_receivable,
        remaining_deposit,
        deposit_exhausted_since_last_check: now > state.deposit_zero_time && claimable > 0,
    }
}

/// Source of "now" for code that is not handed a timestamp.
pub trait Clock: Send + Sync {
    /// Current Unix time in seconds.
    fn now(&self) -> Timestamp;
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> Timestamp {
        (**self).now()
    }
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        chrono::Utc::now().timestamp()
    }
}

/// Clock that only moves when told to. Useful for tests and replays.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    /// Start at `now`.
    pub fn new(now: Timestamp) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(now)),
        }
    }

    /// Jump to `now`.
    pub fn set(&self, now: Timestamp) {
        self.now.store(now, Ordering::SeqCst);
    }

    /// Move forward by `seconds`.
    pub fn advance(&self, seconds: i64) {
        self.now.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}

/// Periodically re-projects the latest stream snapshot for display.
///
/// Reads whole snapshots from the lifecycle's watch channel, so it never
/// sees a half-applied reconciliation. Dropping the ticker stops the task.
pub struct ProjectionTicker {
    handle: JoinHandle<()>,
    projections: watch::Receiver<Option<Projection>>,
}

impl ProjectionTicker {
    /// Spawn the refresh task on the current tokio runtime.
    pub fn spawn<C>(
        mut states: watch::Receiver<Option<Arc<StreamState>>>,
        fee: FeeFraction,
        every: Duration,
        clock: C,
    ) -> Self
    where
        C: Clock + 'static,
    {
        let (tx, projections) = watch::channel(None);

        let handle = tokio::spawn(async move {
            let mut ticks = interval(every);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticks.tick() => {}
                    changed = states.changed() => {
                        if changed.is_err() {
                            debug!("stream state channel closed, stopping projection ticker");
                            break;
                        }
                    }
                }

                let snapshot = states.borrow_and_update().clone();
                let projection = snapshot.map(|state| project(&state, clock.now(), fee));
                tx.send_replace(projection);
            }
        });

        Self {
            handle,
            projections,
        }
    }

    /// Latest projection, `None` while no stream exists.
    pub fn latest(&self) -> Option<Projection> {
        *self.projections.borrow()
    }

    /// Receiver for projection updates.
    pub fn subscribe(&self) -> watch::Receiver<Option<Projection>> {
        self.projections.clone()
    }
}

impl Drop for ProjectionTicker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
