//! Property-based tests for stream math.
//!
//! These hold for every input, not just the worked examples: flow rates never
//! over-promise, fee splits never leak a unit, and projections are capped,
//! monotonic, and repeatable.

use paystream::{
    flow_rate::{compute_deposit_zero_time, compute_flow_rate, compute_validator_fee},
    project, Amount, FeeFraction, Period, StreamState, Timestamp,
};
use proptest::prelude::*;

const T0: Timestamp = 1_700_000_000;

fn any_period() -> impl Strategy<Value = Period> {
    prop::sample::select(Period::ALL.to_vec())
}

fn any_fee() -> impl Strategy<Value = FeeFraction> {
    (1u128..=1_000_000_000_000_000_000u128)
        .prop_flat_map(|den| (0..=den, Just(den)))
        .prop_map(|(num, den)| FeeFraction::from_ratio(num, den).unwrap())
}

fn any_stream() -> impl Strategy<Value = StreamState> {
    (
        any::<u64>(),
        any::<u128>(),
        -1_000_000i64..1_000_000i64,
    )
        .prop_map(|(flow_rate, deposit, offset)| StreamState {
            sender: "und1sender".to_string(),
            receiver: "und1receiver".to_string(),
            flow_rate,
            deposit,
            deposit_zero_time: compute_deposit_zero_time(deposit, flow_rate, T0 + offset)
                .unwrap_or(i64::MAX),
            last_outflow_time: T0 + offset,
        })
}

// ============================================================================
// Flow Rate Properties
// ============================================================================

proptest! {
    /// Property: the rate never streams more than was funded.
    #[test]
    fn prop_flow_rate_never_over_promises(
        amount in 0u128..=u64::MAX as u128,
        period in any_period(),
        duration in 1u64..10_000,
    ) {
        let rate = compute_flow_rate(amount, period, duration).unwrap();
        let streamed = rate as u128 * period.seconds() as u128 * duration as u128;

        prop_assert!(streamed <= amount);
        // and it is the largest such rate
        prop_assert!((rate as u128 + 1) * period.seconds() as u128 * duration as u128 > amount);
    }

    /// Property: a zero duration is always a validation error.
    #[test]
    fn prop_zero_duration_rejected(amount in any::<u128>(), period in any_period()) {
        prop_assert!(compute_flow_rate(amount, period, 0).is_err());
    }
}

// ============================================================================
// Fee Split Properties
// ============================================================================

proptest! {
    /// Property: fee plus net is exactly the claim.
    #[test]
    fn prop_fee_split_is_exact(claim in any::<u128>(), fee in any_fee()) {
        let (validator_fee, net) = compute_validator_fee(claim, fee);
        prop_assert_eq!(validator_fee + net, claim);
        prop_assert!(validator_fee <= claim);
    }

    /// Property: decimal fee strings parse to the fraction they print as.
    #[test]
    fn prop_fee_fraction_display_parses_back(fee in any_fee()) {
        let parsed: FeeFraction = fee.to_string().parse().unwrap();
        // Display truncates to 18 places, so only the split is compared.
        let claim: Amount = 1_000_000_000_000_000_000;
        prop_assert_eq!(
            compute_validator_fee(claim, parsed).0,
            compute_validator_fee(claim, fee).0
        );
    }
}

// ============================================================================
// Projection Properties
// ============================================================================

proptest! {
    /// Property: claimable never exceeds the deposit, and the remainder
    /// accounts for the rest.
    #[test]
    fn prop_claimable_capped_by_deposit(
        state in any_stream(),
        now in (T0 - 2_000_000)..(T0 + 100_000_000),
        fee in any_fee(),
    ) {
        let p = project(&state, now, fee);
        prop_assert!(p.claimable <= state.deposit);
        prop_assert_eq!(p.claimable + p.remaining_deposit, state.deposit);
        prop_assert_eq!(p.validator_fee + p.net_receivable, p.claimable);
    }

    /// Property: claimable is non-decreasing in time.
    #[test]
    fn prop_claimable_monotonic(
        state in any_stream(),
        now in (T0 - 2_000_000)..(T0 + 100_000_000),
        step in 0i64..10_000_000,
    ) {
        let earlier = project(&state, now, FeeFraction::ZERO);
        let later = project(&state, now + step, FeeFraction::ZERO);
        prop_assert!(later.claimable >= earlier.claimable);
    }

    /// Property: projecting twice gives the same answer.
    #[test]
    fn prop_projection_is_repeatable(
        state in any_stream(),
        now in any::<i64>(),
        fee in any_fee(),
    ) {
        prop_assert_eq!(project(&state, now, fee), project(&state, now, fee));
    }
}
