//! Property tests for the cause algebra.
//!
//! # Laws Tested
//!
//! - `Empty` is the identity of `sequential` and `both`
//! - extractors are consistent with the leaf population
//! - `map` rewrites exactly the `Fail` leaves and preserves shape
//! - `squash` follows the failure > defect > interrupt precedence

mod common;

use fiberio::types::{ExitError, FiberId};
use fiberio::{Cause, Defect};
use proptest::prelude::*;

fn arb_cause() -> impl Strategy<Value = Cause<u8>> {
    let leaf = prop_oneof![
        Just(Cause::Empty),
        any::<u8>().prop_map(Cause::fail),
        "[a-z]{1,8}".prop_map(|message| Cause::die(Defect::new(message))),
        (1u64..100).prop_map(|seq| Cause::interrupt(FiberId::new_for_test(seq, 0))),
    ];
    // Composites go through the smoothing constructors, as they do in the
    // interpreter, so empty sides are elided rather than embedded.
    leaf.prop_recursive(4, 32, 2, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone())
                .prop_map(|(left, right)| Cause::sequential(left, right)),
            (inner.clone(), inner).prop_map(|(left, right)| Cause::both(left, right)),
        ]
    })
}

proptest! {
    #[test]
    fn empty_is_the_identity_of_sequential(cause in arb_cause()) {
        prop_assert_eq!(Cause::sequential(Cause::Empty, cause.clone()), cause.clone());
        prop_assert_eq!(Cause::sequential(cause.clone(), Cause::Empty), cause);
    }

    #[test]
    fn empty_is_the_identity_of_both(cause in arb_cause()) {
        prop_assert_eq!(Cause::both(Cause::Empty, cause.clone()), cause.clone());
        prop_assert_eq!(Cause::both(cause.clone(), Cause::Empty), cause);
    }

    #[test]
    fn predicates_agree_with_extractors(cause in arb_cause()) {
        prop_assert_eq!(cause.is_failure(), !cause.failures().is_empty());
        prop_assert_eq!(cause.is_die(), !cause.defects().is_empty());
        prop_assert_eq!(cause.is_interrupted(), !cause.interruptors().is_empty());
        prop_assert_eq!(
            cause.is_empty(),
            cause.failures().is_empty()
                && cause.defects().is_empty()
                && cause.interruptors().is_empty()
        );
    }

    #[test]
    fn map_rewrites_exactly_the_fail_leaves(cause in arb_cause()) {
        let expected: Vec<u16> = cause
            .failures()
            .into_iter()
            .map(|error| u16::from(*error) + 1)
            .collect();
        let expected_defects = cause.defects().len();
        let expected_interruptors = cause.interruptors();

        let mapped = cause.map(|error| u16::from(error) + 1);
        let failures: Vec<u16> = mapped.failures().into_iter().copied().collect();
        prop_assert_eq!(failures, expected);
        prop_assert_eq!(mapped.defects().len(), expected_defects);
        prop_assert_eq!(mapped.interruptors(), expected_interruptors);
    }

    #[test]
    fn sequential_composition_concatenates_failures(
        left in arb_cause(),
        right in arb_cause(),
    ) {
        let mut expected: Vec<u8> = left.failures().into_iter().copied().collect();
        expected.extend(right.failures().into_iter().copied());

        let combined = Cause::sequential(left, right);
        let failures: Vec<u8> = combined.failures().into_iter().copied().collect();
        prop_assert_eq!(failures, expected);
    }

    #[test]
    fn squash_follows_the_precedence_order(cause in arb_cause()) {
        let squashed = cause.squash();
        if let Some(first) = cause.failures().first() {
            prop_assert_eq!(squashed, Some(ExitError::Failed(**first)));
        } else if let Some(first) = cause.defects().first() {
            prop_assert_eq!(squashed, Some(ExitError::Died((*first).clone())));
        } else if let Some(first) = cause.interruptors().first() {
            prop_assert_eq!(squashed, Some(ExitError::Interrupted(*first)));
        } else {
            prop_assert_eq!(squashed, None);
        }
    }
}
