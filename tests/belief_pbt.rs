//! Property-based tests for belief classification.
//!
//! - Totality: every positive (alpha, beta) classifies without error
//! - Bounds: mean in [0, 1], confidence in [0, 1)
//! - Thresholds: status agrees with the documented rule

use proptest::prelude::*;

use danci_mastery_core::services::belief_state::{
    classify, BeliefState, BeliefStatus, CONFIDENCE_THRESHOLD, GAP_THRESHOLD, MASTERED_THRESHOLD,
};

fn arb_param() -> impl Strategy<Value = f64> {
    prop_oneof![
        (1u64..=100_000u64).prop_map(|v| v as f64 / 1000.0),
        (1u64..=10_000u64).prop_map(|v| v as f64),
        1e-300f64..1.0,
        1.0f64..1e300,
    ]
}

proptest! {
    #[test]
    fn prop_classification_is_total_and_bounded(alpha in arb_param(), beta in arb_param()) {
        let c = classify(alpha, beta).unwrap();
        prop_assert!((0.0..=1.0).contains(&c.mean));
        prop_assert!(c.confidence >= 0.0 && c.confidence < 1.0);
    }

    #[test]
    fn prop_status_matches_thresholds(alpha in arb_param(), beta in arb_param()) {
        let c = classify(alpha, beta).unwrap();
        let expected = if c.confidence < CONFIDENCE_THRESHOLD {
            BeliefStatus::Uncertain
        } else if c.mean >= MASTERED_THRESHOLD {
            BeliefStatus::Mastered
        } else if c.mean < GAP_THRESHOLD {
            BeliefStatus::Gap
        } else {
            BeliefStatus::Borderline
        };
        prop_assert_eq!(c.status, expected);
        prop_assert_eq!(classify(alpha, beta).unwrap().status, c.status);
    }

    #[test]
    fn prop_non_positive_parameters_fail(alpha in -1000.0f64..=0.0, beta in arb_param()) {
        prop_assert!(classify(alpha, beta).is_err());
        prop_assert!(classify(beta, alpha).is_err());
    }

    #[test]
    fn prop_overflowing_sum_fails(alpha in 1e308f64..=f64::MAX, beta in 1e308f64..=f64::MAX) {
        prop_assert!(classify(alpha, beta).is_err());
    }

    #[test]
    fn prop_correct_responses_never_lower_the_mean(
        alpha in arb_param(),
        beta in arb_param(),
        steps in 1usize..20,
    ) {
        let mut belief = BeliefState::new("u", "c", alpha, beta).unwrap();
        let mut previous = belief.mean();
        for _ in 0..steps {
            belief.apply_response(true, 1.0).unwrap();
            prop_assert!(belief.mean() >= previous - 1e-12);
            previous = belief.mean();
        }
        prop_assert_eq!(belief.response_count, steps as i64);
    }
}

#[test]
fn test_documented_boundaries() {
    assert_eq!(classify(1.0, 1.0).unwrap().status, BeliefStatus::Uncertain);
    assert_eq!(classify(16.0, 4.0).unwrap().status, BeliefStatus::Mastered);
    assert_eq!(classify(10.0, 10.0).unwrap().status, BeliefStatus::Borderline);
    assert_eq!(classify(2.0, 20.0).unwrap().status, BeliefStatus::Gap);
}
