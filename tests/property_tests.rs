//! Property-based tests for abtest-core
//!
//! Following the property-testing pattern used across the stack:
//! - Test mathematical invariants
//! - Test data integrity properties
//! - Run with ProptestConfig::with_cases(100)
//! - Must complete in <30 seconds for pre-commit hook

use abtest_core::experiment::stats::{self, Sample};
use abtest_core::experiment::{
    assignment_seed, select_variant, ExperimentDefinition, ExperimentManager, Variant,
};
use abtest_core::kv::MemoryKvStore;
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

// ============================================================================
// Property Test Generators (Strategies)
// ============================================================================

/// Generate 2..=5 variants with positive weights; the first is control
fn arb_variants() -> impl Strategy<Value = Vec<Variant>> {
    proptest::collection::vec(0.1f64..100.0, 2..=5).prop_map(|weights| {
        weights
            .into_iter()
            .enumerate()
            .map(|(i, w)| {
                let builder = Variant::builder(format!("v{i}"), format!("V{i}"), w);
                if i == 0 {
                    builder.control().build()
                } else {
                    builder.build()
                }
            })
            .collect()
    })
}

/// Generate a sample with conversions bounded by participants
fn arb_sample() -> impl Strategy<Value = Sample> {
    (1u64..10_000).prop_flat_map(|n| {
        #[allow(clippy::cast_precision_loss)]
        let max = n as f64;
        (0.0..=max).prop_map(move |c| Sample::new(c.floor(), n))
    })
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // ========================================================================
    // Allocation Properties
    // ========================================================================

    /// Property: the selected variant is always one of the inputs
    #[test]
    fn prop_select_variant_returns_member(variants in arb_variants(), seed in any::<u64>()) {
        let mut rng = StdRng::seed_from_u64(seed);
        let picked = select_variant(&variants, &mut rng).unwrap();
        prop_assert!(variants.iter().any(|v| v.id() == picked.id()));
    }

    /// Property: scaling every weight leaves the draw unchanged
    #[test]
    fn prop_weights_are_relative(variants in arb_variants(), seed in any::<u64>(), factor in 0.5f64..20.0) {
        let scaled: Vec<Variant> = variants
            .iter()
            .map(|v| Variant::new(v.id(), v.name(), v.weight() * factor))
            .collect();

        let mut a = StdRng::seed_from_u64(seed);
        let mut b = StdRng::seed_from_u64(seed);
        let original = select_variant(&variants, &mut a).unwrap().id().to_string();
        let rescaled = select_variant(&scaled, &mut b).unwrap().id().to_string();
        // Rounding can only move a draw sitting exactly on a boundary
        if original != rescaled {
            let idx = |id: &str| variants.iter().position(|v| v.id() == id).unwrap();
            prop_assert_eq!(idx(&original).abs_diff(idx(&rescaled)), 1);
        }
    }

    /// Property: seeds only depend on their inputs
    #[test]
    fn prop_assignment_seed_deterministic(exp in "[a-z]{1,12}", user in "[a-z0-9-]{1,24}", salt in any::<u64>()) {
        prop_assert_eq!(assignment_seed(&exp, &user, salt), assignment_seed(&exp, &user, salt));
    }

    /// Property: repeated assignment returns the first variant
    #[test]
    fn prop_assignment_is_sticky(variants in arb_variants(), users in proptest::collection::vec("[a-z0-9]{1,16}", 1..20)) {
        runtime().block_on(async {
            let manager = ExperimentManager::new(MemoryKvStore::new());
            let mut builder = ExperimentDefinition::builder("prop", "Prop");
            for variant in variants {
                builder = builder.variant(variant);
            }
            manager.create_experiment(builder.build()).await.unwrap();

            for user in &users {
                let first = manager.assign("prop", user).await.unwrap();
                prop_assert!(first.is_some());
                prop_assert_eq!(manager.assign("prop", user).await.unwrap(), first);
            }
            Ok(())
        })?;
    }

    // ========================================================================
    // Statistics Properties
    // ========================================================================

    /// Property: p-value is a probability and significance a percentage
    #[test]
    fn prop_significance_bounds(control in arb_sample(), candidate in arb_sample()) {
        let test = stats::evaluate(control, candidate);
        prop_assert!((0.0..=1.0).contains(&test.p_value));
        prop_assert!((0.0..=100.0).contains(&test.significance_percent));
        prop_assert!(test.z_score.is_finite());
    }

    /// Property: swapping the arms flips z and keeps significance
    #[test]
    fn prop_significance_is_symmetric(a in arb_sample(), b in arb_sample()) {
        let forward = stats::evaluate(a, b);
        let backward = stats::evaluate(b, a);
        prop_assert!((forward.z_score + backward.z_score).abs() < 1e-9);
        prop_assert!((forward.significance_percent - backward.significance_percent).abs() < 1e-9);
    }

    /// Property: p-value never increases as |z| grows
    #[test]
    fn prop_p_value_monotonic(z1 in 0.0f64..8.0, z2 in 0.0f64..8.0) {
        let (lo, hi) = if z1 <= z2 { (z1, z2) } else { (z2, z1) };
        prop_assert!(stats::p_value(hi) <= stats::p_value(lo));
        prop_assert!((stats::p_value(-lo) - stats::p_value(lo)).abs() < f64::EPSILON);
    }

    /// Property: the confidence interval contains the rate
    #[test]
    fn prop_confidence_interval_contains_rate(sample in arb_sample(), level in 50.0f64..99.9) {
        let (lower, upper) = stats::confidence_interval(sample, level);
        let rate = sample.rate();
        prop_assert!(lower <= rate + 1e-12);
        prop_assert!(rate <= upper + 1e-12);
        prop_assert!(lower >= 0.0);
    }
}

// ============================================================================
// Distribution
// ============================================================================

/// Chi-square goodness of fit of assignment counts against the weights.
#[test]
#[allow(clippy::cast_precision_loss)]
fn test_allocation_chi_square() {
    let weights = [1.0, 2.0, 3.0, 4.0];
    let variants: Vec<Variant> = weights
        .iter()
        .enumerate()
        .map(|(i, w)| Variant::new(format!("v{i}"), format!("V{i}"), *w))
        .collect();
    let trials = 50_000usize;
    let mut counts = [0usize; 4];
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..trials {
        let picked = select_variant(&variants, &mut rng).unwrap();
        let idx = variants.iter().position(|v| v.id() == picked.id()).unwrap();
        counts[idx] += 1;
    }

    let total_weight: f64 = weights.iter().sum();
    let chi_square: f64 = weights
        .iter()
        .zip(counts)
        .map(|(w, observed)| {
            let expected = trials as f64 * w / total_weight;
            (observed as f64 - expected).powi(2) / expected
        })
        .sum();

    // 3 degrees of freedom, p = 0.001
    assert!(chi_square < 16.27, "chi-square = {chi_square}, counts = {counts:?}");
}
