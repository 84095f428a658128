//! Experiment Manager Tests
//!
//! End-to-end behaviour through the public API: definitions, sticky
//! assignment, conversions, significance and export.

use abtest_core::experiment::{
    ConfigValue, ExperimentDefinition, ExperimentManager, ExperimentStatus, RandomSource,
    SegmentCondition, SegmentOperator, UserAttributes, UserSegment, Variant,
};
use abtest_core::kv::MemoryKvStore;
use abtest_core::Error;
use std::collections::HashMap;

fn two_arm(id: &str, minimum_sample_size: u64) -> ExperimentDefinition {
    ExperimentDefinition::builder(id, "Two arms")
        .minimum_sample_size(minimum_sample_size)
        .variant(
            Variant::builder("control", "Control", 50.0)
                .control()
                .setting("layout", "original")
                .build(),
        )
        .variant(
            Variant::builder("optimized", "Optimized", 50.0)
                .setting("layout", "optimized")
                .build(),
        )
        .build()
}

fn manager() -> ExperimentManager<MemoryKvStore> {
    ExperimentManager::builder(MemoryKvStore::new())
        .random_source(RandomSource::seeded(42))
        .build()
}

// =============================================================================
// Definitions
// =============================================================================

#[tokio::test]
async fn test_invalid_definitions_are_rejected() {
    let manager = manager();

    let single = ExperimentDefinition::builder("one", "One arm")
        .variant(Variant::builder("control", "Control", 1.0).control().build())
        .build();
    let no_control = ExperimentDefinition::builder("nc", "No control")
        .variant(Variant::new("a", "A", 1.0))
        .variant(Variant::new("b", "B", 1.0))
        .build();
    let two_controls = ExperimentDefinition::builder("tc", "Two controls")
        .variant(Variant::builder("a", "A", 1.0).control().build())
        .variant(Variant::builder("b", "B", 1.0).control().build())
        .build();
    let zero_weight = ExperimentDefinition::builder("zw", "Zero weight")
        .variant(Variant::builder("a", "A", 1.0).control().build())
        .variant(Variant::new("b", "B", 0.0))
        .build();
    let duplicate_ids = ExperimentDefinition::builder("dup", "Duplicate ids")
        .variant(Variant::builder("a", "A", 1.0).control().build())
        .variant(Variant::new("a", "Again", 1.0))
        .build();

    for definition in [single, no_control, two_controls, zero_weight, duplicate_ids] {
        let id = definition.id().to_string();
        assert!(
            matches!(
                manager.create_experiment(definition).await,
                Err(Error::InvalidConfiguration(_))
            ),
            "{id} should be rejected"
        );
        assert!(matches!(manager.get_experiment(&id).await, Err(Error::NotFound(_))));
    }
}

#[tokio::test]
async fn test_load_definitions_json() {
    let manager = manager();
    let json = r#"[
        {
            "id": "home_layout",
            "name": "Home layout",
            "target_metric": "selection_start",
            "minimum_sample_size": 100,
            "confidence_level": 95,
            "variants": [
                { "id": "control", "name": "Original", "weight": 50, "is_control": true,
                  "config": { "layout": "original", "show_tips": false } },
                { "id": "optimized", "name": "Optimized", "weight": 50,
                  "config": { "layout": "optimized", "show_tips": true } }
            ]
        },
        {
            "id": "cta_copy",
            "name": "Call to action copy",
            "variants": [
                { "id": "control", "name": "Start", "weight": 1, "is_control": true },
                { "id": "go", "name": "Let's go", "weight": 1 }
            ]
        }
    ]"#;

    let experiments = manager.load_definitions_json(json).await.unwrap();
    assert_eq!(experiments.len(), 2);

    let home = manager.get_experiment("home_layout").await.unwrap();
    assert_eq!(home.target_metric(), "selection_start");
    assert_eq!(home.status(), ExperimentStatus::Running);

    let cta = manager.get_experiment("cta_copy").await.unwrap();
    assert_eq!(cta.target_metric(), "conversion");
    assert_eq!(cta.minimum_sample_size(), 100);
    assert!((cta.confidence_level() - 95.0).abs() < f64::EPSILON);

    let config = manager
        .variant_config("home_layout", "optimized")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(config.get("show_tips"), Some(&ConfigValue::Bool(true)));

    // Loading again keeps what is stored
    let again = manager.load_definitions_json(json).await.unwrap();
    assert_eq!(again[0].start_date(), home.start_date());
}

#[tokio::test]
async fn test_load_definitions_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("experiments.json");
    std::fs::write(
        &path,
        serde_json::to_string(&vec![two_arm("from-file", 10)]).unwrap(),
    )
    .unwrap();

    let manager = manager();
    manager.load_definitions_file(&path).await.unwrap();
    assert!(manager.get_experiment("from-file").await.is_ok());

    assert!(matches!(
        manager.load_definitions_file(dir.path().join("missing.json")).await,
        Err(Error::Io(_))
    ));
}

#[tokio::test]
async fn test_malformed_json_is_serialization_error() {
    let manager = manager();
    assert!(matches!(
        manager.load_definitions_json("[{\"id\": ").await,
        Err(Error::Serialization(_))
    ));
}

// =============================================================================
// Assignment
// =============================================================================

#[tokio::test]
async fn test_assignment_is_sticky() {
    let manager = manager();
    manager.create_experiment(two_arm("sticky", 100)).await.unwrap();

    for i in 0..50 {
        let user = format!("user-{i}");
        let first = manager.assign("sticky", &user).await.unwrap().unwrap();
        for _ in 0..5 {
            assert_eq!(manager.assign("sticky", &user).await.unwrap().as_deref(), Some(first.as_str()));
        }
    }
    assert_eq!(manager.store().assignment_count().await.unwrap(), 50);
}

#[tokio::test]
async fn test_empty_user_id_is_invalid() {
    let manager = manager();
    manager.create_experiment(two_arm("exp", 10)).await.unwrap();
    assert!(matches!(manager.assign("exp", "").await, Err(Error::InvalidInput(_))));
}

#[tokio::test]
async fn test_assignment_follows_weights() {
    let manager = manager();
    manager
        .create_experiment(
            ExperimentDefinition::builder("lopsided", "Lopsided")
                .variant(Variant::builder("control", "Control", 1.0).control().build())
                .variant(Variant::new("heavy", "Heavy", 9.0))
                .build(),
        )
        .await
        .unwrap();

    let mut counts: HashMap<String, u32> = HashMap::new();
    for i in 0..2000 {
        let variant = manager.assign("lopsided", &format!("u{i}")).await.unwrap().unwrap();
        *counts.entry(variant).or_default() += 1;
    }
    let heavy = f64::from(counts["heavy"]) / 2000.0;
    assert!((heavy - 0.9).abs() < 0.03, "heavy share = {heavy}");
}

#[tokio::test]
async fn test_hashed_assignment_reproducible_across_managers() {
    let a = ExperimentManager::new(MemoryKvStore::new());
    let b = ExperimentManager::new(MemoryKvStore::new());
    a.create_experiment(two_arm("exp", 10)).await.unwrap();
    b.create_experiment(two_arm("exp", 10)).await.unwrap();

    for i in 0..20 {
        let user = format!("user-{i}");
        assert_eq!(
            a.assign("exp", &user).await.unwrap(),
            b.assign("exp", &user).await.unwrap()
        );
    }
}

#[tokio::test]
async fn test_assign_in_segment() {
    let manager = manager();
    manager.create_experiment(two_arm("seg", 10)).await.unwrap();
    let segment = UserSegment::new("jp", "Japan")
        .with_condition(SegmentCondition::new("country", SegmentOperator::Equals, "JP"));

    let mut inside = UserAttributes::new();
    inside.insert("country".into(), "JP".into());
    let mut outside = UserAttributes::new();
    outside.insert("country".into(), "FR".into());

    assert!(manager
        .assign_in_segment("seg", "u-in", &segment, &inside)
        .await
        .unwrap()
        .is_some());
    assert!(manager
        .assign_in_segment("seg", "u-out", &segment, &outside)
        .await
        .unwrap()
        .is_none());
    assert!(manager.variant_for("seg", "u-out").await.unwrap().is_none());

    // An already enrolled user keeps their variant regardless of attributes
    let existing = manager.assign("seg", "u-moved").await.unwrap();
    assert_eq!(
        manager
            .assign_in_segment("seg", "u-moved", &segment, &outside)
            .await
            .unwrap(),
        existing
    );
}

// =============================================================================
// Conversions and significance
// =============================================================================

#[tokio::test]
async fn test_reference_scenario_through_conversions() {
    let manager = manager();
    manager.create_experiment(two_arm("ref", 100)).await.unwrap();

    // Seed exactly 100 participants per arm through the store
    for i in 0..100 {
        for variant in ["control", "optimized"] {
            manager
                .store()
                .put_assignment_if_absent("ref", &format!("{variant}-{i}"), variant)
                .await
                .unwrap();
        }
    }
    for i in 0..10 {
        manager.record_conversion("ref", &format!("control-{i}"), 1.0).await.unwrap();
    }
    let mut last = None;
    for i in 0..20 {
        last = manager
            .record_conversion("ref", &format!("optimized-{i}"), 1.0)
            .await
            .unwrap();
    }

    let result = last.unwrap();
    assert_eq!(result, manager.get_results("ref").await.unwrap().unwrap());
    assert_eq!(result.total_participants(), 200);
    assert!(result.is_statistically_significant());
    assert_eq!(result.winner_variant_id(), Some("optimized"));
    assert!((result.improvement_percent().unwrap() - 100.0).abs() < 1e-9);

    let optimized = result.variant("optimized").unwrap();
    assert!((optimized.conversion_rate() - 0.2).abs() < 1e-12);
    assert!((optimized.statistical_significance() - 95.27).abs() < 0.05);
    let (lower, upper) = optimized.confidence_interval();
    assert!(lower < 0.2 && 0.2 < upper);
}

#[tokio::test]
async fn test_results_absent_until_first_conversion() {
    let manager = manager();
    manager.create_experiment(two_arm("fresh", 10)).await.unwrap();
    manager.assign("fresh", "u1").await.unwrap();

    assert!(manager.get_results("fresh").await.unwrap().is_none());
    manager.record_conversion("fresh", "u1", 1.0).await.unwrap();
    assert!(manager.get_results("fresh").await.unwrap().is_some());
}

#[tokio::test]
async fn test_small_sample_never_significant() {
    let manager = manager();
    manager.create_experiment(two_arm("small", 100)).await.unwrap();

    let mut optimized = Vec::new();
    for i in 0..40 {
        let user = format!("user-{i}");
        if manager.assign("small", &user).await.unwrap().as_deref() == Some("optimized") {
            optimized.push(user);
        }
    }
    assert!(!optimized.is_empty());

    // Every optimized user converts, no control user does
    for user in &optimized {
        let result = manager.record_conversion("small", user, 1.0).await.unwrap().unwrap();
        assert_eq!(result.total_participants(), 40);
        assert!(!result.is_statistically_significant());
        assert!(result.winner_variant_id().is_none());
    }
}

#[tokio::test]
async fn test_weighted_conversions_accumulate() {
    let manager = manager();
    manager.create_experiment(two_arm("revenue", 1000)).await.unwrap();
    let variant = manager.assign("revenue", "buyer").await.unwrap().unwrap();

    manager.record_conversion("revenue", "buyer", 19.99).await.unwrap();
    let result = manager
        .record_conversion("revenue", "buyer", 5.01)
        .await
        .unwrap()
        .unwrap();

    let outcome = result.variant(&variant).unwrap();
    assert_eq!(outcome.participants(), 1);
    assert!((outcome.conversions() - 25.0).abs() < 1e-9);
    // Rates above 1 are reported as-is
    assert!((outcome.conversion_rate() - 25.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_late_conversions_count_after_completion() {
    let manager = manager();
    manager.create_experiment(two_arm("late", 10)).await.unwrap();
    let variant = manager.assign("late", "u1").await.unwrap().unwrap();
    manager.complete_experiment("late").await.unwrap();

    let result = manager.record_conversion("late", "u1", 1.0).await.unwrap().unwrap();
    assert!((result.variant(&variant).unwrap().conversions() - 1.0).abs() < f64::EPSILON);
    assert_eq!(
        manager.get_experiment("late").await.unwrap().status(),
        ExperimentStatus::Completed
    );
}

// =============================================================================
// Export
// =============================================================================

#[tokio::test]
async fn test_export_snapshot() {
    let manager = manager();
    manager.create_experiment(two_arm("a", 10)).await.unwrap();
    manager.create_draft(two_arm("b", 10)).await.unwrap();
    for user in ["u1", "u2", "u3"] {
        manager.assign("a", user).await.unwrap();
    }
    manager.record_conversion("a", "u1", 1.0).await.unwrap();

    let export = manager.export().await.unwrap();

    assert_eq!(export.experiments.len(), 2);
    assert_eq!(export.results.len(), 1);
    assert_eq!(export.results[0].experiment_id(), "a");
    assert_eq!(export.total_assignments, 3);

    let json = serde_json::to_string(&export).unwrap();
    assert!(json.contains("\"total_assignments\":3"));
    assert!(json.contains("\"status\":\"draft\""));
}
