//! A/B Testing Demo - full experiment lifecycle
//!
//! Run with: `cargo run --example ab_testing`
//! Set `RUST_LOG=abtest_core=debug` to watch every assignment.
//!
//! Simulates a home-page layout experiment: loads definitions, assigns
//! simulated visitors, records conversions at different true rates, and
//! prints the result once significance is reached.

use abtest_core::experiment::{
    ConfigValue, ExperimentClient, ExperimentManager, SegmentCondition, SegmentOperator,
    UserAttributes, UserSegment, VariantConfig,
};
use abtest_core::kv::FileKvStore;
use anyhow::Context;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const DEFINITIONS: &str = r#"[
    {
        "id": "home_layout",
        "name": "Home layout",
        "description": "Does the optimized layout get more users to start a selection?",
        "target_metric": "selection_start",
        "minimum_sample_size": 200,
        "confidence_level": 95,
        "variants": [
            { "id": "control", "name": "Original", "weight": 50, "is_control": true,
              "config": { "layout": "original" } },
            { "id": "optimized", "name": "Optimized", "weight": 50,
              "config": { "layout": "optimized", "show_tips": true } }
        ]
    }
]"#;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("=== abtest-core A/B Testing Demo ===\n");

    let dir = tempfile::tempdir().context("creating scratch directory")?;
    let log_path = dir.path().join("experiments.log");
    let manager = Arc::new(ExperimentManager::new(
        FileKvStore::open(&log_path).context("opening experiment log")?,
    ));

    // 1. Definitions
    let loaded = manager.load_definitions_json(DEFINITIONS).await?;
    println!("1. Loaded {} experiment(s)", loaded.len());

    // 2. Traffic
    println!("2. Simulating visitors");
    let mut defaults = VariantConfig::new();
    defaults.insert("layout".into(), ConfigValue::from("original"));
    let mut rng = StdRng::seed_from_u64(2024);
    let mut visitors = 0;
    let result = loop {
        visitors += 1;
        let user = format!("visitor-{visitors}");
        let mut client = ExperimentClient::new(
            Arc::clone(&manager),
            "home_layout",
            &user,
            defaults.clone(),
        );
        let resolution = client.resolve().await?.clone();

        let true_rate = if resolution.variant_id.as_deref() == Some("optimized") { 0.18 } else { 0.10 };
        if rng.gen_bool(true_rate) {
            if let Some(result) = client.record_event("selection_start", 1.0).await? {
                if result.winner_variant_id().is_some() || visitors >= 5000 {
                    break result;
                }
            }
        }
    };
    println!("   {visitors} visitors until a decision\n");

    // 3. Results
    println!("3. Results");
    for outcome in result.variants() {
        let (lower, upper) = outcome.confidence_interval();
        println!(
            "   {:<10} n={:<5} conversions={:<5} rate={:.3} [{:.3}, {:.3}] significance={:.1}%{}",
            outcome.variant_id(),
            outcome.participants(),
            outcome.conversions(),
            outcome.conversion_rate(),
            lower,
            upper,
            outcome.statistical_significance(),
            if outcome.is_winner() { "  <- winner" } else { "" }
        );
    }
    if let Some(improvement) = result.improvement_percent() {
        println!("   improvement over control: {improvement:.1}%");
    }

    // 4. Segments
    println!("\n4. Segment-gated enrollment");
    let mobile = UserSegment::new("mobile", "Mobile users")
        .with_condition(SegmentCondition::new("platform", SegmentOperator::Equals, "ios"));
    let mut attributes = UserAttributes::new();
    attributes.insert("platform".into(), "android".into());
    let gated = manager
        .assign_in_segment("home_layout", "new-android-user", &mobile, &attributes)
        .await?;
    println!("   android user enrolled: {}", gated.is_some());

    // 5. Lifecycle and persistence
    manager.complete_experiment("home_layout").await?;
    drop(manager);
    let reopened = ExperimentManager::new(FileKvStore::open(&log_path)?);
    let export = reopened.export().await?;
    println!(
        "\n5. After restart: {} experiment(s), {} assignment(s), status {}",
        export.experiments.len(),
        export.total_assignments,
        export.experiments[0].status()
    );

    println!("\nDemo completed successfully!");
    Ok(())
}
