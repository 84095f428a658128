//! Experiment Engine: assignment, outcome tracking and significance
//!
//! This module holds the A/B testing domain: experiment definitions and
//! lifecycle, sticky weighted assignment, conversion aggregation, and
//! significance evaluation over any [`KvStore`](crate::kv::KvStore) backend.
//!
//! ## Data Overview
//!
//! ```text
//! Experiment (1) ──< Variant (N, exactly one control)
//!      │
//!      ├──< Assignment (user -> variant, first write wins)
//!      ├──< Conversions (per variant, atomic counter)
//!      └─── ExperimentResult (recomputed on each conversion)
//!                 └──< VariantOutcome (N)
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use abtest_core::experiment::{ExperimentDefinition, ExperimentManager, Variant};
//! use abtest_core::kv::MemoryKvStore;
//!
//! # async fn example() -> abtest_core::Result<()> {
//! let manager = ExperimentManager::new(MemoryKvStore::new());
//!
//! manager
//!     .create_experiment(
//!         ExperimentDefinition::builder("pricing", "Pricing page")
//!             .minimum_sample_size(1000)
//!             .variant(Variant::builder("control", "Current", 1.0).control().build())
//!             .variant(Variant::builder("annual", "Annual first", 1.0).setting("plan", "annual").build())
//!             .build(),
//!     )
//!     .await?;
//!
//! if let Some(variant) = manager.assign("pricing", "user-7").await? {
//!     println!("user-7 sees {variant}");
//! }
//! manager.record_conversion("pricing", "user-7", 1.0).await?;
//! let results = manager.get_results("pricing").await?;
//! assert!(results.is_some());
//! # Ok(())
//! # }
//! ```

mod allocator;
mod client;
mod experiment_record;
mod manager;
mod outcome;
mod segment;
pub mod stats;
mod store;
mod variant;

pub use allocator::{assignment_seed, select_variant, RandomSource};
pub use client::{ExperimentClient, Resolution};
pub use experiment_record::{
    Experiment, ExperimentDefinition, ExperimentDefinitionBuilder, ExperimentStatus,
};
pub use manager::{ExperimentExport, ExperimentManager, ExperimentManagerBuilder};
pub use outcome::{ExperimentResult, VariantOutcome};
pub use segment::{SegmentCondition, SegmentOperator, UserAttributes, UserSegment};
pub use stats::{Sample, SignificanceTest};
pub use store::{Assignment, ExperimentStore, Snapshot};
pub use variant::{ConfigValue, Variant, VariantBuilder, VariantConfig};
