//! # abtest-core: Embedded A/B Testing Engine
//!
//! **Version**: 0.1.0
//!
//! abtest-core assigns users to experiment variants, aggregates their
//! conversions, and decides when a variant has significantly beaten control.
//! It embeds in a host service; persistence sits behind a small async
//! key-value contract so the same engine runs in memory or on disk.
//!
//! ## Guarantees
//!
//! - **Sticky assignment**: a user's first variant is theirs for the life of
//!   the experiment, even under concurrent first requests
//! - **Exact counts**: concurrent conversions are never lost (atomic increments)
//! - **Monotonic significance**: a declared winner is never withdrawn
//! - **Honest thresholds**: no significance before the minimum sample size
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use abtest_core::experiment::{ExperimentDefinition, ExperimentManager, Variant};
//! use abtest_core::kv::FileKvStore;
//!
//! # async fn example() -> abtest_core::Result<()> {
//! let manager = ExperimentManager::new(FileKvStore::open("experiments.log")?);
//!
//! manager
//!     .ensure_experiment(
//!         ExperimentDefinition::builder("onboarding", "Onboarding flow")
//!             .variant(Variant::builder("control", "Current", 50.0).control().build())
//!             .variant(Variant::new("short", "Three steps", 50.0))
//!             .build(),
//!     )
//!     .await?;
//!
//! let variant = manager.assign("onboarding", "user-1").await?;
//! manager.record_conversion("onboarding", "user-1", 1.0).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod error;
pub mod experiment;
pub mod kv;

pub use error::{Error, Result};
pub use experiment::{
    Experiment, ExperimentClient, ExperimentDefinition, ExperimentManager, ExperimentResult,
    ExperimentStatus, Variant,
};
