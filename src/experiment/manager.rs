//! Experiment Manager - lifecycle, assignment, conversions and significance
//!
//! The manager is an explicit value: build one at startup with
//! [`ExperimentManager::builder`], share it through `Arc`, and inject the
//! key-value backend. It holds no copies of stored state; every read and
//! write goes through the [`ExperimentStore`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use super::stats::{self, Sample};
use super::{
    Experiment, ExperimentDefinition, ExperimentResult, ExperimentStatus, ExperimentStore,
    RandomSource, UserAttributes, UserSegment, Variant, VariantConfig, VariantOutcome,
};
use crate::kv::KvStore;
use crate::{Error, Result};

/// Point-in-time dump of every experiment and result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentExport {
    /// All experiment definitions with lifecycle state.
    pub experiments: Vec<Experiment>,
    /// All computed results.
    pub results: Vec<ExperimentResult>,
    /// Assignments across all experiments.
    pub total_assignments: u64,
    /// When the export was taken.
    pub exported_at: DateTime<Utc>,
}

/// Builder for `ExperimentManager`.
#[derive(Debug)]
pub struct ExperimentManagerBuilder<S: KvStore> {
    kv: S,
    random: RandomSource,
}

impl<S: KvStore> ExperimentManagerBuilder<S> {
    /// Create a builder over `kv` with the hashed random source.
    #[must_use]
    pub fn new(kv: S) -> Self {
        Self {
            kv,
            random: RandomSource::default(),
        }
    }

    /// Set where first-time assignments draw randomness from.
    #[must_use]
    pub fn random_source(mut self, random: RandomSource) -> Self {
        self.random = random;
        self
    }

    /// Build the manager.
    #[must_use]
    pub fn build(self) -> ExperimentManager<S> {
        ExperimentManager {
            store: ExperimentStore::new(self.kv),
            random: self.random,
        }
    }
}

/// Orchestrates experiments over an [`ExperimentStore`].
///
/// # Example
///
/// ```rust
/// use abtest_core::experiment::{ExperimentDefinition, ExperimentManager, Variant};
/// use abtest_core::kv::MemoryKvStore;
///
/// # async fn example() -> abtest_core::Result<()> {
/// let manager = ExperimentManager::new(MemoryKvStore::new());
///
/// manager
///     .create_experiment(
///         ExperimentDefinition::builder("checkout", "Checkout button")
///             .variant(Variant::builder("control", "Blue", 50.0).control().build())
///             .variant(Variant::new("green", "Green", 50.0))
///             .build(),
///     )
///     .await?;
///
/// let variant = manager.assign("checkout", "user-42").await?;
/// assert!(variant.is_some());
/// // Sticky: the same user always gets the same variant
/// assert_eq!(manager.assign("checkout", "user-42").await?, variant);
///
/// manager.record_conversion("checkout", "user-42", 1.0).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ExperimentManager<S: KvStore> {
    store: ExperimentStore<S>,
    random: RandomSource,
}

impl<S: KvStore> ExperimentManager<S> {
    /// Create a manager with default settings.
    #[must_use]
    pub fn new(kv: S) -> Self {
        Self::builder(kv).build()
    }

    /// Create a builder for configuring the manager.
    #[must_use]
    pub fn builder(kv: S) -> ExperimentManagerBuilder<S> {
        ExperimentManagerBuilder::new(kv)
    }

    /// Get reference to the underlying store.
    #[must_use]
    pub const fn store(&self) -> &ExperimentStore<S> {
        &self.store
    }

    // ------------------------------------------------------------------
    // Definitions and lifecycle
    // ------------------------------------------------------------------

    /// Validate and store a new experiment, live immediately.
    ///
    /// # Errors
    ///
    /// `Error::InvalidConfiguration` for a malformed definition or a taken id.
    pub async fn create_experiment(&self, definition: ExperimentDefinition) -> Result<Experiment> {
        self.create_with_status(definition, ExperimentStatus::Running)
            .await
    }

    /// Validate and store a new experiment in `draft` status.
    ///
    /// # Errors
    ///
    /// `Error::InvalidConfiguration` for a malformed definition or a taken id.
    pub async fn create_draft(&self, definition: ExperimentDefinition) -> Result<Experiment> {
        self.create_with_status(definition, ExperimentStatus::Draft)
            .await
    }

    async fn create_with_status(
        &self,
        definition: ExperimentDefinition,
        status: ExperimentStatus,
    ) -> Result<Experiment> {
        let experiment = Experiment::from_definition(definition, status, Utc::now())?;
        self.store.put_experiment(&experiment).await?;
        info!(
            experiment_id = experiment.id(),
            status = %status,
            variants = experiment.variants().len(),
            "created experiment"
        );
        Ok(experiment)
    }

    /// Create the experiment unless its id exists, returning what is stored.
    ///
    /// Safe to call on every startup with the same seed definitions.
    ///
    /// # Errors
    ///
    /// `Error::InvalidConfiguration` for a malformed definition.
    pub async fn ensure_experiment(&self, definition: ExperimentDefinition) -> Result<Experiment> {
        let candidate =
            Experiment::from_definition(definition, ExperimentStatus::Running, Utc::now())?;
        let stored = self.store.put_experiment_if_absent(&candidate).await?;
        if stored == candidate {
            info!(experiment_id = stored.id(), "created experiment");
        } else {
            debug!(experiment_id = stored.id(), "experiment already defined");
        }
        Ok(stored)
    }

    /// Ensure every definition in a JSON array.
    ///
    /// # Errors
    ///
    /// `Error::Serialization` for malformed JSON, `Error::InvalidConfiguration`
    /// for the first invalid definition (earlier ones stay stored).
    pub async fn load_definitions_json(&self, json: &str) -> Result<Vec<Experiment>> {
        let definitions: Vec<ExperimentDefinition> = serde_json::from_str(json)?;
        let mut experiments = Vec::with_capacity(definitions.len());
        for definition in definitions {
            experiments.push(self.ensure_experiment(definition).await?);
        }
        Ok(experiments)
    }

    /// Ensure every definition in a JSON file.
    ///
    /// # Errors
    ///
    /// `Error::Io` if the file cannot be read, otherwise as
    /// [`Self::load_definitions_json`].
    pub async fn load_definitions_file<P: AsRef<Path> + Send>(
        &self,
        path: P,
    ) -> Result<Vec<Experiment>> {
        let json = std::fs::read_to_string(path.as_ref())?;
        self.load_definitions_json(&json).await
    }

    /// Move a draft to `running`.
    ///
    /// # Errors
    ///
    /// `Error::NotFound` or `Error::InvalidStateTransition`.
    pub async fn start_experiment(&self, experiment_id: &str) -> Result<Experiment> {
        self.transition(experiment_id, ExperimentStatus::Running, ExperimentStatus::Draft)
            .await
    }

    /// Stop accepting new assignments temporarily.
    ///
    /// # Errors
    ///
    /// `Error::NotFound` or `Error::InvalidStateTransition`.
    pub async fn pause_experiment(&self, experiment_id: &str) -> Result<Experiment> {
        self.transition(experiment_id, ExperimentStatus::Paused, ExperimentStatus::Running)
            .await
    }

    /// Resume a paused experiment.
    ///
    /// # Errors
    ///
    /// `Error::NotFound` or `Error::InvalidStateTransition`.
    pub async fn resume_experiment(&self, experiment_id: &str) -> Result<Experiment> {
        self.transition(experiment_id, ExperimentStatus::Running, ExperimentStatus::Paused)
            .await
    }

    /// Finish the experiment and stamp `end_date`. Assignments and results
    /// stay queryable; new `assign` calls return `None`.
    ///
    /// # Errors
    ///
    /// `Error::NotFound` or `Error::InvalidStateTransition`.
    pub async fn complete_experiment(&self, experiment_id: &str) -> Result<Experiment> {
        let experiment = self
            .store
            .update_experiment(experiment_id, |e| {
                e.transition(ExperimentStatus::Completed, Utc::now())
            })
            .await?;
        info!(experiment_id, name = experiment.name(), "completed experiment");
        Ok(experiment)
    }

    /// `from` restricts which status the transition starts from, so
    /// `start` cannot resume a paused experiment and vice versa.
    async fn transition(
        &self,
        experiment_id: &str,
        to: ExperimentStatus,
        from: ExperimentStatus,
    ) -> Result<Experiment> {
        let experiment = self
            .store
            .update_experiment(experiment_id, |e| {
                if e.status() != from {
                    return Err(Error::InvalidStateTransition {
                        experiment_id: experiment_id.to_string(),
                        from: e.status().to_string(),
                        to: to.to_string(),
                    });
                }
                e.transition(to, Utc::now())
            })
            .await?;
        info!(experiment_id, from = %from, to = %to, "experiment status changed");
        Ok(experiment)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Get an experiment by ID.
    ///
    /// # Errors
    ///
    /// `Error::NotFound` for an unknown id.
    pub async fn get_experiment(&self, experiment_id: &str) -> Result<Experiment> {
        self.store
            .get_experiment(experiment_id)
            .await?
            .ok_or_else(|| Error::NotFound(experiment_id.to_string()))
    }

    /// Experiments currently accepting assignments.
    ///
    /// # Errors
    ///
    /// Propagates storage errors.
    pub async fn list_running_experiments(&self) -> Result<Vec<Experiment>> {
        self.store.list_running_experiments().await
    }

    /// The last computed result, `None` before the first conversion.
    ///
    /// # Errors
    ///
    /// `Error::NotFound` for an unknown id.
    pub async fn get_results(&self, experiment_id: &str) -> Result<Option<ExperimentResult>> {
        self.get_experiment(experiment_id).await?;
        self.store.get_result(experiment_id).await
    }

    /// Configuration payload of one variant.
    ///
    /// # Errors
    ///
    /// `Error::NotFound` for an unknown experiment id.
    pub async fn variant_config(
        &self,
        experiment_id: &str,
        variant_id: &str,
    ) -> Result<Option<VariantConfig>> {
        let experiment = self.get_experiment(experiment_id).await?;
        Ok(experiment.variant(variant_id).map(|v| v.config().clone()))
    }

    /// The user's existing assignment, without allocating one.
    ///
    /// # Errors
    ///
    /// `Error::NotFound` for an unknown experiment id.
    pub async fn variant_for(&self, experiment_id: &str, user_id: &str) -> Result<Option<String>> {
        self.get_experiment(experiment_id).await?;
        self.store.get_assignment(experiment_id, user_id).await
    }

    /// Snapshot of all experiments, results and the assignment count.
    ///
    /// # Errors
    ///
    /// Propagates storage errors.
    pub async fn export(&self) -> Result<ExperimentExport> {
        Ok(ExperimentExport {
            experiments: self.store.list_experiments().await?,
            results: self.store.list_results().await?,
            total_assignments: self.store.assignment_count().await?,
            exported_at: Utc::now(),
        })
    }

    // ------------------------------------------------------------------
    // Assignment
    // ------------------------------------------------------------------

    /// The variant `user_id` sees, allocating one on first request.
    ///
    /// Returns `None` unless the experiment is running. An existing
    /// assignment never changes, and concurrent first requests for the same
    /// user all receive the single variant the store recorded.
    ///
    /// # Errors
    ///
    /// `Error::NotFound` for an unknown id, `Error::InvalidInput` for an empty
    /// user id, storage errors unchanged.
    pub async fn assign(&self, experiment_id: &str, user_id: &str) -> Result<Option<String>> {
        let experiment = self.get_experiment(experiment_id).await?;
        self.assign_to(&experiment, user_id).await
    }

    /// Like [`Self::assign`], but users not yet assigned are only enrolled
    /// when `attributes` fall inside `segment`.
    ///
    /// # Errors
    ///
    /// As [`Self::assign`].
    pub async fn assign_in_segment(
        &self,
        experiment_id: &str,
        user_id: &str,
        segment: &UserSegment,
        attributes: &UserAttributes,
    ) -> Result<Option<String>> {
        let experiment = self.get_experiment(experiment_id).await?;
        if !experiment.is_running() {
            return Ok(None);
        }
        if let Some(existing) = self.store.get_assignment(experiment_id, user_id).await? {
            return Ok(Some(existing));
        }
        if !segment.contains(attributes) {
            debug!(experiment_id, user_id, segment = segment.id(), "user outside segment");
            return Ok(None);
        }
        self.assign_to(&experiment, user_id).await
    }

    async fn assign_to(&self, experiment: &Experiment, user_id: &str) -> Result<Option<String>> {
        if user_id.is_empty() {
            return Err(Error::InvalidInput("user id must not be empty".to_string()));
        }
        if !experiment.is_running() {
            return Ok(None);
        }
        if let Some(existing) = self.store.get_assignment(experiment.id(), user_id).await? {
            return Ok(Some(existing));
        }

        let candidate = self
            .random
            .pick(experiment.id(), user_id, experiment.variants())?;
        let assignment = self
            .store
            .put_assignment_if_absent(experiment.id(), user_id, candidate.id())
            .await?;
        if assignment.newly_assigned() {
            debug!(
                experiment_id = experiment.id(),
                user_id,
                variant_id = assignment.variant_id(),
                "assigned user"
            );
        }
        Ok(Some(assignment.into_variant_id()))
    }

    // ------------------------------------------------------------------
    // Conversions
    // ------------------------------------------------------------------

    /// Add `amount` to the user's variant and recompute significance.
    ///
    /// A user who was never assigned cannot convert: returns `Ok(None)` and
    /// leaves every aggregate untouched. Late conversions after pausing or
    /// completion still count toward the historical result.
    ///
    /// # Errors
    ///
    /// `Error::NotFound` for an unknown id, `Error::InvalidInput` for a
    /// negative or non-finite amount, storage errors unchanged.
    pub async fn record_conversion(
        &self,
        experiment_id: &str,
        user_id: &str,
        amount: f64,
    ) -> Result<Option<ExperimentResult>> {
        if !(amount.is_finite() && amount >= 0.0) {
            return Err(Error::InvalidInput(format!(
                "conversion amount must be a non-negative number, found {amount}"
            )));
        }
        let experiment = self.get_experiment(experiment_id).await?;
        let Some(variant_id) = self.store.get_assignment(experiment_id, user_id).await? else {
            debug!(experiment_id, user_id, "ignoring conversion from unassigned user");
            return Ok(None);
        };

        let total = self
            .store
            .increment_conversions(experiment_id, &variant_id, amount)
            .await?;
        debug!(experiment_id, user_id, variant_id = %variant_id, amount, total, "recorded conversion");

        self.recompute(&experiment).await.map(Some)
    }

    /// Record a conversion only if `metric` is the experiment's target metric.
    ///
    /// # Errors
    ///
    /// As [`Self::record_conversion`].
    pub async fn record_event(
        &self,
        experiment_id: &str,
        user_id: &str,
        metric: &str,
        amount: f64,
    ) -> Result<Option<ExperimentResult>> {
        let experiment = self.get_experiment(experiment_id).await?;
        if experiment.target_metric() != metric {
            return Ok(None);
        }
        self.record_conversion(experiment_id, user_id, amount).await
    }

    // ------------------------------------------------------------------
    // Significance
    // ------------------------------------------------------------------

    /// Rebuild the experiment's result from the stored counts.
    ///
    /// Participant counts come from a prefix scan of the experiment's
    /// assignments, so each call (and each recorded conversion) costs
    /// O(participants) plus one batched read of the conversion counters.
    ///
    /// # Errors
    ///
    /// `Error::NotFound` for an unknown id, storage errors unchanged.
    pub async fn recompute_significance(&self, experiment_id: &str) -> Result<ExperimentResult> {
        let experiment = self.get_experiment(experiment_id).await?;
        self.recompute(&experiment).await
    }

    /// Optimistic loop: load the stored result, compute a fresh one from
    /// counts read afterwards, and write it only if nobody else wrote in
    /// between. Each stored result is therefore computed from data at least
    /// as new as the one it replaces.
    async fn recompute(&self, experiment: &Experiment) -> Result<ExperimentResult> {
        loop {
            let snapshot = self.store.load_result(experiment.id()).await?;
            let (fresh, control_rate) = self.evaluate(experiment).await?;
            let next = fresh.retain_declared_significance(snapshot.value(), control_rate);

            if self.store.swap_result(experiment.id(), &snapshot, &next).await? {
                if next.is_statistically_significant()
                    && !snapshot
                        .value()
                        .is_some_and(ExperimentResult::is_statistically_significant)
                {
                    info!(
                        experiment_id = experiment.id(),
                        winner = next.winner_variant_id().unwrap_or("none"),
                        total_participants = next.total_participants(),
                        "experiment reached significance"
                    );
                }
                return Ok(next);
            }
            debug!(experiment_id = experiment.id(), "result changed concurrently, recomputing");
        }
    }

    /// Fresh result from current counts, without reference to earlier results.
    ///
    /// Returns the result and the control's conversion rate.
    async fn evaluate(&self, experiment: &Experiment) -> Result<(ExperimentResult, f64)> {
        let counts = self.store.participant_counts(experiment.id()).await?;
        let variant_ids: Vec<&str> = experiment.variants().iter().map(Variant::id).collect();
        let totals = self
            .store
            .conversion_totals(experiment.id(), &variant_ids)
            .await?;
        let mut outcomes = Vec::with_capacity(experiment.variants().len());
        for (variant, conversions) in experiment.variants().iter().zip(totals) {
            let participants = counts.get(variant.id()).copied().unwrap_or(0);
            let mut outcome =
                VariantOutcome::new(variant.id(), variant.name(), participants, conversions);
            outcome.set_confidence_interval(stats::confidence_interval(
                outcome.sample(),
                experiment.confidence_level(),
            ));
            outcomes.push(outcome);
        }

        let now = Utc::now();
        let duration_ms = (now - experiment.start_date()).num_milliseconds();
        let mut result = ExperimentResult::new(experiment.id(), duration_ms, outcomes, now);

        let control_id = experiment.control().map(|v| v.id().to_string());
        let control = control_id
            .as_deref()
            .and_then(|id| result.variant(id))
            .map_or(Sample::new(0.0, 0), VariantOutcome::sample);
        let control_rate = control.rate();

        if result.total_participants() < experiment.minimum_sample_size() {
            return Ok((result, control_rate));
        }

        let mut any_significant = false;
        let mut winner: Option<String> = None;
        for outcome in result.variants_mut() {
            if Some(outcome.variant_id()) == control_id.as_deref() {
                continue;
            }
            let test = stats::evaluate(control, outcome.sample());
            outcome.set_statistical_significance(test.significance_percent);

            if test.significance_percent >= experiment.confidence_level() {
                any_significant = true;
                // First qualifying variant in definition order wins ties.
                if winner.is_none() && outcome.conversion_rate() > control_rate {
                    winner = Some(outcome.variant_id().to_string());
                }
            }
        }

        if any_significant {
            result.mark_significant();
        }
        if let Some(winner) = winner {
            result.declare_winner(&winner, control_rate);
        }
        Ok((result, control_rate))
    }
}
