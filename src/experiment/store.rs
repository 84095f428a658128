//! Experiment Store - the persisted collections on top of a `KvStore`
//!
//! ## Key layout
//!
//! Keys are namespaced with the ASCII unit separator (`\u{1f}`), which
//! experiment and variant ids may not contain:
//!
//! ```text
//! experiment␟{experiment_id}                      -> Experiment (JSON)
//! assignment␟{experiment_id}␟{user_id}            -> variant id (JSON string)
//! conversions␟{experiment_id}␟{variant_id}        -> f64 counter (8 bytes LE)
//! result␟{experiment_id}                          -> ExperimentResult (JSON)
//! ```
//!
//! Assignments are written once through the backend's compare-and-set and
//! participant counts are derived from them by prefix scan, so the two can
//! never disagree.

use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::{Experiment, ExperimentResult};
use crate::kv::{decode_f64, CasOutcome, KvStore};
use crate::{Error, Result};

const SEP: char = '\u{1f}';

fn experiment_prefix() -> String {
    format!("experiment{SEP}")
}

fn experiment_key(experiment_id: &str) -> String {
    format!("experiment{SEP}{experiment_id}")
}

fn assignment_prefix(experiment_id: &str) -> String {
    format!("assignment{SEP}{experiment_id}{SEP}")
}

fn assignment_key(experiment_id: &str, user_id: &str) -> String {
    format!("assignment{SEP}{experiment_id}{SEP}{user_id}")
}

fn conversions_key(experiment_id: &str, variant_id: &str) -> String {
    format!("conversions{SEP}{experiment_id}{SEP}{variant_id}")
}

fn result_prefix() -> String {
    format!("result{SEP}")
}

fn result_key(experiment_id: &str) -> String {
    format!("result{SEP}{experiment_id}")
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(bytes)?)
}

/// The outcome of `put_assignment_if_absent`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    variant_id: String,
    newly_assigned: bool,
}

impl Assignment {
    /// The variant the user is bound to.
    #[must_use]
    pub fn variant_id(&self) -> &str {
        &self.variant_id
    }

    /// Whether this call created the binding.
    #[must_use]
    pub const fn newly_assigned(&self) -> bool {
        self.newly_assigned
    }

    /// Consume, returning the variant id.
    #[must_use]
    pub fn into_variant_id(self) -> String {
        self.variant_id
    }
}

/// A stored record together with the exact bytes it was read from, so a
/// later write can be made conditional on nothing having changed.
#[derive(Debug, Clone)]
pub struct Snapshot<T> {
    value: Option<T>,
    raw: Option<Vec<u8>>,
}

impl<T> Snapshot<T> {
    /// The decoded record, if one was stored.
    #[must_use]
    pub const fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    /// Consume, returning the decoded record.
    #[must_use]
    pub fn into_value(self) -> Option<T> {
        self.value
    }
}

/// Persisted experiment collections over any [`KvStore`] backend.
///
/// Every method is a single atomic backend operation or an optimistic
/// compare-and-set loop; the store keeps no state of its own.
#[derive(Debug)]
pub struct ExperimentStore<S: KvStore> {
    kv: S,
}

impl<S: KvStore> ExperimentStore<S> {
    /// Wrap a key-value backend.
    #[must_use]
    pub const fn new(kv: S) -> Self {
        Self { kv }
    }

    /// Get reference to the backend (for inspection/testing)
    #[must_use]
    pub const fn kv(&self) -> &S {
        &self.kv
    }

    // ------------------------------------------------------------------
    // Experiment definitions
    // ------------------------------------------------------------------

    /// Store a new experiment.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfiguration` if the id is already taken.
    pub async fn put_experiment(&self, experiment: &Experiment) -> Result<()> {
        let outcome = self
            .kv
            .put_if_absent(&experiment_key(experiment.id()), encode(experiment)?)
            .await?;
        if outcome.was_inserted() {
            Ok(())
        } else {
            Err(Error::InvalidConfiguration(format!(
                "experiment {} already exists",
                experiment.id()
            )))
        }
    }

    /// Store `experiment` unless the id exists; returns whichever is stored.
    ///
    /// # Errors
    ///
    /// Propagates backend and decoding errors.
    pub async fn put_experiment_if_absent(&self, experiment: &Experiment) -> Result<Experiment> {
        let outcome = self
            .kv
            .put_if_absent(&experiment_key(experiment.id()), encode(experiment)?)
            .await?;
        if outcome.was_inserted() {
            Ok(experiment.clone())
        } else {
            decode(outcome.value())
        }
    }

    /// Get an experiment by ID.
    ///
    /// # Errors
    ///
    /// Propagates backend and decoding errors.
    pub async fn get_experiment(&self, experiment_id: &str) -> Result<Option<Experiment>> {
        match self.kv.get(&experiment_key(experiment_id)).await? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Apply `update` to the stored experiment, retrying on concurrent writes.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` for an unknown id, or whatever `update` returns.
    pub async fn update_experiment<F>(&self, experiment_id: &str, mut update: F) -> Result<Experiment>
    where
        F: FnMut(&mut Experiment) -> Result<()> + Send,
    {
        let key = experiment_key(experiment_id);
        loop {
            let Some(raw) = self.kv.get(&key).await? else {
                return Err(Error::NotFound(experiment_id.to_string()));
            };
            let mut experiment: Experiment = decode(&raw)?;
            update(&mut experiment)?;

            match self
                .kv
                .compare_and_swap(&key, Some(&raw), encode(&experiment)?)
                .await?
            {
                CasOutcome::Swapped => return Ok(experiment),
                CasOutcome::Conflict(_) => {
                    debug!(experiment_id, "experiment changed concurrently, retrying update");
                }
            }
        }
    }

    /// All experiments, ordered by id.
    ///
    /// # Errors
    ///
    /// Propagates backend and decoding errors.
    pub async fn list_experiments(&self) -> Result<Vec<Experiment>> {
        self.kv
            .scan_prefix(&experiment_prefix())
            .await?
            .iter()
            .map(|(_, bytes)| decode(bytes))
            .collect()
    }

    /// Experiments currently accepting assignments, ordered by id.
    ///
    /// # Errors
    ///
    /// Propagates backend and decoding errors.
    pub async fn list_running_experiments(&self) -> Result<Vec<Experiment>> {
        let mut experiments = self.list_experiments().await?;
        experiments.retain(Experiment::is_running);
        Ok(experiments)
    }

    // ------------------------------------------------------------------
    // Assignments
    // ------------------------------------------------------------------

    /// The variant `user_id` is bound to, if any.
    ///
    /// # Errors
    ///
    /// Propagates backend and decoding errors.
    pub async fn get_assignment(&self, experiment_id: &str, user_id: &str) -> Result<Option<String>> {
        match self.kv.get(&assignment_key(experiment_id, user_id)).await? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Bind `user_id` to `variant_id` unless already bound (first write wins).
    ///
    /// Concurrent callers for the same key all receive the same variant id.
    ///
    /// # Errors
    ///
    /// Propagates backend and decoding errors.
    pub async fn put_assignment_if_absent(
        &self,
        experiment_id: &str,
        user_id: &str,
        variant_id: &str,
    ) -> Result<Assignment> {
        let outcome = self
            .kv
            .put_if_absent(&assignment_key(experiment_id, user_id), encode(&variant_id)?)
            .await?;
        Ok(Assignment {
            newly_assigned: outcome.was_inserted(),
            variant_id: decode(outcome.value())?,
        })
    }

    /// Number of users bound to `variant_id`.
    ///
    /// # Errors
    ///
    /// Propagates backend and decoding errors.
    pub async fn count_participants(&self, experiment_id: &str, variant_id: &str) -> Result<u64> {
        Ok(self
            .participant_counts(experiment_id)
            .await?
            .get(variant_id)
            .copied()
            .unwrap_or(0))
    }

    /// Participants per variant id, from one scan of the assignments.
    ///
    /// # Errors
    ///
    /// Propagates backend and decoding errors.
    pub async fn participant_counts(&self, experiment_id: &str) -> Result<FxHashMap<String, u64>> {
        let mut counts = FxHashMap::default();
        for (_, bytes) in self.kv.scan_prefix(&assignment_prefix(experiment_id)).await? {
            let variant_id: String = decode(&bytes)?;
            *counts.entry(variant_id).or_insert(0) += 1;
        }
        Ok(counts)
    }

    /// Total assignments across all experiments.
    ///
    /// # Errors
    ///
    /// Propagates backend errors.
    pub async fn assignment_count(&self) -> Result<u64> {
        let entries = self.kv.scan_prefix(&format!("assignment{SEP}")).await?;
        Ok(entries.len() as u64)
    }

    // ------------------------------------------------------------------
    // Outcome counters
    // ------------------------------------------------------------------

    /// Atomically add `amount` to the variant's conversions; returns the total.
    ///
    /// # Errors
    ///
    /// Propagates backend errors.
    pub async fn increment_conversions(
        &self,
        experiment_id: &str,
        variant_id: &str,
        amount: f64,
    ) -> Result<f64> {
        self.kv
            .increment(&conversions_key(experiment_id, variant_id), amount)
            .await
    }

    /// Cumulative conversions recorded for the variant.
    ///
    /// # Errors
    ///
    /// Propagates backend errors and corrupt counter cells.
    pub async fn conversions(&self, experiment_id: &str, variant_id: &str) -> Result<f64> {
        match self.kv.get(&conversions_key(experiment_id, variant_id)).await? {
            Some(bytes) => decode_f64(&bytes),
            None => Ok(0.0),
        }
    }

    /// Cumulative conversions for several variants in one backend batch,
    /// in the order given.
    ///
    /// # Errors
    ///
    /// Propagates backend errors and corrupt counter cells.
    pub async fn conversion_totals(
        &self,
        experiment_id: &str,
        variant_ids: &[&str],
    ) -> Result<Vec<f64>> {
        let keys: Vec<String> = variant_ids
            .iter()
            .map(|variant_id| conversions_key(experiment_id, variant_id))
            .collect();
        let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
        self.kv
            .batch_get(&keys)
            .await?
            .into_iter()
            .map(|cell| cell.map_or(Ok(0.0), |bytes| decode_f64(&bytes)))
            .collect()
    }

    // ------------------------------------------------------------------
    // Result aggregates
    // ------------------------------------------------------------------

    /// Get the last computed result.
    ///
    /// # Errors
    ///
    /// Propagates backend and decoding errors.
    pub async fn get_result(&self, experiment_id: &str) -> Result<Option<ExperimentResult>> {
        Ok(self.load_result(experiment_id).await?.into_value())
    }

    /// Read the result along with the bytes needed for [`Self::swap_result`].
    ///
    /// # Errors
    ///
    /// Propagates backend and decoding errors.
    pub async fn load_result(&self, experiment_id: &str) -> Result<Snapshot<ExperimentResult>> {
        let raw = self.kv.get(&result_key(experiment_id)).await?;
        let value = raw.as_deref().map(decode).transpose()?;
        Ok(Snapshot { value, raw })
    }

    /// Replace the result only if it is unchanged since `previous` was loaded.
    ///
    /// Returns `false` when another writer got there first.
    ///
    /// # Errors
    ///
    /// Propagates backend and encoding errors.
    pub async fn swap_result(
        &self,
        experiment_id: &str,
        previous: &Snapshot<ExperimentResult>,
        next: &ExperimentResult,
    ) -> Result<bool> {
        let outcome = self
            .kv
            .compare_and_swap(&result_key(experiment_id), previous.raw.as_deref(), encode(next)?)
            .await?;
        Ok(outcome == CasOutcome::Swapped)
    }

    /// All stored results, ordered by experiment id.
    ///
    /// # Errors
    ///
    /// Propagates backend and decoding errors.
    pub async fn list_results(&self) -> Result<Vec<ExperimentResult>> {
        self.kv
            .scan_prefix(&result_prefix())
            .await?
            .iter()
            .map(|(_, bytes)| decode(bytes))
            .collect()
    }
}
