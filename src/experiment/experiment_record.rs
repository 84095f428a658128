//! Experiment Record - root entity: definition, lifecycle and validation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use super::Variant;
use crate::{Error, Result};

const DEFAULT_CONFIDENCE_LEVEL: f64 = 95.0;
const DEFAULT_MINIMUM_SAMPLE_SIZE: u64 = 100;

/// Lifecycle status of an experiment.
///
/// ```text
/// draft ──> running <──> paused
///              │            │
///              └──> completed <┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExperimentStatus {
    /// Defined but not yet accepting traffic.
    Draft,
    /// Accepting new assignments.
    Running,
    /// Temporarily closed to new assignments.
    Paused,
    /// Finished; results stay queryable.
    Completed,
}

impl ExperimentStatus {
    /// Get status name as string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
        }
    }

    /// Whether the state machine allows moving from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Draft | Self::Paused, Self::Running)
                | (Self::Running, Self::Paused)
                | (Self::Draft | Self::Running | Self::Paused, Self::Completed)
        )
    }
}

impl fmt::Display for ExperimentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operator-supplied experiment definition, validated on creation.
///
/// Deserializes from the JSON definitions format:
///
/// ```json
/// {
///   "id": "home_layout",
///   "name": "Home layout",
///   "target_metric": "selection_start",
///   "minimum_sample_size": 100,
///   "confidence_level": 95,
///   "variants": [
///     { "id": "control", "name": "Original", "weight": 50, "is_control": true,
///       "config": { "layout": "original" } },
///     { "id": "optimized", "name": "Optimized", "weight": 50,
///       "config": { "layout": "optimized" } }
///   ]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentDefinition {
    id: String,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default = "default_target_metric")]
    target_metric: String,
    #[serde(default = "default_minimum_sample_size")]
    minimum_sample_size: u64,
    #[serde(default = "default_confidence_level")]
    confidence_level: f64,
    variants: Vec<Variant>,
}

fn default_target_metric() -> String {
    "conversion".to_string()
}

const fn default_minimum_sample_size() -> u64 {
    DEFAULT_MINIMUM_SAMPLE_SIZE
}

const fn default_confidence_level() -> f64 {
    DEFAULT_CONFIDENCE_LEVEL
}

impl ExperimentDefinition {
    /// Create a builder with the required id and name.
    #[must_use]
    pub fn builder(id: impl Into<String>, name: impl Into<String>) -> ExperimentDefinitionBuilder {
        ExperimentDefinitionBuilder::new(id, name)
    }

    /// Get the experiment ID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the defined variants.
    #[must_use]
    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    /// Check the definition invariants.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfiguration` naming the first violated rule:
    /// empty or control-character id, fewer than two variants, not exactly
    /// one control, duplicate/empty variant ids, non-positive weights, or a
    /// confidence level outside (0, 100).
    pub fn validate(&self) -> Result<()> {
        check_id("experiment id", &self.id)?;

        if self.variants.len() < 2 {
            return Err(invalid(format!(
                "experiment {} needs at least 2 variants, found {}",
                self.id,
                self.variants.len()
            )));
        }

        let controls = self.variants.iter().filter(|v| v.is_control()).count();
        if controls != 1 {
            return Err(invalid(format!(
                "experiment {} needs exactly one control variant, found {controls}",
                self.id
            )));
        }

        let mut seen = HashSet::with_capacity(self.variants.len());
        for variant in &self.variants {
            check_id("variant id", variant.id())?;
            if !seen.insert(variant.id()) {
                return Err(invalid(format!(
                    "experiment {} has duplicate variant id {}",
                    self.id,
                    variant.id()
                )));
            }
            if !(variant.weight().is_finite() && variant.weight() > 0.0) {
                return Err(invalid(format!(
                    "variant {} weight must be a positive number, found {}",
                    variant.id(),
                    variant.weight()
                )));
            }
        }

        if !(self.confidence_level > 0.0 && self.confidence_level < 100.0) {
            return Err(invalid(format!(
                "confidence level must be between 0 and 100 (exclusive), found {}",
                self.confidence_level
            )));
        }

        Ok(())
    }
}

fn check_id(what: &str, id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(invalid(format!("{what} must not be empty")));
    }
    if id.chars().any(char::is_control) {
        return Err(invalid(format!(
            "{what} {id:?} must not contain control characters"
        )));
    }
    Ok(())
}

fn invalid(message: String) -> Error {
    Error::InvalidConfiguration(message)
}

/// Builder for `ExperimentDefinition`.
#[derive(Debug)]
pub struct ExperimentDefinitionBuilder {
    definition: ExperimentDefinition,
}

impl ExperimentDefinitionBuilder {
    /// Create a new builder with required fields and default thresholds
    /// (95% confidence, 100 participants).
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            definition: ExperimentDefinition {
                id: id.into(),
                name: name.into(),
                description: String::new(),
                target_metric: default_target_metric(),
                minimum_sample_size: DEFAULT_MINIMUM_SAMPLE_SIZE,
                confidence_level: DEFAULT_CONFIDENCE_LEVEL,
                variants: Vec::new(),
            },
        }
    }

    /// Set the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.definition.description = description.into();
        self
    }

    /// Set the outcome event this experiment optimizes for.
    #[must_use]
    pub fn target_metric(mut self, metric: impl Into<String>) -> Self {
        self.definition.target_metric = metric.into();
        self
    }

    /// Set the participant count below which no significance decision is made.
    #[must_use]
    pub const fn minimum_sample_size(mut self, size: u64) -> Self {
        self.definition.minimum_sample_size = size;
        self
    }

    /// Set the significance threshold as a percentage (e.g. 95.0).
    #[must_use]
    pub const fn confidence_level(mut self, level: f64) -> Self {
        self.definition.confidence_level = level;
        self
    }

    /// Append a variant.
    #[must_use]
    pub fn variant(mut self, variant: Variant) -> Self {
        self.definition.variants.push(variant);
        self
    }

    /// Build the definition (unvalidated; validation happens on creation).
    #[must_use]
    pub fn build(self) -> ExperimentDefinition {
        self.definition
    }
}

/// A stored experiment: a validated definition plus lifecycle state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    id: String,
    name: String,
    description: String,
    status: ExperimentStatus,
    start_date: DateTime<Utc>,
    end_date: Option<DateTime<Utc>>,
    target_metric: String,
    minimum_sample_size: u64,
    confidence_level: f64,
    variants: Vec<Variant>,
}

impl Experiment {
    /// Validate `definition` and turn it into an experiment in `status`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfiguration` if the definition is malformed.
    pub fn from_definition(
        definition: ExperimentDefinition,
        status: ExperimentStatus,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        definition.validate()?;
        Ok(Self {
            id: definition.id,
            name: definition.name,
            description: definition.description,
            status,
            start_date: now,
            end_date: None,
            target_metric: definition.target_metric,
            minimum_sample_size: definition.minimum_sample_size,
            confidence_level: definition.confidence_level,
            variants: definition.variants,
        })
    }

    /// Get the experiment ID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the experiment name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Get the lifecycle status.
    #[must_use]
    pub const fn status(&self) -> ExperimentStatus {
        self.status
    }

    /// Whether the experiment accepts new assignments.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status == ExperimentStatus::Running
    }

    /// When the experiment was created, or started if it began as a draft.
    #[must_use]
    pub const fn start_date(&self) -> DateTime<Utc> {
        self.start_date
    }

    /// When the experiment was completed, if it has been.
    #[must_use]
    pub const fn end_date(&self) -> Option<DateTime<Utc>> {
        self.end_date
    }

    /// Get the target outcome metric.
    #[must_use]
    pub fn target_metric(&self) -> &str {
        &self.target_metric
    }

    /// Get the minimum total participants before significance is evaluated.
    #[must_use]
    pub const fn minimum_sample_size(&self) -> u64 {
        self.minimum_sample_size
    }

    /// Get the significance threshold percentage.
    #[must_use]
    pub const fn confidence_level(&self) -> f64 {
        self.confidence_level
    }

    /// Get the variants in definition order.
    #[must_use]
    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    /// Get the control variant.
    #[must_use]
    pub fn control(&self) -> Option<&Variant> {
        self.variants.iter().find(|v| v.is_control())
    }

    /// Look up a variant by ID.
    #[must_use]
    pub fn variant(&self, variant_id: &str) -> Option<&Variant> {
        self.variants.iter().find(|v| v.id() == variant_id)
    }

    /// Move to `next`, stamping `start_date` when a draft starts and
    /// `end_date` on completion.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidStateTransition` if the state machine forbids it.
    pub fn transition(&mut self, next: ExperimentStatus, now: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidStateTransition {
                experiment_id: self.id.clone(),
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        if self.status == ExperimentStatus::Draft && next == ExperimentStatus::Running {
            self.start_date = now;
        }
        if next == ExperimentStatus::Completed {
            self.end_date = Some(now);
        }
        self.status = next;
        Ok(())
    }
}
