//! Outcome aggregates - per-variant and per-experiment results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::stats::Sample;

/// Aggregated outcome for one variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantOutcome {
    variant_id: String,
    name: String,
    participants: u64,
    conversions: f64,
    conversion_rate: f64,
    confidence_interval: (f64, f64),
    statistical_significance: f64,
    is_winner: bool,
}

impl VariantOutcome {
    /// Create an outcome from raw counts; the rate is derived.
    ///
    /// Significance starts at 0 and `is_winner` at false.
    #[must_use]
    pub fn new(
        variant_id: impl Into<String>,
        name: impl Into<String>,
        participants: u64,
        conversions: f64,
    ) -> Self {
        let sample = Sample::new(conversions, participants);
        Self {
            variant_id: variant_id.into(),
            name: name.into(),
            participants,
            conversions,
            conversion_rate: sample.rate(),
            confidence_interval: (0.0, 0.0),
            statistical_significance: 0.0,
            is_winner: false,
        }
    }

    /// Get the variant ID.
    #[must_use]
    pub fn variant_id(&self) -> &str {
        &self.variant_id
    }

    /// Get the variant name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Distinct users assigned to this variant.
    #[must_use]
    pub const fn participants(&self) -> u64 {
        self.participants
    }

    /// Cumulative conversion value.
    #[must_use]
    pub const fn conversions(&self) -> f64 {
        self.conversions
    }

    /// `conversions / participants`, or 0 without participants.
    #[must_use]
    pub const fn conversion_rate(&self) -> f64 {
        self.conversion_rate
    }

    /// Confidence interval around the conversion rate at the experiment's level.
    #[must_use]
    pub const fn confidence_interval(&self) -> (f64, f64) {
        self.confidence_interval
    }

    /// Percentage confidence that this variant differs from control.
    #[must_use]
    pub const fn statistical_significance(&self) -> f64 {
        self.statistical_significance
    }

    /// Whether this variant is the declared winner.
    #[must_use]
    pub const fn is_winner(&self) -> bool {
        self.is_winner
    }

    /// The counts as a statistics sample.
    #[must_use]
    pub const fn sample(&self) -> Sample {
        Sample::new(self.conversions, self.participants)
    }

    pub(crate) fn set_confidence_interval(&mut self, interval: (f64, f64)) {
        self.confidence_interval = interval;
    }

    pub(crate) fn set_statistical_significance(&mut self, significance: f64) {
        self.statistical_significance = significance;
    }
}

/// Aggregated result for one experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentResult {
    experiment_id: String,
    duration_ms: i64,
    total_participants: u64,
    variants: Vec<VariantOutcome>,
    is_statistically_significant: bool,
    winner_variant_id: Option<String>,
    improvement_percent: Option<f64>,
    computed_at: DateTime<Utc>,
}

impl ExperimentResult {
    /// Create a result with no significance decision.
    ///
    /// `total_participants` is derived from the variant outcomes.
    #[must_use]
    pub fn new(
        experiment_id: impl Into<String>,
        duration_ms: i64,
        variants: Vec<VariantOutcome>,
        computed_at: DateTime<Utc>,
    ) -> Self {
        let total_participants = variants.iter().map(VariantOutcome::participants).sum();
        Self {
            experiment_id: experiment_id.into(),
            duration_ms,
            total_participants,
            variants,
            is_statistically_significant: false,
            winner_variant_id: None,
            improvement_percent: None,
            computed_at,
        }
    }

    /// Get the experiment ID.
    #[must_use]
    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    /// Milliseconds between the experiment start and this computation.
    #[must_use]
    pub const fn duration_ms(&self) -> i64 {
        self.duration_ms
    }

    /// Sum of participants across variants.
    #[must_use]
    pub const fn total_participants(&self) -> u64 {
        self.total_participants
    }

    /// Per-variant outcomes in definition order.
    #[must_use]
    pub fn variants(&self) -> &[VariantOutcome] {
        &self.variants
    }

    /// Look up one variant's outcome.
    #[must_use]
    pub fn variant(&self, variant_id: &str) -> Option<&VariantOutcome> {
        self.variants.iter().find(|v| v.variant_id() == variant_id)
    }

    /// Whether the experiment reached significance.
    #[must_use]
    pub const fn is_statistically_significant(&self) -> bool {
        self.is_statistically_significant
    }

    /// The declared winner, if any.
    #[must_use]
    pub fn winner_variant_id(&self) -> Option<&str> {
        self.winner_variant_id.as_deref()
    }

    /// Winner's relative lift over control in percent.
    ///
    /// `None` without a winner or while control's rate is 0.
    #[must_use]
    pub const fn improvement_percent(&self) -> Option<f64> {
        self.improvement_percent
    }

    /// When the result was computed.
    #[must_use]
    pub const fn computed_at(&self) -> DateTime<Utc> {
        self.computed_at
    }

    pub(crate) fn variants_mut(&mut self) -> &mut [VariantOutcome] {
        &mut self.variants
    }

    pub(crate) fn mark_significant(&mut self) {
        self.is_statistically_significant = true;
    }

    /// Declare `variant_id` the winner and refresh its lift over `control_rate`.
    pub(crate) fn declare_winner(&mut self, variant_id: &str, control_rate: f64) {
        let mut winner_rate = None;
        for outcome in &mut self.variants {
            outcome.is_winner = outcome.variant_id == variant_id;
            if outcome.is_winner {
                winner_rate = Some(outcome.conversion_rate);
            }
        }
        self.winner_variant_id = Some(variant_id.to_string());
        self.improvement_percent = winner_rate
            .filter(|_| control_rate > 0.0)
            .map(|rate| (rate - control_rate) / control_rate * 100.0);
    }

    /// Carry forward a significance decision made by an earlier computation.
    ///
    /// Significance is monotonic: once declared it is never withdrawn, and a
    /// declared winner keeps the title while its lift is refreshed from the
    /// current rates. A winner may still be declared later if the earlier
    /// result was significant without one.
    #[must_use]
    pub fn retain_declared_significance(mut self, previous: Option<&Self>, control_rate: f64) -> Self {
        let Some(previous) = previous else {
            return self;
        };
        if previous.is_statistically_significant {
            self.is_statistically_significant = true;
        }
        if let Some(winner) = previous.winner_variant_id.as_deref() {
            self.declare_winner(winner, control_rate);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_with(rates: &[(&str, u64, f64)]) -> ExperimentResult {
        let variants = rates
            .iter()
            .map(|(id, n, c)| VariantOutcome::new(*id, *id, *n, *c))
            .collect();
        ExperimentResult::new("exp-1", 0, variants, Utc::now())
    }

    #[test]
    fn test_variant_outcome_rate() {
        let outcome = VariantOutcome::new("a", "A", 200, 50.0);
        assert!((outcome.conversion_rate() - 0.25).abs() < f64::EPSILON);

        let empty = VariantOutcome::new("b", "B", 0, 0.0);
        assert!(empty.conversion_rate().abs() < f64::EPSILON);
    }

    #[test]
    fn test_total_participants() {
        let result = result_with(&[("control", 60, 6.0), ("b", 40, 8.0)]);
        assert_eq!(result.total_participants(), 100);
        assert!(!result.is_statistically_significant());
    }

    #[test]
    fn test_declare_winner_sets_improvement() {
        let mut result = result_with(&[("control", 100, 10.0), ("b", 100, 20.0)]);
        result.mark_significant();
        result.declare_winner("b", 0.10);

        assert_eq!(result.winner_variant_id(), Some("b"));
        assert!(result.variant("b").unwrap().is_winner());
        assert!(!result.variant("control").unwrap().is_winner());
        assert!((result.improvement_percent().unwrap() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_improvement_undefined_with_zero_control_rate() {
        let mut result = result_with(&[("control", 100, 0.0), ("b", 100, 20.0)]);
        result.declare_winner("b", 0.0);
        assert_eq!(result.winner_variant_id(), Some("b"));
        assert!(result.improvement_percent().is_none());
    }

    #[test]
    fn test_retain_declared_significance() {
        let mut previous = result_with(&[("control", 100, 10.0), ("b", 100, 20.0)]);
        previous.mark_significant();
        previous.declare_winner("b", 0.10);

        // Later data no longer clears the bar on its own
        let fresh = result_with(&[("control", 150, 15.0), ("b", 150, 18.0)]);
        let merged = fresh.retain_declared_significance(Some(&previous), 0.10);

        assert!(merged.is_statistically_significant());
        assert_eq!(merged.winner_variant_id(), Some("b"));
        assert_eq!(merged.total_participants(), 300);
        // Lift refreshed from the current rates: 0.12 vs 0.10
        assert!((merged.improvement_percent().unwrap() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_retain_without_previous_is_identity() {
        let fresh = result_with(&[("control", 10, 1.0), ("b", 10, 2.0)]);
        let merged = fresh.clone().retain_declared_significance(None, 0.1);
        assert_eq!(merged, fresh);
    }
}
