//! User segments - gate first-time assignment on user attributes

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::ConfigValue;

/// Attributes describing a user, supplied by the caller's identity layer.
pub type UserAttributes = BTreeMap<String, ConfigValue>;

/// Comparison applied by a [`SegmentCondition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentOperator {
    /// Values are equal (same type).
    Equals,
    /// Text attribute contains the text value.
    Contains,
    /// Numeric attribute is strictly greater.
    GreaterThan,
    /// Numeric attribute is strictly less.
    LessThan,
}

/// One predicate over a user attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentCondition {
    field: String,
    operator: SegmentOperator,
    value: ConfigValue,
}

impl SegmentCondition {
    /// Create a condition `field <operator> value`.
    #[must_use]
    pub fn new(
        field: impl Into<String>,
        operator: SegmentOperator,
        value: impl Into<ConfigValue>,
    ) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }

    /// Whether `attributes` satisfy this condition.
    ///
    /// A missing attribute or a type mismatch never matches.
    #[must_use]
    pub fn matches(&self, attributes: &UserAttributes) -> bool {
        let Some(actual) = attributes.get(&self.field) else {
            return false;
        };
        match self.operator {
            SegmentOperator::Equals => actual == &self.value,
            SegmentOperator::Contains => match (actual.as_str(), self.value.as_str()) {
                (Some(haystack), Some(needle)) => haystack.contains(needle),
                _ => false,
            },
            SegmentOperator::GreaterThan => match (actual.as_f64(), self.value.as_f64()) {
                (Some(a), Some(b)) => a > b,
                _ => false,
            },
            SegmentOperator::LessThan => match (actual.as_f64(), self.value.as_f64()) {
                (Some(a), Some(b)) => a < b,
                _ => false,
            },
        }
    }
}

/// A named audience: every condition must hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSegment {
    id: String,
    name: String,
    #[serde(default)]
    conditions: Vec<SegmentCondition>,
}

impl UserSegment {
    /// Create a segment with no conditions (matches everyone).
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            conditions: Vec::new(),
        }
    }

    /// Add a condition.
    #[must_use]
    pub fn with_condition(mut self, condition: SegmentCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Get the segment ID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the segment name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the conditions.
    #[must_use]
    pub fn conditions(&self) -> &[SegmentCondition] {
        &self.conditions
    }

    /// Whether a user with `attributes` belongs to the segment.
    #[must_use]
    pub fn contains(&self, attributes: &UserAttributes) -> bool {
        self.conditions.iter().all(|c| c.matches(attributes))
    }
}
