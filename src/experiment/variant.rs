//! Variant - one treatment arm of an experiment

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Primitive value carried in a variant configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    /// Boolean flag
    Bool(bool),
    /// Numeric setting
    Number(f64),
    /// Free-form text
    Text(String),
}

impl ConfigValue {
    /// The value as a boolean, if it is one.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The value as a number, if it is one.
    #[must_use]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// The value as text, if it is text.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for ConfigValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i32> for ConfigValue {
    fn from(value: i32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Opaque feature-flag payload interpreted only by the consuming feature.
pub type VariantConfig = BTreeMap<String, ConfigValue>;

/// Variant represents one treatment arm.
///
/// `weight` is a relative traffic share: weights `[1, 1]` and `[50, 50]`
/// split traffic identically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    id: String,
    name: String,
    #[serde(default)]
    description: String,
    weight: f64,
    #[serde(default)]
    config: VariantConfig,
    #[serde(default)]
    is_control: bool,
}

impl Variant {
    /// Create a non-control variant with an empty configuration.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, weight: f64) -> Self {
        VariantBuilder::new(id, name, weight).build()
    }

    /// Create a builder for a variant with optional fields.
    #[must_use]
    pub fn builder(
        id: impl Into<String>,
        name: impl Into<String>,
        weight: f64,
    ) -> VariantBuilder {
        VariantBuilder::new(id, name, weight)
    }

    /// Get the variant ID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the variant name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the variant description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Get the relative traffic weight.
    #[must_use]
    pub const fn weight(&self) -> f64 {
        self.weight
    }

    /// Get the configuration payload.
    #[must_use]
    pub const fn config(&self) -> &VariantConfig {
        &self.config
    }

    /// Whether this is the control variant.
    #[must_use]
    pub const fn is_control(&self) -> bool {
        self.is_control
    }
}

/// Builder for `Variant`.
#[derive(Debug)]
pub struct VariantBuilder {
    variant: Variant,
}

impl VariantBuilder {
    /// Create a new builder with required fields.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, weight: f64) -> Self {
        Self {
            variant: Variant {
                id: id.into(),
                name: name.into(),
                description: String::new(),
                weight,
                config: VariantConfig::new(),
                is_control: false,
            },
        }
    }

    /// Set the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.variant.description = description.into();
        self
    }

    /// Add one configuration entry.
    #[must_use]
    pub fn setting(mut self, key: impl Into<String>, value: impl Into<ConfigValue>) -> Self {
        self.variant.config.insert(key.into(), value.into());
        self
    }

    /// Replace the whole configuration.
    #[must_use]
    pub fn config(mut self, config: VariantConfig) -> Self {
        self.variant.config = config;
        self
    }

    /// Flag the variant as the statistical baseline.
    #[must_use]
    pub const fn control(mut self) -> Self {
        self.variant.is_control = true;
        self
    }

    /// Build the `Variant`.
    #[must_use]
    pub fn build(self) -> Variant {
        self.variant
    }
}
