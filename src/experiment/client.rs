//! Per-user client - resolve one experiment for one user with a fallback
//!
//! Wraps a shared [`ExperimentManager`] for code that renders a single
//! experiment for a single user. Resolution happens once; until then the
//! client serves the fallback.

use std::sync::Arc;
use tracing::warn;

use super::{ExperimentManager, ExperimentResult, VariantConfig};
use crate::kv::KvStore;
use crate::{Error, Result};

/// What a user should see for one experiment.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// Assigned variant; `None` when the fallback is served.
    pub variant_id: Option<String>,
    /// Assigned variant's configuration, or the caller's fallback.
    pub config: VariantConfig,
    /// False when the fallback is served.
    pub is_in_experiment: bool,
}

impl Resolution {
    fn fallback(config: &VariantConfig) -> Self {
        Self {
            variant_id: None,
            config: config.clone(),
            is_in_experiment: false,
        }
    }
}

/// Resolves and reports one experiment for one user.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use abtest_core::experiment::{ConfigValue, ExperimentClient, ExperimentManager, VariantConfig};
/// use abtest_core::kv::MemoryKvStore;
///
/// # async fn example() -> abtest_core::Result<()> {
/// let manager = Arc::new(ExperimentManager::new(MemoryKvStore::new()));
/// let mut defaults = VariantConfig::new();
/// defaults.insert("layout".into(), ConfigValue::from("original"));
/// let mut client = ExperimentClient::new(manager, "unknown-experiment", "user-1", defaults.clone());
///
/// let resolution = client.resolve().await?;
/// assert_eq!(resolution.variant_id, None);
/// assert_eq!(resolution.config, defaults);
/// assert!(!resolution.is_in_experiment);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ExperimentClient<S: KvStore> {
    manager: Arc<ExperimentManager<S>>,
    experiment_id: String,
    user_id: String,
    fallback: VariantConfig,
    resolution: Option<Resolution>,
}

impl<S: KvStore> ExperimentClient<S> {
    /// Create an unresolved client.
    #[must_use]
    pub fn new(
        manager: Arc<ExperimentManager<S>>,
        experiment_id: impl Into<String>,
        user_id: impl Into<String>,
        fallback: VariantConfig,
    ) -> Self {
        Self {
            manager,
            experiment_id: experiment_id.into(),
            user_id: user_id.into(),
            fallback,
            resolution: None,
        }
    }

    /// What to render before resolution: the fallback configuration,
    /// outside the experiment.
    #[must_use]
    pub fn pending(&self) -> Resolution {
        Resolution::fallback(&self.fallback)
    }

    /// True until [`Self::resolve`] has completed.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.resolution.is_none()
    }

    /// The resolution, once available.
    #[must_use]
    pub const fn resolution(&self) -> Option<&Resolution> {
        self.resolution.as_ref()
    }

    /// Assign the user and cache the outcome; later calls return the cache.
    ///
    /// Serves the fallback when the experiment is unknown, not running, or
    /// the assigned variant is missing from the definition.
    ///
    /// # Errors
    ///
    /// Storage failures propagate and leave the client pending.
    pub async fn resolve(&mut self) -> Result<&Resolution> {
        let resolution = match self.resolution.take() {
            Some(resolution) => resolution,
            None => self.lookup().await?,
        };
        Ok(self.resolution.insert(resolution))
    }

    async fn lookup(&self) -> Result<Resolution> {
        let variant_id = match self.manager.assign(&self.experiment_id, &self.user_id).await {
            Ok(Some(variant_id)) => variant_id,
            Ok(None) => return Ok(self.pending()),
            Err(Error::NotFound(_)) => {
                warn!(experiment_id = %self.experiment_id, "unknown experiment, serving fallback");
                return Ok(self.pending());
            }
            Err(err) => return Err(err),
        };

        match self
            .manager
            .variant_config(&self.experiment_id, &variant_id)
            .await?
        {
            Some(config) => Ok(Resolution {
                variant_id: Some(variant_id),
                config,
                is_in_experiment: true,
            }),
            None => Ok(self.pending()),
        }
    }

    /// Report a conversion for this user.
    ///
    /// # Errors
    ///
    /// As [`ExperimentManager::record_conversion`].
    pub async fn record_conversion(&self, value: f64) -> Result<Option<ExperimentResult>> {
        self.manager
            .record_conversion(&self.experiment_id, &self.user_id, value)
            .await
    }

    /// Report a named metric event for this user.
    ///
    /// # Errors
    ///
    /// As [`ExperimentManager::record_event`].
    pub async fn record_event(&self, metric: &str, value: f64) -> Result<Option<ExperimentResult>> {
        self.manager
            .record_event(&self.experiment_id, &self.user_id, metric, value)
            .await
    }
}
