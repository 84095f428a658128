//! Error types for abtest-core
//!
//! Toyota Way: Clear error messages with actionable guidance (Respect for People)

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// abtest-core error types
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed experiment or variant definition (raised at creation time only)
    #[error("Invalid experiment configuration: {0}\nFix the definition and create it again")]
    InvalidConfiguration(String),

    /// Unknown experiment id
    #[error("Experiment not found: {0}")]
    NotFound(String),

    /// The persistence backend failed (no retries are attempted by the manager)
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Lifecycle transition not permitted by the experiment state machine
    #[error("Invalid state transition for experiment {experiment_id}: {from} -> {to}")]
    InvalidStateTransition {
        /// Experiment the transition was attempted on
        experiment_id: String,
        /// Current status
        from: String,
        /// Requested status
        to: String,
    },

    /// Invalid call argument
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Stored record could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
