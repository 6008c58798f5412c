//! Error taxonomy for the orchestrator
//!
//! Every phase reports failures through [`MaintError`]. The variant decides
//! how the per-host state machine proceeds: `Transient` is retried by the
//! driver that saw it, `Config` aborts the pass, everything else becomes the
//! terminal disposition of the affected host only.

use std::time::Duration;
use thiserror::Error;

/// Result type used throughout hpcmaint.
pub type Result<T> = std::result::Result<T, MaintError>;

/// Errors that can occur while orchestrating maintenance.
#[derive(Error, Debug)]
pub enum MaintError {
    /// Missing or invalid required configuration; fatal, aborts the pass.
    #[error("configuration error: {0}")]
    Config(String),

    /// Retriable collaborator error; escalated after the driver's retry
    /// policy is exhausted.
    #[error("transient external error: {0}")]
    Transient(String),

    /// The node did not reach a quiesced state in time.
    #[error("drain of {host} timed out after {waited:?}")]
    DrainTimeout { host: String, waited: Duration },

    /// The provider rejected the schedule request after retries.
    #[error("schedule failed for event {event_id}: {detail}")]
    ScheduleFailed { event_id: String, detail: String },

    /// The provider reported the maintenance as FAILED or CANCELED.
    #[error("maintenance for event {event_id} ended {state}")]
    MaintenanceFailed { event_id: String, state: String },

    /// The post-maintenance health predicate returned FAIL.
    #[error("health check failed for {host}: {reason}")]
    HealthFailed { host: String, reason: String },

    /// The orchestrator-level cancellation signal fired.
    #[error("cancelled")]
    Cancelled,

    /// The inventory could not map an instance to a hostname.
    #[error("no hostname for instance {instance_id}")]
    Unresolved { instance_id: String },

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MaintError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a transient external error.
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    /// Stable taxonomy label, used in audit records and the outcome table.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "ConfigError",
            Self::Transient(_) | Self::Io(_) | Self::Json(_) => "TransientExternalError",
            Self::DrainTimeout { .. } => "DrainTimeout",
            Self::ScheduleFailed { .. } => "ScheduleFailed",
            Self::MaintenanceFailed { .. } => "MaintenanceFailed",
            Self::HealthFailed { .. } => "HealthFailed",
            Self::Cancelled => "Cancelled",
            Self::Unresolved { .. } => "Unresolved",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_labels_are_stable() {
        assert_eq!(MaintError::config("x").kind(), "ConfigError");
        assert_eq!(MaintError::transient("x").kind(), "TransientExternalError");
        assert_eq!(
            MaintError::DrainTimeout {
                host: "GPU-1".into(),
                waited: Duration::from_secs(1800),
            }
            .kind(),
            "DrainTimeout"
        );
        assert_eq!(MaintError::Cancelled.kind(), "Cancelled");
    }
}
