//! Core types shared across hpcmaint components

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Lifecycle state of a provider maintenance event.
///
/// `SUCCEEDED` and `COMPLETED` both appear in the wild depending on region;
/// both count as success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventLifecycle {
    Scheduled,
    Started,
    Processing,
    Succeeded,
    Completed,
    Failed,
    Canceled,
    /// A state this tool does not know about; carried verbatim.
    Unknown(String),
}

impl EventLifecycle {
    /// Parse the provider's uppercase state token.
    pub fn parse(token: &str) -> Self {
        match token {
            "SCHEDULED" => Self::Scheduled,
            "STARTED" => Self::Started,
            "PROCESSING" => Self::Processing,
            "SUCCEEDED" => Self::Succeeded,
            "COMPLETED" => Self::Completed,
            "FAILED" => Self::Failed,
            "CANCELED" => Self::Canceled,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Terminal states: the provider will not advance the event further.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Completed | Self::Failed | Self::Canceled
        )
    }

    /// Maintenance finished and the node is expected to be healthy.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Completed)
    }

    /// Maintenance is underway.
    pub fn is_in_progress(&self) -> bool {
        matches!(self, Self::Started | Self::Processing)
    }

    /// Provider token for this state.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Scheduled => "SCHEDULED",
            Self::Started => "STARTED",
            Self::Processing => "PROCESSING",
            Self::Succeeded => "SUCCEEDED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Canceled => "CANCELED",
            Self::Unknown(s) => s,
        }
    }
}

impl From<String> for EventLifecycle {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<EventLifecycle> for String {
    fn from(state: EventLifecycle) -> Self {
        state.as_str().to_string()
    }
}

impl std::fmt::Display for EventLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A provider-issued maintenance event, as consumed by the orchestrator.
///
/// Created by the provider and never mutated locally; the orchestrator only
/// requests transitions and re-reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceEvent {
    pub event_id: String,
    pub instance_id: String,
    pub compartment_id: String,
    /// Fault ids reported for this event, sorted for deterministic selection.
    pub fault_ids: BTreeSet<String>,
    pub lifecycle_state: EventLifecycle,
    #[serde(default)]
    pub time_window_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub freeform_tags: BTreeMap<String, String>,
    /// Provider action on the instance (e.g. REBOOT_MIGRATION, TERMINATE).
    #[serde(default)]
    pub instance_action: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Observable node state in the workload manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeState {
    Idle,
    Allocated,
    Mixed,
    /// Draining: no new jobs, running jobs finishing.
    Drain,
    /// Drained and empty.
    Drained,
    Down,
    /// RESUME requested, not yet reflected.
    Resuming,
    Unknown(String),
}

impl NodeState {
    /// Parse a Slurm `sinfo %t` state token. Slurm appends flag characters
    /// (`*~#!%$@+`) to the base token; those are stripped first.
    pub fn parse(token: &str) -> Self {
        let base: String = token
            .trim()
            .to_ascii_lowercase()
            .chars()
            .take_while(|c| c.is_ascii_alphabetic())
            .collect();
        match base.as_str() {
            "idle" => Self::Idle,
            "alloc" | "allocated" => Self::Allocated,
            "mix" | "mixed" => Self::Mixed,
            "drng" | "draining" => Self::Drain,
            "drain" | "drained" => Self::Drained,
            "down" => Self::Down,
            "resume" | "resuming" => Self::Resuming,
            _ => Self::Unknown(token.trim().to_string()),
        }
    }

    /// Safe for maintenance: no new work will land on the node.
    pub fn is_quiesced(&self) -> bool {
        matches!(self, Self::Drain | Self::Drained)
    }
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let token = match self {
            Self::Idle => "idle",
            Self::Allocated => "alloc",
            Self::Mixed => "mix",
            Self::Drain => "drng",
            Self::Drained => "drain",
            Self::Down => "down",
            Self::Resuming => "resume",
            Self::Unknown(s) => s,
        };
        f.write_str(token)
    }
}

/// State of an asynchronous provider work request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum WorkRequestState {
    Accepted,
    InProgress,
    Succeeded,
    Failed,
    Canceled,
    Unknown(String),
}

impl WorkRequestState {
    pub fn parse(token: &str) -> Self {
        match token {
            "ACCEPTED" => Self::Accepted,
            "IN_PROGRESS" => Self::InProgress,
            "SUCCEEDED" => Self::Succeeded,
            "FAILED" => Self::Failed,
            "CANCELED" => Self::Canceled,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Accepted => "ACCEPTED",
            Self::InProgress => "IN_PROGRESS",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Canceled => "CANCELED",
            Self::Unknown(s) => s,
        }
    }
}

impl From<String> for WorkRequestState {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<WorkRequestState> for String {
    fn from(state: WorkRequestState) -> Self {
        state.as_str().to_string()
    }
}

/// The unit of work one worker owns end-to-end: a single approved fault on a
/// single resolved host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub event_id: String,
    pub instance_id: String,
    pub hostname: String,
    /// The single approved fault selected for this event.
    pub fault_id: String,
    pub compartment_id: String,
    pub window_start: Option<DateTime<Utc>>,
}

/// Fields a schedule request is allowed to change on an event.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateMaintenanceEvent {
    pub time_window_start: Option<DateTime<Utc>>,
    pub freeform_tags: BTreeMap<String, String>,
}

/// Health verdict for a node after maintenance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthVerdict {
    Pass,
    Fail,
}

/// Outcome of a health probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub verdict: HealthVerdict,
    pub reason: Option<String>,
}

impl HealthReport {
    pub fn pass() -> Self {
        Self {
            verdict: HealthVerdict::Pass,
            reason: None,
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            verdict: HealthVerdict::Fail,
            reason: Some(reason.into()),
        }
    }

    pub fn passed(&self) -> bool {
        self.verdict == HealthVerdict::Pass
    }
}
