//! Collaborator contracts
//!
//! The orchestrator touches the outside world through these four interfaces
//! ONLY — never concrete clients. Mutating operations are marked; in dry-run
//! mode the phase drivers replace them with audit records.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{
    HealthReport, MaintenanceEvent, NodeState, UpdateMaintenanceEvent, WorkRequestState,
};

/// Cloud compute control plane: maintenance events and their work requests.
#[async_trait]
pub trait CloudCompute: Send + Sync {
    /// All compartments in scope for discovery, tenancy root included.
    async fn list_compartments(&self) -> Result<Vec<String>>;

    /// Maintenance events currently known for one compartment.
    async fn list_instance_maintenance_events(
        &self,
        compartment_id: &str,
    ) -> Result<Vec<MaintenanceEvent>>;

    /// Re-read a single event by id.
    async fn get_instance_maintenance_event(&self, event_id: &str) -> Result<MaintenanceEvent>;

    /// Request the maintenance to run inside a time window. Mutating.
    /// Returns the work-request handle for the asynchronous update.
    async fn update_instance_maintenance_event(
        &self,
        event_id: &str,
        update: UpdateMaintenanceEvent,
    ) -> Result<String>;

    /// Poll the state of an asynchronous work request.
    async fn get_work_request(&self, work_request_id: &str) -> Result<WorkRequestState>;
}

/// Workload manager (Slurm) node control.
#[async_trait]
pub trait WorkloadManager: Send + Sync {
    /// Current scheduler state of a node.
    async fn node_state(&self, hostname: &str) -> Result<NodeState>;

    /// Put a node into DRAIN with a reason. Mutating, idempotent.
    async fn set_drain(&self, hostname: &str, reason: &str) -> Result<()>;

    /// Return a node to service. Mutating.
    async fn set_resume(&self, hostname: &str) -> Result<()>;

    /// Mark a node DOWN with a reason. Mutating.
    async fn set_down(&self, hostname: &str, reason: &str) -> Result<()>;
}

/// Inventory: maps cloud instance ids to cluster hostnames.
#[async_trait]
pub trait Inventory: Send + Sync {
    /// Resolve an instance id to a hostname, `None` when unknown.
    async fn resolve_host(&self, instance_id: &str) -> Result<Option<String>>;
}

/// Post-maintenance health predicate.
///
/// Implementations must be repeatable, must not mutate external state, and
/// must return within the caller-imposed timeout.
#[async_trait]
pub trait HealthChecker: Send + Sync {
    async fn check(&self, hostname: &str) -> Result<HealthReport>;
}
