//! Finalize phase
//!
//! Translate the combined outcome of the earlier phases into a
//! workload-manager transition: resume the node on success, or keep it
//! drained with a composite reason on any failure. The node state is read
//! first so a re-run (catchup on an already-finalized event) issues no
//! duplicate mutating call.

use hpcmaint_core::{
    retry::retry_transient, Job, Result, RetryPolicy,
};
use std::time::Duration;
use tracing::info;

use crate::audit::AuditRecord;
use crate::context::PassContext;

const WLM_RETRY: RetryPolicy = RetryPolicy::new(3, Duration::from_secs(2));

/// What failed upstream, when anything did.
#[derive(Debug, Clone)]
pub struct Failure {
    /// Taxonomy kind (`MaintenanceFailed`, `HealthFailed`, ...).
    pub kind: &'static str,
    pub detail: String,
}

/// How the host was left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeDecision {
    /// Node returned to service.
    Resumed,
    /// Node was already back in service; no call issued.
    AlreadyResumed,
    /// Node kept drained with a failure reason.
    Held,
}

/// Finalize `job`: `failure == None` is the PASS branch.
pub async fn execute(
    ctx: &PassContext,
    job: &Job,
    failure: Option<Failure>,
) -> Result<FinalizeDecision> {
    let mut cancel = ctx.cancel_rx();

    match failure {
        None => {
            // Guard read, skipped in dry runs where the node was never
            // drained to begin with.
            if !ctx.dry_run {
                let state = retry_transient(&WLM_RETRY, "node_state", &mut cancel, || {
                    ctx.wlm.node_state(&job.hostname)
                })
                .await?;
                if !state.is_quiesced() {
                    // Already resumed by an earlier pass or an operator.
                    info!(host = %job.hostname, %state, "node already in service");
                    ctx.audit.append(
                        AuditRecord::new("finalize", "already_resumed")
                            .host(&job.hostname)
                            .field("node_state", state.to_string()),
                    );
                    return Ok(FinalizeDecision::AlreadyResumed);
                }
                retry_transient(&WLM_RETRY, "set_resume", &mut cancel, || {
                    ctx.wlm.set_resume(&job.hostname)
                })
                .await?;
            }
            info!(host = %job.hostname, "node resumed");
            ctx.audit.append(
                AuditRecord::new("finalize", "resumed")
                    .host(&job.hostname)
                    .dry_run(ctx.dry_run),
            );
            Ok(FinalizeDecision::Resumed)
        }
        Some(failure) => {
            let reason = format!("{}:{}", job.fault_id, failure.kind);
            if !ctx.dry_run {
                retry_transient(&WLM_RETRY, "set_drain", &mut cancel, || {
                    ctx.wlm.set_drain(&job.hostname, &reason)
                })
                .await?;
            }
            info!(host = %job.hostname, %reason, "node held drained");
            ctx.audit.append(
                AuditRecord::new("finalize", "held")
                    .host(&job.hostname)
                    .field("reason", reason.as_str())
                    .field("detail", failure.detail.as_str())
                    .dry_run(ctx.dry_run),
            );
            // Ticket integration is an audit-only hook for downstream CMDB
            // tooling to pick up.
            ctx.audit.append(
                AuditRecord::new("ticket", "open")
                    .host(&job.hostname)
                    .field("fault", job.fault_id.as_str())
                    .field("kind", failure.kind)
                    .dry_run(ctx.dry_run),
            );
            Ok(FinalizeDecision::Held)
        }
    }
}
