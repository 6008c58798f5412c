//! Drain phase
//!
//! Quiesce the node before maintenance: request DRAIN with the fault id as
//! the reason, then poll the workload manager until the node is observed in
//! DRAIN or DRAINED. The request is idempotent and is sent even when the
//! node is already quiesced.

use std::time::Duration;

use hpcmaint_core::{
    retry::{retry_transient, sleep_or_cancel},
    Job, MaintError, Result, RetryPolicy,
};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::audit::AuditRecord;
use crate::context::PassContext;

const WLM_RETRY: RetryPolicy = RetryPolicy::new(3, Duration::from_secs(2));

/// Drain `job.hostname` and wait for it to quiesce.
pub async fn execute(ctx: &PassContext, job: &Job) -> Result<()> {
    let reason = job.fault_id.as_str();
    ctx.audit.append(
        AuditRecord::new("drain", "requested")
            .host(&job.hostname)
            .field("reason", reason)
            .dry_run(ctx.dry_run),
    );

    if ctx.dry_run {
        // The node will never actually drain; skip the wait.
        ctx.audit.append(
            AuditRecord::new("drain", "drained_empty")
                .host(&job.hostname)
                .dry_run(true),
        );
        return Ok(());
    }

    let mut cancel = ctx.cancel_rx();
    retry_transient(&WLM_RETRY, "set_drain", &mut cancel, || {
        ctx.wlm.set_drain(&job.hostname, reason)
    })
    .await?;

    let started = Instant::now();
    loop {
        let state = retry_transient(&WLM_RETRY, "node_state", &mut cancel, || {
            ctx.wlm.node_state(&job.hostname)
        })
        .await?;

        if state.is_quiesced() {
            info!(host = %job.hostname, %state, "node quiesced");
            ctx.audit
                .append(AuditRecord::new("drain", "drained_empty").host(&job.hostname));
            return Ok(());
        }

        let waited = started.elapsed();
        if waited >= ctx.cfg.drain_timeout {
            return Err(MaintError::DrainTimeout {
                host: job.hostname.clone(),
                waited,
            });
        }
        debug!(host = %job.hostname, %state, "waiting for drain");
        sleep_or_cancel(ctx.cfg.drain_poll, &mut cancel).await?;
    }
}
