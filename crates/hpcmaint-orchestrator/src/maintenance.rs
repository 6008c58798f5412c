//! Maintenance-polling phase
//!
//! Wait for the provider to finish. The event is re-read on a growing
//! interval until its lifecycle state is terminal; there is no overall
//! timeout (host maintenance can legitimately run for hours), only the
//! pass-wide cancellation signal.
//!
//! A SCHEDULED state observed after our accept means the provider has not
//! picked the event up yet; it is never treated as terminal.

use hpcmaint_core::{
    retry::{retry_transient, sleep_or_cancel},
    Backoff, EventLifecycle, Job, MaintError, Result, RetryPolicy,
};
use std::time::Duration;
use tracing::{debug, warn};

use crate::audit::AuditRecord;
use crate::context::PassContext;

const READ_RETRY: RetryPolicy = RetryPolicy::new(3, Duration::from_secs(2));

/// Poll the event to a terminal state. Success returns the terminal state;
/// FAILED/CANCELED returns `MaintenanceFailed`.
pub async fn wait_complete(ctx: &PassContext, job: &Job) -> Result<EventLifecycle> {
    let mut cancel = ctx.cancel_rx();
    let mut backoff = Backoff::new(ctx.cfg.maint_poll, 2, ctx.cfg.maint_poll_ceiling);

    loop {
        let event = retry_transient(&READ_RETRY, "get_event", &mut cancel, || {
            ctx.cloud.get_instance_maintenance_event(&job.event_id)
        })
        .await?;
        let state = event.lifecycle_state;

        if state.is_success() {
            ctx.audit.append(
                AuditRecord::new("maintenance", "event_complete")
                    .host(&job.hostname)
                    .field("event", job.event_id.as_str())
                    .field("state", state.as_str()),
            );
            return Ok(state);
        }
        if state.is_terminal() {
            warn!(event = %job.event_id, state = %state, "maintenance ended unsuccessfully");
            ctx.audit.append(
                AuditRecord::new("maintenance", "event_failed")
                    .host(&job.hostname)
                    .field("event", job.event_id.as_str())
                    .field("state", state.as_str()),
            );
            return Err(MaintError::MaintenanceFailed {
                event_id: job.event_id.clone(),
                state: state.as_str().to_string(),
            });
        }

        debug!(event = %job.event_id, state = %state, "maintenance still running");
        sleep_or_cancel(backoff.next_delay(), &mut cancel).await?;
    }
}
