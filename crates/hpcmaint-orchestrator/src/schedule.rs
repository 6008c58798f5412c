//! Schedule phase
//!
//! Ask the provider to run the maintenance inside a near-term window
//! (`now + SCHEDULE_LEAD_SEC`) and stamp the processed tag so the event is
//! recognized as orchestrator-managed from then on.
//!
//! The event is re-read first: if it already left SCHEDULED (an operator or
//! the provider beat us to it) the phase is a no-op and the pipeline moves
//! straight to polling.

use chrono::{SecondsFormat, Utc};
use hpcmaint_core::{
    retry::{retry_transient, sleep_or_cancel},
    Backoff, Job, MaintError, Result, UpdateMaintenanceEvent,
};
use tracing::{info, warn};

use crate::audit::AuditRecord;
use crate::context::PassContext;

/// How the schedule phase concluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// Update accepted; the work request reached a terminal state.
    Accepted { work_request_id: String },
    /// The event had already left SCHEDULED; nothing to do.
    AlreadyTransitioned,
    /// Dry run: the request was audited, not sent.
    DryRun,
}

/// Trigger the maintenance for `job`.
pub async fn execute(ctx: &PassContext, job: &Job) -> Result<ScheduleOutcome> {
    let mut cancel = ctx.cancel_rx();

    // Guard read: only a SCHEDULED event accepts a window update.
    let event = retry_transient(&ctx.cfg.schedule_retry(), "get_event", &mut cancel, || {
        ctx.cloud.get_instance_maintenance_event(&job.event_id)
    })
    .await?;
    if event.lifecycle_state != hpcmaint_core::EventLifecycle::Scheduled {
        info!(
            event = %job.event_id,
            state = %event.lifecycle_state,
            "event already transitioned, skipping schedule"
        );
        return Ok(ScheduleOutcome::AlreadyTransitioned);
    }

    let window = Utc::now()
        + chrono::Duration::from_std(ctx.cfg.schedule_lead)
            .map_err(|e| MaintError::config(format!("SCHEDULE_LEAD_SEC out of range: {e}")))?;
    ctx.audit.append(
        AuditRecord::new("maintenance", "schedule_request")
            .host(&job.hostname)
            .field("event", job.event_id.as_str())
            .field("fault", job.fault_id.as_str())
            .field(
                "window_start",
                window.to_rfc3339_opts(SecondsFormat::Secs, true),
            )
            .dry_run(ctx.dry_run),
    );

    if ctx.dry_run {
        return Ok(ScheduleOutcome::DryRun);
    }

    // The update replaces the event's freeform tags wholesale; carry the
    // existing ones along with the processed stamp.
    let mut tags = event.freeform_tags.clone();
    tags.insert(
        ctx.cfg.processed_tag.clone(),
        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    );
    let update = UpdateMaintenanceEvent {
        time_window_start: Some(window),
        freeform_tags: tags,
    };

    let work_request_id = retry_transient(&ctx.cfg.schedule_retry(), "schedule", &mut cancel, || {
        ctx.cloud
            .update_instance_maintenance_event(&job.event_id, update.clone())
    })
    .await
    .map_err(|e| match e {
        MaintError::Cancelled => MaintError::Cancelled,
        other => MaintError::ScheduleFailed {
            event_id: job.event_id.clone(),
            detail: other.to_string(),
        },
    })?;

    info!(event = %job.event_id, work_request = %work_request_id, "maintenance scheduled");
    ctx.audit.append(
        AuditRecord::new("maintenance", "schedule_accepted")
            .host(&job.hostname)
            .field("event", job.event_id.as_str())
            .field("work_request", work_request_id.as_str()),
    );

    wait_work_request(ctx, job, &work_request_id).await?;
    Ok(ScheduleOutcome::Accepted { work_request_id })
}

/// Poll the update's work request to a terminal state.
async fn wait_work_request(ctx: &PassContext, job: &Job, work_request_id: &str) -> Result<()> {
    let mut cancel = ctx.cancel_rx();
    let mut backoff = Backoff::new(ctx.cfg.maint_poll, 2, ctx.cfg.maint_poll_ceiling);
    loop {
        let state = retry_transient(
            &ctx.cfg.schedule_retry(),
            "get_work_request",
            &mut cancel,
            || ctx.cloud.get_work_request(work_request_id),
        )
        .await?;

        if state.is_terminal() {
            if state != hpcmaint_core::WorkRequestState::Succeeded {
                warn!(work_request = %work_request_id, state = %state.as_str(), "work request did not succeed");
                return Err(MaintError::ScheduleFailed {
                    event_id: job.event_id.clone(),
                    detail: format!("work request {work_request_id} ended {}", state.as_str()),
                });
            }
            return Ok(());
        }
        sleep_or_cancel(backoff.next_delay(), &mut cancel).await?;
    }
}
