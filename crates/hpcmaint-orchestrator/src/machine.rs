//! Per-host state machine
//!
//! One worker drives one job through
//! `PENDING → DRAINING → DRAINED → SCHEDULING → IN_MAINTENANCE → HEALTH →
//! FINALIZING → DONE`, with `SKIPPED` and `FAILED` as alternative terminals.
//! Every transition is a total function: phase errors become the terminal
//! disposition of this host only and never escape to siblings.
//!
//! Stage mode truncates the machine after the schedule phase. Catchup mode
//! enters past the drain/schedule prefix, at the point implied by the
//! event's current lifecycle state.

use hpcmaint_core::{retry::retry_transient, Job, MaintError, Result, RetryPolicy};
use serde::Serialize;
use std::time::Duration;
use tracing::{error, info};

use crate::audit::AuditRecord;
use crate::context::PassContext;
use crate::finalize::{self, Failure, FinalizeDecision};
use crate::gate;
use crate::health;
use crate::maintenance;
use crate::schedule::{self, ScheduleOutcome};
use crate::{drain, discovery::DiscoveryMode};

const READ_RETRY: RetryPolicy = RetryPolicy::new(3, Duration::from_secs(2));

/// How far the pipeline runs for each host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassMode {
    /// Discover through finalize.
    Full,
    /// Discover, drain, schedule; no health/finalize.
    Stage,
    /// Reconcile events already past SCHEDULED; no drain/schedule.
    Catchup,
}

impl PassMode {
    pub fn discovery_mode(self) -> DiscoveryMode {
        match self {
            Self::Full | Self::Stage => DiscoveryMode::Standard,
            Self::Catchup => DiscoveryMode::Catchup,
        }
    }

    /// Only modes that issue schedule requests consume daily-cap slots.
    fn reserves_cap(self) -> bool {
        !matches!(self, Self::Catchup)
    }
}

/// Terminal (and intermediate) states of the per-host machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HostState {
    Pending,
    Draining,
    Drained,
    Scheduling,
    InMaintenance,
    Health,
    Finalizing,
    Done,
    Skipped,
    Failed,
}

impl std::fmt::Display for HostState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Pending => "PENDING",
            Self::Draining => "DRAINING",
            Self::Drained => "DRAINED",
            Self::Scheduling => "SCHEDULING",
            Self::InMaintenance => "IN_MAINTENANCE",
            Self::Health => "HEALTH",
            Self::Finalizing => "FINALIZING",
            Self::Done => "DONE",
            Self::Skipped => "SKIPPED",
            Self::Failed => "FAILED",
        };
        f.write_str(label)
    }
}

/// Result of one host's trip through the machine.
#[derive(Debug, Clone, Serialize)]
pub struct HostOutcome {
    pub hostname: String,
    pub state: HostState,
    /// Human-facing disposition ("resumed", "held: ...", "skip: cap").
    pub note: Option<String>,
    /// Failure kind and detail when `state == Failed`.
    pub failure: Option<FailureInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailureInfo {
    pub kind: String,
    pub detail: String,
}

impl HostOutcome {
    fn done(job: &Job, note: impl Into<String>) -> Self {
        Self {
            hostname: job.hostname.clone(),
            state: HostState::Done,
            note: Some(note.into()),
            failure: None,
        }
    }

    fn skipped(job: &Job, note: impl Into<String>) -> Self {
        Self {
            hostname: job.hostname.clone(),
            state: HostState::Skipped,
            note: Some(note.into()),
            failure: None,
        }
    }

    fn failed(job: &Job, error: &MaintError) -> Self {
        Self {
            hostname: job.hostname.clone(),
            state: HostState::Failed,
            note: None,
            failure: Some(FailureInfo {
                kind: error.kind().to_string(),
                detail: error.to_string(),
            }),
        }
    }
}

/// Drive one job end-to-end. Never panics, never returns an error: the
/// outcome carries the disposition.
pub async fn run_job(ctx: &PassContext, job: &Job, mode: PassMode) -> HostOutcome {
    if ctx.cancelled() {
        return HostOutcome::failed(job, &MaintError::Cancelled);
    }

    let decision = gate::evaluate(&ctx.cfg, &ctx.scheduled, job, mode.reserves_cap());
    if let Some(action) = decision.skip_action() {
        info!(host = %job.hostname, skip = action, "job skipped by eligibility gate");
        ctx.audit.append(
            AuditRecord::new("skip", action)
                .host(&job.hostname)
                .field("event", job.event_id.as_str())
                .field("fault", job.fault_id.as_str()),
        );
        return HostOutcome::skipped(job, format!("skip: {action}"));
    }

    match drive(ctx, job, mode).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(host = %job.hostname, kind = e.kind(), error = %e, "host workflow failed");
            HostOutcome::failed(job, &e)
        }
    }
}

async fn drive(ctx: &PassContext, job: &Job, mode: PassMode) -> Result<HostOutcome> {
    match mode {
        PassMode::Full => {
            drain::execute(ctx, job).await?;
            let sched = schedule::execute(ctx, job).await?;

            if ctx.dry_run {
                // The event was never updated; there is nothing to poll.
                let outcome = health_then_finalize(ctx, job).await?;
                return Ok(outcome);
            }
            debug_assert!(sched != ScheduleOutcome::DryRun);

            match maintenance::wait_complete(ctx, job).await {
                Ok(_) => health_then_finalize(ctx, job).await,
                Err(MaintError::MaintenanceFailed { state, .. }) => {
                    finalize_failed(ctx, job, "MaintenanceFailed", format!("event ended {state}"))
                        .await
                }
                Err(e) => Err(e),
            }
        }

        PassMode::Stage => {
            drain::execute(ctx, job).await?;
            let sched = schedule::execute(ctx, job).await?;
            let note = match sched {
                ScheduleOutcome::Accepted { work_request_id } => {
                    format!("staged (work request {work_request_id})")
                }
                ScheduleOutcome::AlreadyTransitioned => "staged (already transitioned)".to_string(),
                ScheduleOutcome::DryRun => "staged (dry run)".to_string(),
            };
            Ok(HostOutcome::done(job, note))
        }

        PassMode::Catchup => {
            let mut cancel = ctx.cancel_rx();
            let event = retry_transient(&READ_RETRY, "get_event", &mut cancel, || {
                ctx.cloud.get_instance_maintenance_event(&job.event_id)
            })
            .await?;
            let state = event.lifecycle_state;

            if state.is_success() {
                return health_then_finalize(ctx, job).await;
            }
            if matches!(
                state,
                hpcmaint_core::EventLifecycle::Failed | hpcmaint_core::EventLifecycle::Canceled
            ) {
                return finalize_failed(
                    ctx,
                    job,
                    "MaintenanceFailed",
                    format!("event ended {state}"),
                )
                .await;
            }

            // Still running (or not yet started). Dry runs only report.
            if ctx.dry_run {
                return Ok(HostOutcome::done(
                    job,
                    format!("maintenance in progress ({state}, dry run)"),
                ));
            }
            match maintenance::wait_complete(ctx, job).await {
                Ok(_) => health_then_finalize(ctx, job).await,
                Err(MaintError::MaintenanceFailed { state, .. }) => {
                    finalize_failed(ctx, job, "MaintenanceFailed", format!("event ended {state}"))
                        .await
                }
                Err(e) => Err(e),
            }
        }
    }
}

/// HEALTH → FINALIZING → DONE, pass or fail.
async fn health_then_finalize(ctx: &PassContext, job: &Job) -> Result<HostOutcome> {
    let report = health::execute(ctx, &job.hostname).await?;
    let failure = if report.passed() {
        None
    } else {
        Some(Failure {
            kind: "HealthFailed",
            detail: report.reason.clone().unwrap_or_default(),
        })
    };
    let decision = finalize::execute(ctx, job, failure).await?;
    Ok(HostOutcome::done(job, decision_note(job, decision)))
}

/// FINALIZING (fail branch) → DONE: drain retained, health skipped.
async fn finalize_failed(
    ctx: &PassContext,
    job: &Job,
    kind: &'static str,
    detail: String,
) -> Result<HostOutcome> {
    let decision = finalize::execute(ctx, job, Some(Failure { kind, detail })).await?;
    Ok(HostOutcome::done(job, decision_note(job, decision)))
}

fn decision_note(job: &Job, decision: FinalizeDecision) -> String {
    match decision {
        FinalizeDecision::Resumed => "resumed".to_string(),
        FinalizeDecision::AlreadyResumed => "already resumed".to_string(),
        FinalizeDecision::Held => format!("held ({})", job.fault_id),
    }
}
