//! Pass orchestration
//!
//! One pass: discover the job set, fan the jobs out to a bounded worker
//! pool, and tally the per-host outcomes. Discovery guarantees each hostname
//! appears at most once, so no two workers ever touch the same host.
//!
//! The workers share only the audit sink (serialized), the daily-cap counter
//! (atomic) and the cancellation signal. On cancellation, in-flight phases
//! finish their current external call and fail with `Cancelled`; queued jobs
//! are not started.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use hpcmaint_core::retry::sleep_or_cancel;
use hpcmaint_core::Result;
use tracing::{error, info};

use crate::context::PassContext;
use crate::discovery;
use crate::machine::{self, HostOutcome, HostState, PassMode};

/// Tallied outcomes of one pass.
#[derive(Debug, Default)]
pub struct PassSummary {
    pub outcomes: Vec<HostOutcome>,
}

impl PassSummary {
    pub fn count(&self, state: HostState) -> usize {
        self.outcomes.iter().filter(|o| o.state == state).count()
    }

    /// Process exit code: 0 clean, 2 when any host failed.
    pub fn exit_code(&self) -> i32 {
        if self.count(HostState::Failed) > 0 {
            2
        } else {
            0
        }
    }
}

/// Run one pass in the given mode. `host_filter` narrows catchup to a
/// single hostname.
pub async fn run_pass(
    ctx: &PassContext,
    mode: PassMode,
    host_filter: Option<&str>,
) -> Result<PassSummary> {
    let discovered = discovery::discover(ctx, mode.discovery_mode(), host_filter).await?;
    if discovered.jobs.is_empty() {
        info!("no maintenance events to process");
        return Ok(PassSummary::default());
    }

    let total = discovered.jobs.len();
    info!(jobs = total, dry_run = ctx.dry_run, "processing jobs");

    let queue = Arc::new(Mutex::new(VecDeque::from(discovered.jobs)));
    let workers = ctx.cfg.max_workers.clamp(1, total);

    let handles: Vec<_> = (0..workers)
        .map(|worker| {
            let ctx = ctx.clone();
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                let mut outcomes = Vec::new();
                loop {
                    let job = match queue.lock() {
                        Ok(mut q) => q.pop_front(),
                        Err(poisoned) => poisoned.into_inner().pop_front(),
                    };
                    let Some(job) = job else { break };
                    info!(%worker, host = %job.hostname, "worker picked up job");
                    outcomes.push(machine::run_job(&ctx, &job, mode).await);
                }
                outcomes
            })
        })
        .collect();

    let mut summary = PassSummary::default();
    for handle in futures::future::join_all(handles).await {
        match handle {
            Ok(outcomes) => summary.outcomes.extend(outcomes),
            Err(e) => error!(error = %e, "worker task aborted"),
        }
    }
    summary
        .outcomes
        .sort_by(|a, b| a.hostname.cmp(&b.hostname));

    info!(
        done = summary.count(HostState::Done),
        skipped = summary.count(HostState::Skipped),
        failed = summary.count(HostState::Failed),
        "pass complete"
    );
    Ok(summary)
}

/// Periodic mode: run passes until the cancellation signal fires. Returns
/// the exit code of the worst pass seen.
pub async fn run_loop(ctx: &PassContext, mode: PassMode) -> Result<i32> {
    let mut worst = 0;
    let mut cancel = ctx.cancel_rx();
    loop {
        let summary = run_pass(ctx, mode, None).await?;
        crate::report::print_outcomes(&summary);
        worst = worst.max(summary.exit_code());

        if ctx.cancelled() {
            return Ok(worst);
        }
        info!(interval = ?ctx.cfg.loop_interval, "sleeping until next pass");
        if sleep_or_cancel(ctx.cfg.loop_interval, &mut cancel).await.is_err() {
            info!("loop cancelled");
            return Ok(worst);
        }
    }
}
