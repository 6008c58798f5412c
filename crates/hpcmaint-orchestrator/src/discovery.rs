//! Discovery: turn provider maintenance events into the pass's job set
//!
//! Walks every compartment, filters events to the actionable lifecycle
//! states for the selected mode, resolves instances to hostnames, applies
//! the exclusion and fault-approval guardrails, and returns one job per
//! hostname in deterministic (hostname-sorted) order.
//!
//! A failing compartment listing is recorded and skipped; the remaining
//! compartments still contribute. Host resolution is retried with backoff
//! before an event is dropped as unresolved.

use std::collections::BTreeSet;

use hpcmaint_core::{retry::retry_transient, EventLifecycle, Job, MaintenanceEvent, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::audit::AuditRecord;
use crate::context::PassContext;

/// Which lifecycle states a pass acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryMode {
    /// Default path: only SCHEDULED events (full run / stage).
    Standard,
    /// Reconciliation: events already past SCHEDULED.
    Catchup,
}

/// An event discovery saw but did not turn into a job.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedEvent {
    pub event_id: String,
    pub instance_id: String,
    pub hostname: Option<String>,
    pub lifecycle_state: EventLifecycle,
    pub reason: &'static str,
}

/// Result of one discovery sweep.
#[derive(Debug, Default, Serialize)]
pub struct Discovery {
    pub jobs: Vec<Job>,
    pub skipped: Vec<SkippedEvent>,
}

impl DiscoveryMode {
    fn actionable(self, state: &EventLifecycle) -> bool {
        match self {
            Self::Standard => *state == EventLifecycle::Scheduled,
            Self::Catchup => state.is_in_progress() || state.is_terminal(),
        }
    }
}

/// Pick the job's fault: the lexicographically smallest approved fault id,
/// exact match only. `None` means the event is not eligible.
pub(crate) fn select_fault(
    fault_ids: &BTreeSet<String>,
    approved: &BTreeSet<String>,
) -> Option<String> {
    fault_ids.intersection(approved).next().cloned()
}

/// Sort candidates and keep the first job per hostname.
pub(crate) fn assemble(mut candidates: Vec<Job>) -> Vec<Job> {
    candidates.sort_by(|a, b| {
        a.hostname
            .cmp(&b.hostname)
            .then_with(|| a.event_id.cmp(&b.event_id))
    });
    candidates.dedup_by(|a, b| a.hostname == b.hostname);
    candidates
}

/// Produce the job set for a pass.
pub async fn discover(
    ctx: &PassContext,
    mode: DiscoveryMode,
    host_filter: Option<&str>,
) -> Result<Discovery> {
    let compartments = ctx.cloud.list_compartments().await?;
    info!(count = compartments.len(), "enumerated compartments");

    let mut candidates = Vec::new();
    let mut skipped = Vec::new();

    for compartment_id in &compartments {
        let events = match ctx
            .cloud
            .list_instance_maintenance_events(compartment_id)
            .await
        {
            Ok(events) => events,
            Err(e) => {
                warn!(compartment = %compartment_id, error = %e, "event listing failed, continuing");
                ctx.audit.append(
                    AuditRecord::new("discover", "list_error")
                        .field("compartment", compartment_id.as_str())
                        .field("error", e.to_string()),
                );
                continue;
            }
        };

        for event in events {
            if let Some(job) = screen_event(ctx, mode, host_filter, event, &mut skipped).await? {
                candidates.push(job);
            }
        }
    }

    let jobs = assemble(candidates);
    info!(jobs = jobs.len(), skipped = skipped.len(), "discovery complete");
    for job in &jobs {
        info!(host = %job.hostname, event = %job.event_id, fault = %job.fault_id, "maintenance job");
    }
    Ok(Discovery { jobs, skipped })
}

/// Apply the per-event filters; `Ok(Some(job))` when the event survives.
async fn screen_event(
    ctx: &PassContext,
    mode: DiscoveryMode,
    host_filter: Option<&str>,
    event: MaintenanceEvent,
    skipped: &mut Vec<SkippedEvent>,
) -> Result<Option<Job>> {
    let mut skip = |event: &MaintenanceEvent, hostname: Option<String>, reason: &'static str| {
        skipped.push(SkippedEvent {
            event_id: event.event_id.clone(),
            instance_id: event.instance_id.clone(),
            hostname,
            lifecycle_state: event.lifecycle_state.clone(),
            reason,
        });
    };

    if !mode.actionable(&event.lifecycle_state) {
        debug!(event = %event.event_id, state = %event.lifecycle_state, "state not actionable");
        skip(&event, None, "state");
        return Ok(None);
    }

    // Events we already scheduled carry the processed tag; picking them up
    // again in the default path would double-trigger the schedule.
    if mode == DiscoveryMode::Standard && event.freeform_tags.contains_key(&ctx.cfg.processed_tag)
    {
        debug!(event = %event.event_id, "already processed");
        ctx.audit.append(
            AuditRecord::new("discover", "already_processed").field("event", event.event_id.as_str()),
        );
        skip(&event, None, "already_processed");
        return Ok(None);
    }

    // TERMINATE actions are never automated; the instance is going away.
    if event.instance_action.as_deref() == Some("TERMINATE") {
        ctx.audit.append(
            AuditRecord::new("discover", "not_eligible")
                .field("event", event.event_id.as_str())
                .field("instance_action", "TERMINATE"),
        );
        skip(&event, None, "not_eligible");
        return Ok(None);
    }

    let mut cancel = ctx.cancel_rx();
    let resolved = retry_transient(&ctx.cfg.inventory_retry(), "resolve_host", &mut cancel, || {
        ctx.inventory.resolve_host(&event.instance_id)
    })
    .await;
    let hostname = match resolved {
        Ok(Some(hostname)) => hostname,
        Ok(None) | Err(hpcmaint_core::MaintError::Transient(_)) => {
            warn!(instance = %event.instance_id, event = %event.event_id, "no hostname for instance");
            ctx.audit.append(
                AuditRecord::new("discover", "unresolved")
                    .field("event", event.event_id.as_str())
                    .field("instance", event.instance_id.as_str()),
            );
            skip(&event, None, "unresolved");
            return Ok(None);
        }
        Err(e) => return Err(e),
    };

    if let Some(only) = host_filter {
        if hostname != only {
            skip(&event, Some(hostname), "host_filter");
            return Ok(None);
        }
    }

    if ctx.cfg.excluded_hosts.contains(&hostname) {
        info!(host = %hostname, event = %event.event_id, "host excluded from automation");
        ctx.audit.append(
            AuditRecord::new("discover", "excluded")
                .host(&hostname)
                .field("event", event.event_id.as_str()),
        );
        skip(&event, Some(hostname), "excluded");
        return Ok(None);
    }

    let Some(fault_id) = select_fault(&event.fault_ids, &ctx.cfg.approved_faults) else {
        debug!(host = %hostname, event = %event.event_id, faults = ?event.fault_ids, "no approved fault");
        skip(&event, Some(hostname), "fault_not_approved");
        return Ok(None);
    };

    Ok(Some(Job {
        event_id: event.event_id,
        instance_id: event.instance_id,
        hostname,
        fault_id,
        compartment_id: event.compartment_id,
        window_start: event.time_window_start,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn job(hostname: &str, event_id: &str) -> Job {
        Job {
            event_id: event_id.into(),
            instance_id: format!("inst-{event_id}"),
            hostname: hostname.into(),
            fault_id: "HPCRDMA-0002-02".into(),
            compartment_id: "comp1".into(),
            window_start: None,
        }
    }

    #[test]
    fn test_select_fault_exact_match_only() {
        let approved = set(&["HPCRDMA-0002-02"]);
        assert_eq!(
            select_fault(&set(&["HPCRDMA-0002-02"]), &approved).as_deref(),
            Some("HPCRDMA-0002-02")
        );
        // No substring or case-insensitive matching.
        assert_eq!(select_fault(&set(&["HPCRDMA-0002"]), &approved), None);
        assert_eq!(select_fault(&set(&["hpcrdma-0002-02"]), &approved), None);
    }

    #[test]
    fn test_select_fault_empty_approved_set() {
        assert_eq!(select_fault(&set(&["HPCRDMA-0002-02"]), &set(&[])), None);
    }

    #[test]
    fn test_select_fault_picks_smallest_approved() {
        let approved = set(&["HPCGPU-0001-01", "HPCRDMA-0002-02"]);
        let faults = set(&["HPCRDMA-0002-02", "HPCGPU-0001-01", "OTHER-1"]);
        assert_eq!(
            select_fault(&faults, &approved).as_deref(),
            Some("HPCGPU-0001-01")
        );
    }

    #[test]
    fn test_assemble_sorts_by_hostname() {
        let jobs = assemble(vec![job("GPU-9", "ev3"), job("GPU-1", "ev1"), job("GPU-5", "ev2")]);
        let hosts: Vec<_> = jobs.iter().map(|j| j.hostname.as_str()).collect();
        assert_eq!(hosts, vec!["GPU-1", "GPU-5", "GPU-9"]);
    }

    #[test]
    fn test_assemble_one_job_per_hostname() {
        let jobs = assemble(vec![job("GPU-1", "ev2"), job("GPU-1", "ev1"), job("GPU-2", "ev3")]);
        assert_eq!(jobs.len(), 2);
        // Deterministic winner: lowest event id.
        assert_eq!(jobs[0].event_id, "ev1");
    }
}
