//! Read-only reporting surfaces
//!
//! `report` renders every maintenance event the tenancy knows about (all
//! lifecycle states, CANCELED excluded by default) plus a fault summary;
//! `discover` previews the job set a pass would act on. Both render a table
//! or JSON to stdout/file and never mutate anything.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, SecondsFormat, Utc};
use hpcmaint_core::{MaintenanceEvent, Result};
use serde::Serialize;
use tabled::{Table, Tabled};
use tracing::warn;

use crate::context::PassContext;
use crate::discovery::{self, DiscoveryMode};
use crate::machine::HostState;
use crate::orchestrator::PassSummary;

/// Where JSON output goes: stdout or a file.
#[derive(Debug, Clone)]
pub struct JsonOut {
    pub to: Option<PathBuf>,
}

/// One row of the events table.
#[derive(Debug, Clone, Serialize, Tabled)]
pub struct ReportEntry {
    #[tabled(rename = "HOST")]
    pub host: String,
    #[tabled(rename = "EVENT")]
    pub event_id: String,
    #[tabled(rename = "STATE")]
    pub state: String,
    #[tabled(rename = "FAULTS")]
    pub faults: String,
    #[tabled(rename = "WINDOW")]
    pub window_start: String,
    #[tabled(rename = "ACTION")]
    pub action: String,
}

fn fmt_window(window: Option<DateTime<Utc>>) -> String {
    window
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| "-".to_string())
}

fn entry(event: &MaintenanceEvent, hostname: Option<&str>) -> ReportEntry {
    ReportEntry {
        host: hostname.unwrap_or("-").to_string(),
        event_id: event.event_id.clone(),
        state: event.lifecycle_state.as_str().to_string(),
        faults: if event.fault_ids.is_empty() {
            "-".to_string()
        } else {
            event.fault_ids.iter().cloned().collect::<Vec<_>>().join(",")
        },
        window_start: fmt_window(event.time_window_start),
        action: event.instance_action.clone().unwrap_or_else(|| "-".to_string()),
    }
}

/// Fetch every event in scope with a best-effort hostname.
async fn gather(ctx: &PassContext) -> Result<Vec<(MaintenanceEvent, Option<String>)>> {
    let mut rows = Vec::new();
    for compartment_id in ctx.cloud.list_compartments().await? {
        let events = match ctx
            .cloud
            .list_instance_maintenance_events(&compartment_id)
            .await
        {
            Ok(events) => events,
            Err(e) => {
                warn!(compartment = %compartment_id, error = %e, "event listing failed");
                continue;
            }
        };
        for event in events {
            let hostname = ctx
                .inventory
                .resolve_host(&event.instance_id)
                .await
                .ok()
                .flatten();
            rows.push((event, hostname));
        }
    }
    rows.sort_by(|a, b| {
        let ha = a.1.as_deref().unwrap_or("");
        let hb = b.1.as_deref().unwrap_or("");
        ha.cmp(hb).then_with(|| a.0.event_id.cmp(&b.0.event_id))
    });
    Ok(rows)
}

fn write_json<T: Serialize>(value: &T, out: &JsonOut) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value)?;
    match &out.to {
        Some(path) => std::fs::write(path, rendered + "\n")?,
        None => println!("{rendered}"),
    }
    Ok(())
}

/// The `report` subcommand.
pub async fn run_report(
    ctx: &PassContext,
    include_canceled: bool,
    exclude: &[String],
    json: Option<JsonOut>,
) -> Result<()> {
    let mut excluded_states: Vec<String> = exclude.to_vec();
    if !include_canceled && exclude.is_empty() {
        excluded_states.push("CANCELED".to_string());
    }

    let rows = gather(ctx).await?;
    let entries: Vec<ReportEntry> = rows
        .iter()
        .filter(|(event, _)| !excluded_states.iter().any(|s| s == event.lifecycle_state.as_str()))
        .map(|(event, hostname)| entry(event, hostname.as_deref()))
        .collect();

    if let Some(out) = json {
        return write_json(&entries, &out);
    }

    if entries.is_empty() {
        println!("No maintenance events found.");
        return Ok(());
    }
    println!("{}", Table::new(&entries));
    print_fault_summary(ctx, &rows);
    Ok(())
}

/// Fault id -> affected hosts, with approved faults marked.
fn print_fault_summary(ctx: &PassContext, rows: &[(MaintenanceEvent, Option<String>)]) {
    let mut by_fault: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (event, hostname) in rows {
        let host = hostname.as_deref().unwrap_or("-");
        for fault in &event.fault_ids {
            by_fault.entry(fault).or_default().push(host);
        }
    }
    if by_fault.is_empty() {
        return;
    }

    println!("\nDiscovered fault codes:");
    for (fault, hosts) in by_fault {
        let mark = if ctx.cfg.approved_faults.contains(fault) {
            " [APPROVED]"
        } else {
            ""
        };
        println!("  {fault}{mark}: {} node(s) -> {}", hosts.len(), hosts.join(", "));
    }
}

/// One row of the `discover` preview table.
#[derive(Debug, Tabled)]
struct JobRow {
    #[tabled(rename = "HOST")]
    host: String,
    #[tabled(rename = "EVENT")]
    event: String,
    #[tabled(rename = "FAULT")]
    fault: String,
    #[tabled(rename = "WINDOW")]
    window: String,
}

/// The `discover` subcommand: preview the job set without acting.
pub async fn run_discover(ctx: &PassContext, json: Option<JsonOut>, all: bool) -> Result<()> {
    let discovered = discovery::discover(ctx, DiscoveryMode::Standard, None).await?;

    if let Some(out) = json {
        return if all {
            write_json(&discovered, &out)
        } else {
            write_json(&discovered.jobs, &out)
        };
    }

    if discovered.jobs.is_empty() {
        println!("No actionable maintenance events.");
    } else {
        let rows: Vec<JobRow> = discovered
            .jobs
            .iter()
            .map(|job| JobRow {
                host: job.hostname.clone(),
                event: job.event_id.clone(),
                fault: job.fault_id.clone(),
                window: fmt_window(job.window_start),
            })
            .collect();
        println!("{}", Table::new(&rows));
    }

    if all && !discovered.skipped.is_empty() {
        println!("\nNot actionable:");
        for skipped in &discovered.skipped {
            println!(
                "  {} ({}) state={} reason={}",
                skipped.hostname.as_deref().unwrap_or(&skipped.instance_id),
                skipped.event_id,
                skipped.lifecycle_state.as_str(),
                skipped.reason
            );
        }
    }
    Ok(())
}

/// One row of the end-of-pass outcome table.
#[derive(Debug, Tabled)]
struct OutcomeRow {
    #[tabled(rename = "HOST")]
    host: String,
    #[tabled(rename = "STATE")]
    state: String,
    #[tabled(rename = "DISPOSITION")]
    disposition: String,
}

/// Print the per-host outcome table for a finished pass.
pub fn print_outcomes(summary: &PassSummary) {
    if summary.outcomes.is_empty() {
        println!("Nothing to do.");
        return;
    }
    let rows: Vec<OutcomeRow> = summary
        .outcomes
        .iter()
        .map(|o| OutcomeRow {
            host: o.hostname.clone(),
            state: o.state.to_string(),
            disposition: match (&o.note, &o.failure) {
                (Some(note), _) => note.clone(),
                (None, Some(f)) => format!("{}: {}", f.kind, f.detail),
                (None, None) => "-".to_string(),
            },
        })
        .collect();
    println!("{}", Table::new(&rows));
    println!(
        "{} done, {} skipped, {} failed",
        summary.count(HostState::Done),
        summary.count(HostState::Skipped),
        summary.count(HostState::Failed)
    );
}
