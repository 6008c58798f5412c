//! OCI cloud compute collaborator
//!
//! Talks to the control plane through the `oci` CLI with `--output json`,
//! the same path the surrounding cluster tooling uses. Event listings are
//! summaries; each event is re-read with `get` so the fault details under
//! `additional-details` are present.

use std::collections::{BTreeMap, BTreeSet};
use std::env;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use hpcmaint_core::{
    CloudCompute, EventLifecycle, MaintenanceEvent, MaintError, Result, UpdateMaintenanceEvent,
    WorkRequestState,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::cmd;

/// OCI CLI client scoped to one tenancy and region.
pub struct OciCli {
    tenancy_ocid: String,
    region: String,
    call_timeout: Duration,
}

impl OciCli {
    pub fn new(tenancy_ocid: impl Into<String>, region: impl Into<String>, call_timeout: Duration) -> Self {
        Self {
            tenancy_ocid: tenancy_ocid.into(),
            region: region.into(),
            call_timeout,
        }
    }

    /// The oci executable (overridable with a fake binary for testing).
    fn oci_exec() -> String {
        env::var("HPCMAINT_FAKE_OCI").unwrap_or_else(|_| "oci".to_string())
    }

    async fn invoke(&self, args: &[&str]) -> Result<String> {
        let oci = Self::oci_exec();
        let mut full = args.to_vec();
        full.extend(["--region", self.region.as_str(), "--output", "json"]);
        cmd::run(&oci, &full, self.call_timeout).await
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct RawCompartment {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RawEventSummary {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    id: String,
    #[serde(rename = "instance-id", alias = "instance_id")]
    instance_id: String,
    #[serde(rename = "compartment-id", alias = "compartment_id")]
    compartment_id: String,
    #[serde(rename = "lifecycle-state", alias = "lifecycle_state")]
    lifecycle_state: String,
    #[serde(rename = "time-window-start", alias = "time_window_start", default)]
    time_window_start: Option<String>,
    #[serde(rename = "freeform-tags", alias = "freeform_tags", default)]
    freeform_tags: BTreeMap<String, String>,
    #[serde(rename = "instance-action", alias = "instance_action", default)]
    instance_action: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(rename = "additional-details", alias = "additional_details", default)]
    additional_details: Option<Value>,
}

impl RawEvent {
    fn into_event(self) -> MaintenanceEvent {
        let window = self
            .time_window_start
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc));
        let fault_ids = self
            .additional_details
            .as_ref()
            .map(extract_fault_ids)
            .unwrap_or_default();
        MaintenanceEvent {
            event_id: self.id,
            instance_id: self.instance_id,
            compartment_id: self.compartment_id,
            fault_ids,
            lifecycle_state: EventLifecycle::parse(&self.lifecycle_state),
            time_window_start: window,
            freeform_tags: self.freeform_tags,
            instance_action: self.instance_action,
            description: self.description,
        }
    }
}

/// Pull fault ids out of an event's `additional-details`. The details block
/// is a free-form map; fault entries appear under camelCase or snake_case
/// keys depending on the API path, and sometimes as a JSON string.
fn extract_fault_ids(details: &Value) -> BTreeSet<String> {
    let details: Value = match details {
        Value::String(s) => match serde_json::from_str(s) {
            Ok(parsed) => parsed,
            Err(_) => return BTreeSet::new(),
        },
        other => other.clone(),
    };

    let faults = ["faultDetails", "fault-details", "fault_details"]
        .iter()
        .find_map(|key| details.get(key));
    let Some(faults) = faults else {
        return BTreeSet::new();
    };
    // The fault list itself may also arrive as a JSON string.
    let faults: Value = match faults {
        Value::String(s) => match serde_json::from_str(s) {
            Ok(parsed) => parsed,
            Err(_) => return BTreeSet::new(),
        },
        other => other.clone(),
    };

    faults
        .as_array()
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| {
                    ["faultId", "fault-id", "fault_id"]
                        .iter()
                        .find_map(|key| entry.get(key))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_json<T: for<'de> Deserialize<'de>>(raw: &str, what: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| MaintError::transient(format!("{what}: {e}")))
}

#[async_trait]
impl CloudCompute for OciCli {
    async fn list_compartments(&self) -> Result<Vec<String>> {
        let raw = self
            .invoke(&[
                "iam",
                "compartment",
                "list",
                "--compartment-id",
                &self.tenancy_ocid,
                "--compartment-id-in-subtree",
                "true",
                "--all",
            ])
            .await?;
        let mut ids = vec![self.tenancy_ocid.clone()];
        // The CLI prints nothing at all for an empty listing.
        if !raw.is_empty() {
            let envelope: Envelope<Vec<RawCompartment>> = parse_json(&raw, "compartment list")?;
            ids.extend(envelope.data.into_iter().map(|c| c.id));
        }
        Ok(ids)
    }

    async fn list_instance_maintenance_events(
        &self,
        compartment_id: &str,
    ) -> Result<Vec<MaintenanceEvent>> {
        let raw = self
            .invoke(&[
                "compute",
                "instance-maintenance-event",
                "list",
                "--compartment-id",
                compartment_id,
                "--all",
            ])
            .await?;
        if raw.is_empty() {
            return Ok(Vec::new());
        }
        let envelope: Envelope<Vec<RawEventSummary>> = parse_json(&raw, "event list")?;

        // Summaries carry no fault details; re-read each event in full. An
        // event vanishing between list and get is reported but not fatal.
        let mut events = Vec::with_capacity(envelope.data.len());
        for summary in envelope.data {
            match self.get_instance_maintenance_event(&summary.id).await {
                Ok(event) => events.push(event),
                Err(e) => warn!(event_id = %summary.id, error = %e, "could not read event"),
            }
        }
        Ok(events)
    }

    async fn get_instance_maintenance_event(&self, event_id: &str) -> Result<MaintenanceEvent> {
        let raw = self
            .invoke(&[
                "compute",
                "instance-maintenance-event",
                "get",
                "--instance-maintenance-event-id",
                event_id,
            ])
            .await?;
        let envelope: Envelope<RawEvent> = parse_json(&raw, "event get")?;
        Ok(envelope.data.into_event())
    }

    async fn update_instance_maintenance_event(
        &self,
        event_id: &str,
        update: UpdateMaintenanceEvent,
    ) -> Result<String> {
        #[derive(Debug, Deserialize)]
        struct UpdateResponse {
            #[serde(rename = "opc-work-request-id", alias = "opc_work_request_id")]
            work_request_id: Option<String>,
        }

        let window = update
            .time_window_start
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true));
        let tags = serde_json::to_string(&update.freeform_tags)?;

        let mut args = vec![
            "compute",
            "instance-maintenance-event",
            "update",
            "--instance-maintenance-event-id",
            event_id,
            "--freeform-tags",
            tags.as_str(),
            "--force",
        ];
        if let Some(window) = window.as_deref() {
            args.extend(["--time-window-start", window]);
        }

        let raw = self.invoke(&args).await?;
        let response: UpdateResponse = parse_json(&raw, "event update")?;
        response.work_request_id.ok_or_else(|| {
            MaintError::transient(format!("update of {event_id} returned no work request id"))
        })
    }

    async fn get_work_request(&self, work_request_id: &str) -> Result<WorkRequestState> {
        #[derive(Debug, Deserialize)]
        struct RawWorkRequest {
            status: String,
        }

        let raw = self
            .invoke(&[
                "work-requests",
                "work-request",
                "get",
                "--work-request-id",
                work_request_id,
            ])
            .await?;
        let envelope: Envelope<RawWorkRequest> = parse_json(&raw, "work request get")?;
        Ok(WorkRequestState::parse(&envelope.data.status))
    }
}
