//! Recording mock collaborators and context fixtures for scenario tests.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::AtomicU32;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hpcmaint_core::{
    CloudCompute, EventLifecycle, HealthChecker, HealthReport, Inventory, MaintError,
    MaintenanceEvent, NodeState, Result, UpdateMaintenanceEvent, WorkRequestState,
    WorkloadManager,
};
use hpcmaint_orchestrator::{AuditSink, OrchestratorConfig, PassContext};
use serde_json::Value;
use tokio::sync::watch;

pub fn test_config() -> OrchestratorConfig {
    OrchestratorConfig {
        tenancy_ocid: "ocid1.tenancy.oc1..test".into(),
        region: "us-ashburn-1".into(),
        drain_poll: Duration::from_millis(2),
        drain_timeout: Duration::from_millis(500),
        maint_poll: Duration::from_millis(2),
        maint_poll_ceiling: Duration::from_millis(20),
        loop_interval: Duration::from_secs(900),
        schedule_lead: Duration::from_secs(300),
        call_timeout: Duration::from_secs(5),
        daily_schedule_cap: 10,
        max_workers: 8,
        processed_tag: "felix".into(),
        approved_faults: BTreeSet::from(["HPCRDMA-0002-02".to_string()]),
        excluded_hosts: BTreeSet::new(),
        events_log_file: PathBuf::from("logs/events.jsonl"),
        health_check_url: None,
        inventory_cmd: vec!["manage".into()],
        log_level: "info".into(),
        log_file: None,
    }
}

pub fn event(event_id: &str, instance_id: &str, fault: &str) -> MaintenanceEvent {
    MaintenanceEvent {
        event_id: event_id.into(),
        instance_id: instance_id.into(),
        compartment_id: "ocid1.compartment.oc1..comp1".into(),
        fault_ids: BTreeSet::from([fault.to_string()]),
        lifecycle_state: EventLifecycle::Scheduled,
        time_window_start: None,
        freeform_tags: BTreeMap::new(),
        instance_action: Some("REBOOT_MIGRATION".into()),
        description: None,
    }
}

/// Scripted cloud mock: `list` returns the seeded events; each `get` pops
/// the next lifecycle state from the event's script (the last state sticks).
/// Every mutating call is recorded.
#[derive(Default)]
pub struct MockCloud {
    pub events: Mutex<Vec<MaintenanceEvent>>,
    pub states: Mutex<HashMap<String, VecDeque<EventLifecycle>>>,
    pub update_calls: Mutex<Vec<(String, UpdateMaintenanceEvent)>>,
    pub fail_listing: Mutex<BTreeSet<String>>,
}

impl MockCloud {
    pub fn seed(&self, ev: MaintenanceEvent, script: &[EventLifecycle]) {
        self.states
            .lock()
            .unwrap()
            .insert(ev.event_id.clone(), script.iter().cloned().collect());
        self.events.lock().unwrap().push(ev);
    }

    fn current(&self, event_id: &str) -> Option<MaintenanceEvent> {
        let events = self.events.lock().unwrap();
        events.iter().find(|e| e.event_id == event_id).cloned()
    }

    pub fn updates(&self) -> Vec<(String, UpdateMaintenanceEvent)> {
        self.update_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CloudCompute for MockCloud {
    async fn list_compartments(&self) -> Result<Vec<String>> {
        Ok(vec!["ocid1.compartment.oc1..comp1".into()])
    }

    async fn list_instance_maintenance_events(
        &self,
        compartment_id: &str,
    ) -> Result<Vec<MaintenanceEvent>> {
        if self.fail_listing.lock().unwrap().contains(compartment_id) {
            return Err(MaintError::transient("listing unavailable"));
        }
        Ok(self.events.lock().unwrap().clone())
    }

    async fn get_instance_maintenance_event(&self, event_id: &str) -> Result<MaintenanceEvent> {
        let mut event = self
            .current(event_id)
            .ok_or_else(|| MaintError::transient(format!("no event {event_id}")))?;
        let mut states = self.states.lock().unwrap();
        if let Some(script) = states.get_mut(event_id) {
            if script.len() > 1 {
                event.lifecycle_state = script.pop_front().unwrap();
            } else if let Some(last) = script.front() {
                event.lifecycle_state = last.clone();
            }
        }
        Ok(event)
    }

    async fn update_instance_maintenance_event(
        &self,
        event_id: &str,
        update: UpdateMaintenanceEvent,
    ) -> Result<String> {
        self.update_calls
            .lock()
            .unwrap()
            .push((event_id.to_string(), update));
        Ok(format!("wr-{event_id}"))
    }

    async fn get_work_request(&self, _work_request_id: &str) -> Result<WorkRequestState> {
        Ok(WorkRequestState::Succeeded)
    }
}

/// Scripted workload-manager mock: `node_state` pops the host's script (last
/// state sticks); mutations are recorded and never fail.
#[derive(Default)]
pub struct MockWlm {
    pub states: Mutex<HashMap<String, VecDeque<NodeState>>>,
    pub drain_calls: Mutex<Vec<(String, String)>>,
    pub resume_calls: Mutex<Vec<String>>,
    pub down_calls: Mutex<Vec<(String, String)>>,
}

impl MockWlm {
    pub fn script(&self, hostname: &str, states: &[NodeState]) {
        self.states
            .lock()
            .unwrap()
            .insert(hostname.to_string(), states.iter().cloned().collect());
    }

    pub fn drains(&self) -> Vec<(String, String)> {
        self.drain_calls.lock().unwrap().clone()
    }

    pub fn resumes(&self) -> Vec<String> {
        self.resume_calls.lock().unwrap().clone()
    }

    pub fn mutation_count(&self) -> usize {
        self.drain_calls.lock().unwrap().len()
            + self.resume_calls.lock().unwrap().len()
            + self.down_calls.lock().unwrap().len()
    }
}

#[async_trait]
impl WorkloadManager for MockWlm {
    async fn node_state(&self, hostname: &str) -> Result<NodeState> {
        let mut states = self.states.lock().unwrap();
        let script = states
            .get_mut(hostname)
            .ok_or_else(|| MaintError::transient(format!("no sinfo entry for {hostname}")))?;
        if script.len() > 1 {
            Ok(script.pop_front().unwrap())
        } else {
            script
                .front()
                .cloned()
                .ok_or_else(|| MaintError::transient(format!("no sinfo entry for {hostname}")))
        }
    }

    async fn set_drain(&self, hostname: &str, reason: &str) -> Result<()> {
        self.drain_calls
            .lock()
            .unwrap()
            .push((hostname.to_string(), reason.to_string()));
        Ok(())
    }

    async fn set_resume(&self, hostname: &str) -> Result<()> {
        self.resume_calls.lock().unwrap().push(hostname.to_string());
        Ok(())
    }

    async fn set_down(&self, hostname: &str, reason: &str) -> Result<()> {
        self.down_calls
            .lock()
            .unwrap()
            .push((hostname.to_string(), reason.to_string()));
        Ok(())
    }
}

/// Static instance-id -> hostname map.
#[derive(Default)]
pub struct MockInventory {
    pub map: Mutex<HashMap<String, String>>,
}

impl MockInventory {
    pub fn insert(&self, instance_id: &str, hostname: &str) {
        self.map
            .lock()
            .unwrap()
            .insert(instance_id.to_string(), hostname.to_string());
    }
}

#[async_trait]
impl Inventory for MockInventory {
    async fn resolve_host(&self, instance_id: &str) -> Result<Option<String>> {
        Ok(self.map.lock().unwrap().get(instance_id).cloned())
    }
}

/// Health mock with a fixed verdict.
pub struct MockHealth {
    pub report: HealthReport,
}

impl MockHealth {
    pub fn passing() -> Self {
        Self {
            report: HealthReport::pass(),
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            report: HealthReport::fail(reason),
        }
    }
}

#[async_trait]
impl HealthChecker for MockHealth {
    async fn check(&self, _hostname: &str) -> Result<HealthReport> {
        Ok(self.report.clone())
    }
}

/// A fully mocked pass context plus handles to the mocks and the audit file.
pub struct Harness {
    pub ctx: PassContext,
    pub cloud: Arc<MockCloud>,
    pub wlm: Arc<MockWlm>,
    pub inventory: Arc<MockInventory>,
    pub cancel_tx: watch::Sender<bool>,
    _tmp: tempfile::TempDir,
}

impl Harness {
    pub fn new(cfg: OrchestratorConfig) -> Self {
        Self::with_health(cfg, MockHealth::passing())
    }

    pub fn with_health(mut cfg: OrchestratorConfig, health: MockHealth) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        cfg.events_log_file = tmp.path().join("events.jsonl");

        let cloud = Arc::new(MockCloud::default());
        let wlm = Arc::new(MockWlm::default());
        let inventory = Arc::new(MockInventory::default());
        let audit = Arc::new(AuditSink::open(&cfg.events_log_file).unwrap());
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let ctx = PassContext {
            cfg: Arc::new(cfg),
            cloud: cloud.clone(),
            wlm: wlm.clone(),
            inventory: inventory.clone(),
            health: Arc::new(health),
            audit,
            scheduled: Arc::new(AtomicU32::new(0)),
            cancel: cancel_rx,
            dry_run: false,
        };
        Self {
            ctx,
            cloud,
            wlm,
            inventory,
            cancel_tx,
            _tmp: tmp,
        }
    }

    pub fn dry_run(mut self) -> Self {
        self.ctx.dry_run = true;
        self
    }

    /// All audit lines, parsed.
    pub fn audit_lines(&self) -> Vec<Value> {
        let raw = std::fs::read_to_string(self.ctx.audit.path()).unwrap_or_default();
        raw.lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    /// `phase/action` pairs for one host, in append order.
    pub fn trace_for(&self, host: &str) -> Vec<String> {
        self.audit_lines()
            .iter()
            .filter(|line| line["host"] == host)
            .map(|line| {
                format!(
                    "{}/{}",
                    line["phase"].as_str().unwrap(),
                    line["action"].as_str().unwrap()
                )
            })
            .collect()
    }

    pub fn count_action(&self, phase: &str, action: &str) -> usize {
        self.audit_lines()
            .iter()
            .filter(|line| line["phase"] == phase && line["action"] == action)
            .count()
    }
}
