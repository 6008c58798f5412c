//! Shared fixtures for unit tests.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::OrchestratorConfig;

pub(crate) fn test_config() -> OrchestratorConfig {
    OrchestratorConfig {
        tenancy_ocid: "ocid1.tenancy.oc1..test".into(),
        region: "us-ashburn-1".into(),
        drain_poll: Duration::from_millis(5),
        drain_timeout: Duration::from_millis(200),
        maint_poll: Duration::from_millis(5),
        maint_poll_ceiling: Duration::from_millis(40),
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
