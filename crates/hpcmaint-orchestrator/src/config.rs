//! Orchestrator configuration
//!
//! One immutable [`OrchestratorConfig`] is built at process start and passed
//! explicitly to every component; nothing below `main` reads the environment.
//! Approved faults and excluded hosts come from JSON array files, with a
//! comma-separated environment fallback for the fault list.

use std::collections::BTreeSet;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use hpcmaint_core::{MaintError, Result, RetryPolicy};
use tracing::warn;

/// Default management CLI used to map instance OCIDs to hostnames.
const DEFAULT_INVENTORY_CMD: &str = "/config/mgmt/manage.py nodes list --format json";

/// Immutable configuration for one orchestrator process.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Tenancy OCID, the root of compartment enumeration.
    pub tenancy_ocid: String,
    /// Cloud region the compute client talks to.
    pub region: String,

    /// Interval between node-state reads while draining.
    pub drain_poll: Duration,
    /// Overall drain deadline before the host fails with `DrainTimeout`.
    pub drain_timeout: Duration,
    /// Initial interval between event reads while maintenance runs; grows
    /// by a factor of 2 up to [`Self::maint_poll_ceiling`].
    pub maint_poll: Duration,
    /// Ceiling for the maintenance poll interval.
    pub maint_poll_ceiling: Duration,
    /// Sleep between passes in loop mode.
    pub loop_interval: Duration,
    /// Offset added to "now" for the requested maintenance window.
    pub schedule_lead: Duration,
    /// Timeout applied to each individual collaborator call.
    pub call_timeout: Duration,

    /// Upper bound on schedule requests per process lifetime.
    pub daily_schedule_cap: u32,
    /// Worker pool size for a pass.
    pub max_workers: usize,

    /// Freeform tag key stamped on events this orchestrator scheduled.
    pub processed_tag: String,

    /// Fault ids approved for automated action; exact, case-sensitive match.
    pub approved_faults: BTreeSet<String>,
    /// Hostnames never touched by automation.
    pub excluded_hosts: BTreeSet<String>,

    /// Append-only audit log path.
    pub events_log_file: PathBuf,
    /// Optional health probe URL template; `{host}` is substituted.
    pub health_check_url: Option<String>,
    /// Inventory CLI invocation, whitespace-split.
    pub inventory_cmd: Vec<String>,

    /// Log level for the tracing subscriber.
    pub log_level: String,
    /// Optional log file alongside stdout.
    pub log_file: Option<PathBuf>,
}

impl OrchestratorConfig {
    /// Build the configuration from the process environment. The only
    /// required variable is `OCI_TENANCY_OCID`; everything else has the
    /// documented default.
    pub fn from_env() -> Result<Self> {
        let tenancy_ocid = env::var("OCI_TENANCY_OCID")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| MaintError::config("OCI_TENANCY_OCID is not set"))?;

        let approved_file = env_path("APPROVED_FAULT_CODES_FILE", "config/approved_fault_codes.json");
        let mut approved_faults: BTreeSet<String> =
            read_json_list(&approved_file)?.into_iter().collect();
        if approved_faults.is_empty() {
            approved_faults = env::var("APPROVED_FAULT_CODES")
                .unwrap_or_default()
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }

        let excluded_file = env_path("EXCLUDED_HOSTS_FILE", "config/excluded_hosts.json");
        let excluded_hosts: BTreeSet<String> = read_json_list(&excluded_file)?.into_iter().collect();

        let inventory_cmd: Vec<String> = env::var("INVENTORY_CMD")
            .unwrap_or_else(|_| DEFAULT_INVENTORY_CMD.to_string())
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if inventory_cmd.is_empty() {
            return Err(MaintError::config("INVENTORY_CMD is empty"));
        }

        Ok(Self {
            tenancy_ocid,
            region: env::var("REGION").unwrap_or_else(|_| "us-ashburn-1".to_string()),
            drain_poll: env_secs("DRAIN_POLL_SEC", 30)?,
            drain_timeout: env_secs("DRAIN_TIMEOUT_SEC", 1800)?,
            maint_poll: env_secs("MAINT_POLL_SEC", 30)?,
            maint_poll_ceiling: Duration::from_secs(300),
            loop_interval: env_secs("LOOP_INTERVAL_SEC", 900)?,
            schedule_lead: env_secs("SCHEDULE_LEAD_SEC", 300)?,
            call_timeout: env_secs("CALL_TIMEOUT_SEC", 30)?,
            daily_schedule_cap: env_u32("DAILY_SCHEDULE_CAP", 10)?,
            max_workers: env_u32("MAX_WORKERS", 8)? as usize,
            processed_tag: env::var("PROCESSED_TAG").unwrap_or_else(|_| "felix".to_string()),
            approved_faults,
            excluded_hosts,
            events_log_file: env_path("EVENTS_LOG_FILE", "logs/events.jsonl"),
            health_check_url: env::var("HEALTH_CHECK_URL").ok().filter(|s| !s.is_empty()),
            inventory_cmd,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_file: env::var("LOG_FILE").ok().map(PathBuf::from),
        })
    }

    /// Retry policy for inventory resolution during discovery.
    pub fn inventory_retry(&self) -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_secs(1))
    }

    /// Retry policy for the schedule request.
    pub fn schedule_retry(&self) -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_secs(2))
    }
}

fn env_path(key: &str, default: &str) -> PathBuf {
    env::var(key).map(PathBuf::from).unwrap_or_else(|_| PathBuf::from(default))
}

fn env_secs(key: &str, default: u64) -> Result<Duration> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| MaintError::config(format!("{key} must be an integer, got {raw:?}"))),
        Err(_) => Ok(Duration::from_secs(default)),
    }
}

fn env_u32(key: &str, default: u32) -> Result<u32> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<u32>()
            .map_err(|_| MaintError::config(format!("{key} must be an integer, got {raw:?}"))),
        Err(_) => Ok(default),
    }
}

/// Read a JSON array of strings. A missing file is an empty list (with a
/// warning); a present-but-malformed file is a hard error.
pub fn read_json_list(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        warn!(path = %path.display(), "list file not found, treating as empty");
        return Ok(Vec::new());
    }
    let raw = std::fs::read_to_string(path)?;
    let values: Vec<String> = serde_json::from_str(&raw)
        .map_err(|e| MaintError::config(format!("{} is not a JSON string array: {e}", path.display())))?;
    Ok(values
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_json_list_missing_file_is_empty() {
        let values = read_json_list(Path::new("/nonexistent/faults.json")).unwrap();
        assert!(values.is_empty());
    }

    #[test]
    fn test_read_json_list_parses_and_trims() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"["HPCRDMA-0002-02", " GPU-FAULT-1 ", ""]"#).unwrap();
        let values = read_json_list(file.path()).unwrap();
        assert_eq!(values, vec!["HPCRDMA-0002-02", "GPU-FAULT-1"]);
    }

    #[test]
    fn test_read_json_list_rejects_non_array() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"not": "an array"}}"#).unwrap();
        let err = read_json_list(file.path()).unwrap_err();
        assert_eq!(err.kind(), "ConfigError");
    }
}
