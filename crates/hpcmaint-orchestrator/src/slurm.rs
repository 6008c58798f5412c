//! Slurm workload-manager collaborator
//!
//! Node control goes through `scontrol update` and state reads through
//! `sinfo -h -N -o "%N %t"`, the same command shapes operators use by hand.
//! Mutations run under sudo; reads do not.

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use hpcmaint_core::{MaintError, NodeState, Result, WorkloadManager};
use tracing::info;

use crate::cmd;

/// Slurm CLI client.
pub struct SlurmCli {
    call_timeout: Duration,
}

impl SlurmCli {
    pub fn new(call_timeout: Duration) -> Self {
        Self { call_timeout }
    }

    /// The scontrol executable (overridable with a fake binary for testing).
    fn scontrol_exec() -> String {
        env::var("HPCMAINT_FAKE_SCONTROL").unwrap_or_else(|_| "scontrol".to_string())
    }

    /// The sinfo executable (overridable with a fake binary for testing).
    fn sinfo_exec() -> String {
        env::var("HPCMAINT_FAKE_SINFO").unwrap_or_else(|_| "sinfo".to_string())
    }

    async fn scontrol_update(&self, args: &[String]) -> Result<()> {
        let scontrol = Self::scontrol_exec();
        let mut full: Vec<&str> = vec![scontrol.as_str(), "update"];
        full.extend(args.iter().map(String::as_str));
        cmd::run("sudo", &full, self.call_timeout).await?;
        Ok(())
    }
}

/// Find `hostname` in `sinfo -h -N -o "%N %t"` output and parse its state.
fn parse_sinfo_state(output: &str, hostname: &str) -> Option<NodeState> {
    for line in output.lines() {
        let mut parts = line.split_whitespace();
        let (Some(node), Some(token)) = (parts.next(), parts.next()) else {
            continue;
        };
        if node == hostname {
            return Some(NodeState::parse(token));
        }
    }
    None
}

#[async_trait]
impl WorkloadManager for SlurmCli {
    async fn node_state(&self, hostname: &str) -> Result<NodeState> {
        let sinfo = Self::sinfo_exec();
        let output = cmd::run(
            &sinfo,
            &["-h", "-N", "-n", hostname, "-o", "%N %t"],
            self.call_timeout,
        )
        .await?;
        parse_sinfo_state(&output, hostname).ok_or_else(|| {
            MaintError::transient(format!("node {hostname} not present in sinfo output"))
        })
    }

    async fn set_drain(&self, hostname: &str, reason: &str) -> Result<()> {
        info!(host = %hostname, %reason, "requesting DRAIN");
        self.scontrol_update(&[
            format!("NodeName={hostname}"),
            "State=DRAIN".to_string(),
            format!("Reason={reason}"),
        ])
        .await
    }

    async fn set_resume(&self, hostname: &str) -> Result<()> {
        info!(host = %hostname, "requesting RESUME");
        self.scontrol_update(&[format!("NodeName={hostname}"), "State=RESUME".to_string()])
            .await
    }

    async fn set_down(&self, hostname: &str, reason: &str) -> Result<()> {
        info!(host = %hostname, %reason, "requesting DOWN");
        self.scontrol_update(&[
            format!("NodeName={hostname}"),
            "State=DOWN".to_string(),
            format!("Reason={reason}"),
        ])
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SINFO: &str = "GPU-1 idle\nGPU-2 alloc\nGPU-332 drain*\nGPU-400 drng\n";

    #[test]
    fn test_parse_sinfo_finds_host() {
        assert_eq!(parse_sinfo_state(SINFO, "GPU-1"), Some(NodeState::Idle));
        assert_eq!(parse_sinfo_state(SINFO, "GPU-332"), Some(NodeState::Drained));
        assert_eq!(parse_sinfo_state(SINFO, "GPU-400"), Some(NodeState::Drain));
    }

    #[test]
    fn test_parse_sinfo_missing_host() {
        assert_eq!(parse_sinfo_state(SINFO, "GPU-999"), None);
    }

    #[test]
    fn test_parse_sinfo_ignores_malformed_lines() {
        assert_eq!(parse_sinfo_state("garbage\nGPU-1 mix\n", "GPU-1"), Some(NodeState::Mixed));
    }
}
