//! Subprocess runner for CLI collaborators
//!
//! The Slurm, inventory and OCI collaborators are all external command-line
//! tools. Invocations are bounded by the per-call timeout; a non-zero exit or
//! a timeout surfaces as a `Transient` error so the calling driver's retry
//! policy applies.

use std::process::Stdio;
use std::time::Duration;

use hpcmaint_core::{MaintError, Result};
use tokio::process::Command;
use tracing::{debug, error};

/// Run a command, capture stdout, and enforce `timeout`.
pub async fn run(program: &str, args: &[&str], timeout: Duration) -> Result<String> {
    debug!(%program, ?args, "running command");

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| MaintError::transient(format!("spawn {program}: {e}")))?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(|e| MaintError::transient(format!("{program}: {e}")))?,
        Err(_) => {
            return Err(MaintError::transient(format!(
                "{program} timed out after {timeout:?}"
            )));
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        error!(%program, code = output.status.code(), %stderr, "command failed");
        return Err(MaintError::transient(format!(
            "{program} exited {:?}: {stderr}",
            output.status.code()
        )));
    }
    Ok(stdout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_captures_stdout() {
        let out = run("echo", &["hello"], Duration::from_secs(5)).await.unwrap();
        assert_eq!(out, "hello");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_transient() {
        let err = run("false", &[], Duration::from_secs(5)).await.unwrap_err();
        assert_eq!(err.kind(), "TransientExternalError");
    }

    #[tokio::test]
    async fn test_missing_binary_is_transient() {
        let err = run("hpcmaint-no-such-binary", &[], Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "TransientExternalError");
    }

    #[tokio::test]
    async fn test_timeout_is_enforced() {
        let err = run("sleep", &["5"], Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "TransientExternalError");
    }
}
