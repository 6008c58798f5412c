//! Eligibility gate
//!
//! Applied immediately before a worker acts on a job: exclusion and approval
//! are re-checked (defence in depth against config races between discovery
//! and dispatch), and a daily-cap slot is reserved atomically. A worker that
//! loses the cap race skips; the slot stays consumed for the process
//! lifetime.

use std::sync::atomic::{AtomicU32, Ordering};

use hpcmaint_core::Job;

use crate::config::OrchestratorConfig;

/// Outcome of the eligibility check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Proceed,
    SkipCap,
    SkipExcluded,
    SkipFault,
}

impl GateDecision {
    /// Audit action label for skip outcomes.
    pub fn skip_action(&self) -> Option<&'static str> {
        match self {
            Self::Proceed => None,
            Self::SkipCap => Some("cap"),
            Self::SkipExcluded => Some("excluded"),
            Self::SkipFault => Some("fault"),
        }
    }
}

/// Check a job against the guardrails. When `reserve_cap` is set (modes that
/// will issue a schedule request) a cap slot is claimed as part of the check.
pub fn evaluate(
    cfg: &OrchestratorConfig,
    scheduled: &AtomicU32,
    job: &Job,
    reserve_cap: bool,
) -> GateDecision {
    if cfg.excluded_hosts.contains(&job.hostname) {
        return GateDecision::SkipExcluded;
    }
    if !cfg.approved_faults.contains(&job.fault_id) {
        return GateDecision::SkipFault;
    }
    if reserve_cap {
        let cap = cfg.daily_schedule_cap;
        let claimed = scheduled.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
            (n < cap).then_some(n + 1)
        });
        if claimed.is_err() {
            return GateDecision::SkipCap;
        }
    }
    GateDecision::Proceed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> OrchestratorConfig {
        let mut cfg = crate::testing::test_config();
        cfg.daily_schedule_cap = 2;
        cfg.excluded_hosts.insert("GPU-9".to_string());
        cfg
    }

    fn job(hostname: &str, fault: &str) -> Job {
        Job {
            event_id: "ev1".into(),
            instance_id: "inst1".into(),
            hostname: hostname.into(),
            fault_id: fault.into(),
            compartment_id: "comp1".into(),
            window_start: None,
        }
    }

    #[test]
    fn test_excluded_host_skips() {
        let cfg = test_config();
        let counter = AtomicU32::new(0);
        assert_eq!(
            evaluate(&cfg, &counter, &job("GPU-9", "HPCRDMA-0002-02"), true),
            GateDecision::SkipExcluded
        );
        // No cap slot consumed on a skip.
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unapproved_fault_skips() {
        let cfg = test_config();
        let counter = AtomicU32::new(0);
        assert_eq!(
            evaluate(&cfg, &counter, &job("GPU-1", "OTHER-9999-99"), true),
            GateDecision::SkipFault
        );
    }

    #[test]
    fn test_cap_is_reserved_atomically() {
        let cfg = test_config();
        let counter = AtomicU32::new(0);
        let j = job("GPU-1", "HPCRDMA-0002-02");
        assert_eq!(evaluate(&cfg, &counter, &j, true), GateDecision::Proceed);
        assert_eq!(evaluate(&cfg, &counter, &j, true), GateDecision::Proceed);
        assert_eq!(evaluate(&cfg, &counter, &j, true), GateDecision::SkipCap);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_cap_not_reserved_for_catchup() {
        let cfg = test_config();
        let counter = AtomicU32::new(0);
        let j = job("GPU-1", "HPCRDMA-0002-02");
        for _ in 0..5 {
            assert_eq!(evaluate(&cfg, &counter, &j, false), GateDecision::Proceed);
        }
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_zero_cap_skips_immediately() {
        let mut cfg = test_config();
        cfg.daily_schedule_cap = 0;
        let counter = AtomicU32::new(0);
        assert_eq!(
            evaluate(&cfg, &counter, &job("GPU-1", "HPCRDMA-0002-02"), true),
            GateDecision::SkipCap
        );
    }
}
