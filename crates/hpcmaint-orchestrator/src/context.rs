//! Shared per-pass context
//!
//! Everything a phase driver needs, threaded explicitly: the immutable
//! config, the four collaborators, the audit sink, the daily-cap counter and
//! the pass-wide cancellation signal. Cloning is cheap; workers each carry
//! their own copy.

use std::sync::atomic::AtomicU32;
use std::sync::Arc;

use hpcmaint_core::{CloudCompute, HealthChecker, Inventory, WorkloadManager};
use tokio::sync::watch;

use crate::audit::AuditSink;
use crate::config::OrchestratorConfig;

#[derive(Clone)]
pub struct PassContext {
    pub cfg: Arc<OrchestratorConfig>,
    pub cloud: Arc<dyn CloudCompute>,
    pub wlm: Arc<dyn WorkloadManager>,
    pub inventory: Arc<dyn Inventory>,
    pub health: Arc<dyn HealthChecker>,
    pub audit: Arc<AuditSink>,
    /// Schedule requests issued so far this process; bounded by the daily cap.
    pub scheduled: Arc<AtomicU32>,
    pub cancel: watch::Receiver<bool>,
    /// When set, mutating collaborator calls are replaced by audit records.
    pub dry_run: bool,
}

impl PassContext {
    pub fn cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// A fresh receiver handle for drivers that need `&mut` access.
    pub fn cancel_rx(&self) -> watch::Receiver<bool> {
        self.cancel.clone()
    }
}
