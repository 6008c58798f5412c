//! Retry and backoff policies
//!
//! Every driver that talks to a collaborator carries an explicit
//! [`RetryPolicy`] instead of ad-hoc sleeps. Only `Transient` errors are
//! retried; anything else escalates immediately. Waits are cancellable so a
//! shutting-down pass never sits out a full backoff.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tracing::warn;

use crate::error::{MaintError, Result};

/// Bounded exponential retry policy.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, the first call included.
    pub attempts: u32,
    /// Delay before the first retry.
    pub base: Duration,
    /// Multiplier applied per retry.
    pub factor: u32,
    /// Ceiling for any single delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub const fn new(attempts: u32, base: Duration) -> Self {
        Self {
            attempts,
            base,
            factor: 2,
            max_delay: Duration::from_secs(60),
        }
    }

    /// The delays between attempts: `attempts - 1` entries, capped.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        let base = self.base;
        let factor = self.factor;
        let cap = self.max_delay;
        (0..self.attempts.saturating_sub(1))
            .map(move |i| base.saturating_mul(factor.saturating_pow(i)).min(cap))
    }
}

/// Unbounded growing poll interval, for waits with no attempt limit.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    next: Duration,
    factor: u32,
    ceiling: Duration,
}

impl Backoff {
    pub const fn new(base: Duration, factor: u32, ceiling: Duration) -> Self {
        Self {
            next: base,
            factor,
            ceiling,
        }
    }

    /// The delay to wait now; subsequent calls grow up to the ceiling.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = self
            .next
            .saturating_mul(self.factor)
            .min(self.ceiling);
        delay
    }
}

/// Sleep that aborts with `Cancelled` when the pass-wide signal fires.
pub async fn sleep_or_cancel(delay: Duration, cancel: &mut watch::Receiver<bool>) -> Result<()> {
    if *cancel.borrow() {
        return Err(MaintError::Cancelled);
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => Ok(()),
        _ = wait_for_cancel(cancel) => Err(MaintError::Cancelled),
    }
}

/// Resolves once the cancellation flag turns true; pends forever if the
/// sender goes away without signalling.
pub async fn wait_for_cancel(cancel: &mut watch::Receiver<bool>) {
    if *cancel.borrow() {
        return;
    }
    while cancel.changed().await.is_ok() {
        if *cancel.borrow() {
            return;
        }
    }
    std::future::pending::<()>().await;
}

/// Run `op` under `policy`, retrying transient errors with backoff.
pub async fn retry_transient<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    cancel: &mut watch::Receiver<bool>,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delays = policy.delays();
    loop {
        match op().await {
            Err(MaintError::Transient(detail)) => match delays.next() {
                Some(delay) => {
                    warn!(what, %detail, ?delay, "transient error, retrying");
                    sleep_or_cancel(delay, cancel).await?;
                }
                None => return Err(MaintError::Transient(detail)),
            },
            other => return other,
        }
    }
}
