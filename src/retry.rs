//! Bounded exponential backoff.
//!
//! Used for one thing only: confirming that an asynchronously built unique
//! index became ready. Ordinary reads and writes are never retried.

use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::types::{DbError, Result};

/// Outcome of one readiness probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    /// The awaited resource is ready.
    Ready,
    /// Still in progress; poll again.
    Pending,
    /// The build failed; stop polling.
    Failed(String),
}

/// Retry ceiling and initial delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Delay before the first retry; doubled after every attempt.
    pub initial: Duration,
    /// Retries after the first probe.
    pub max_retries: u32,
}

impl Backoff {
    /// Backoff with the given ceiling.
    pub fn new(initial: Duration, max_retries: u32) -> Self {
        Self {
            initial,
            max_retries,
        }
    }

    /// Delay before retry `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor)
    }
}

/// Polls `probe` until it reports ready, sleeping with exponential backoff
/// between attempts. A failed build is a `Backend` error; exhausting the
/// retries is a `Timeout`.
pub fn wait_for<F>(what: &str, backoff: Backoff, mut probe: F) -> Result<()>
where
    F: FnMut() -> Result<Probe>,
{
    for attempt in 0..=backoff.max_retries {
        if attempt > 0 {
            let delay = backoff.delay(attempt);
            debug!(target_resource = what, attempt, delay_ms = delay.as_millis() as u64, "waiting before next poll");
            thread::sleep(delay);
        }
        match probe()? {
            Probe::Ready => {
                debug!(target_resource = what, attempt, "ready");
                return Ok(());
            }
            Probe::Pending => continue,
            Probe::Failed(reason) => {
                warn!(target_resource = what, %reason, "build failed");
                return Err(DbError::backend(format!("{what} failed: {reason}")));
            }
        }
    }
    warn!(target_resource = what, retries = backoff.max_retries, "gave up waiting");
    Err(DbError::timeout(format!(
        "{what} not ready after {} retries",
        backoff.max_retries
    )))
}
