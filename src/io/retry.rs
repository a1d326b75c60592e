use crate::types::{WaterError, WaterResult};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Bounded exponential backoff for calls into external services
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Wait before the second attempt
    pub initial_backoff: Duration,
    /// Upper bound for any single wait
    pub max_backoff: Duration,
    /// Growth factor between consecutive waits
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no waiting
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> WaterResult<()> {
        if self.max_attempts == 0 {
            return Err(WaterError::Configuration(
                "Retry policy needs at least one attempt".to_string(),
            ));
        }
        if !(self.multiplier.is_finite() && self.multiplier >= 1.0) {
            return Err(WaterError::Configuration(format!(
                "Backoff multiplier must be >= 1, got {}",
                self.multiplier
            )));
        }
        Ok(())
    }

    /// Wait after the failed attempt number `attempt` (1-based)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let secs = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = secs.min(self.max_backoff.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }
}

/// Cooperative cancellation shared by every worker of a run
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once the token has fired
    pub fn check(&self) -> WaterResult<()> {
        if self.is_cancelled() {
            Err(WaterError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration`, waking early if cancelled
    fn sleep(&self, duration: Duration) -> WaterResult<()> {
        const SLICE: Duration = Duration::from_millis(50);
        let mut remaining = duration;
        while !remaining.is_zero() {
            self.check()?;
            let step = remaining.min(SLICE);
            std::thread::sleep(step);
            remaining -= step;
        }
        self.check()
    }
}

/// Run `op`, retrying transient failures according to `policy`.
///
/// Non-transient errors are returned immediately; the last transient error is
/// returned once attempts are exhausted.
pub fn with_retry<T, F>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    label: &str,
    mut op: F,
) -> WaterResult<T>
where
    F: FnMut() -> WaterResult<T>,
{
    let max_attempts = policy.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        cancel.check()?;
        log::debug!("{}: attempt {} of {}", label, attempt, max_attempts);

        match op() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let wait = policy.backoff_for(attempt);
                log::warn!(
                    "{}: attempt {} failed ({}), retrying in {:?}",
                    label,
                    attempt,
                    e,
                    wait
                );
                cancel.sleep(wait)?;
            }
            Err(e) => {
                if e.is_transient() {
                    log::warn!("{}: giving up after {} attempts: {}", label, attempt, e);
                }
                return Err(e);
            }
        }
    }

    Err(WaterError::TransientService(format!(
        "{}: failed after all retries",
        label
    )))
}
