//! # Retry Scheduler
//!
//! Decides, for a failed attempt, whether the operation is retried and when.
//!
//! ## Delay Curve
//! ```text
//! delay(n) = clamp(BASE × FACTOR^(n-1) × (1 + jitter), BASE/2, MAX_DELAY)
//!            jitter ∈ [-JITTER, +JITTER]
//!
//!   attempt  │ 1    │ 2    │ 3     │ 4     │ ... │ 8+
//!   ─────────┼──────┼──────┼───────┼───────┼─────┼──────
//!   no jitter│ 3s   │ 6s   │ 12s   │ 24s   │     │ 5min
//! ```
//!
//! ## Decision
//! - error class not retryable → permanent, no delay
//! - attempts reached the budget → permanent
//! - otherwise → retry at `now + delay(attempts)`

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::config::RetrySettings;
use outpost_core::{ErrorClass, PendingOperation};
use outpost_db::OperationFailure;

/// Computes retry delays and retry-vs-permanent decisions.
#[derive(Debug, Clone)]
pub struct RetryScheduler {
    base: Duration,
    factor: f64,
    max_delay: Duration,
    jitter: f64,
    max_attempts: i64,
}

impl RetryScheduler {
    pub fn new(settings: &RetrySettings) -> Self {
        RetryScheduler {
            base: settings.base_delay(),
            factor: settings.factor,
            max_delay: settings.max_delay(),
            jitter: settings.jitter_factor,
            max_attempts: settings.max_attempts,
        }
    }

    /// Attempt budget per operation.
    pub fn max_attempts(&self) -> i64 {
        self.max_attempts
    }

    /// Delay before the second attempt.
    pub fn base_delay(&self) -> Duration {
        self.base
    }

    /// Shortest delay the scheduler ever hands out.
    pub fn min_delay(&self) -> Duration {
        self.base / 2
    }

    fn create_backoff(&self) -> ExponentialBackoff {
        // Cap the un-jittered interval high enough that the clamp below, not
        // the backoff itself, decides the ceiling
        let ceiling = self.max_delay.as_secs_f64() / (1.0 - self.jitter).max(f64::EPSILON);

        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.base)
            .with_multiplier(self.factor)
            .with_randomization_factor(self.jitter)
            .with_max_interval(Duration::from_secs_f64(ceiling))
            .with_max_elapsed_time(None)
            .build()
    }

    /// Delay before the next attempt, after `attempts` attempts so far.
    pub fn delay_for(&self, attempts: i64) -> Duration {
        let mut backoff = self.create_backoff();

        let mut delay = self.base;
        for _ in 0..attempts.max(1) {
            match backoff.next_backoff() {
                Some(next) => delay = next,
                None => {
                    delay = self.max_delay;
                    break;
                }
            }
        }

        delay.clamp(self.min_delay(), self.max_delay)
    }

    /// Turns a failed attempt into the log update the processor records.
    ///
    /// `op.attempts` already includes the attempt that just failed.
    pub fn on_failure(
        &self,
        op: &PendingOperation,
        class: ErrorClass,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> OperationFailure {
        let message = message.into();

        if !class.is_retryable() || op.attempts >= self.max_attempts {
            return OperationFailure {
                permanent: true,
                next_eligible_at: None,
                error_class: class,
                message,
            };
        }

        let delay = self.delay_for(op.attempts);
        let next_eligible_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|delay| now.checked_add_signed(delay));

        OperationFailure {
            permanent: false,
            next_eligible_at: Some(next_eligible_at.unwrap_or(now)),
            error_class: class,
            message,
        }
    }
}

impl Default for RetryScheduler {
    fn default() -> Self {
        Self::new(&RetrySettings::default())
    }
}
