use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Interval and total wait allowed for one readiness condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBudget {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollBudget {
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Number of probes that fit in the budget, never less than one.
    pub fn max_attempts(&self) -> u32 {
        if self.interval.is_zero() {
            return 1;
        }
        let attempts = self.timeout.as_millis().div_ceil(self.interval.as_millis());
        u32::try_from(attempts).unwrap_or(u32::MAX).max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{phase} not ready after {attempts} attempts ({waited:?})")]
pub struct PollTimeout {
    pub phase: &'static str,
    pub attempts: u32,
    pub waited: Duration,
}

/// Re-evaluates a readiness probe until it yields a value or the budget runs
/// out. Probe errors count as "not ready yet".
#[derive(Debug, Clone, Copy)]
pub struct ReadinessPoller {
    phase: &'static str,
    budget: PollBudget,
}

impl ReadinessPoller {
    pub fn new(phase: &'static str, budget: PollBudget) -> Self {
        Self { phase, budget }
    }

    pub async fn poll_until<T, E, F, Fut>(&self, mut probe: F) -> Result<T, PollTimeout>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
        E: Display,
    {
        let max_attempts = self.budget.max_attempts();
        let mut waited = Duration::ZERO;

        for attempt in 1..=max_attempts {
            match probe(attempt).await {
                Ok(Some(value)) => return Ok(value),
                Ok(None) => {
                    debug!(phase = self.phase, attempt, max_attempts, "Not ready yet");
                }
                Err(error) => {
                    debug!(phase = self.phase, attempt, max_attempts, %error, "Readiness probe failed");
                }
            }
            tokio::time::sleep(self.budget.interval).await;
            waited += self.budget.interval;
        }

        Err(PollTimeout {
            phase: self.phase,
            attempts: max_attempts,
            waited,
        })
    }
}
