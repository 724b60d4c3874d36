//! Bounded retries for one provider endpoint.
//!
//! A call gets `max_retries + 1` attempts. Every attempt waits for the
//! endpoint's pacing slot, is cut off after `attempt_timeout`, and never runs
//! past the caller's deadline. Only retryable failures (connection resets,
//! timeouts) earn another attempt; the wait before it comes from [`Backoff`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::circuit_breaker::{CircuitRegistry, CircuitState};
use crate::data_source::{EndpointId, SourceError};
use crate::throttling::RateLimiter;

/// Wait inserted before retry `n` of a failed call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    Fixed { delay: Duration },
    /// `base * factor^n`, never above `max`. With `jitter` each wait moves by
    /// up to half its length either way and is clamped to `max` again.
    Exponential {
        base: Duration,
        factor: f64,
        max: Duration,
        jitter: bool,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_secs(2),
            factor: 1.5,
            max: Duration::from_secs(30),
            jitter: false,
        }
    }
}

impl Backoff {
    /// Wait before retry `retry`; 0 is the wait after the first failed attempt.
    pub fn delay(self, retry: u32) -> Duration {
        match self {
            Self::Fixed { delay } => delay,
            Self::Exponential {
                base,
                factor,
                max,
                jitter,
            } => {
                let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
                let grown = base.as_secs_f64() * factor.powi(exponent);
                let capped =
                    Duration::try_from_secs_f64(grown).map_or(max, |delay| delay.min(max));
                if jitter {
                    spread(capped).min(max)
                } else {
                    capped
                }
            }
        }
    }
}

/// Uniform pick in `[delay / 2, delay * 3 / 2]`.
fn spread(delay: Duration) -> Duration {
    let half = delay / 2;
    let width = u64::try_from(half.as_nanos()).unwrap_or(u64::MAX / 2);
    (delay - half) + Duration::from_nanos(fastrand::u64(0..=width.saturating_mul(2)))
}

/// Attempt budget for one [`RetryExecutor::execute`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    pub backoff: Backoff,
    /// Cut-off for a single upstream attempt; a timed-out attempt counts as
    /// a connection failure and may be retried.
    pub attempt_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Backoff::default(),
            attempt_timeout: Duration::from_secs(5),
        }
    }
}

impl RetryConfig {
    pub fn fixed(delay: Duration, max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff: Backoff::Fixed { delay },
            ..Self::default()
        }
    }

    /// One attempt, no backoff.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        self.backoff.delay(retry)
    }
}

/// Runs one provider call with bounded retries.
///
/// Before every attempt the endpoint's breaker is consulted and its rate
/// limiter awaited. The breaker sees exactly one outcome per
/// [`execute`](RetryExecutor::execute) call.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
    limiter: Arc<RateLimiter>,
    circuits: Arc<CircuitRegistry>,
}

impl RetryExecutor {
    pub fn new(
        config: RetryConfig,
        limiter: Arc<RateLimiter>,
        circuits: Arc<CircuitRegistry>,
    ) -> Self {
        Self {
            config,
            limiter,
            circuits,
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Executes `attempt_fn` against `endpoint` until it succeeds, fails with a
    /// non-retryable error, runs out of retries or hits `deadline`.
    ///
    /// `attempt_fn` receives the 0-based attempt number.
    pub async fn execute<T, F, Fut>(
        &self,
        endpoint: &EndpointId,
        deadline: Option<Instant>,
        mut attempt_fn: F,
    ) -> Result<T, SourceError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let breaker = self.circuits.breaker(endpoint);
        let Some(permit) = breaker.try_acquire() else {
            debug!(endpoint = %endpoint, "circuit open, skipping call");
            return Err(SourceError::circuit_open(endpoint));
        };

        let mut attempt = 0_u32;
        loop {
            if attempt > 0 && !permit.is_probe() {
                match breaker.state() {
                    CircuitState::Closed => {}
                    // Another caller tripped the breaker while we backed off.
                    CircuitState::Open => {
                        permit.fail();
                        return Err(SourceError::circuit_open(endpoint));
                    }
                    // A probe owns the endpoint now; leave the outcome to it.
                    CircuitState::HalfOpen => return Err(SourceError::circuit_open(endpoint)),
                }
            }

            if within_deadline(deadline, self.limiter.wait_if_needed(endpoint))
                .await
                .is_none()
            {
                return Err(deadline_exceeded(endpoint));
            }

            let attempt_deadline = bounded(Instant::now() + self.config.attempt_timeout, deadline);
            let outcome = match tokio::time::timeout_at(attempt_deadline, attempt_fn(attempt)).await
            {
                Ok(outcome) => outcome,
                Err(_) if deadline.is_some_and(|d| d <= attempt_deadline) => {
                    return Err(deadline_exceeded(endpoint));
                }
                Err(_) => Err(SourceError::connection(format!(
                    "{endpoint} attempt timed out after {} ms",
                    self.config.attempt_timeout.as_millis()
                ))),
            };

            let error = match outcome {
                Ok(value) => {
                    permit.succeed();
                    return Ok(value);
                }
                Err(error) => error,
            };

            if !error.retryable() || attempt >= self.config.max_retries {
                permit.fail();
                return Err(error);
            }

            let delay = self.config.delay_for_attempt(attempt);
            if deadline.is_some_and(|d| Instant::now() + delay >= d) {
                debug!(
                    endpoint = %endpoint,
                    delay_ms = delay.as_millis() as u64,
                    "backoff would overrun the deadline, giving up"
                );
                permit.fail();
                return Err(error);
            }
            warn!(
                endpoint = %endpoint,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "connection failure, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

fn bounded(at: Instant, deadline: Option<Instant>) -> Instant {
    deadline.map_or(at, |deadline| at.min(deadline))
}

async fn within_deadline<F: Future>(deadline: Option<Instant>, future: F) -> Option<F::Output> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, future).await.ok(),
        None => Some(future.await),
    }
}

fn deadline_exceeded(endpoint: &EndpointId) -> SourceError {
    SourceError::connection(format!("{endpoint} call abandoned: deadline exceeded"))
}
