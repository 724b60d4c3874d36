use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::info;

use crate::data_source::EndpointId;

/// Runtime circuit state for one provider endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl Display for CircuitState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        })
    }
}

/// Circuit breaker thresholds and timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct CircuitInner {
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

impl Default for CircuitInner {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            opened_at: None,
            probe_in_flight: false,
        }
    }
}

/// Admission granted by [`CircuitBreaker::try_acquire`].
///
/// Report the outcome with [`succeed`](CallPermit::succeed) or
/// [`fail`](CallPermit::fail). Dropping a probe permit without an outcome
/// frees the probe slot and leaves the failure count untouched.
#[derive(Debug)]
#[must_use = "report the call outcome through the permit"]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl CallPermit<'_> {
    pub const fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn succeed(mut self) {
        self.settled = true;
        if self.probe {
            self.breaker.settle_probe(true);
        } else {
            self.breaker.record_success();
        }
    }

    pub fn fail(mut self) {
        self.settled = true;
        if self.probe {
            self.breaker.settle_probe(false);
        } else {
            self.breaker.record_failure();
        }
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.probe {
            self.breaker.abandon_probe();
        }
    }
}

/// Thread-safe, self-healing circuit breaker for one endpoint.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<CircuitInner>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(CircuitInner::default()),
        }
    }

    pub const fn config(&self) -> CircuitBreakerConfig {
        self.config
    }

    fn lock(&self) -> MutexGuard<'_, CircuitInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admits a call, or returns `None` when the call must be short-circuited.
    ///
    /// The first caller after the cooldown moves the breaker to half-open and
    /// receives the single probe permit.
    pub fn try_acquire(&self) -> Option<CallPermit<'_>> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Some(CallPermit {
                breaker: self,
                probe: false,
                settled: false,
            }),
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    None
                } else {
                    inner.probe_in_flight = true;
                    Some(CallPermit {
                        breaker: self,
                        probe: true,
                        settled: false,
                    })
                }
            }
            CircuitState::Open => {
                let cooled_down = inner
                    .opened_at
                    .map(|opened_at| opened_at.elapsed() >= self.config.cooldown)
                    .unwrap_or(true);

                if cooled_down {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    Some(CallPermit {
                        breaker: self,
                        probe: true,
                        settled: false,
                    })
                } else {
                    None
                }
            }
        }
    }

    /// Records a success from a call admitted while closed.
    ///
    /// Only a closed breaker is affected. Once the breaker has left the
    /// closed state, the half-open probe alone decides the next state.
    pub fn record_success(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::Closed {
            inner.failure_count = 0;
        }
    }

    /// Records a failure from a call admitted while closed.
    ///
    /// Reaching the threshold opens the breaker. Late failures while open
    /// are counted but keep the original cooldown, and failures landing
    /// during half-open are ignored so they cannot displace the probe.
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = inner.failure_count.saturating_add(1);
                if inner.failure_count >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    info!(
                        failures = inner.failure_count,
                        cooldown_ms = self.config.cooldown.as_millis() as u64,
                        "circuit opened"
                    );
                }
            }
            CircuitState::Open => {
                inner.failure_count = inner.failure_count.saturating_add(1);
            }
            CircuitState::HalfOpen => {}
        }
    }

    fn settle_probe(&self, succeeded: bool) {
        let mut inner = self.lock();
        if inner.state != CircuitState::HalfOpen {
            // Reset while the probe was in flight.
            return;
        }

        if succeeded {
            *inner = CircuitInner::default();
            info!(threshold = self.config.failure_threshold, "probe succeeded, circuit closed");
        } else {
            inner.failure_count = inner.failure_count.saturating_add(1);
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            inner.probe_in_flight = false;
            info!(failures = inner.failure_count, "probe failed, circuit reopened");
        }
    }

    fn abandon_probe(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.probe_in_flight = false;
        }
    }

    /// Forces the breaker closed and clears its counters.
    pub fn reset(&self) {
        *self.lock() = CircuitInner::default();
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    pub fn opened_at(&self) -> Option<Instant> {
        self.lock().opened_at
    }
}

/// Breakers keyed by endpoint, created lazily with a shared config.
#[derive(Debug, Default)]
pub struct CircuitRegistry {
    config: CircuitBreakerConfig,
    breakers: RwLock<HashMap<EndpointId, Arc<CircuitBreaker>>>,
}

impl CircuitRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    pub fn breaker(&self, endpoint: &EndpointId) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self
            .breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(endpoint)
        {
            return Arc::clone(breaker);
        }

        let mut breakers = self.breakers.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            breakers
                .entry(endpoint.clone())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(self.config))),
        )
    }

    /// State of a registered endpoint; unregistered endpoints read as closed.
    pub fn state(&self, endpoint: &EndpointId) -> CircuitState {
        self.breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(endpoint)
            .map(|breaker| breaker.state())
            .unwrap_or(CircuitState::Closed)
    }

    pub fn reset(&self, endpoint: &EndpointId) {
        if let Some(breaker) = self
            .breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(endpoint)
        {
            breaker.reset();
        }
    }

    pub fn reset_all(&self) {
        for breaker in self
            .breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
        {
            breaker.reset();
        }
    }

    pub fn endpoints(&self) -> Vec<EndpointId> {
        let mut endpoints = self
            .breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        endpoints.sort();
        endpoints
    }
}
