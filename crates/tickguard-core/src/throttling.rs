//! Per-endpoint call pacing.
//!
//! Each [`EndpointId`] gets its own GCRA cell (burst 1, period =
//! `min_interval`), so admission check and call recording happen in a single
//! atomic step inside `governor`. Endpoints never contend with each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use governor::clock::Clock;
use governor::middleware::NoOpMiddleware;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter as GovernorLimiter};
use tracing::debug;

use crate::data_source::EndpointId;

/// Governor clock backed by Tokio's time source, so paused test runtimes
/// drive pacing deterministically.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    type Instant = std::time::Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now().into_std()
    }
}

type DirectRateLimiter =
    GovernorLimiter<NotKeyed, InMemoryState, TokioClock, NoOpMiddleware<std::time::Instant>>;

struct EndpointPacer {
    limiter: Option<DirectRateLimiter>,
    last_call_at: Mutex<Option<tokio::time::Instant>>,
}

impl std::fmt::Debug for EndpointPacer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointPacer")
            .field("paced", &self.limiter.is_some())
            .field("last_call_at", &self.last_call_at)
            .finish()
    }
}

impl EndpointPacer {
    fn new(min_interval: Duration) -> Self {
        let limiter = Quota::with_period(min_interval)
            .map(|quota| GovernorLimiter::direct_with_clock(quota, &TokioClock));
        Self {
            limiter,
            last_call_at: Mutex::new(None),
        }
    }
}

/// Enforces a minimum interval between consecutive calls to the same endpoint.
#[derive(Debug)]
pub struct RateLimiter {
    default_interval: Duration,
    overrides: HashMap<EndpointId, Duration>,
    pacers: RwLock<HashMap<EndpointId, Arc<EndpointPacer>>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl RateLimiter {
    pub fn new(default_interval: Duration) -> Self {
        Self {
            default_interval,
            overrides: HashMap::new(),
            pacers: RwLock::new(HashMap::new()),
        }
    }

    /// Sets a dedicated interval for one endpoint. Zero disables pacing.
    pub fn with_interval(mut self, endpoint: EndpointId, min_interval: Duration) -> Self {
        self.overrides.insert(endpoint, min_interval);
        self
    }

    pub fn min_interval(&self, endpoint: &EndpointId) -> Duration {
        self.overrides
            .get(endpoint)
            .copied()
            .unwrap_or(self.default_interval)
    }

    /// Waits until the endpoint may be called again, then records the call.
    pub async fn wait_if_needed(&self, endpoint: &EndpointId) {
        let pacer = self.pacer(endpoint);

        if let Some(limiter) = &pacer.limiter {
            while let Err(not_until) = limiter.check() {
                let wait = not_until.wait_time_from(TokioClock.now());
                debug!(
                    endpoint = %endpoint,
                    delay_ms = wait.as_millis() as u64,
                    "pacing call"
                );
                tokio::time::sleep(wait).await;
            }
        }

        *pacer
            .last_call_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(tokio::time::Instant::now());
    }

    /// Time of the most recent admitted call, if the endpoint was ever called.
    pub fn last_call_at(&self, endpoint: &EndpointId) -> Option<tokio::time::Instant> {
        let pacers = self.pacers.read().unwrap_or_else(PoisonError::into_inner);
        pacers.get(endpoint).and_then(|pacer| {
            *pacer
                .last_call_at
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
        })
    }

    fn pacer(&self, endpoint: &EndpointId) -> Arc<EndpointPacer> {
        if let Some(pacer) = self
            .pacers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(endpoint)
        {
            return Arc::clone(pacer);
        }

        let mut pacers = self.pacers.write().unwrap_or_else(PoisonError::into_inner);
        let min_interval = self.min_interval(endpoint);
        Arc::clone(
            pacers
                .entry(endpoint.clone())
                .or_insert_with(|| Arc::new(EndpointPacer::new(min_interval))),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::QueryKind;
    use tokio::time::Instant;

    fn endpoint(provider: &str) -> EndpointId {
        EndpointId::new(provider, QueryKind::SpotQuote)
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_calls_are_spaced_by_interval() {
        let limiter = RateLimiter::new(Duration::from_secs(1));
        let ep = endpoint("eastmoney");

        let start = Instant::now();
        limiter.wait_if_needed(&ep).await;
        let first = limiter.last_call_at(&ep).expect("recorded");

        tokio::time::advance(Duration::from_millis(200)).await;
        limiter.wait_if_needed(&ep).await;
        let second = limiter.last_call_at(&ep).expect("recorded");

        assert!(first - start < Duration::from_millis(10));
        assert!(second - first >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn endpoints_do_not_share_a_budget() {
        let limiter = RateLimiter::new(Duration::from_secs(5));

        let start = Instant::now();
        limiter.wait_if_needed(&endpoint("eastmoney")).await;
        limiter.wait_if_needed(&endpoint("sina")).await;

        assert!(Instant::now() - start < Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_override_disables_pacing() {
        let ep = endpoint("sina");
        let limiter =
            RateLimiter::new(Duration::from_secs(5)).with_interval(ep.clone(), Duration::ZERO);

        let start = Instant::now();
        for _ in 0..5 {
            limiter.wait_if_needed(&ep).await;
        }

        assert_eq!(limiter.min_interval(&ep), Duration::ZERO);
        assert!(Instant::now() - start < Duration::from_millis(10));
        assert!(limiter.last_call_at(&ep).is_some());
    }

    #[test]
    fn unknown_endpoint_has_no_last_call() {
        let limiter = RateLimiter::default();
        assert!(limiter.last_call_at(&endpoint("eastmoney")).is_none());
        assert_eq!(limiter.min_interval(&endpoint("eastmoney")), Duration::from_secs(1));
    }
}
