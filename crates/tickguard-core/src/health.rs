//! Per-endpoint outcome and latency tracking.
//!
//! The monitor is observational only: nothing in the fetch path reads it to
//! make decisions. Breaker state lives in [`crate::circuit_breaker`].

use std::collections::{BTreeMap, HashMap};
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::data_source::{EndpointId, SourceError, SourceErrorKind};
use crate::domain::UtcDateTime;
use crate::error::CoreError;

const ERROR_HISTORY_LIMIT: usize = 1_000;
const ERROR_HISTORY_KEEP: usize = 500;
const UNHEALTHY_CONSECUTIVE_FAILURES: u32 = 5;

/// Outcome of one provider call as seen by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
    /// Short-circuited by an open breaker; no upstream contact.
    Skipped,
}

/// Health label derived from the success rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl Display for HealthStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
            Self::Unknown => "unknown",
        })
    }
}

/// Counters for one endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SourceHealth {
    pub success_count: u64,
    pub failure_count: u64,
    pub skip_count: u64,
    pub consecutive_failures: u32,
    pub last_latency_ms: Option<u64>,
    pub average_latency_ms: f64,
    pub last_error_kind: Option<SourceErrorKind>,
    pub last_error: Option<String>,
    pub last_success_at: Option<UtcDateTime>,
}

impl SourceHealth {
    /// Calls that reached the upstream (skips excluded).
    pub fn requests(&self) -> u64 {
        self.success_count + self.failure_count
    }

    /// Success rate in percent, `None` without traffic.
    pub fn success_rate(&self) -> Option<f64> {
        let requests = self.requests();
        (requests > 0).then(|| self.success_count as f64 / requests as f64 * 100.0)
    }

    pub fn status(&self) -> HealthStatus {
        match self.success_rate() {
            None => HealthStatus::Unknown,
            Some(rate) if rate > 80.0 => HealthStatus::Healthy,
            Some(rate) if rate > 50.0 => HealthStatus::Degraded,
            Some(_) => HealthStatus::Unhealthy,
        }
    }

    fn observe_latency(&mut self, latency: Duration) {
        let latency_ms = latency.as_millis() as u64;
        let samples = self.requests().max(1) as f64;
        self.average_latency_ms += (latency_ms as f64 - self.average_latency_ms) / samples;
        self.last_latency_ms = Some(latency_ms);
    }
}

/// One failed call kept in the bounded error log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRecord {
    pub timestamp: UtcDateTime,
    pub endpoint: String,
    pub kind: SourceErrorKind,
    pub message: String,
    pub latency_ms: u64,
}

/// Aggregate view across all endpoints.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSummary {
    pub total_requests: u64,
    pub success_rate: f64,
    pub average_latency_ms: f64,
    pub max_consecutive_failures: u32,
    pub is_healthy: bool,
    pub last_success_at: Option<UtcDateTime>,
}

#[derive(Debug, Serialize)]
struct EndpointReport {
    status: HealthStatus,
    #[serde(flatten)]
    health: SourceHealth,
}

#[derive(Debug, Serialize)]
struct HealthReport {
    generated_at: UtcDateTime,
    summary: HealthSummary,
    endpoints: BTreeMap<String, EndpointReport>,
    recent_errors: Vec<ErrorRecord>,
}

/// Thread-safe registry of [`SourceHealth`] records.
#[derive(Debug, Default)]
pub struct HealthMonitor {
    endpoints: RwLock<HashMap<EndpointId, Arc<Mutex<SourceHealth>>>>,
    errors: Mutex<Vec<ErrorRecord>>,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-creates records so idle endpoints show up as `unknown`.
    pub fn register(&self, endpoint: &EndpointId) {
        let _ = self.slot(endpoint);
    }

    fn slot(&self, endpoint: &EndpointId) -> Arc<Mutex<SourceHealth>> {
        if let Some(slot) = self
            .endpoints
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(endpoint)
        {
            return Arc::clone(slot);
        }

        let mut endpoints = self.endpoints.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(endpoints.entry(endpoint.clone()).or_default())
    }

    pub fn record(
        &self,
        endpoint: &EndpointId,
        outcome: Outcome,
        latency: Duration,
        error: Option<&SourceError>,
    ) {
        let slot = self.slot(endpoint);
        let mut health = slot.lock().unwrap_or_else(PoisonError::into_inner);

        match outcome {
            Outcome::Success => {
                health.success_count += 1;
                health.consecutive_failures = 0;
                health.last_success_at = Some(UtcDateTime::now());
                health.observe_latency(latency);
                debug!(
                    endpoint = %endpoint,
                    latency_ms = latency.as_millis() as u64,
                    "call succeeded"
                );
            }
            Outcome::Failure => {
                health.failure_count += 1;
                health.consecutive_failures = health.consecutive_failures.saturating_add(1);
                health.observe_latency(latency);
                if let Some(error) = error {
                    health.last_error_kind = Some(error.kind());
                    health.last_error = Some(error.message().to_owned());
                }
                warn!(
                    endpoint = %endpoint,
                    latency_ms = latency.as_millis() as u64,
                    consecutive_failures = health.consecutive_failures,
                    error = %error.map(ToString::to_string).unwrap_or_default(),
                    "call failed"
                );
            }
            Outcome::Skipped => {
                health.skip_count += 1;
                if let Some(error) = error {
                    health.last_error_kind = Some(error.kind());
                }
            }
        }
        drop(health);

        if let (Outcome::Failure, Some(error)) = (outcome, error) {
            self.push_error(ErrorRecord {
                timestamp: UtcDateTime::now(),
                endpoint: endpoint.to_string(),
                kind: error.kind(),
                message: error.message().to_owned(),
                latency_ms: latency.as_millis() as u64,
            });
        }
    }

    fn push_error(&self, record: ErrorRecord) {
        let mut errors = self.errors.lock().unwrap_or_else(PoisonError::into_inner);
        errors.push(record);
        if errors.len() > ERROR_HISTORY_LIMIT {
            let excess = errors.len() - ERROR_HISTORY_KEEP;
            errors.drain(..excess);
        }
    }

    /// Cloned view of every endpoint's counters.
    pub fn snapshot(&self) -> BTreeMap<EndpointId, SourceHealth> {
        self.endpoints
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(endpoint, slot)| {
                let health = slot.lock().unwrap_or_else(PoisonError::into_inner).clone();
                (endpoint.clone(), health)
            })
            .collect()
    }

    pub fn health(&self, endpoint: &EndpointId) -> Option<SourceHealth> {
        self.endpoints
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(endpoint)
            .map(|slot| slot.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    pub fn status(&self, endpoint: &EndpointId) -> HealthStatus {
        self.health(endpoint)
            .map_or(HealthStatus::Unknown, |health| health.status())
    }

    pub fn summary(&self) -> HealthSummary {
        let snapshot = self.snapshot();

        let total_requests = snapshot.values().map(SourceHealth::requests).sum::<u64>();
        let successes = snapshot.values().map(|h| h.success_count).sum::<u64>();
        let weighted_latency = snapshot
            .values()
            .map(|h| h.average_latency_ms * h.requests() as f64)
            .sum::<f64>();
        let max_consecutive_failures = snapshot
            .values()
            .map(|h| h.consecutive_failures)
            .max()
            .unwrap_or(0);

        let (success_rate, average_latency_ms) = if total_requests == 0 {
            (0.0, 0.0)
        } else {
            (
                round2(successes as f64 / total_requests as f64 * 100.0),
                round2(weighted_latency / total_requests as f64),
            )
        };

        HealthSummary {
            total_requests,
            success_rate,
            average_latency_ms,
            max_consecutive_failures,
            is_healthy: max_consecutive_failures < UNHEALTHY_CONSECUTIVE_FAILURES,
            last_success_at: snapshot.values().filter_map(|h| h.last_success_at).max(),
        }
    }

    /// Failures recorded within the last `window`, oldest first.
    pub fn recent_errors(&self, window: Duration) -> Vec<ErrorRecord> {
        let cutoff = UtcDateTime::now().checked_sub(window);

        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|record| cutoff.map_or(true, |cutoff| record.timestamp >= cutoff))
            .cloned()
            .collect()
    }

    /// Writes summary, per-endpoint health and the last 24h of errors as JSON.
    pub fn export_report(&self, path: impl AsRef<Path>) -> Result<(), CoreError> {
        let report = HealthReport {
            generated_at: UtcDateTime::now(),
            summary: self.summary(),
            endpoints: self
                .snapshot()
                .into_iter()
                .map(|(endpoint, health)| {
                    (
                        endpoint.to_string(),
                        EndpointReport {
                            status: health.status(),
                            health,
                        },
                    )
                })
                .collect(),
            recent_errors: self.recent_errors(Duration::from_secs(24 * 60 * 60)),
        };

        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path.as_ref(), json)?;
        info!(path = %path.as_ref().display(), "health report exported");
        Ok(())
    }

    /// Clears one endpoint's counters.
    pub fn reset(&self, endpoint: &EndpointId) {
        if let Some(slot) = self
            .endpoints
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(endpoint)
        {
            *slot.lock().unwrap_or_else(PoisonError::into_inner) = SourceHealth::default();
        }
    }

    /// Clears every counter and the error log.
    pub fn reset_all(&self) {
        for slot in self
            .endpoints
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
        {
            *slot.lock().unwrap_or_else(PoisonError::into_inner) = SourceHealth::default();
        }
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::QueryKind;

    fn endpoint(provider: &str) -> EndpointId {
        EndpointId::new(provider, QueryKind::SpotQuote)
    }

    #[test]
    fn success_and_failure_update_counters() {
        let monitor = HealthMonitor::new();
        let ep = endpoint("eastmoney");
        let error = SourceError::connection("read timed out");

        monitor.record(&ep, Outcome::Failure, Duration::from_millis(100), Some(&error));
        monitor.record(&ep, Outcome::Failure, Duration::from_millis(100), Some(&error));
        let health = monitor.health(&ep).expect("recorded");
        assert_eq!(health.failure_count, 2);
        assert_eq!(health.consecutive_failures, 2);
        assert_eq!(health.last_error_kind, Some(SourceErrorKind::Connection));

        monitor.record(&ep, Outcome::Success, Duration::from_millis(40), None);
        let health = monitor.health(&ep).expect("recorded");
        assert_eq!(health.success_count, 1);
        assert_eq!(health.consecutive_failures, 0);
        assert_eq!(health.last_latency_ms, Some(40));
        assert_eq!(health.average_latency_ms, 80.0);
        assert!(health.last_success_at.is_some());
    }

    #[test]
    fn skips_do_not_count_as_requests() {
        let monitor = HealthMonitor::new();
        let ep = endpoint("sina");

        monitor.record(
            &ep,
            Outcome::Skipped,
            Duration::ZERO,
            Some(&SourceError::circuit_open(&ep)),
        );

        let health = monitor.health(&ep).expect("recorded");
        assert_eq!(health.skip_count, 1);
        assert_eq!(health.requests(), 0);
        assert_eq!(health.status(), HealthStatus::Unknown);
        assert!(monitor.recent_errors(Duration::from_secs(60)).is_empty());
    }

    #[test]
    fn status_labels_follow_success_rate() {
        let mut health = SourceHealth {
            success_count: 9,
            failure_count: 1,
            ..SourceHealth::default()
        };
        assert_eq!(health.status(), HealthStatus::Healthy);

        health.success_count = 6;
        health.failure_count = 4;
        assert_eq!(health.status(), HealthStatus::Degraded);

        health.success_count = 5;
        health.failure_count = 5;
        assert_eq!(health.status(), HealthStatus::Unhealthy);

        assert_eq!(SourceHealth::default().status(), HealthStatus::Unknown);
    }

    #[test]
    fn summary_turns_unhealthy_after_five_consecutive_failures() {
        let monitor = HealthMonitor::new();
        let east = endpoint("eastmoney");
        let sina = endpoint("sina");
        let error = SourceError::connection("connection reset");

        monitor.record(&sina, Outcome::Success, Duration::from_millis(50), None);
        for _ in 0..4 {
            monitor.record(&east, Outcome::Failure, Duration::from_millis(10), Some(&error));
        }
        assert!(monitor.summary().is_healthy);

        monitor.record(&east, Outcome::Failure, Duration::from_millis(10), Some(&error));
        let summary = monitor.summary();
        assert!(!summary.is_healthy);
        assert_eq!(summary.total_requests, 6);
        assert_eq!(summary.success_rate, 16.67);
        assert_eq!(summary.max_consecutive_failures, 5);
    }

    #[test]
    fn error_history_is_bounded() {
        let monitor = HealthMonitor::new();
        let ep = endpoint("eastmoney");
        let error = SourceError::rejected("bad symbol");

        for _ in 0..=ERROR_HISTORY_LIMIT {
            monitor.record(&ep, Outcome::Failure, Duration::ZERO, Some(&error));
        }

        assert_eq!(
            monitor.recent_errors(Duration::from_secs(3_600)).len(),
            ERROR_HISTORY_KEEP
        );
    }

    #[test]
    fn reset_clears_counters() {
        let monitor = HealthMonitor::new();
        let ep = endpoint("eastmoney");
        monitor.record(&ep, Outcome::Success, Duration::from_millis(5), None);
        monitor.register(&endpoint("sina"));

        monitor.reset(&ep);
        assert_eq!(monitor.health(&ep), Some(SourceHealth::default()));

        monitor.record(
            &ep,
            Outcome::Failure,
            Duration::ZERO,
            Some(&SourceError::rejected("x")),
        );
        monitor.reset_all();
        assert!(monitor.snapshot().values().all(|h| *h == SourceHealth::default()));
        assert!(monitor.recent_errors(Duration::from_secs(60)).is_empty());
        assert_eq!(monitor.snapshot().len(), 2);
    }

    #[test]
    fn exports_json_report() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("health.json");
        let monitor = HealthMonitor::new();
        monitor.record(
            &endpoint("eastmoney"),
            Outcome::Failure,
            Duration::from_millis(20),
            Some(&SourceError::connection("timed out")),
        );
        monitor.record(&endpoint("sina"), Outcome::Success, Duration::from_millis(30), None);

        monitor.export_report(&path).expect("exported");

        let report: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).expect("read")).expect("json");
        assert_eq!(report["summary"]["total_requests"], 2);
        assert_eq!(report["endpoints"]["sina/spot_quote"]["status"], "healthy");
        assert_eq!(report["endpoints"]["eastmoney/spot_quote"]["status"], "unhealthy");
        assert_eq!(report["recent_errors"][0]["kind"], "connection");
    }
}
