//! Fetch orchestration: cache check, provider fallback and degraded serving.
//!
//! ```text
//! CACHE_CHECK ──hit──▶ CACHED
//!      │
//!      ▼
//! PROVIDER_LOOP(i) ──ok──▶ FRESH (cache write + health record)
//!      │ failure
//!      ▼
//! NEXT_PROVIDER ... ──▶ EXHAUSTED ──▶ STALE | EMPTY
//! ```
//!
//! [`FetchOrchestrator::fetch`] never returns `Err`: every failure ends up in
//! [`FetchResult::errors`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::adapters::{EastMoneyAdapter, SinaAdapter};
use crate::cache::{CacheMode, CacheStore};
use crate::circuit_breaker::{CircuitRegistry, CircuitState};
use crate::config::FetchConfig;
use crate::data_source::{EndpointId, SourceAdapter, SourceError, SourceErrorKind};
use crate::domain::{Query, QueryKind, ResultSet};
use crate::error::ValidationError;
use crate::health::{HealthMonitor, HealthStatus, Outcome, SourceHealth};
use crate::http_client::{HttpClient, ReqwestHttpClient};
use crate::normalizer::{ProviderSchema, SchemaNormalizer};
use crate::retry::RetryExecutor;
use crate::throttling::RateLimiter;

/// Per-call options for [`FetchOrchestrator::fetch_with`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchOptions {
    pub cache_mode: CacheMode,
    /// Point in time after which remaining retries and providers are abandoned.
    pub deadline: Option<Instant>,
}

impl FetchOptions {
    pub fn with_cache_mode(mut self, cache_mode: CacheMode) -> Self {
        self.cache_mode = cache_mode;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Deadline `timeout` from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

/// How the returned data was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    /// Served by a provider during this call.
    Fresh,
    /// Served from a non-expired cache entry without network access.
    Cached,
    /// Every provider failed; served from an expired cache entry.
    Stale,
    /// Every provider failed and nothing was cached.
    Empty,
}

/// Outcome of one fetch, successful or not.
#[derive(Debug, Clone, Serialize)]
pub struct FetchResult {
    pub result_set: ResultSet,
    pub status: FetchStatus,
    /// Provider whose data is returned, if any.
    pub source: Option<String>,
    /// Providers contacted (or short-circuited) in order.
    pub source_chain: Vec<String>,
    pub warnings: Vec<String>,
    pub errors: Vec<SourceError>,
    pub latency_ms: u64,
}

impl FetchResult {
    pub fn is_degraded(&self) -> bool {
        matches!(self.status, FetchStatus::Stale | FetchStatus::Empty)
    }
}

/// Operator view of one endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointStatus {
    pub endpoint: EndpointId,
    pub circuit_state: CircuitState,
    pub failure_count: u32,
    /// Milliseconds since the last paced call, if any.
    pub last_call_ms_ago: Option<u64>,
    pub status: HealthStatus,
    pub health: SourceHealth,
}

/// Resilient multi-provider fetcher.
pub struct FetchOrchestrator {
    adapters: HashMap<String, Arc<dyn SourceAdapter>>,
    priority: Vec<String>,
    normalizer: SchemaNormalizer,
    limiter: Arc<RateLimiter>,
    circuits: Arc<CircuitRegistry>,
    retry: RetryExecutor,
    cache: CacheStore,
    health: HealthMonitor,
}

/// Builder for [`FetchOrchestrator`].
///
/// # Example
///
/// ```rust,ignore
/// use tickguard_core::{FetchConfig, FetchOrchestratorBuilder, Query};
///
/// let orchestrator = FetchOrchestratorBuilder::new()
///     .with_config(FetchConfig::default().with_env_overrides()?)
///     .with_real_clients()
///     .build()?;
///
/// let result = orchestrator.fetch(&Query::spot_quote("510300")?).await;
/// println!("{:?} from {:?}", result.status, result.source);
/// ```
#[derive(Default)]
pub struct FetchOrchestratorBuilder {
    config: FetchConfig,
    adapters: Vec<Arc<dyn SourceAdapter>>,
    schemas: Vec<ProviderSchema>,
    http_client: Option<Arc<dyn HttpClient>>,
    builtin_adapters: bool,
}

impl FetchOrchestratorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: FetchConfig) -> Self {
        self.config = config;
        self
    }

    /// Registers a custom adapter. A later adapter with the same name replaces
    /// the earlier one.
    pub fn with_adapter(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    /// Registers a schema for a custom adapter's provider.
    pub fn with_schema(mut self, schema: ProviderSchema) -> Self {
        self.schemas.push(schema);
        self
    }

    /// Registers the built-in East Money and Sina adapters backed by reqwest.
    pub fn with_real_clients(mut self) -> Self {
        self.builtin_adapters = true;
        self
    }

    /// Registers the built-in adapters on top of `http_client`.
    pub fn with_http_client(mut self, http_client: Arc<dyn HttpClient>) -> Self {
        self.builtin_adapters = true;
        self.http_client = Some(http_client);
        self
    }

    pub fn build(self) -> Result<FetchOrchestrator, ValidationError> {
        self.config.validate()?;

        let mut adapters: Vec<Arc<dyn SourceAdapter>> = Vec::new();
        if self.builtin_adapters {
            let http_client = self
                .http_client
                .unwrap_or_else(|| Arc::new(ReqwestHttpClient::new()));
            let timeout_ms = self.config.attempt_timeout_ms;
            adapters.push(Arc::new(
                EastMoneyAdapter::with_http_client(Arc::clone(&http_client))
                    .with_timeout_ms(timeout_ms),
            ));
            adapters.push(Arc::new(
                SinaAdapter::with_http_client(http_client).with_timeout_ms(timeout_ms),
            ));
        }
        adapters.extend(self.adapters);

        let normalizer = self
            .schemas
            .into_iter()
            .fold(SchemaNormalizer::with_builtin_schemas(), |normalizer, schema| {
                normalizer.with_schema(schema)
            });

        Ok(FetchOrchestrator::new(self.config, adapters, normalizer))
    }
}

impl FetchOrchestrator {
    pub fn new(
        config: FetchConfig,
        adapters: Vec<Arc<dyn SourceAdapter>>,
        normalizer: SchemaNormalizer,
    ) -> Self {
        let mut registered = Vec::with_capacity(adapters.len());
        let mut by_name = HashMap::with_capacity(adapters.len());
        for adapter in adapters {
            let name = adapter.name().to_owned();
            if by_name.insert(name.clone(), adapter).is_none() {
                registered.push(name);
            }
        }

        let mut priority = dedupe_chain(&config.provider_priority);
        for name in registered {
            if !priority.contains(&name) {
                priority.push(name);
            }
        }

        let limiter = Arc::new(config.rate_limiter());
        let circuits = Arc::new(CircuitRegistry::new(config.breaker_config()));
        let retry = RetryExecutor::new(
            config.retry_config(),
            Arc::clone(&limiter),
            Arc::clone(&circuits),
        );

        let health = HealthMonitor::new();
        for provider in priority.iter().filter(|name| by_name.contains_key(*name)) {
            for kind in QueryKind::ALL {
                if by_name[provider].supports(kind) {
                    health.register(&EndpointId::new(provider.as_str(), kind));
                }
            }
        }

        Self {
            adapters: by_name,
            priority,
            normalizer,
            limiter,
            circuits,
            retry,
            cache: config.cache_store(),
            health,
        }
    }

    /// Provider names in the order they are tried.
    pub fn provider_chain(&self) -> &[String] {
        &self.priority
    }

    pub async fn fetch(&self, query: &Query) -> FetchResult {
        self.fetch_with(query, FetchOptions::default()).await
    }

    pub async fn fetch_with(&self, query: &Query, options: FetchOptions) -> FetchResult {
        let started = Instant::now();

        if options.cache_mode == CacheMode::Use {
            if let Some(result_set) = self.cache.get(query).await {
                debug!(query = %query, source = %result_set.source_name, "cache hit");
                return FetchResult {
                    source: Some(result_set.source_name.clone()),
                    result_set,
                    status: FetchStatus::Cached,
                    source_chain: Vec::new(),
                    warnings: Vec::new(),
                    errors: Vec::new(),
                    latency_ms: elapsed_ms(started),
                };
            }
        }

        let mut source_chain = Vec::with_capacity(self.priority.len());
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        for provider in &self.priority {
            if options.deadline_passed() {
                warnings.push(format!(
                    "deadline reached before provider '{provider}' was tried"
                ));
                break;
            }

            let Some(adapter) = self.adapters.get(provider) else {
                warnings.push(format!("provider '{provider}' is not registered"));
                continue;
            };
            if !adapter.supports(query.kind()) {
                warnings.push(format!(
                    "provider '{provider}' does not support '{}', skipped",
                    query.kind()
                ));
                continue;
            }

            source_chain.push(provider.clone());
            let endpoint = EndpointId::new(provider.as_str(), query.kind());
            let call_started = Instant::now();
            let normalizer = &self.normalizer;

            let outcome = self
                .retry
                .execute(&endpoint, options.deadline, |attempt| async move {
                    debug!(provider = %provider, kind = %query.kind(), attempt, "calling provider");
                    let raw_rows = adapter.fetch(query).await?;
                    let result_set = normalizer.normalize(&raw_rows, provider)?;
                    if result_set.is_empty() {
                        return Err(SourceError::rejected(format!(
                            "{provider} returned no rows for {query}"
                        )));
                    }
                    Ok(result_set)
                })
                .await;
            let latency = call_started.elapsed();

            match outcome {
                Ok(result_set) => {
                    self.health
                        .record(&endpoint, Outcome::Success, latency, None);
                    if options.cache_mode != CacheMode::Bypass {
                        self.cache.put(query, result_set.clone(), None).await;
                    }
                    if !errors.is_empty() {
                        warnings.push(format!(
                            "source fallback succeeded with '{provider}' after {} failed provider(s)",
                            errors.len()
                        ));
                    }
                    info!(
                        provider = %provider,
                        kind = %query.kind(),
                        records = result_set.len(),
                        "provider selected"
                    );

                    return FetchResult {
                        result_set,
                        status: FetchStatus::Fresh,
                        source: Some(provider.clone()),
                        source_chain,
                        warnings,
                        errors,
                        latency_ms: elapsed_ms(started),
                    };
                }
                Err(failure) => {
                    let abandoned = options.deadline_passed();
                    let outcome = if abandoned || failure.kind() == SourceErrorKind::CircuitOpen {
                        Outcome::Skipped
                    } else {
                        Outcome::Failure
                    };
                    self.health
                        .record(&endpoint, outcome, latency, Some(&failure));
                    warn!(
                        provider = %provider,
                        kind = %query.kind(),
                        error = %failure,
                        "provider failed, falling back"
                    );
                    errors.push(failure);

                    if abandoned {
                        warnings.push(String::from(
                            "deadline exceeded, remaining providers skipped",
                        ));
                        break;
                    }
                }
            }
        }

        self.exhausted(query, source_chain, warnings, errors, started)
            .await
    }

    async fn exhausted(
        &self,
        query: &Query,
        source_chain: Vec<String>,
        mut warnings: Vec<String>,
        mut errors: Vec<SourceError>,
        started: Instant,
    ) -> FetchResult {
        error!(
            query = %query,
            attempted = source_chain.len(),
            "all providers failed"
        );
        errors.push(SourceError::exhausted(query, source_chain.len()));

        if let Some(result_set) = self.cache.get_stale(query).await {
            warn!(query = %query, source = %result_set.source_name, "serving stale cache");
            warnings.push(String::from(
                "all providers failed, serving stale cached data",
            ));
            return FetchResult {
                source: Some(result_set.source_name.clone()),
                result_set,
                status: FetchStatus::Stale,
                source_chain,
                warnings,
                errors,
                latency_ms: elapsed_ms(started),
            };
        }

        warnings.push(String::from("all providers failed, no cached data available"));
        FetchResult {
            result_set: ResultSet::empty(),
            status: FetchStatus::Empty,
            source: None,
            source_chain,
            warnings,
            errors,
            latency_ms: elapsed_ms(started),
        }
    }

    pub fn health_snapshot(&self) -> BTreeMap<EndpointId, SourceHealth> {
        self.health.snapshot()
    }

    pub fn health_monitor(&self) -> &HealthMonitor {
        &self.health
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Forces the endpoint's breaker back to CLOSED.
    pub fn reset_circuit(&self, endpoint: &EndpointId) {
        self.circuits.reset(endpoint);
    }

    /// Forces every breaker back to CLOSED.
    pub fn reset_all(&self) {
        self.circuits.reset_all();
    }

    pub fn endpoint_status(&self, endpoint: &EndpointId) -> EndpointStatus {
        let breaker = self.circuits.breaker(endpoint);
        let now = Instant::now();

        EndpointStatus {
            endpoint: endpoint.clone(),
            circuit_state: breaker.state(),
            failure_count: breaker.failure_count(),
            last_call_ms_ago: self
                .limiter
                .last_call_at(endpoint)
                .map(|at| now.saturating_duration_since(at).as_millis() as u64),
            status: self.health.status(endpoint),
            health: self.health.health(endpoint).unwrap_or_default(),
        }
    }

    /// Status of every endpoint the orchestrator knows about, sorted.
    pub fn endpoint_statuses(&self) -> Vec<EndpointStatus> {
        let mut endpoints = self
            .health_snapshot()
            .into_keys()
            .chain(self.circuits.endpoints())
            .collect::<Vec<_>>();
        endpoints.sort();
        endpoints.dedup();

        endpoints
            .iter()
            .map(|endpoint| self.endpoint_status(endpoint))
            .collect()
    }
}

fn dedupe_chain(chain: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut output = Vec::with_capacity(chain.len());

    for provider in chain {
        if seen.insert(provider.as_str()) {
            output.push(provider.clone());
        }
    }

    output
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis().min(u128::from(u64::MAX)) as u64
}
