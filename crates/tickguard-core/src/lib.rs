//! # Tickguard Core
//!
//! Resilient market-data fetching across unreliable free providers.
//!
//! ## Overview
//!
//! This crate wraps quote and history providers behind a single fetch call:
//!
//! - **Per-endpoint pacing** so no provider sees calls faster than configured
//! - **Circuit breakers** that stop hammering a failing endpoint and probe it
//!   again after a cooldown
//! - **Retry with exponential backoff** for connection-class failures only
//! - **Schema normalization** of provider rows into one canonical layout
//! - **TTL cache** with stale serving when every provider fails
//! - **Health monitoring** with per-endpoint counters and JSON reports
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`adapters`] | Provider adapters (East Money, Sina) |
//! | [`cache`] | TTL cache and cache modes |
//! | [`circuit_breaker`] | Per-endpoint circuit breakers |
//! | [`config`] | `FetchConfig` with JSON and environment overrides |
//! | [`data_source`] | Adapter trait and the structured failure type |
//! | [`domain`] | Query, result set and timestamp types |
//! | [`error`] | Core error types |
//! | [`health`] | Outcome and latency tracking |
//! | [`http_client`] | HTTP client abstraction |
//! | [`normalizer`] | Provider schemas and row normalization |
//! | [`orchestrator`] | Cache check, fallback and degraded serving |
//! | [`retry`] | Backoff policies and the retry executor |
//! | [`throttling`] | Per-endpoint rate limiting |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tickguard_core::{FetchOrchestratorBuilder, FetchStatus, Query};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let orchestrator = FetchOrchestratorBuilder::new()
//!         .with_real_clients()
//!         .build()?;
//!
//!     let result = orchestrator.fetch(&Query::spot_quote("510300")?).await;
//!     if result.status != FetchStatus::Empty {
//!         println!("{:?}", result.result_set.value("510300", "latest_price"));
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  CLI / Caller   │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │ FetchOrchestr.  │────▶│ Cache            │
//! └────────┬────────┘     └──────────────────┘
//!          │ per provider
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │ Retry Executor  │────▶│ Circuit Breaker  │
//! │                 │────▶│ Rate Limiter     │
//! └────────┬────────┘     └──────────────────┘
//!          │
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │ Source Adapter  │────▶│ HTTP Client      │
//! └────────┬────────┘     └──────────────────┘
//!          │
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │ Normalizer      │     │ Health Monitor   │
//! └─────────────────┘     └──────────────────┘
//! ```
//!
//! ## Error Handling
//!
//! Fetches never fail outright. Provider failures are collected as
//! [`SourceError`] values on the [`FetchResult`]:
//!
//! ```rust
//! use tickguard_core::{SourceError, SourceErrorKind};
//!
//! fn explain(error: &SourceError) -> &'static str {
//!     match error.kind() {
//!         SourceErrorKind::Connection => "network trouble, retried",
//!         SourceErrorKind::ProviderRejected => "provider refused the query",
//!         SourceErrorKind::CircuitOpen => "endpoint cooling down",
//!         SourceErrorKind::SchemaNormalization => "provider changed its format",
//!         SourceErrorKind::AllProvidersExhausted => "nothing worked",
//!     }
//! }
//! ```

pub mod adapters;
pub mod cache;
pub mod circuit_breaker;
pub mod config;
pub mod data_source;
pub mod domain;
pub mod error;
pub mod health;
pub mod http_client;
pub mod normalizer;
pub mod orchestrator;
pub mod retry;
pub mod throttling;

// Adapter implementations
pub use adapters::{EastMoneyAdapter, SinaAdapter};

// Caching
pub use cache::{CacheMode, CacheStore};

// Circuit breaker
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitRegistry, CircuitState};

// Configuration
pub use config::FetchConfig;

// Adapter contract
pub use data_source::{EndpointId, RawRow, RawRows, SourceAdapter, SourceError, SourceErrorKind};

// Domain models
pub use domain::{FieldValue, Query, QueryKind, Record, ResultSet, UtcDateTime};

// Error types
pub use error::{CoreError, ValidationError};

// Health monitoring
pub use health::{HealthMonitor, HealthStatus, HealthSummary, Outcome, SourceHealth};

// HTTP client types
pub use http_client::{
    HttpClient, HttpError, HttpErrorKind, HttpRequest, HttpResponse,
    ReqwestHttpClient, StaticHttpClient,
};

// Normalization
pub use normalizer::{FieldRule, ProviderSchema, SchemaNormalizer, ValueKind};

// Orchestration
pub use orchestrator::{
    EndpointStatus, FetchOptions, FetchOrchestrator, FetchOrchestratorBuilder, FetchResult,
    FetchStatus,
};

// Retry logic
pub use retry::{Backoff, RetryConfig, RetryExecutor};

// Throttling
pub use throttling::RateLimiter;
