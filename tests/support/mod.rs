//! Shared fixtures for the behaviour tests: a scripted provider and a
//! quiet orchestrator configuration.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tickguard_core::normalizer::fields;
use tickguard_core::{
    FetchConfig, FetchOrchestrator, FieldRule, ProviderSchema, Query, QueryKind, RawRow,
    RawRows, SchemaNormalizer, SourceAdapter, SourceError,
};
use tokio::time::Instant;

pub const CODE: &str = "510300";

/// Provider whose outcomes are scripted up front. Once the script runs dry
/// every call returns `fallback`.
pub struct ScriptedAdapter {
    name: &'static str,
    script: Mutex<VecDeque<Result<f64, SourceError>>>,
    fallback: Result<f64, SourceError>,
    latency: Duration,
    no_rows: bool,
    calls: Mutex<Vec<Instant>>,
}

impl ScriptedAdapter {
    pub fn succeeding(name: &'static str, price: f64) -> Arc<Self> {
        Self::scripted(name, Vec::new(), Ok(price))
    }

    pub fn failing(name: &'static str, error: SourceError) -> Arc<Self> {
        Self::scripted(name, Vec::new(), Err(error))
    }

    pub fn scripted(
        name: &'static str,
        script: Vec<Result<f64, SourceError>>,
        fallback: Result<f64, SourceError>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name,
            script: Mutex::new(script.into()),
            fallback,
            latency: Duration::ZERO,
            no_rows: false,
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Answers every call successfully but without a single row.
    pub fn empty(name: &'static str) -> Arc<Self> {
        let mut adapter = Arc::try_unwrap(Self::succeeding(name, 0.0))
            .unwrap_or_else(|_| panic!("adapter already shared"));
        adapter.no_rows = true;
        Arc::new(adapter)
    }

    pub fn with_latency(name: &'static str, price: f64, latency: Duration) -> Arc<Self> {
        Self::succeeding(name, price).slowed_by(latency)
    }

    /// Every call, failing or not, takes `latency`.
    pub fn slowed_by(self: Arc<Self>, latency: Duration) -> Arc<Self> {
        let mut adapter = Arc::try_unwrap(self).unwrap_or_else(|_| panic!("adapter already shared"));
        adapter.latency = latency;
        Arc::new(adapter)
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("calls lock").len()
    }

    /// Dispatch instants, in call order.
    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().expect("calls lock").clone()
    }
}

impl SourceAdapter for ScriptedAdapter {
    fn name(&self) -> &str {
        self.name
    }

    fn supports(&self, _kind: QueryKind) -> bool {
        true
    }

    fn fetch<'a>(
        &'a self,
        query: &'a Query,
    ) -> Pin<Box<dyn Future<Output = Result<RawRows, SourceError>> + Send + 'a>> {
        Box::pin(async move {
            self.calls.lock().expect("calls lock").push(Instant::now());
            let outcome = self
                .script
                .lock()
                .expect("script lock")
                .pop_front()
                .unwrap_or_else(|| self.fallback.clone());
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }

            let price = outcome?;
            if self.no_rows {
                return Ok(RawRows::new());
            }
            let mut row = RawRow::new();
            row.insert("code".into(), json!(query.resource_id()));
            row.insert("price".into(), json!(price));
            Ok(vec![row])
        })
    }
}

pub fn schema(provider: &str) -> ProviderSchema {
    ProviderSchema::new(provider)
        .rule(FieldRule::text("code", fields::CODE))
        .rule(FieldRule::number("price", fields::LATEST_PRICE))
}

/// No pacing and no retries unless a test asks for them.
pub fn quiet_config() -> FetchConfig {
    FetchConfig {
        min_call_interval_ms: 0,
        max_retries: 0,
        ..FetchConfig::default()
    }
}

pub fn orchestrator(config: FetchConfig, adapters: &[Arc<ScriptedAdapter>]) -> FetchOrchestrator {
    let config = FetchConfig {
        provider_priority: adapters.iter().map(|a| a.name.to_owned()).collect(),
        ..config
    };
    let normalizer = adapters
        .iter()
        .fold(SchemaNormalizer::new(), |normalizer, adapter| {
            normalizer.with_schema(schema(adapter.name))
        });
    let adapters = adapters
        .iter()
        .map(|adapter| Arc::clone(adapter) as Arc<dyn SourceAdapter>)
        .collect();

    FetchOrchestrator::new(config, adapters, normalizer)
}

pub fn quote() -> Query {
    Query::spot_quote(CODE).expect("valid query")
}

pub fn connection_reset() -> SourceError {
    SourceError::connection("connection reset by peer")
}
