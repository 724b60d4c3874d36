//! Fetch configuration.
//!
//! Loaded from defaults, an optional JSON file and `TICKGUARD_*` environment
//! variables, in that order. Durations are milliseconds.
//!
//! | Variable | Field |
//! |----------|-------|
//! | `TICKGUARD_PROVIDERS` | `provider_priority` (comma separated) |
//! | `TICKGUARD_MIN_CALL_INTERVAL_MS` | `min_call_interval_ms` |
//! | `TICKGUARD_MAX_RETRIES` | `max_retries` |
//! | `TICKGUARD_BASE_RETRY_DELAY_MS` | `base_retry_delay_ms` |
//! | `TICKGUARD_MAX_RETRY_DELAY_MS` | `max_retry_delay_ms` |
//! | `TICKGUARD_RETRY_BACKOFF_FACTOR` | `retry_backoff_factor` |
//! | `TICKGUARD_RETRY_JITTER` | `retry_jitter` |
//! | `TICKGUARD_CIRCUIT_FAILURE_THRESHOLD` | `circuit_failure_threshold` |
//! | `TICKGUARD_CIRCUIT_COOLDOWN_MS` | `circuit_cooldown_ms` |
//! | `TICKGUARD_CACHE_TTL_MS` | `cache_ttl_ms` |
//! | `TICKGUARD_ATTEMPT_TIMEOUT_MS` | `attempt_timeout_ms` |

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::CacheStore;
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::data_source::EndpointId;
use crate::domain::QueryKind;
use crate::error::{CoreError, ValidationError};
use crate::retry::{Backoff, RetryConfig};
use crate::throttling::RateLimiter;

/// Every tunable of the fetch pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Providers tried in order; first success wins.
    pub provider_priority: Vec<String>,
    pub min_call_interval_ms: u64,
    /// Per-provider pacing, applied to every kind of that provider.
    pub provider_call_interval_ms: BTreeMap<String, u64>,
    pub max_retries: u32,
    pub base_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub retry_backoff_factor: f64,
    pub retry_jitter: bool,
    pub attempt_timeout_ms: u64,
    pub circuit_failure_threshold: u32,
    pub circuit_cooldown_ms: u64,
    pub cache_ttl_ms: u64,
    pub cache_ttl_by_kind_ms: BTreeMap<QueryKind, u64>,
    pub cache_sweep_multiple: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            provider_priority: vec![String::from("eastmoney"), String::from("sina")],
            min_call_interval_ms: 1_000,
            provider_call_interval_ms: BTreeMap::new(),
            max_retries: 3,
            base_retry_delay_ms: 2_000,
            max_retry_delay_ms: 30_000,
            retry_backoff_factor: 1.5,
            retry_jitter: false,
            attempt_timeout_ms: 5_000,
            circuit_failure_threshold: 3,
            circuit_cooldown_ms: 60_000,
            cache_ttl_ms: 300_000,
            cache_ttl_by_kind_ms: BTreeMap::new(),
            cache_sweep_multiple: 10,
        }
    }
}

impl FetchConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `TICKGUARD_*` overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self, CoreError> {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    /// Applies overrides from an arbitrary variable lookup.
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(providers) = lookup("TICKGUARD_PROVIDERS") {
            self.provider_priority = providers
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_ascii_lowercase)
                .collect();
        }

        override_parsed(&lookup, "TICKGUARD_MIN_CALL_INTERVAL_MS", &mut self.min_call_interval_ms)?;
        override_parsed(&lookup, "TICKGUARD_MAX_RETRIES", &mut self.max_retries)?;
        override_parsed(&lookup, "TICKGUARD_BASE_RETRY_DELAY_MS", &mut self.base_retry_delay_ms)?;
        override_parsed(&lookup, "TICKGUARD_MAX_RETRY_DELAY_MS", &mut self.max_retry_delay_ms)?;
        override_parsed(
            &lookup,
            "TICKGUARD_RETRY_BACKOFF_FACTOR",
            &mut self.retry_backoff_factor,
        )?;
        override_parsed(&lookup, "TICKGUARD_RETRY_JITTER", &mut self.retry_jitter)?;
        override_parsed(
            &lookup,
            "TICKGUARD_CIRCUIT_FAILURE_THRESHOLD",
            &mut self.circuit_failure_threshold,
        )?;
        override_parsed(&lookup, "TICKGUARD_CIRCUIT_COOLDOWN_MS", &mut self.circuit_cooldown_ms)?;
        override_parsed(&lookup, "TICKGUARD_CACHE_TTL_MS", &mut self.cache_ttl_ms)?;
        override_parsed(&lookup, "TICKGUARD_ATTEMPT_TIMEOUT_MS", &mut self.attempt_timeout_ms)?;

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.provider_priority.is_empty() {
            return Err(ValidationError::EmptyProviderPriority);
        }
        if self.circuit_failure_threshold == 0 {
            return Err(ValidationError::NonPositiveConfig {
                field: "circuit_failure_threshold",
            });
        }
        if self.attempt_timeout_ms == 0 {
            return Err(ValidationError::NonPositiveConfig {
                field: "attempt_timeout_ms",
            });
        }
        if self.cache_ttl_ms == 0 {
            return Err(ValidationError::NonPositiveConfig {
                field: "cache_ttl_ms",
            });
        }
        if !self.retry_backoff_factor.is_finite() || self.retry_backoff_factor < 1.0 {
            return Err(ValidationError::InvalidBackoffFactor {
                field: "retry_backoff_factor",
                value: self.retry_backoff_factor,
            });
        }
        Ok(())
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            backoff: Backoff::Exponential {
                base: Duration::from_millis(self.base_retry_delay_ms),
                factor: self.retry_backoff_factor,
                max: Duration::from_millis(self.max_retry_delay_ms),
                jitter: self.retry_jitter,
            },
            attempt_timeout: Duration::from_millis(self.attempt_timeout_ms),
        }
    }

    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.circuit_failure_threshold,
            cooldown: Duration::from_millis(self.circuit_cooldown_ms),
        }
    }

    pub fn rate_limiter(&self) -> RateLimiter {
        self.provider_call_interval_ms.iter().fold(
            RateLimiter::new(Duration::from_millis(self.min_call_interval_ms)),
            |limiter, (provider, interval_ms)| {
                QueryKind::ALL.into_iter().fold(limiter, |limiter, kind| {
                    limiter.with_interval(
                        EndpointId::new(provider.as_str(), kind),
                        Duration::from_millis(*interval_ms),
                    )
                })
            },
        )
    }

    pub fn cache_store(&self) -> CacheStore {
        let ttl_by_kind = self
            .cache_ttl_by_kind_ms
            .iter()
            .map(|(kind, ttl_ms)| (*kind, Duration::from_millis(*ttl_ms)))
            .collect::<HashMap<_, _>>();
        CacheStore::with_policy(
            Duration::from_millis(self.cache_ttl_ms),
            ttl_by_kind,
            self.cache_sweep_multiple,
        )
    }
}

fn override_parsed<F, T>(lookup: &F, name: &str, target: &mut T) -> Result<(), CoreError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let Some(value) = lookup(name) else {
        return Ok(());
    };
    *target = value.trim().parse().map_err(|_| CoreError::InvalidEnv {
        name: name.to_owned(),
        value,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect::<HashMap<_, _>>();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = FetchConfig::default();
        assert_eq!(config.provider_priority, vec!["eastmoney", "sina"]);
        assert_eq!(config.min_call_interval_ms, 1_000);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.circuit_failure_threshold, 3);
        assert_eq!(config.circuit_cooldown_ms, 60_000);
        assert_eq!(config.cache_ttl_ms, 300_000);
        assert!(config.validate().is_ok());

        let retry = config.retry_config();
        assert_eq!(retry.delay_for_attempt(0), Duration::from_secs(2));
        assert_eq!(retry.attempt_timeout, Duration::from_secs(5));
    }

    #[test]
    fn json_file_fills_missing_fields_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        write!(
            file,
            r#"{{"provider_priority": ["sina"], "cache_ttl_by_kind_ms": {{"spot_quote": 10000}}}}"#
        )
        .expect("write");

        let config = FetchConfig::from_json_file(file.path()).expect("parsed");
        assert_eq!(config.provider_priority, vec!["sina"]);
        assert_eq!(config.max_retries, 3);
        assert_eq!(
            config.cache_store().ttl_for(QueryKind::SpotQuote),
            Duration::from_secs(10)
        );
        assert_eq!(
            config.cache_store().ttl_for(QueryKind::DailyHistory),
            Duration::from_secs(300)
        );
    }

    #[test]
    fn env_overrides_apply_and_validate() {
        let config = FetchConfig::default()
            .with_overrides_from(lookup(&[
                ("TICKGUARD_PROVIDERS", "Sina, eastmoney"),
                ("TICKGUARD_MAX_RETRIES", "1"),
                ("TICKGUARD_RETRY_JITTER", "true"),
            ]))
            .expect("valid overrides");

        assert_eq!(config.provider_priority, vec!["sina", "eastmoney"]);
        assert_eq!(config.max_retries, 1);
        assert!(config.retry_jitter);
    }

    #[test]
    fn malformed_env_value_is_reported() {
        let error = FetchConfig::default()
            .with_overrides_from(lookup(&[("TICKGUARD_MAX_RETRIES", "many")]))
            .expect_err("must fail");
        assert!(matches!(error, CoreError::InvalidEnv { ref name, .. } if name == "TICKGUARD_MAX_RETRIES"));
    }

    #[test]
    fn validation_rejects_bad_values() {
        let config = FetchConfig {
            provider_priority: Vec::new(),
            ..FetchConfig::default()
        };
        assert_eq!(config.validate(), Err(ValidationError::EmptyProviderPriority));

        let config = FetchConfig {
            retry_backoff_factor: 0.5,
            ..FetchConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidBackoffFactor { .. })
        ));

        let config = FetchConfig {
            circuit_failure_threshold: 0,
            ..FetchConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ValidationError::NonPositiveConfig {
                field: "circuit_failure_threshold"
            })
        );
    }

    #[test]
    fn provider_interval_overrides_every_kind() {
        let config = FetchConfig {
            provider_call_interval_ms: BTreeMap::from([(String::from("sina"), 0)]),
            ..FetchConfig::default()
        };
        let limiter = config.rate_limiter();

        for kind in QueryKind::ALL {
            assert_eq!(limiter.min_interval(&EndpointId::new("sina", kind)), Duration::ZERO);
            assert_eq!(
                limiter.min_interval(&EndpointId::new("eastmoney", kind)),
                Duration::from_secs(1)
            );
        }
    }
}
