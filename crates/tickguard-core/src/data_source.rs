//! Source adapter contract and the structured failure type.
//!
//! Every provider implementation returns provider-shaped [`RawRows`] or a
//! [`SourceError`]. The retry layer classifies failures by
//! [`SourceErrorKind`] only and never inspects provider-specific error types.
//!
//! # Example
//!
//! ```rust,ignore
//! use tickguard_core::{Query, SourceAdapter, EastMoneyAdapter};
//!
//! async fn raw(adapter: &EastMoneyAdapter) -> Result<(), tickguard_core::SourceError> {
//!     let query = Query::spot_quote("510300")?;
//!     let rows = adapter.fetch(&query).await?;
//!     println!("{} raw rows", rows.len());
//!     Ok(())
//! }
//! ```

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::{Query, QueryKind};

/// Logical (provider, resource-kind) pair tracked by the limiter, breaker and
/// health monitor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EndpointId {
    pub provider: String,
    pub kind: QueryKind,
}

impl EndpointId {
    pub fn new(provider: impl Into<String>, kind: QueryKind) -> Self {
        Self {
            provider: provider.into(),
            kind,
        }
    }
}

impl Display for EndpointId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.provider, self.kind)
    }
}

/// One provider-shaped row: field name to JSON value, as the upstream sent it.
pub type RawRow = serde_json::Map<String, serde_json::Value>;

/// Rows returned by a single adapter round trip.
pub type RawRows = Vec<RawRow>;

/// Failure taxonomy shared by adapters, retry and orchestration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceErrorKind {
    /// Timeout, reset, refused, DNS, TLS, remote closed, 408/429/5xx.
    Connection,
    /// The provider understood the request and refused it.
    ProviderRejected,
    /// Short-circuited by an open breaker; no upstream contact.
    CircuitOpen,
    /// Response did not match the provider's registered schema.
    SchemaNormalization,
    /// Every provider in the chain failed for this query.
    AllProvidersExhausted,
}

/// Structured failure produced at the adapter boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceError {
    kind: SourceErrorKind,
    message: String,
}

impl SourceError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Connection,
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::ProviderRejected,
            message: message.into(),
        }
    }

    pub fn circuit_open(endpoint: &EndpointId) -> Self {
        Self {
            kind: SourceErrorKind::CircuitOpen,
            message: format!("circuit for '{endpoint}' is open; upstream call skipped"),
        }
    }

    pub fn schema(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::SchemaNormalization,
            message: message.into(),
        }
    }

    pub fn exhausted(query: &Query, attempted: usize) -> Self {
        Self {
            kind: SourceErrorKind::AllProvidersExhausted,
            message: format!("all {attempted} provider(s) failed for '{query}'"),
        }
    }

    pub fn unsupported(provider: &str, kind: QueryKind) -> Self {
        Self::rejected(format!("provider '{provider}' does not support '{kind}'"))
    }

    /// Builds an error from a free-form transport message, classifying it as
    /// connection-class when it matches a known network failure fragment.
    pub fn from_transport_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if is_connection_message(&message) {
            Self::connection(message)
        } else {
            Self::rejected(message)
        }
    }

    /// Maps an HTTP status to the taxonomy; `None` for 2xx.
    pub fn from_status(provider: &str, status: u16) -> Option<Self> {
        match status {
            200..=299 => None,
            408 | 429 | 500..=599 => Some(Self::connection(format!(
                "{provider} upstream returned status {status}"
            ))),
            _ => Some(Self::rejected(format!(
                "{provider} upstream rejected request with status {status}"
            ))),
        }
    }

    pub const fn kind(&self) -> SourceErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Only connection-class failures are worth another attempt.
    pub const fn retryable(&self) -> bool {
        matches!(self.kind, SourceErrorKind::Connection)
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            SourceErrorKind::Connection => "source.connection",
            SourceErrorKind::ProviderRejected => "source.rejected",
            SourceErrorKind::CircuitOpen => "source.circuit_open",
            SourceErrorKind::SchemaNormalization => "source.schema",
            SourceErrorKind::AllProvidersExhausted => "source.exhausted",
        }
    }
}

impl Display for SourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for SourceError {}

const CONNECTION_FRAGMENTS: &[&str] = &[
    "timeout",
    "timed out",
    "connection aborted",
    "connection reset",
    "connection refused",
    "connection broken",
    "connection lost",
    "connection closed",
    "connection pool is full",
    "too many connections",
    "remote end closed",
    "remote disconnected",
    "network is unreachable",
    "name or service not known",
    "dns error",
    "failed to lookup address",
    "ssl error",
    "tls",
    "certificate verify failed",
    "broken pipe",
    "socket error",
];

/// Returns true when the message describes a transient network failure.
pub fn is_connection_message(message: &str) -> bool {
    let lowered = message.to_ascii_lowercase();
    CONNECTION_FRAGMENTS
        .iter()
        .any(|fragment| lowered.contains(fragment))
}

/// Source adapter contract.
///
/// Implementations perform exactly one upstream round trip per
/// [`fetch`](SourceAdapter::fetch) call and never retry internally. All
/// failures are returned as [`SourceError`] values.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` as they are shared across callers.
pub trait SourceAdapter: Send + Sync {
    /// Stable provider name, used in endpoint ids and schema lookup.
    fn name(&self) -> &str;

    /// Whether this provider can serve the given query kind.
    fn supports(&self, kind: QueryKind) -> bool;

    /// Executes `query` once against the provider.
    fn fetch<'a>(
        &'a self,
        query: &'a Query,
    ) -> Pin<Box<dyn Future<Output = Result<RawRows, SourceError>> + Send + 'a>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_network_messages_as_connection() {
        for message in [
            "Read timed out",
            "('Connection aborted.', RemoteDisconnected('Remote end closed connection without response'))",
            "error trying to connect: dns error: failed to lookup address information",
            "SSL error: certificate verify failed",
        ] {
            let error = SourceError::from_transport_message(message);
            assert_eq!(error.kind(), SourceErrorKind::Connection, "{message}");
            assert!(error.retryable());
        }
    }

    #[test]
    fn classifies_other_messages_as_rejected() {
        let error = SourceError::from_transport_message("symbol 999999 not found");
        assert_eq!(error.kind(), SourceErrorKind::ProviderRejected);
        assert!(!error.retryable());
    }

    #[test]
    fn maps_http_status_codes() {
        assert!(SourceError::from_status("sina", 200).is_none());
        assert_eq!(
            SourceError::from_status("sina", 503).map(|e| e.kind()),
            Some(SourceErrorKind::Connection)
        );
        assert_eq!(
            SourceError::from_status("sina", 429).map(|e| e.kind()),
            Some(SourceErrorKind::Connection)
        );
        assert_eq!(
            SourceError::from_status("sina", 404).map(|e| e.kind()),
            Some(SourceErrorKind::ProviderRejected)
        );
    }

    #[test]
    fn only_connection_failures_are_retryable() {
        let endpoint = EndpointId::new("eastmoney", QueryKind::SpotQuote);
        assert!(!SourceError::circuit_open(&endpoint).retryable());
        assert!(!SourceError::schema("missing code").retryable());
        assert!(!SourceError::rejected("bad request").retryable());
        assert_eq!(endpoint.to_string(), "eastmoney/spot_quote");
    }
}
