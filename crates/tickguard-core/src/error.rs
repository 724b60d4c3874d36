use thiserror::Error;

/// Validation and contract errors exposed by `tickguard-core`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("resource id cannot be empty")]
    EmptyResourceId,
    #[error("resource id length {len} exceeds max {max}")]
    ResourceIdTooLong { len: usize, max: usize },
    #[error("resource id contains invalid character '{ch}' at index {index}")]
    ResourceIdInvalidChar { ch: char, index: usize },

    #[error("invalid query kind '{value}', expected one of daily_history, spot_quote, intraday")]
    InvalidQueryKind { value: String },
    #[error("query parameter name cannot be empty")]
    EmptyParamName,

    #[error("'{value}' is not an RFC3339 timestamp")]
    InvalidTimestamp { value: String },

    #[error("config field '{field}' must be greater than zero")]
    NonPositiveConfig { field: &'static str },
    #[error("config field '{field}' must be finite and >= 1.0, got {value}")]
    InvalidBackoffFactor { field: &'static str, value: f64 },
    #[error("provider priority list must contain at least one provider")]
    EmptyProviderPriority,
}

/// Top-level error type for core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid environment override {name}='{value}'")]
    InvalidEnv { name: String, value: String },
}
