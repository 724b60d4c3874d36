use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

const MAX_RESOURCE_ID_LEN: usize = 32;

/// Kind of market data a query asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    DailyHistory,
    SpotQuote,
    Intraday,
}

impl QueryKind {
    pub const ALL: [Self; 3] = [Self::DailyHistory, Self::SpotQuote, Self::Intraday];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DailyHistory => "daily_history",
            Self::SpotQuote => "spot_quote",
            Self::Intraday => "intraday",
        }
    }
}

impl Display for QueryKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryKind {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "daily_history" | "daily" | "history" => Ok(Self::DailyHistory),
            "spot_quote" | "spot" | "quote" => Ok(Self::SpotQuote),
            "intraday" | "minute" => Ok(Self::Intraday),
            _ => Err(ValidationError::InvalidQueryKind {
                value: value.to_owned(),
            }),
        }
    }
}

/// Immutable request descriptor.
///
/// Two queries are equal iff resource, kind and every parameter (in order)
/// are equal; the same equality defines the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Query {
    resource_id: String,
    kind: QueryKind,
    params: Vec<(String, String)>,
}

impl Query {
    pub fn new(resource_id: &str, kind: QueryKind) -> Result<Self, ValidationError> {
        Ok(Self {
            resource_id: validate_resource_id(resource_id)?,
            kind,
            params: Vec::new(),
        })
    }

    pub fn daily_history(resource_id: &str) -> Result<Self, ValidationError> {
        Self::new(resource_id, QueryKind::DailyHistory)
    }

    pub fn spot_quote(resource_id: &str) -> Result<Self, ValidationError> {
        Self::new(resource_id, QueryKind::SpotQuote)
    }

    pub fn intraday(resource_id: &str) -> Result<Self, ValidationError> {
        Self::new(resource_id, QueryKind::Intraday)
    }

    /// Appends a parameter. Parameters keep insertion order.
    pub fn with_param(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ValidationError::EmptyParamName);
        }
        self.params.push((name, value.into()));
        Ok(self)
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    pub const fn kind(&self) -> QueryKind {
        self.kind
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    /// First value recorded for `name`, if any.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Deterministic cache key: `kind|resource_id|k=v&k=v`, percent-encoded.
    pub fn fingerprint(&self) -> String {
        let params = self
            .params
            .iter()
            .map(|(name, value)| {
                format!(
                    "{}={}",
                    urlencoding::encode(name),
                    urlencoding::encode(value)
                )
            })
            .collect::<Vec<_>>()
            .join("&");

        format!(
            "{}|{}|{}",
            self.kind.as_str(),
            urlencoding::encode(&self.resource_id),
            params
        )
    }
}

impl Display for Query {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.resource_id)
    }
}

fn validate_resource_id(input: &str) -> Result<String, ValidationError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyResourceId);
    }

    let len = trimmed.chars().count();
    if len > MAX_RESOURCE_ID_LEN {
        return Err(ValidationError::ResourceIdTooLong {
            len,
            max: MAX_RESOURCE_ID_LEN,
        });
    }

    for (index, ch) in trimmed.chars().enumerate() {
        let valid = ch.is_ascii_alphanumeric() || ch == '.' || ch == '-' || ch == '_';
        if !valid {
            return Err(ValidationError::ResourceIdInvalidChar { ch, index });
        }
    }

    Ok(trimmed.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_queries_share_a_fingerprint() {
        let left = Query::daily_history("510300")
            .and_then(|q| q.with_param("start", "20240101"))
            .expect("valid query");
        let right = Query::daily_history(" 510300 ")
            .and_then(|q| q.with_param("start", "20240101"))
            .expect("valid query");

        assert_eq!(left, right);
        assert_eq!(left.fingerprint(), right.fingerprint());
        assert_eq!(left.fingerprint(), "daily_history|510300|start=20240101");
    }

    #[test]
    fn param_order_is_significant() {
        let ab = Query::daily_history("510300")
            .and_then(|q| q.with_param("a", "1"))
            .and_then(|q| q.with_param("b", "2"))
            .expect("valid query");
        let ba = Query::daily_history("510300")
            .and_then(|q| q.with_param("b", "2"))
            .and_then(|q| q.with_param("a", "1"))
            .expect("valid query");

        assert_ne!(ab, ba);
        assert_ne!(ab.fingerprint(), ba.fingerprint());
    }

    #[test]
    fn fingerprint_escapes_separators() {
        let query = Query::spot_quote("510300")
            .and_then(|q| q.with_param("note", "a&b=c|d"))
            .expect("valid query");

        assert_eq!(query.fingerprint(), "spot_quote|510300|note=a%26b%3Dc%7Cd");
    }

    #[test]
    fn rejects_invalid_resource_ids() {
        assert_eq!(
            Query::spot_quote("  ").expect_err("must fail"),
            ValidationError::EmptyResourceId
        );
        assert!(matches!(
            Query::spot_quote("51 0300").expect_err("must fail"),
            ValidationError::ResourceIdInvalidChar { ch: ' ', index: 2 }
        ));
        assert!(matches!(
            Query::spot_quote(&"9".repeat(40)).expect_err("must fail"),
            ValidationError::ResourceIdTooLong { len: 40, .. }
        ));
    }

    #[test]
    fn parses_kind_aliases() {
        assert_eq!("daily".parse::<QueryKind>(), Ok(QueryKind::DailyHistory));
        assert_eq!("SPOT_QUOTE".parse::<QueryKind>(), Ok(QueryKind::SpotQuote));
        assert!("weekly".parse::<QueryKind>().is_err());
    }
}
