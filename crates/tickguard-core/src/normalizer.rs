//! Provider schema normalization.
//!
//! Each provider registers a [`ProviderSchema`]: an ordered list of
//! [`FieldRule`]s mapping a provider field onto a canonical field. When several
//! rules target the same canonical field the first present, non-placeholder
//! source wins.

use std::collections::HashMap;

use serde_json::Value;
use tracing::error;

use crate::data_source::{RawRow, RawRows, SourceError};
use crate::domain::{FieldValue, Record, ResultSet, UtcDateTime};

/// Canonical field names shared by every provider.
pub mod fields {
    pub const CODE: &str = "code";
    pub const NAME: &str = "name";
    pub const LATEST_PRICE: &str = "latest_price";
    pub const PREV_CLOSE: &str = "prev_close";
    pub const CHANGE_AMOUNT: &str = "change_amount";
    pub const CHANGE_PCT: &str = "change_pct";
    pub const OPEN: &str = "open";
    pub const HIGH: &str = "high";
    pub const LOW: &str = "low";
    pub const CLOSE: &str = "close";
    pub const VOLUME: &str = "volume";
    pub const AMOUNT: &str = "amount";
    pub const DATE: &str = "date";
}

/// How a raw value is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Number,
    Text,
    Date,
}

/// Maps one provider field onto one canonical field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldRule {
    pub source: String,
    pub target: &'static str,
    pub kind: ValueKind,
    /// Multiplier applied to numeric values (unit conversion).
    pub scale: f64,
}

impl FieldRule {
    pub fn number(source: impl Into<String>, target: &'static str) -> Self {
        Self {
            source: source.into(),
            target,
            kind: ValueKind::Number,
            scale: 1.0,
        }
    }

    pub fn text(source: impl Into<String>, target: &'static str) -> Self {
        Self {
            source: source.into(),
            target,
            kind: ValueKind::Text,
            scale: 1.0,
        }
    }

    pub fn date(source: impl Into<String>, target: &'static str) -> Self {
        Self {
            source: source.into(),
            target,
            kind: ValueKind::Date,
            scale: 1.0,
        }
    }

    pub fn scaled(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }
}

/// Field mapping registered for one provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSchema {
    provider: String,
    rules: Vec<FieldRule>,
}

impl ProviderSchema {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            rules: Vec::new(),
        }
    }

    pub fn rule(mut self, rule: FieldRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn rules(&self) -> &[FieldRule] {
        &self.rules
    }

    /// `push2` quote list (`f`-codes) plus kline rows split by the adapter.
    /// Volumes arrive in lots of 100 shares.
    pub fn eastmoney() -> Self {
        use self::fields::*;
        Self::new("eastmoney")
            .rule(FieldRule::text("f12", CODE))
            .rule(FieldRule::text("code", CODE))
            .rule(FieldRule::text("f14", NAME))
            .rule(FieldRule::number("f2", LATEST_PRICE))
            .rule(FieldRule::number("f18", PREV_CLOSE))
            .rule(FieldRule::number("f4", CHANGE_AMOUNT))
            .rule(FieldRule::number("f3", CHANGE_PCT))
            .rule(FieldRule::number("f17", OPEN))
            .rule(FieldRule::number("open", OPEN))
            .rule(FieldRule::number("f15", HIGH))
            .rule(FieldRule::number("high", HIGH))
            .rule(FieldRule::number("f16", LOW))
            .rule(FieldRule::number("low", LOW))
            .rule(FieldRule::number("close", CLOSE))
            .rule(FieldRule::number("f5", VOLUME).scaled(100.0))
            .rule(FieldRule::number("volume", VOLUME).scaled(100.0))
            .rule(FieldRule::number("f6", AMOUNT))
            .rule(FieldRule::number("amount", AMOUNT))
            .rule(FieldRule::date("date", DATE))
    }

    /// `hq.sinajs.cn` quote text and `CN_MarketData` kline JSON.
    pub fn sina() -> Self {
        use self::fields::*;
        Self::new("sina")
            .rule(FieldRule::text("symbol", CODE))
            .rule(FieldRule::text("name", NAME))
            .rule(FieldRule::number("price", LATEST_PRICE))
            .rule(FieldRule::number("prev_close", PREV_CLOSE))
            .rule(FieldRule::number("open", OPEN))
            .rule(FieldRule::number("high", HIGH))
            .rule(FieldRule::number("low", LOW))
            .rule(FieldRule::number("close", CLOSE))
            .rule(FieldRule::number("volume", VOLUME))
            .rule(FieldRule::number("amount", AMOUNT))
            .rule(FieldRule::date("day", DATE))
            .rule(FieldRule::date("date", DATE))
    }
}

/// Maps provider-shaped rows onto canonical [`ResultSet`]s.
#[derive(Debug, Clone, Default)]
pub struct SchemaNormalizer {
    schemas: HashMap<String, ProviderSchema>,
}

impl SchemaNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalizer preloaded with the built-in provider schemas.
    pub fn with_builtin_schemas() -> Self {
        Self::new()
            .with_schema(ProviderSchema::eastmoney())
            .with_schema(ProviderSchema::sina())
    }

    pub fn with_schema(mut self, schema: ProviderSchema) -> Self {
        self.register(schema);
        self
    }

    pub fn register(&mut self, schema: ProviderSchema) {
        self.schemas.insert(schema.provider.clone(), schema);
    }

    pub fn has_schema(&self, provider: &str) -> bool {
        self.schemas.contains_key(provider)
    }

    pub fn normalize(&self, raw_rows: &RawRows, provider: &str) -> Result<ResultSet, SourceError> {
        let schema = self.schemas.get(provider).ok_or_else(|| {
            SourceError::schema(format!("no schema registered for provider '{provider}'"))
        })?;

        let records = raw_rows
            .iter()
            .enumerate()
            .map(|(index, row)| normalize_row(schema, row, index))
            .collect::<Result<Vec<_>, _>>()
            .inspect_err(|err| {
                error!(provider, error = %err, "response no longer matches provider schema");
            })?;

        Ok(ResultSet::new(provider, records))
    }
}

fn normalize_row(schema: &ProviderSchema, row: &RawRow, index: usize) -> Result<Record, SourceError> {
    let mut record = Record::new();

    for rule in &schema.rules {
        if record.get(rule.target).is_some_and(|value| !value.is_null()) {
            continue;
        }
        let Some(raw) = row.get(&rule.source) else {
            continue;
        };
        let value = convert(raw, rule).ok_or_else(|| {
            SourceError::schema(format!(
                "{} row {index}: field '{}' has unparseable value {raw}",
                schema.provider, rule.source
            ))
        })?;
        record.insert(rule.target.to_owned(), value);
    }

    match record.get(fields::CODE) {
        Some(FieldValue::Text(code)) if !code.trim().is_empty() => {}
        _ => {
            return Err(SourceError::schema(format!(
                "{} row {index}: missing instrument code",
                schema.provider
            )))
        }
    }

    for target in [
        fields::NAME,
        fields::LATEST_PRICE,
        fields::PREV_CLOSE,
        fields::OPEN,
        fields::HIGH,
        fields::LOW,
        fields::CLOSE,
        fields::VOLUME,
        fields::AMOUNT,
        fields::DATE,
    ] {
        record.entry(target.to_owned()).or_insert(FieldValue::Null);
    }
    derive_change(&mut record);

    Ok(record)
}

/// Fills change amount and percentage from price and previous close.
fn derive_change(record: &mut Record) {
    let price = record.get(fields::LATEST_PRICE).and_then(FieldValue::as_f64);
    let prev_close = record.get(fields::PREV_CLOSE).and_then(FieldValue::as_f64);

    let missing = |record: &Record, field: &str| {
        record.get(field).map_or(true, FieldValue::is_null)
    };

    let (amount, pct) = match (price, prev_close) {
        (Some(price), Some(prev)) if prev != 0.0 => {
            let change = price - prev;
            (
                FieldValue::Number(round2(change)),
                FieldValue::Number(round2(change / prev * 100.0)),
            )
        }
        _ => (FieldValue::Null, FieldValue::Null),
    };

    if missing(record, fields::CHANGE_AMOUNT) {
        record.insert(fields::CHANGE_AMOUNT.to_owned(), amount);
    }
    if missing(record, fields::CHANGE_PCT) {
        record.insert(fields::CHANGE_PCT.to_owned(), pct);
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// `None` means the value is present but cannot be read as `rule.kind`.
fn convert(raw: &Value, rule: &FieldRule) -> Option<FieldValue> {
    if is_placeholder(raw) {
        return Some(FieldValue::Null);
    }

    match rule.kind {
        ValueKind::Text => Some(FieldValue::Text(match raw {
            Value::String(text) => text.trim().to_owned(),
            other => other.to_string(),
        })),
        ValueKind::Number => {
            let number = match raw {
                Value::Number(number) => number.as_f64()?,
                Value::String(text) => text.trim().parse::<f64>().ok()?,
                _ => return None,
            };
            number
                .is_finite()
                .then(|| FieldValue::Number(number * rule.scale))
        }
        ValueKind::Date => match raw {
            Value::String(text) => UtcDateTime::parse_trading_day(text)
                .or_else(|| UtcDateTime::parse(text).ok())
                .map(FieldValue::Timestamp),
            _ => None,
        },
    }
}

fn is_placeholder(raw: &Value) -> bool {
    match raw {
        Value::Null => true,
        Value::String(text) => matches!(text.trim(), "" | "-" | "--"),
        _ => false,
    }
}
