//! # Domain Models
//!
//! Canonical request and response types shared by every layer.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Query`] | Immutable request descriptor; equality defines the cache key |
//! | [`QueryKind`] | Daily history, spot quote or intraday |
//! | [`ResultSet`] | Normalized records tagged with provider and fetch time |
//! | [`FieldValue`] | Number, text, timestamp or null |
//! | [`UtcDateTime`] | UTC timestamp |

mod query;
mod result_set;
mod timestamp;

pub use query::{Query, QueryKind};
pub use result_set::{FieldValue, Record, ResultSet};
pub use timestamp::UtcDateTime;
