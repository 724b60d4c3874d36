//! Provider adapters.
//!
//! | Adapter | Spot quote | Daily history | Intraday |
//! |---------|------------|---------------|----------|
//! | [`EastMoneyAdapter`] | `push2` ulist | `push2his` kline | `push2his` kline |
//! | [`SinaAdapter`] | `hq.sinajs.cn` | `CN_MarketData` kline | `CN_MarketData` kline |

mod eastmoney;
mod sina;

pub use eastmoney::EastMoneyAdapter;
pub use sina::SinaAdapter;

use crate::data_source::SourceError;
use crate::http_client::{HttpClient, HttpRequest};

/// Exchange a bare A-share/ETF code trades on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exchange {
    Shanghai,
    Shenzhen,
}

/// Splits an optional `sh`/`sz` prefix and infers the exchange for bare codes.
fn split_exchange(resource_id: &str) -> (Exchange, &str) {
    let lowered = resource_id.to_ascii_lowercase();
    if lowered.starts_with("sh") {
        return (Exchange::Shanghai, &resource_id[2..]);
    }
    if lowered.starts_with("sz") {
        return (Exchange::Shenzhen, &resource_id[2..]);
    }

    let code = resource_id.split('.').next().unwrap_or(resource_id);
    match code.as_bytes().first() {
        Some(b'5' | b'6' | b'9') => (Exchange::Shanghai, code),
        _ => (Exchange::Shenzhen, code),
    }
}

/// `YYYYMMDD` from `YYYY-MM-DD` or `YYYYMMDD`.
fn compact_day(value: &str) -> String {
    value.trim().replace('-', "")
}

/// One round trip: transport failures and non-2xx statuses become
/// [`SourceError`]s, anything else yields the body.
async fn send(
    client: &dyn HttpClient,
    provider: &str,
    request: HttpRequest,
) -> Result<String, SourceError> {
    let response = client
        .execute(request)
        .await
        .map_err(|error| error.into_source_error(provider))?;

    if let Some(error) = SourceError::from_status(provider, response.status) {
        return Err(error);
    }
    Ok(response.body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_exchange_from_code() {
        assert_eq!(split_exchange("510300"), (Exchange::Shanghai, "510300"));
        assert_eq!(split_exchange("600519"), (Exchange::Shanghai, "600519"));
        assert_eq!(split_exchange("159915"), (Exchange::Shenzhen, "159915"));
        assert_eq!(split_exchange("SZ000001"), (Exchange::Shenzhen, "000001"));
        assert_eq!(split_exchange("sh510300"), (Exchange::Shanghai, "510300"));
    }

    #[test]
    fn compacts_days() {
        assert_eq!(compact_day("2024-03-15"), "20240315");
        assert_eq!(compact_day("20240315"), "20240315");
    }
}
