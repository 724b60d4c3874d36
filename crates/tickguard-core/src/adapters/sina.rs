use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use super::{compact_day, send, split_exchange, Exchange};
use crate::data_source::{RawRow, RawRows, SourceAdapter, SourceError};
use crate::http_client::{HttpClient, HttpRequest, ReqwestHttpClient};
use crate::{Query, QueryKind};

const QUOTE_URL: &str = "https://hq.sinajs.cn/list=";
const KLINE_URL: &str =
    "https://money.finance.sina.com.cn/quotes_service/api/json_v2.php/CN_MarketData.getKLineData";
const REFERER: &str = "https://finance.sina.com.cn";

/// Positions inside the comma separated `hq_str_*` payload.
const QUOTE_COLUMNS: [(usize, &str); 9] = [
    (0, "name"),
    (1, "open"),
    (2, "prev_close"),
    (3, "price"),
    (4, "high"),
    (5, "low"),
    (8, "volume"),
    (9, "amount"),
    (30, "date"),
];
const MIN_QUOTE_COLUMNS: usize = 10;

/// Sina Finance adapter.
#[derive(Clone)]
pub struct SinaAdapter {
    http_client: Arc<dyn HttpClient>,
    timeout_ms: u64,
}

impl Default for SinaAdapter {
    fn default() -> Self {
        Self::with_http_client(Arc::new(ReqwestHttpClient::new()))
    }
}

impl SinaAdapter {
    pub const NAME: &'static str = "sina";

    pub fn with_http_client(http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            http_client,
            timeout_ms: 5_000,
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    fn symbol(resource_id: &str) -> String {
        let (exchange, code) = split_exchange(resource_id);
        match exchange {
            Exchange::Shanghai => format!("sh{code}"),
            Exchange::Shenzhen => format!("sz{code}"),
        }
    }

    fn kline_url(query: &Query) -> String {
        let scale = match query.kind() {
            QueryKind::Intraday => query.param("period").unwrap_or("5"),
            _ => "240",
        };
        let datalen = query.param("limit").unwrap_or("1023");

        format!(
            "{KLINE_URL}?symbol={}&scale={}&ma=no&datalen={}",
            urlencoding::encode(&Self::symbol(query.resource_id())),
            urlencoding::encode(scale),
            urlencoding::encode(datalen),
        )
    }

    async fn fetch_quote(&self, query: &Query) -> Result<RawRows, SourceError> {
        let request = HttpRequest::get(format!(
            "{QUOTE_URL}{}",
            urlencoding::encode(&Self::symbol(query.resource_id()))
        ))
        .with_header("Referer", REFERER)
        .with_timeout_ms(self.timeout_ms);

        let body = send(self.http_client.as_ref(), Self::NAME, request).await?;
        parse_quote(&body, query)
    }

    async fn fetch_klines(&self, query: &Query) -> Result<RawRows, SourceError> {
        let request = HttpRequest::get(Self::kline_url(query))
            .with_header("Referer", REFERER)
            .with_timeout_ms(self.timeout_ms);

        let body = send(self.http_client.as_ref(), Self::NAME, request).await?;
        parse_klines(&body, query)
    }
}

fn bare_code(query: &Query) -> String {
    split_exchange(query.resource_id()).1.to_owned()
}

/// `var hq_str_sh510300="name,open,prev_close,price,...";`
fn parse_quote(body: &str, query: &Query) -> Result<RawRows, SourceError> {
    let payload = body
        .split_once('"')
        .and_then(|(_, rest)| rest.rsplit_once('"'))
        .map(|(payload, _)| payload)
        .ok_or_else(|| SourceError::schema(format!("sina quote payload is not valid: {body}")))?;

    if payload.trim().is_empty() {
        return Err(SourceError::rejected(format!(
            "sina has no quote for '{}'",
            query.resource_id()
        )));
    }

    let columns = payload.split(',').collect::<Vec<_>>();
    if columns.len() < MIN_QUOTE_COLUMNS {
        return Err(SourceError::schema(format!(
            "sina quote has {} columns, expected at least {MIN_QUOTE_COLUMNS}",
            columns.len()
        )));
    }

    let mut row = RawRow::new();
    row.insert(String::from("symbol"), Value::String(bare_code(query)));
    for (position, name) in QUOTE_COLUMNS {
        if let Some(value) = columns.get(position) {
            row.insert(name.to_owned(), Value::String((*value).to_owned()));
        }
    }
    Ok(vec![row])
}

/// `[{"day":"2024-03-15","open":"3.88",...}]`, or the literal `null`.
fn parse_klines(body: &str, query: &Query) -> Result<RawRows, SourceError> {
    let parsed: Option<Vec<RawRow>> = serde_json::from_str(body.trim())
        .map_err(|e| SourceError::schema(format!("sina kline payload is not valid: {e}")))?;

    let Some(rows) = parsed else {
        return Err(SourceError::rejected(format!(
            "sina has no history for '{}'",
            query.resource_id()
        )));
    };

    let start = query.param("start").map(compact_day);
    let end = query.param("end").map(compact_day);
    let code = bare_code(query);

    Ok(rows
        .into_iter()
        .filter(|row| {
            let Some(day) = row.get("day").and_then(Value::as_str) else {
                return true;
            };
            let day = compact_day(day.split(' ').next().unwrap_or(day));
            start.as_ref().map_or(true, |start| &day >= start)
                && end.as_ref().map_or(true, |end| &day <= end)
        })
        .map(|mut row| {
            row.insert(String::from("symbol"), Value::String(code.clone()));
            row
        })
        .collect())
}

impl SourceAdapter for SinaAdapter {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn supports(&self, _kind: QueryKind) -> bool {
        true
    }

    fn fetch<'a>(
        &'a self,
        query: &'a Query,
    ) -> Pin<Box<dyn Future<Output = Result<RawRows, SourceError>> + Send + 'a>> {
        Box::pin(async move {
            match query.kind() {
                QueryKind::SpotQuote => self.fetch_quote(query).await,
                QueryKind::DailyHistory | QueryKind::Intraday => self.fetch_klines(query).await,
            }
        })
    }
}
