use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use super::{compact_day, send, split_exchange, Exchange};
use crate::data_source::{RawRow, RawRows, SourceAdapter, SourceError};
use crate::http_client::{HttpClient, HttpRequest, ReqwestHttpClient};
use crate::{Query, QueryKind};

const QUOTE_URL: &str = "https://push2.eastmoney.com/api/qt/ulist.np/get";
const KLINE_URL: &str = "https://push2his.eastmoney.com/api/qt/stock/kline/get";
const QUOTE_FIELDS: &str = "f12,f14,f2,f18,f4,f3,f17,f15,f16,f5,f6";
const KLINE_COLUMNS: [&str; 7] = ["date", "open", "close", "high", "low", "volume", "amount"];

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    #[serde(default)]
    diff: Vec<RawRow>,
}

#[derive(Debug, Deserialize)]
struct KlineData {
    code: Option<String>,
    #[serde(default)]
    klines: Vec<String>,
}

/// East Money `push2` adapter.
#[derive(Clone)]
pub struct EastMoneyAdapter {
    http_client: Arc<dyn HttpClient>,
    timeout_ms: u64,
}

impl Default for EastMoneyAdapter {
    fn default() -> Self {
        Self::with_http_client(Arc::new(ReqwestHttpClient::new()))
    }
}

impl EastMoneyAdapter {
    pub const NAME: &'static str = "eastmoney";

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

    fn secid(resource_id: &str) -> String {
        let (exchange, code) = split_exchange(resource_id);
        let market = match exchange {
            Exchange::Shanghai => 1,
            Exchange::Shenzhen => 0,
        };
        format!("{market}.{code}")
    }

    fn quote_url(query: &Query) -> String {
        format!(
            "{QUOTE_URL}?fltt=2&invt=2&fields={QUOTE_FIELDS}&secids={}",
            urlencoding::encode(&Self::secid(query.resource_id()))
        )
    }

    fn kline_url(query: &Query) -> String {
        let klt = match query.kind() {
            QueryKind::Intraday => query.param("period").unwrap_or("1"),
            _ => "101",
        };
        let fqt = match query.param("adjust") {
            Some("qfq") => "1",
            Some("hfq") => "2",
            _ => "0",
        };
        let beg = query.param("start").map_or_else(|| String::from("0"), compact_day);
        let end = query
            .param("end")
            .map_or_else(|| String::from("20500101"), compact_day);

        format!(
            "{KLINE_URL}?secid={}&fields1=f1,f2,f3&fields2=f51,f52,f53,f54,f55,f56,f57&klt={}&fqt={fqt}&beg={}&end={}",
            urlencoding::encode(&Self::secid(query.resource_id())),
            urlencoding::encode(klt),
            urlencoding::encode(&beg),
            urlencoding::encode(&end),
        )
    }

    async fn fetch_quote(&self, query: &Query) -> Result<RawRows, SourceError> {
        let request = HttpRequest::get(Self::quote_url(query)).with_timeout_ms(self.timeout_ms);
        let body = send(self.http_client.as_ref(), Self::NAME, request).await?;
        parse_quote(&body, query)
    }

    async fn fetch_klines(&self, query: &Query) -> Result<RawRows, SourceError> {
        let request = HttpRequest::get(Self::kline_url(query)).with_timeout_ms(self.timeout_ms);
        let body = send(self.http_client.as_ref(), Self::NAME, request).await?;
        parse_klines(&body, query)
    }
}

fn parse_quote(body: &str, query: &Query) -> Result<RawRows, SourceError> {
    let envelope: Envelope<QuoteData> = serde_json::from_str(body)
        .map_err(|e| SourceError::schema(format!("eastmoney quote payload is not valid: {e}")))?;

    let rows = envelope.data.map(|data| data.diff).unwrap_or_default();
    if rows.is_empty() {
        return Err(SourceError::rejected(format!(
            "eastmoney has no quote for '{}'",
            query.resource_id()
        )));
    }
    Ok(rows)
}

fn parse_klines(body: &str, query: &Query) -> Result<RawRows, SourceError> {
    let envelope: Envelope<KlineData> = serde_json::from_str(body)
        .map_err(|e| SourceError::schema(format!("eastmoney kline payload is not valid: {e}")))?;

    let Some(data) = envelope.data else {
        return Err(SourceError::rejected(format!(
            "eastmoney has no history for '{}'",
            query.resource_id()
        )));
    };
    let (_, bare) = split_exchange(query.resource_id());
    let code = data.code.unwrap_or_else(|| bare.to_owned());

    data.klines
        .iter()
        .map(|line| {
            let columns = line.split(',').collect::<Vec<_>>();
            if columns.len() < KLINE_COLUMNS.len() {
                return Err(SourceError::schema(format!(
                    "eastmoney kline '{line}' has {} columns, expected {}",
                    columns.len(),
                    KLINE_COLUMNS.len()
                )));
            }

            let mut row = RawRow::new();
            row.insert(String::from("code"), Value::String(code.clone()));
            for (name, value) in KLINE_COLUMNS.iter().zip(columns) {
                row.insert((*name).to_owned(), Value::String(value.to_owned()));
            }
            Ok(row)
        })
        .collect()
}

impl SourceAdapter for EastMoneyAdapter {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::{HttpError, HttpErrorKind, HttpResponse, StaticHttpClient};
    use crate::SourceErrorKind;

    fn adapter(client: StaticHttpClient) -> (EastMoneyAdapter, Arc<StaticHttpClient>) {
        let client = Arc::new(client);
        (EastMoneyAdapter::with_http_client(client.clone()), client)
    }

    #[tokio::test]
    async fn fetches_spot_quote_rows() {
        let (adapter, client) = adapter(StaticHttpClient::new().route(
            QUOTE_URL,
            HttpResponse::ok(
                r#"{"rc":0,"data":{"total":1,"diff":[{"f12":"510300","f14":"沪深300ETF","f2":3.912,"f18":3.88,"f4":0.032,"f3":0.82}]}}"#,
            ),
        ));
        let query = Query::spot_quote("510300").expect("valid query");

        let rows = adapter.fetch(&query).await.expect("rows");

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["f12"], "510300");
        let requests = client.recorded_requests();
        assert!(requests[0].url.contains("secids=1.510300"));
    }

    #[tokio::test]
    async fn splits_kline_strings_and_injects_code() {
        let (adapter, client) = adapter(StaticHttpClient::new().route(
            KLINE_URL,
            HttpResponse::ok(
                r#"{"rc":0,"data":{"code":"159915","klines":["2024-03-14,2.01,2.03,2.05,2.00,1000,203000.0","2024-03-15,2.03,2.02,2.04,2.01,900,182000.0"]}}"#,
            ),
        ));
        let query = Query::daily_history("159915")
            .and_then(|q| q.with_param("start", "2024-03-01"))
            .and_then(|q| q.with_param("adjust", "qfq"))
            .expect("valid query");

        let rows = adapter.fetch(&query).await.expect("rows");

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["code"], "159915");
        assert_eq!(rows[1]["date"], "2024-03-15");
        assert_eq!(rows[1]["close"], "2.02");
        let url = &client.recorded_requests()[0].url;
        assert!(url.contains("secid=0.159915"));
        assert!(url.contains("klt=101"));
        assert!(url.contains("fqt=1"));
        assert!(url.contains("beg=20240301"));
    }

    #[tokio::test]
    async fn null_data_is_a_rejection() {
        let (adapter, _) = adapter(
            StaticHttpClient::new().route(QUOTE_URL, HttpResponse::ok(r#"{"rc":0,"data":null}"#)),
        );
        let query = Query::spot_quote("999999").expect("valid query");

        let error = adapter.fetch(&query).await.expect_err("no data");
        assert_eq!(error.kind(), SourceErrorKind::ProviderRejected);
    }

    #[tokio::test]
    async fn transport_failures_are_connection_class() {
        let (adapter, _) = adapter(StaticHttpClient::new().fail(
            QUOTE_URL,
            HttpError::new(HttpErrorKind::Connect, "connection refused"),
        ));
        let query = Query::spot_quote("510300").expect("valid query");

        let error = adapter.fetch(&query).await.expect_err("refused");
        assert!(error.retryable());
    }

    #[tokio::test]
    async fn server_errors_are_retryable_and_garbage_is_not() {
        let (adapter, _) = adapter(
            StaticHttpClient::new()
                .route(QUOTE_URL, HttpResponse::with_status(502, "bad gateway"))
                .route(KLINE_URL, HttpResponse::ok("<html>maintenance</html>")),
        );

        let quote = Query::spot_quote("510300").expect("valid query");
        assert!(adapter.fetch(&quote).await.expect_err("502").retryable());

        let history = Query::daily_history("510300").expect("valid query");
        let error = adapter.fetch(&history).await.expect_err("html");
        assert_eq!(error.kind(), SourceErrorKind::SchemaNormalization);
    }
}
