use std::sync::Arc;

use tickguard_core::{
    FetchConfig, FetchOrchestrator, FetchOrchestratorBuilder, FetchStatus, FieldValue, HttpError,
    HttpErrorKind, HttpResponse, Query, SourceErrorKind, StaticHttpClient,
};

const EASTMONEY_QUOTE: &str = "https://push2.eastmoney.com/api/qt/ulist.np/get";
const EASTMONEY_KLINE: &str = "https://push2his.eastmoney.com/api/qt/stock/kline/get";
const SINA_QUOTE: &str = "https://hq.sinajs.cn/list=";
const SINA_KLINE: &str = "https://money.finance.sina.com.cn/quotes_service/api/json_v2.php";

const CANONICAL_FIELDS: [&str; 13] = [
    "code",
    "name",
    "latest_price",
    "prev_close",
    "change_amount",
    "change_pct",
    "open",
    "high",
    "low",
    "close",
    "volume",
    "amount",
    "date",
];

fn eastmoney_quote() -> HttpResponse {
    HttpResponse::ok(
        r#"{"rc":0,"data":{"total":1,"diff":[{"f12":"510300","f14":"沪深300ETF","f2":3.912,"f18":3.88,"f4":0.032,"f3":0.82,"f17":3.88,"f15":3.92,"f16":3.87,"f5":1234567,"f6":482000000.0}]}}"#,
    )
}

fn sina_quote() -> HttpResponse {
    let mut columns = vec![
        "沪深300ETF", "3.880", "3.880", "3.912", "3.920", "3.870", "3.911", "3.912", "123456700",
        "482000000.000",
    ];
    columns.extend(std::iter::repeat("0").take(20));
    columns.extend(["2024-03-15", "15:00:00", "00"]);
    HttpResponse::ok(format!("var hq_str_sh510300=\"{}\";", columns.join(",")))
}

fn orchestrator(client: StaticHttpClient) -> FetchOrchestrator {
    FetchOrchestratorBuilder::new()
        .with_config(FetchConfig {
            min_call_interval_ms: 0,
            max_retries: 0,
            ..FetchConfig::default()
        })
        .with_http_client(Arc::new(client))
        .build()
        .expect("valid config")
}

fn number(value: Option<&FieldValue>) -> f64 {
    value
        .and_then(FieldValue::as_f64)
        .unwrap_or_else(|| panic!("expected a number, got {value:?}"))
}

#[tokio::test]
async fn every_provider_yields_the_canonical_field_set_for_quotes() {
    for (provider, client) in [
        (
            "eastmoney",
            StaticHttpClient::new().route(EASTMONEY_QUOTE, eastmoney_quote()),
        ),
        (
            "sina",
            StaticHttpClient::new()
                .route(EASTMONEY_QUOTE, HttpResponse::ok(r#"{"rc":0,"data":null}"#))
                .route(SINA_QUOTE, sina_quote()),
        ),
    ] {
        let orchestrator = orchestrator(client);
        let query = Query::spot_quote("510300").expect("valid query");

        let result = orchestrator.fetch(&query).await;

        assert_eq!(result.status, FetchStatus::Fresh, "provider '{provider}'");
        assert_eq!(result.source.as_deref(), Some(provider));
        let record = &result.result_set.records[0];
        for field in CANONICAL_FIELDS {
            assert!(
                record.contains_key(field),
                "provider '{provider}': missing '{field}'"
            );
        }
        let set = &result.result_set;
        assert_eq!(number(set.value("510300", "latest_price")), 3.912);
        assert_eq!(number(set.value("510300", "prev_close")), 3.88);
        assert!((number(set.value("510300", "change_amount")) - 0.03).abs() < 0.005);
        assert!((number(set.value("510300", "change_pct")) - 0.82).abs() < 0.005);
    }
}

#[tokio::test]
async fn eastmoney_volume_is_reported_in_shares() {
    let orchestrator =
        orchestrator(StaticHttpClient::new().route(EASTMONEY_QUOTE, eastmoney_quote()));

    let result = orchestrator
        .fetch(&Query::spot_quote("510300").expect("valid query"))
        .await;

    assert_eq!(
        number(result.result_set.value("510300", "volume")),
        123_456_700.0
    );
}

#[tokio::test]
async fn daily_history_rows_carry_code_and_trading_day() {
    let orchestrator = orchestrator(StaticHttpClient::new().route(
        EASTMONEY_KLINE,
        HttpResponse::ok(
            r#"{"rc":0,"data":{"code":"159915","klines":["2024-03-14,2.01,2.03,2.05,2.00,1000,203000.0","2024-03-15,2.03,2.02,2.04,2.01,-,182000.0"]}}"#,
        ),
    ));
    let query = Query::daily_history("159915").expect("valid query");

    let result = orchestrator.fetch(&query).await;

    assert_eq!(result.result_set.len(), 2);
    let last = &result.result_set.records[1];
    assert_eq!(last["code"], FieldValue::Text("159915".into()));
    assert_eq!(last["close"], FieldValue::Number(2.02));
    assert!(last["volume"].is_null(), "'-' placeholder becomes null");
    let day = last["date"].as_timestamp().expect("trading day");
    assert_eq!(day.format_rfc3339(), "2024-03-15T00:00:00Z");
}

#[tokio::test]
async fn sina_history_is_used_when_eastmoney_is_unreachable() {
    let orchestrator = orchestrator(
        StaticHttpClient::new()
            .fail(
                EASTMONEY_KLINE,
                HttpError::new(HttpErrorKind::Connect, "connection refused"),
            )
            .route(
                SINA_KLINE,
                HttpResponse::ok(
                    r#"[{"day":"2024-03-15","open":"2.03","high":"2.04","low":"2.01","close":"2.02","volume":"90000"}]"#,
                ),
            ),
    );
    let query = Query::daily_history("159915").expect("valid query");

    let result = orchestrator.fetch(&query).await;

    assert_eq!(result.source.as_deref(), Some("sina"));
    assert_eq!(result.errors[0].kind(), SourceErrorKind::Connection);
    assert_eq!(
        result.result_set.value("159915", "close"),
        Some(&FieldValue::Number(2.02))
    );
}

#[tokio::test]
async fn unknown_codes_end_empty_after_both_providers_reject() {
    let orchestrator = orchestrator(
        StaticHttpClient::new()
            .route(EASTMONEY_QUOTE, HttpResponse::ok(r#"{"rc":0,"data":null}"#))
            .route(SINA_QUOTE, HttpResponse::ok("var hq_str_sh999999=\"\";")),
    );

    let result = orchestrator
        .fetch(&Query::spot_quote("999999").expect("valid query"))
        .await;

    assert_eq!(result.status, FetchStatus::Empty);
    assert_eq!(result.source_chain, ["eastmoney", "sina"]);
    assert!(result.errors[..2]
        .iter()
        .all(|error| error.kind() == SourceErrorKind::ProviderRejected));
}
