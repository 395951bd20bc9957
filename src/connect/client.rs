// =============================================================================
// Market Data Client: kline requests against the connect service
// =============================================================================
//
// One client per inbound request, wrapping that request's `ScopedClient`.
// Every operation is a single GET; nothing is cached or retried.
//
// Row policy for `/klines`: rows that do not match the configured
// `KlineRowFormat` are logged and skipped, the rest of the series is kept.
// A body that is not a JSON array at all fails the call.
// =============================================================================

use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::connect::error::UpstreamError;
use crate::connect::http::ScopedClient;
use crate::connect::{EXCHANGE_INFO_ENDPOINT, KLINES_ENDPOINT, KLINES_EXTENDED_ENDPOINT};
use crate::market_data::kline::parse_row;
use crate::market_data::{Candlestick, KlineInterval, KlineRecord, KlineRowFormat};

/// Default row count for [`MarketDataClient::get_latest_klines`].
pub const DEFAULT_LATEST_LIMIT: u32 = 100;
/// Default row count for the extended (paginated upstream) export.
pub const DEFAULT_EXTENDED_LIMIT: u32 = 2000;

/// Upstream response header reporting the number of CSV rows.
pub const TOTAL_KLINES_HEADER: &str = "x-total-klines";

// ---------------------------------------------------------------------------
// Endpoints & query
// ---------------------------------------------------------------------------

/// Absolute upstream URLs, derived once from the configured base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectEndpoints {
    pub exchange_info: String,
    pub klines: String,
    pub klines_extended: String,
}

impl ConnectEndpoints {
    pub fn new(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            exchange_info: format!("{base}{EXCHANGE_INFO_ENDPOINT}"),
            klines: format!("{base}{KLINES_ENDPOINT}"),
            klines_extended: format!("{base}{KLINES_EXTENDED_ENDPOINT}"),
        }
    }
}

/// Parameters of one upstream kline request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KlineQuery {
    pub symbol: String,
    pub interval: KlineInterval,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub limit: Option<u32>,
}

impl KlineQuery {
    /// Upstream query pairs. Optional keys appear only when set.
    pub fn to_query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("symbol", self.symbol.clone()),
            ("interval", self.interval.as_str().to_string()),
        ];
        if let Some(start) = self.start_time {
            pairs.push(("startTime", start.to_string()));
        }
        if let Some(end) = self.end_time {
            pairs.push(("endTime", end.to_string()));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit", limit.to_string()));
        }
        pairs
    }
}

/// Raw CSV export as returned by `/klines/extended`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedCsv {
    pub content: Vec<u8>,
    /// Row count reported by upstream in `X-Total-Klines`, if present.
    pub total_klines: Option<u64>,
}

// ---------------------------------------------------------------------------
// MarketDataClient
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct MarketDataClient {
    pub(crate) http: ScopedClient,
    pub(crate) endpoints: ConnectEndpoints,
    row_format: KlineRowFormat,
}

impl MarketDataClient {
    pub fn new(http: ScopedClient, endpoints: ConnectEndpoints, row_format: KlineRowFormat) -> Self {
        Self {
            http,
            endpoints,
            row_format,
        }
    }

    /// GET `{base}/klines` and parse the rows into candlesticks.
    #[instrument(skip(self), name = "connect::get_klines")]
    pub async fn get_klines(
        &self,
        symbol: &str,
        interval: KlineInterval,
        start_time: Option<i64>,
        end_time: Option<i64>,
        limit: Option<u32>,
    ) -> Result<Vec<Candlestick>, UpstreamError> {
        let query = KlineQuery {
            symbol: symbol.to_string(),
            interval,
            start_time,
            end_time,
            limit,
        };
        let pairs = query.to_query_pairs();
        info!(params = ?pairs, "requesting klines");

        let resp = self
            .http
            .get(KLINES_ENDPOINT, &self.endpoints.klines, &pairs)
            .await
            .inspect_err(|e| warn!(error = %e, "klines request failed"))?;

        let (candles, skipped) = parse_kline_rows(&resp.body, self.row_format)?;
        info!(count = candles.len(), skipped, "klines received");
        Ok(candles)
    }

    /// The most recent `limit` klines; no time bounds are sent.
    pub async fn get_latest_klines(
        &self,
        symbol: &str,
        interval: KlineInterval,
        limit: u32,
    ) -> Result<Vec<Candlestick>, UpstreamError> {
        self.get_klines(symbol, interval, None, None, Some(limit)).await
    }

    /// GET `{base}/klines/extended` and return the CSV body byte for byte.
    ///
    /// Upstream paginates past the exchange's per-request cap; `limit`
    /// defaults to [`DEFAULT_EXTENDED_LIMIT`].
    #[instrument(skip(self), name = "connect::get_klines_extended_csv")]
    pub async fn get_klines_extended_csv(
        &self,
        symbol: &str,
        interval: KlineInterval,
        start_time: Option<i64>,
        end_time: Option<i64>,
        limit: Option<u32>,
    ) -> Result<ExtendedCsv, UpstreamError> {
        let query = KlineQuery {
            symbol: symbol.to_string(),
            interval,
            start_time,
            end_time,
            limit: Some(limit.unwrap_or(DEFAULT_EXTENDED_LIMIT)),
        };
        let pairs = query.to_query_pairs();
        info!(params = ?pairs, "requesting extended klines csv");

        let resp = self
            .http
            .get(KLINES_EXTENDED_ENDPOINT, &self.endpoints.klines_extended, &pairs)
            .await
            .inspect_err(|e| warn!(error = %e, "extended klines request failed"))?;

        let total_klines = resp
            .header(TOTAL_KLINES_HEADER)
            .and_then(|v| v.trim().parse::<u64>().ok());
        let content = resp.body;

        info!(
            total_klines = total_klines.unwrap_or(0),
            bytes = content.len(),
            "extended klines csv received"
        );
        Ok(ExtendedCsv {
            content,
            total_klines,
        })
    }

    /// Same request as [`Self::get_klines_extended_csv`], parsed into numeric
    /// records. Unparsable CSV rows are skipped like malformed JSON rows.
    pub async fn get_klines_extended_records(
        &self,
        symbol: &str,
        interval: KlineInterval,
        start_time: Option<i64>,
        end_time: Option<i64>,
        limit: Option<u32>,
    ) -> Result<Vec<KlineRecord>, UpstreamError> {
        let csv = self
            .get_klines_extended_csv(symbol, interval, start_time, end_time, limit)
            .await?;
        parse_csv_records(&csv.content)
    }
}

// ---------------------------------------------------------------------------
// Body parsing
// ---------------------------------------------------------------------------

/// Parse a `/klines` body. Returns the candlesticks and the number of rows
/// skipped.
fn parse_kline_rows(
    body: &[u8],
    format: KlineRowFormat,
) -> Result<(Vec<Candlestick>, usize), UpstreamError> {
    let rows: Vec<Value> = serde_json::from_slice(body).map_err(|e| UpstreamError::Decode {
        endpoint: KLINES_ENDPOINT,
        reason: format!("expected a JSON array of rows: {e}"),
    })?;

    let mut candles = Vec::with_capacity(rows.len());
    let mut skipped = 0;
    for (index, row) in rows.into_iter().enumerate() {
        match parse_row(row, format) {
            Ok(candle) => candles.push(candle),
            Err(e) => {
                skipped += 1;
                warn!(index, error = %e, "skipping malformed kline row");
            }
        }
    }
    Ok((candles, skipped))
}

fn parse_csv_records(content: &[u8]) -> Result<Vec<KlineRecord>, UpstreamError> {
    let mut reader = csv::Reader::from_reader(content);
    reader.headers().map_err(|e| UpstreamError::Decode {
        endpoint: KLINES_EXTENDED_ENDPOINT,
        reason: format!("unreadable csv header: {e}"),
    })?;

    let mut records = Vec::new();
    for (index, result) in reader.deserialize::<KlineRecord>().enumerate() {
        match result {
            Ok(record) => records.push(record),
            Err(e) => warn!(index, error = %e, "skipping malformed csv kline row"),
        }
    }
    Ok(records)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::HttpClientSettings;
    use crate::connect::http::HttpClientFactory;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    pub(crate) const BASE_PATH: &str = "/api/v1/market-data";

    pub(crate) fn sample_row() -> Value {
        json!([
            1633024800000_i64,
            "50000.00",
            "51000.00",
            "49500.00",
            "50500.00",
            "100.50",
            1633028399999_i64,
            "5075000.00",
            1500,
            "60.25",
            "3045000.00",
            "0"
        ])
    }

    pub(crate) const SAMPLE_CSV: &str = "openTime,open,high,low,close,volume,closeTime,quoteAssetVolume,numberOfTrades,takerBuyBaseAssetVolume,takerBuyQuoteAssetVolume,ignore\n\
1633024800000,50000.00,51000.00,49500.00,50500.00,100.50,1633028399999,5075000.00,1500,60.25,3045000.00,0\n\
1633028400000,50500.00,50800.00,50100.00,50700.00,80.10,1633031999999,4060000.00,1200,40.00,2028000.00,0\n";

    fn client_for(server: &MockServer, format: KlineRowFormat) -> MarketDataClient {
        let http = HttpClientFactory::new(HttpClientSettings::default())
            .acquire()
            .unwrap();
        let endpoints = ConnectEndpoints::new(&format!("{}{BASE_PATH}", server.uri()));
        MarketDataClient::new(http, endpoints, format)
    }

    async fn sent_query(server: &MockServer) -> Vec<(String, String)> {
        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1, "expected exactly one upstream call");
        let mut pairs: Vec<(String, String)> = requests[0]
            .url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        pairs.sort();
        pairs
    }

    fn owned(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        let mut v: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        v.sort();
        v
    }

    async fn mount_klines(server: &MockServer, body: Value) {
        Mock::given(method("GET"))
            .and(path(format!("{BASE_PATH}/klines")))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    #[test]
    fn endpoints_join_base_without_double_slash() {
        let e = ConnectEndpoints::new("http://localhost:8080/api/v1/market-data/");
        assert_eq!(e.klines, "http://localhost:8080/api/v1/market-data/klines");
        assert_eq!(
            e.klines_extended,
            "http://localhost:8080/api/v1/market-data/klines/extended"
        );
        assert_eq!(
            e.exchange_info,
            "http://localhost:8080/api/v1/market-data/exchange-info"
        );
    }

    #[test]
    fn query_pairs_include_only_supplied_keys() {
        let q = KlineQuery {
            symbol: "ETHUSDT".into(),
            interval: KlineInterval::FiveMinutes,
            start_time: Some(1633024800000),
            end_time: None,
            limit: None,
        };
        assert_eq!(
            q.to_query_pairs(),
            vec![
                ("symbol", "ETHUSDT".to_string()),
                ("interval", "5m".to_string()),
                ("startTime", "1633024800000".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn get_klines_parses_sample_row() {
        let server = MockServer::start().await;
        mount_klines(&server, json!([sample_row()])).await;

        let client = client_for(&server, KlineRowFormat::Array);
        let klines = client
            .get_klines("BTCUSDT", KlineInterval::OneHour, None, None, None)
            .await
            .unwrap();

        assert_eq!(klines.len(), 1);
        assert_eq!(klines[0].open_time, 1633024800000);
        assert_eq!(klines[0].open, "50000.00");
        assert_eq!(klines[0].close, "50500.00");
        assert_eq!(
            sent_query(&server).await,
            owned(&[("symbol", "BTCUSDT"), ("interval", "1h")])
        );
    }

    #[tokio::test]
    async fn get_klines_forwards_optional_params() {
        let server = MockServer::start().await;
        mount_klines(&server, json!([sample_row()])).await;

        let client = client_for(&server, KlineRowFormat::Array);
        client
            .get_klines(
                "ETHUSDT",
                KlineInterval::FiveMinutes,
                Some(1633024800000),
                Some(1633028400000),
                Some(100),
            )
            .await
            .unwrap();

        assert_eq!(
            sent_query(&server).await,
            owned(&[
                ("symbol", "ETHUSDT"),
                ("interval", "5m"),
                ("startTime", "1633024800000"),
                ("endTime", "1633028400000"),
                ("limit", "100"),
            ])
        );
    }

    #[tokio::test]
    async fn get_klines_keeps_order_and_skips_malformed_rows() {
        let server = MockServer::start().await;
        let mut second = sample_row();
        second[0] = json!(1633028400000_i64);
        let mut third = sample_row();
        third[0] = json!(1633032000000_i64);
        mount_klines(
            &server,
            json!([
                sample_row(),
                {"invalid": "format"},
                second,
                [1, 2, 3],
                "garbage",
                third
            ]),
        )
        .await;

        let client = client_for(&server, KlineRowFormat::Array);
        let klines = client
            .get_klines("BTCUSDT", KlineInterval::OneHour, None, None, None)
            .await
            .unwrap();

        let open_times: Vec<i64> = klines.iter().map(|k| k.open_time).collect();
        assert_eq!(open_times, vec![1633024800000, 1633028400000, 1633032000000]);
    }

    #[tokio::test]
    async fn invalid_rows_only_yield_empty_series() {
        let server = MockServer::start().await;
        mount_klines(&server, json!([{"invalid": "format"}])).await;

        let client = client_for(&server, KlineRowFormat::Array);
        let klines = client
            .get_klines("BTCUSDT", KlineInterval::OneHour, None, None, None)
            .await
            .unwrap();
        assert!(klines.is_empty());
    }

    #[tokio::test]
    async fn object_format_accepts_keyed_rows() {
        let server = MockServer::start().await;
        mount_klines(
            &server,
            json!([{
                "openTime": 1633024800000_i64,
                "open": "50000.00",
                "high": "51000.00",
                "low": "49500.00",
                "close": "50500.00",
                "volume": "100.50",
                "closeTime": 1633028399999_i64,
                "quoteAssetVolume": "5075000.00",
                "numberOfTrades": 1500,
                "takerBuyBaseAssetVolume": "60.25",
                "takerBuyQuoteAssetVolume": "3045000.00",
                "ignore": "0"
            }, sample_row()]),
        )
        .await;

        let client = client_for(&server, KlineRowFormat::Object);
        let klines = client
            .get_klines("BTCUSDT", KlineInterval::OneHour, None, None, None)
            .await
            .unwrap();
        assert_eq!(klines.len(), 1);
        assert_eq!(klines[0].close, "50500.00");
    }

    #[tokio::test]
    async fn non_array_body_is_decode_error() {
        let server = MockServer::start().await;
        mount_klines(&server, json!({"code": -1121, "msg": "Invalid symbol."})).await;

        let client = client_for(&server, KlineRowFormat::Array);
        let err = client
            .get_klines("NOPE", KlineInterval::OneHour, None, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Decode { endpoint: "/klines", .. }));
    }

    #[tokio::test]
    async fn upstream_500_is_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("{BASE_PATH}/klines")))
            .respond_with(ResponseTemplate::new(500).set_body_string("db down"))
            .mount(&server)
            .await;

        let client = client_for(&server, KlineRowFormat::Array);
        let err = client
            .get_klines("BTCUSDT", KlineInterval::OneHour, None, None, None)
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(500));
        assert_eq!(err.body(), Some("db down"));
    }

    #[tokio::test]
    async fn latest_klines_sends_only_limit() {
        let server = MockServer::start().await;
        mount_klines(&server, json!([sample_row()])).await;

        let client = client_for(&server, KlineRowFormat::Array);
        let klines = client
            .get_latest_klines("ADAUSDT", KlineInterval::OneDay, 50)
            .await
            .unwrap();

        assert_eq!(klines.len(), 1);
        assert_eq!(
            sent_query(&server).await,
            owned(&[("symbol", "ADAUSDT"), ("interval", "1d"), ("limit", "50")])
        );
    }

    #[tokio::test]
    async fn latest_matches_unbounded_get_klines() {
        let latest_server = MockServer::start().await;
        mount_klines(&latest_server, json!([])).await;
        client_for(&latest_server, KlineRowFormat::Array)
            .get_latest_klines("BTCUSDT", KlineInterval::FourHours, DEFAULT_LATEST_LIMIT)
            .await
            .unwrap();

        let plain_server = MockServer::start().await;
        mount_klines(&plain_server, json!([])).await;
        client_for(&plain_server, KlineRowFormat::Array)
            .get_klines(
                "BTCUSDT",
                KlineInterval::FourHours,
                None,
                None,
                Some(DEFAULT_LATEST_LIMIT),
            )
            .await
            .unwrap();

        assert_eq!(sent_query(&latest_server).await, sent_query(&plain_server).await);
    }

    #[tokio::test]
    async fn extended_csv_is_passed_through_unmodified() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("{BASE_PATH}/klines/extended")))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "text/csv")
                    .insert_header(TOTAL_KLINES_HEADER, "2")
                    .set_body_string(SAMPLE_CSV),
            )
            .mount(&server)
            .await;

        let client = client_for(&server, KlineRowFormat::Array);
        let csv = client
            .get_klines_extended_csv("BTCUSDT", KlineInterval::OneHour, Some(1633024800000), None, None)
            .await
            .unwrap();

        assert_eq!(csv.content, SAMPLE_CSV.as_bytes());
        assert_eq!(csv.total_klines, Some(2));
        assert_eq!(
            sent_query(&server).await,
            owned(&[
                ("symbol", "BTCUSDT"),
                ("interval", "1h"),
                ("startTime", "1633024800000"),
                ("limit", "2000"),
            ])
        );
    }

    #[tokio::test]
    async fn extended_records_are_typed() {
        let server = MockServer::start().await;
        let body = format!("{SAMPLE_CSV}not-a-time,1,2,3,4,5,6,7,8,9,10,0\n");
        Mock::given(method("GET"))
            .and(path(format!("{BASE_PATH}/klines/extended")))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let client = client_for(&server, KlineRowFormat::Array);
        let records = client
            .get_klines_extended_records("BTCUSDT", KlineInterval::OneHour, None, None, Some(10))
            .await
            .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].open_time.timestamp_millis(), 1633024800000);
        assert_eq!(records[0].close_time.timestamp_millis(), 1633028399999);
        assert!((records[0].close - 50500.0).abs() < f64::EPSILON);
        assert_eq!(records[1].number_of_trades, 1200);
    }

    #[test]
    fn empty_csv_yields_no_records() {
        assert!(parse_csv_records(b"").unwrap().is_empty());
    }

    #[test]
    fn mixed_rows_report_skipped_count() {
        let mut second = sample_row();
        second[0] = json!(1633028400000_i64);
        let mut third = sample_row();
        third[0] = json!(1633032000000_i64);
        let body = json!([
            sample_row(),
            {"invalid": "format"},
            second,
            [1, 2, 3],
            "garbage",
            third
        ]);

        let (candles, skipped) =
            parse_kline_rows(body.to_string().as_bytes(), KlineRowFormat::Array).unwrap();
        assert_eq!((candles.len(), skipped), (3, 3));
    }

    #[tokio::test]
    async fn extended_csv_keeps_non_utf8_bytes() {
        let server = MockServer::start().await;
        let mut body = SAMPLE_CSV.as_bytes().to_vec();
        body.extend_from_slice(b"# \xff\xfe latin-1 trailer\n");
        Mock::given(method("GET"))
            .and(path(format!("{BASE_PATH}/klines/extended")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .mount(&server)
            .await;

        let client = client_for(&server, KlineRowFormat::Array);
        let csv = client
            .get_klines_extended_csv("BTCUSDT", KlineInterval::OneHour, None, None, None)
            .await
            .unwrap();
        assert_eq!(csv.content, body);
        assert_eq!(csv.total_klines, None);
    }
}
