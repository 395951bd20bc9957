// =============================================================================
// Klines: interval codes, candlestick rows and the upstream row parser
// =============================================================================
//
// The connect service answers `/klines` with a JSON array of rows. Which row
// shape it emits (positional array or camelCase object) is fixed per
// deployment and selected through `KlineRowFormat`; a row of the other shape
// is rejected with `MalformedRowError::ShapeMismatch`.
// =============================================================================

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

// ---------------------------------------------------------------------------
// KlineInterval
// ---------------------------------------------------------------------------

/// Bucket size of a kline series. Serialized as the short code the upstream
/// service expects (`"1h"`, `"1M"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KlineInterval {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "3m")]
    ThreeMinutes,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "30m")]
    ThirtyMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "2h")]
    TwoHours,
    #[serde(rename = "4h")]
    FourHours,
    #[serde(rename = "6h")]
    SixHours,
    #[serde(rename = "8h")]
    EightHours,
    #[serde(rename = "12h")]
    TwelveHours,
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "3d")]
    ThreeDays,
    #[serde(rename = "1w")]
    OneWeek,
    #[serde(rename = "1M")]
    OneMonth,
}

impl KlineInterval {
    pub const ALL: [KlineInterval; 15] = [
        Self::OneMinute,
        Self::ThreeMinutes,
        Self::FiveMinutes,
        Self::FifteenMinutes,
        Self::ThirtyMinutes,
        Self::OneHour,
        Self::TwoHours,
        Self::FourHours,
        Self::SixHours,
        Self::EightHours,
        Self::TwelveHours,
        Self::OneDay,
        Self::ThreeDays,
        Self::OneWeek,
        Self::OneMonth,
    ];

    /// Wire code sent upstream and used in CSV filenames.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneMinute => "1m",
            Self::ThreeMinutes => "3m",
            Self::FiveMinutes => "5m",
            Self::FifteenMinutes => "15m",
            Self::ThirtyMinutes => "30m",
            Self::OneHour => "1h",
            Self::TwoHours => "2h",
            Self::FourHours => "4h",
            Self::SixHours => "6h",
            Self::EightHours => "8h",
            Self::TwelveHours => "12h",
            Self::OneDay => "1d",
            Self::ThreeDays => "3d",
            Self::OneWeek => "1w",
            Self::OneMonth => "1M",
        }
    }
}

impl fmt::Display for KlineInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KlineInterval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|i| i.as_str() == s)
            .ok_or_else(|| format!("unsupported kline interval '{s}'"))
    }
}

// ---------------------------------------------------------------------------
// Candlestick
// ---------------------------------------------------------------------------

/// One kline bar as delivered by the exchange. Prices and volumes stay as
/// text so no precision is lost on the way through.
///
/// Field order matches the exchange's positional row layout, which is what
/// lets the array form deserialize straight into this struct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candlestick {
    pub open_time: i64,
    pub open: String,
    pub high: String,
    pub low: String,
    pub close: String,
    pub volume: String,
    pub close_time: i64,
    pub quote_asset_volume: String,
    pub number_of_trades: u64,
    pub taker_buy_base_asset_volume: String,
    pub taker_buy_quote_asset_volume: String,
    pub ignore: String,
}

/// Object-keyed row as emitted by connect deployments configured for the
/// `object` format.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KlineObjectRow {
    open_time: i64,
    open: String,
    high: String,
    low: String,
    close: String,
    volume: String,
    close_time: i64,
    quote_asset_volume: String,
    number_of_trades: u64,
    taker_buy_base_asset_volume: String,
    taker_buy_quote_asset_volume: String,
    #[serde(default)]
    ignore: String,
}

impl From<KlineObjectRow> for Candlestick {
    fn from(row: KlineObjectRow) -> Self {
        Self {
            open_time: row.open_time,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
            close_time: row.close_time,
            quote_asset_volume: row.quote_asset_volume,
            number_of_trades: row.number_of_trades,
            taker_buy_base_asset_volume: row.taker_buy_base_asset_volume,
            taker_buy_quote_asset_volume: row.taker_buy_quote_asset_volume,
            ignore: row.ignore,
        }
    }
}

// ---------------------------------------------------------------------------
// Row parsing
// ---------------------------------------------------------------------------

/// Upstream row contract for `/klines`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KlineRowFormat {
    /// `[openTime, open, high, low, close, volume, closeTime, quoteAssetVolume,
    ///   numberOfTrades, takerBuyBase, takerBuyQuote, ignore]`
    #[default]
    Array,
    /// `{"openTime": .., "open": .., ...}`
    Object,
}

impl fmt::Display for KlineRowFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Array => write!(f, "array"),
            Self::Object => write!(f, "object"),
        }
    }
}

impl FromStr for KlineRowFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "array" => Ok(Self::Array),
            "object" => Ok(Self::Object),
            other => Err(format!("unknown kline row format '{other}'")),
        }
    }
}

/// A single upstream row that could not be turned into a [`Candlestick`].
/// Recoverable: the caller skips the row.
#[derive(Debug, Error)]
pub enum MalformedRowError {
    #[error("expected {expected} row, found {found}")]
    ShapeMismatch {
        expected: KlineRowFormat,
        found: &'static str,
    },
    #[error("row does not match the {format} contract: {source}")]
    Invalid {
        format: KlineRowFormat,
        #[source]
        source: serde_json::Error,
    },
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Parse one upstream row under `format`.
pub fn parse_row(value: Value, format: KlineRowFormat) -> Result<Candlestick, MalformedRowError> {
    match (format, &value) {
        (KlineRowFormat::Array, Value::Array(_)) => {
            Candlestick::deserialize(value).map_err(|source| MalformedRowError::Invalid {
                format,
                source,
            })
        }
        (KlineRowFormat::Object, Value::Object(_)) => KlineObjectRow::deserialize(value)
            .map(Candlestick::from)
            .map_err(|source| MalformedRowError::Invalid { format, source }),
        _ => Err(MalformedRowError::ShapeMismatch {
            expected: format,
            found: json_kind(&value),
        }),
    }
}

// ---------------------------------------------------------------------------
// KlineRecord: typed row of the extended CSV export
// ---------------------------------------------------------------------------

/// Numeric view of one `/klines/extended` CSV row, for consumers that want
/// to compute on the series rather than forward it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KlineRecord {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub close_time: DateTime<Utc>,
    pub quote_asset_volume: f64,
    pub number_of_trades: u64,
    pub taker_buy_base_asset_volume: f64,
    pub taker_buy_quote_asset_volume: f64,
}
