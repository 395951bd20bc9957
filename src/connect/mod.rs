pub mod client;
pub mod error;
pub mod exchange_info;
pub mod http;

pub use client::{ConnectEndpoints, MarketDataClient};
pub use error::UpstreamError;
pub use http::HttpClientFactory;

// Upstream paths, relative to the configured base URL.
pub const EXCHANGE_INFO_ENDPOINT: &str = "/exchange-info";
pub const KLINES_ENDPOINT: &str = "/klines";
pub const KLINES_EXTENDED_ENDPOINT: &str = "/klines/extended";
