// =============================================================================
// Application State: read-only after startup
// =============================================================================
//
// Shared across handlers via `Arc<AppState>`. Holds configuration and the
// factory for per-request upstream clients; no mutable state lives here.
// =============================================================================

use std::time::Instant;

use crate::config::GatewayConfig;
use crate::connect::{ConnectEndpoints, HttpClientFactory, MarketDataClient, UpstreamError};

pub struct AppState {
    pub config: GatewayConfig,
    pub endpoints: ConnectEndpoints,
    pub http_factory: HttpClientFactory,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: GatewayConfig) -> Self {
        let endpoints = ConnectEndpoints::new(&config.base_url_api_connect);
        let http_factory = HttpClientFactory::new(config.http.clone());
        Self {
            config,
            endpoints,
            http_factory,
            started_at: Instant::now(),
        }
    }

    /// Acquire a client scoped to the caller; its pool closes on drop.
    pub fn market_data_client(&self) -> Result<MarketDataClient, UpstreamError> {
        let http = self.http_factory.acquire()?;
        Ok(MarketDataClient::new(
            http,
            self.endpoints.clone(),
            self.config.kline_row_format,
        ))
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
