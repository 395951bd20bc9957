use tracing::{info, instrument, warn};

use crate::connect::client::MarketDataClient;
use crate::connect::error::UpstreamError;
use crate::connect::EXCHANGE_INFO_ENDPOINT;
use crate::market_data::ExchangeInfo;

impl MarketDataClient {
    /// GET `{base}/exchange-info` as a typed snapshot.
    #[instrument(skip(self), name = "connect::get_exchange_info")]
    pub async fn get_exchange_info(&self) -> Result<ExchangeInfo, UpstreamError> {
        let resp = self
            .http
            .get(EXCHANGE_INFO_ENDPOINT, &self.endpoints.exchange_info, &[])
            .await
            .inspect_err(|e| warn!(error = %e, "exchange info request failed"))?;

        let info: ExchangeInfo =
            serde_json::from_slice(&resp.body).map_err(|e| UpstreamError::Decode {
                endpoint: EXCHANGE_INFO_ENDPOINT,
                reason: e.to_string(),
            })?;

        info!(
            timezone = %info.timezone,
            server_time = info.server_time,
            symbols = info.symbols.len(),
            rate_limits = info.rate_limits.len(),
            "exchange info fetched"
        );
        Ok(info)
    }
}
