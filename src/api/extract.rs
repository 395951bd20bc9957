// =============================================================================
// Per-request upstream client: Axum extractor
// =============================================================================
//
// Usage:
//
//   async fn handler(client: MarketDataClient, ...) { ... }
//
// The extractor builds a fresh pooled client for the request. It is dropped
// with the handler future, so the pool is released on success, on error, and
// when the caller disconnects mid-request.
// =============================================================================

use std::sync::Arc;

use axum::{extract::FromRequestParts, http::request::Parts};

use crate::api::error::ApiError;
use crate::app_state::AppState;
use crate::connect::MarketDataClient;

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for MarketDataClient {
    type Rejection = ApiError;

    async fn from_request_parts(
        _parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        state.market_data_client().map_err(ApiError::from)
    }
}
