// =============================================================================
// Scoped HTTP client: one connection pool per inbound request
// =============================================================================
//
// `HttpClientFactory` lives in `AppState` and holds only settings. Each
// inbound request acquires its own `ScopedClient`; dropping it (normal return,
// error, or the request future being cancelled) tears the pool down.
// =============================================================================

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use reqwest::header::HeaderMap;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::config::HttpClientSettings;
use crate::connect::error::UpstreamError;

/// Builds per-request [`ScopedClient`]s with the configured limits.
#[derive(Debug, Clone)]
pub struct HttpClientFactory {
    settings: HttpClientSettings,
}

impl HttpClientFactory {
    pub fn new(settings: HttpClientSettings) -> Self {
        Self { settings }
    }

    /// Build a fresh pooled client. Released when the handle is dropped.
    pub fn acquire(&self) -> Result<ScopedClient, UpstreamError> {
        let timeout = self.settings.timeout();
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(self.settings.max_keepalive_connections)
            .timeout(timeout)
            .build()
            .map_err(UpstreamError::ClientBuild)?;

        debug!(
            max_keepalive = self.settings.max_keepalive_connections,
            max_connections = self.settings.max_connections,
            timeout_secs = self.settings.timeout_secs,
            "http client acquired"
        );

        Ok(ScopedClient {
            client,
            permits: Semaphore::new(self.settings.max_connections),
            timeout,
            acquired_at: Instant::now(),
            calls: AtomicU32::new(0),
        })
    }
}

/// A successful (2xx) upstream response with its body fully read.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl UpstreamResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Request-scoped HTTP client. Admits at most `max_connections` concurrent
/// calls.
pub struct ScopedClient {
    client: reqwest::Client,
    permits: Semaphore,
    timeout: Duration,
    acquired_at: Instant,
    calls: AtomicU32,
}

impl ScopedClient {
    /// Number of upstream calls issued through this handle so far.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::Relaxed)
    }

    /// GET `url` with `query`, read the whole body, and fail on non-2xx.
    pub async fn get(
        &self,
        endpoint: &'static str,
        url: &str,
        query: &[(&'static str, String)],
    ) -> Result<UpstreamResponse, UpstreamError> {
        // `permits` is private and never closed, so acquire only waits.
        let _permit = self.permits.acquire().await.ok();
        self.calls.fetch_add(1, Ordering::Relaxed);

        let resp = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| UpstreamError::from_reqwest(endpoint, self.timeout, e))?;

        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp
            .bytes()
            .await
            .map_err(|e| UpstreamError::from_reqwest(endpoint, self.timeout, e))?
            .to_vec();

        if !status.is_success() {
            return Err(UpstreamError::Status {
                endpoint,
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        debug!(endpoint, status = status.as_u16(), bytes = body.len(), "upstream responded");
        Ok(UpstreamResponse {
            headers,
            body,
        })
    }
}

impl Drop for ScopedClient {
    fn drop(&mut self) {
        debug!(
            calls = self.calls(),
            held_ms = self.acquired_at.elapsed().as_millis() as u64,
            "http client released"
        );
    }
}

impl std::fmt::Debug for ScopedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedClient")
            .field("timeout", &self.timeout)
            .field("available_permits", &self.permits.available_permits())
            .field("calls", &self.calls())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn factory(timeout_secs: u64) -> HttpClientFactory {
        HttpClientFactory::new(HttpClientSettings {
            timeout_secs,
            ..HttpClientSettings::default()
        })
    }

    #[test]
    fn acquire_applies_settings() {
        let client = factory(30).acquire().unwrap();
        assert_eq!(client.timeout, Duration::from_secs(30));
        assert_eq!(client.permits.available_permits(), 10);
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn non_success_status_carries_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/exchange-info"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let client = factory(30).acquire().unwrap();
        let err = client
            .get("/exchange-info", &format!("{}/exchange-info", server.uri()), &[])
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(503));
        assert_eq!(err.body(), Some("maintenance"));
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn calls_beyond_the_cap_wait_for_a_permit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(200)))
            .mount(&server)
            .await;

        let client = HttpClientFactory::new(HttpClientSettings {
            max_connections: 1,
            ..HttpClientSettings::default()
        })
        .acquire()
        .unwrap();
        let url = format!("{}/klines", server.uri());

        let started = Instant::now();
        let (first, second) = tokio::join!(
            client.get("/klines", &url, &[]),
            client.get("/klines", &url, &[])
        );
        assert!(first.is_ok() && second.is_ok());
        assert_eq!(client.calls(), 2);
        assert!(started.elapsed() >= Duration::from_millis(400));
        assert_eq!(client.permits.available_permits(), 1);
    }

    #[tokio::test]
    async fn slow_upstream_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let client = factory(1).acquire().unwrap();
        let err = client
            .get("/klines", &format!("{}/klines", server.uri()), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Timeout { endpoint: "/klines", .. }));
    }

    #[tokio::test]
    async fn unreachable_upstream_is_connect_error() {
        // Bind then drop to get a port with nothing listening.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = factory(5).acquire().unwrap();
        let err = client
            .get("/klines", &format!("http://{addr}/klines"), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Connect { .. }));
    }
}
