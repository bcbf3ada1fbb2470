//! Handler of capacity-aware request execution.
//!
//! This module defines two structs, [`Client`] and [`ClientBuilder`].
//! `Client` mirrors the everyday HTTP client surface (`get`, `head`,
//! `post`, `execute`) and routes everything through the capacity-aware
//! [`Transport`]. `ClientBuilder` exposes a finer level of granularity for
//! building a `Client`: which signal handlers run, the concurrency bounds,
//! and the observer callbacks.
//!
//! For convenience, a free function [`get`] is provided for ad-hoc requests.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Body, IntoUrl, Method, Request, Response};
use url::Url;

use crate::config::TransportConfig;
use crate::error::{ErrorKind, Result};
use crate::key::DestinationKey;
use crate::signal::{
    CapacityHandler, GoAwayHandler, HttpStatusHandler, RateLimitHandler, Signal, SignalHandler,
};
use crate::state::DestinationState;
use crate::transport::{Stats, Transport};

/// Builder for [`Client`].
///
/// By default the built client is a passthrough: no signal handlers are
/// registered and only the (generous) default concurrency bound applies.
/// Enable decoding with the `with_*` methods:
///
/// ```
/// use headroom::ClientBuilder;
///
/// let client = ClientBuilder::new()
///     .with_defaults()
///     .with_concurrency(10, 1, 100)
///     .build();
/// ```
#[derive(Clone, Default)]
pub struct ClientBuilder {
    config: TransportConfig,
    handlers: Vec<Arc<dyn SignalHandler>>,
}

impl ClientBuilder {
    /// Create a builder with default configuration and no handlers
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the User-Agent prefix for requests. It is prepended to any agent
    /// already present on a request; the empty string disables injection.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Set the initial, minimum, and maximum concurrency limits.
    /// Zero values fall back to the defaults.
    #[must_use]
    pub fn with_concurrency(mut self, initial: usize, min: usize, max: usize) -> Self {
        self.config.initial_concurrency = initial;
        self.config.min_concurrency = min;
        self.config.max_concurrency = max;
        self
    }

    /// Set how long a request may wait for a concurrency slot
    #[must_use]
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.config.acquire_timeout = timeout;
        self
    }

    /// Set the freshness window used by
    /// [`DestinationState::is_stale`]
    #[must_use]
    pub fn with_state_expiry(mut self, expiry: Duration) -> Self {
        self.config.state_expiry = expiry;
        self
    }

    /// Use an existing `reqwest::Client` for the underlying round-trips,
    /// preserving its connection pool, TLS, proxy, and timeout settings
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.config.http_client = Some(client);
        self
    }

    /// Set the destination key function.
    ///
    /// The default groups by `scheme://host[:port]`; see
    /// [`path_prefix_key`](crate::key::path_prefix_key) for grouping by
    /// backend deployment.
    #[must_use]
    pub fn with_key_fn<F>(mut self, key_fn: F) -> Self
    where
        F: Fn(&Url) -> DestinationKey + Send + Sync + 'static,
    {
        self.config.key_fn = Some(Arc::new(key_fn));
        self
    }

    /// Register a custom signal handler
    #[must_use]
    pub fn with_handler(mut self, handler: impl SignalHandler + 'static) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    /// Enable handling of 429, 503, 420, and `Retry-After`
    #[must_use]
    pub fn with_http_status_handling(self) -> Self {
        self.with_handler(HttpStatusHandler)
    }

    /// Enable `X-RateLimit-*`, `RateLimit-*`, and `CF-RateLimit-*` header
    /// processing. One handler covers GitHub, Twitter, Cloudflare, and the
    /// IETF draft headers since lookups are case-insensitive.
    #[must_use]
    pub fn with_rate_limit_headers(self) -> Self {
        self.with_handler(RateLimitHandler)
    }

    /// Enable application-level `X-Capacity-*` header processing
    #[must_use]
    pub fn with_capacity_headers(self) -> Self {
        self.with_handler(CapacityHandler)
    }

    /// Enable HTTP/2 GOAWAY and connection-reset tracking. Failed
    /// round-trips are shown to the error-path handlers; the resulting
    /// backoff windows are recorded, and the error still reaches the caller
    /// unchanged.
    #[must_use]
    pub fn with_goaway_handling(mut self) -> Self {
        self.config.goaway_handling = true;
        self.with_handler(GoAwayHandler)
    }

    /// Enable the most common handlers: HTTP status codes and rate limit
    /// headers
    #[must_use]
    pub fn with_defaults(self) -> Self {
        self.with_http_status_handling().with_rate_limit_headers()
    }

    /// Enable all built-in signal handlers
    #[must_use]
    pub fn with_all(self) -> Self {
        self.with_http_status_handling()
            .with_rate_limit_headers()
            .with_capacity_headers()
            .with_goaway_handling()
    }

    /// Register a callback for every decoded signal. Runs on the
    /// request-completing task, before any state change callback.
    #[must_use]
    pub fn on_signal<F>(mut self, callback: F) -> Self
    where
        F: Fn(&DestinationKey, &Signal) + Send + Sync + 'static,
    {
        self.config.on_signal = Some(Arc::new(callback));
        self
    }

    /// Register a callback for enforced-concurrency changes. Receives a
    /// state snapshot; concurrent updates to one destination may deliver
    /// snapshots out of observation order.
    #[must_use]
    pub fn on_state_change<F>(mut self, callback: F) -> Self
    where
        F: Fn(&DestinationKey, &DestinationState) + Send + Sync + 'static,
    {
        self.config.on_state_change = Some(Arc::new(callback));
        self
    }

    /// Build the configured client
    #[must_use]
    pub fn build(self) -> Client {
        Client {
            transport: Arc::new(self.transport()),
        }
    }

    /// Build just the transport layer, for callers that want to drive it
    /// directly
    #[must_use]
    pub fn transport(self) -> Transport {
        let mut config = self.config;
        config.signal_handlers = self.handlers;
        Transport::new(config)
    }
}

impl std::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("config", &self.config)
            .field("handlers", &self.handlers)
            .finish()
    }
}

/// An HTTP client that respects server capacity signaling.
///
/// A thin shell over [`Transport`]: every request is keyed to a
/// destination, gated by that destination's concurrency pool, and has its
/// response run through the configured signal handlers.
///
/// Cloning is cheap and clones share all capacity state.
#[derive(Debug, Clone)]
pub struct Client {
    transport: Arc<Transport>,
}

impl Client {
    /// Create a builder with default configuration
    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Wrap an existing `reqwest::Client` with capacity-aware behavior.
    ///
    /// ```
    /// use headroom::Client;
    ///
    /// let inner = reqwest::Client::new();
    /// let client = Client::wrap(inner).with_defaults().build();
    /// ```
    #[must_use]
    pub fn wrap(client: reqwest::Client) -> ClientBuilder {
        ClientBuilder::new().with_http_client(client)
    }

    /// Execute a prepared request through the capacity gate
    ///
    /// # Errors
    ///
    /// See [`Transport::execute`].
    pub async fn execute(&self, request: Request) -> Result<Response> {
        self.transport.execute(request).await
    }

    /// Issue a GET to the given URL
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid, the gate times out, or the
    /// round-trip fails.
    pub async fn get(&self, url: impl IntoUrl) -> Result<Response> {
        let url = url.into_url().map_err(ErrorKind::Request)?;
        self.execute(Request::new(Method::GET, url)).await
    }

    /// Issue a HEAD to the given URL
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid, the gate times out, or the
    /// round-trip fails.
    pub async fn head(&self, url: impl IntoUrl) -> Result<Response> {
        let url = url.into_url().map_err(ErrorKind::Request)?;
        self.execute(Request::new(Method::HEAD, url)).await
    }

    /// Issue a POST with the given body to the given URL
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid, the gate times out, or the
    /// round-trip fails.
    pub async fn post(&self, url: impl IntoUrl, body: impl Into<Body>) -> Result<Response> {
        let url = url.into_url().map_err(ErrorKind::Request)?;
        let mut request = Request::new(Method::POST, url);
        *request.body_mut() = Some(body.into());
        self.execute(request).await
    }

    /// Snapshot the capacity state for a URL or destination key.
    ///
    /// Absolute `http(s)` URLs are reduced to their destination key with the
    /// configured key function; anything else is treated as a key directly.
    /// Returns `None` for destinations no request has been keyed to yet.
    #[must_use]
    pub fn state(&self, url_or_key: &str) -> Option<DestinationState> {
        let key = if url_or_key.starts_with("http://") || url_or_key.starts_with("https://") {
            match Url::parse(url_or_key) {
                Ok(url) => self.transport.key_for(&url),
                Err(_) => DestinationKey::from(url_or_key),
            }
        } else {
            DestinationKey::from(url_or_key)
        };
        self.transport.state(&key)
    }

    /// Snapshot statistics for every known destination
    #[must_use]
    pub fn stats(&self) -> std::collections::HashMap<DestinationKey, Stats> {
        self.transport.stats()
    }

    /// The underlying capacity-aware transport
    #[must_use]
    pub fn transport(&self) -> &Transport {
        &self.transport
    }
}

/// A convenience function to issue a single GET with the default handler
/// set enabled.
///
/// For anything beyond an ad-hoc request, build a [`Client`] once and reuse
/// it, so capacity state accumulates across requests.
///
/// # Errors
///
/// Returns an error if the URL is invalid, the gate times out, or the
/// round-trip fails.
pub async fn get(url: impl IntoUrl) -> Result<Response> {
    Client::builder().with_defaults().build().get(url).await
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::state::Status;

    #[tokio::test]
    async fn test_passthrough_client_leaves_state_untouched() {
        let server = mock_server!(200);

        let client = Client::builder().build();
        let response = client.get(server.uri()).await.unwrap();
        assert_eq!(response.status(), 200);

        let state = client.state(&server.uri()).unwrap();
        assert_eq!(state.current_concurrency, 100);
        assert_eq!(state.status, Status::Unknown);
        assert!(!state.is_blocked());
    }

    #[tokio::test]
    async fn test_capacity_headers_update_state() {
        let server = mock_server!(
            200,
            insert_header("X-Capacity-Status", "healthy"),
            insert_header("X-Capacity-Tasks-Running", "10"),
            insert_header("X-Capacity-Suggested-Concurrency", "50")
        );

        let client = Client::builder().with_capacity_headers().build();
        client.get(server.uri()).await.unwrap();

        let state = client.state(&server.uri()).unwrap();
        assert_eq!(state.status, Status::Healthy);
        assert_eq!(state.tasks_running, 10);
        assert_eq!(state.suggested_concurrency, 50);
        assert_eq!(state.current_concurrency, 50);
    }

    #[tokio::test]
    async fn test_state_accepts_key_form() {
        let server = mock_server!(200, insert_header("X-Capacity-Status", "busy"));

        let client = Client::builder().with_capacity_headers().build();
        client
            .get(format!("{}/some/path", server.uri()))
            .await
            .unwrap();

        // The mock server URI has the http://host:port form of the default
        // key, so the key string itself also resolves.
        let state = client.state(server.uri().trim_end_matches('/')).unwrap();
        assert_eq!(state.status, Status::Busy);
        assert!(client.state("https://unknown.example").is_none());
    }

    #[tokio::test]
    async fn test_user_agent_is_injected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("User-Agent", "Cap/1.0"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = Client::builder().build();
        let response = client.get(server.uri()).await.unwrap();
        // The mock only matches when the injected agent arrived.
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn test_user_agent_prepends_existing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("User-Agent", "Cap/1.0 probe/2.0"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = Client::builder().build();
        let url = Url::parse(&server.uri()).unwrap();
        let mut request = Request::new(Method::GET, url);
        request
            .headers_mut()
            .insert("User-Agent", "probe/2.0".parse().unwrap());

        let response = client.execute(request).await.unwrap();
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn test_empty_user_agent_disables_injection() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("User-Agent", "Cap/1.0"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        // Falls through to this mock when no agent was injected.
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = Client::builder().with_user_agent("").build();
        let response = client.get(server.uri()).await.unwrap();
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn test_builder_sorts_handlers_by_priority() {
        // Registration order is capacity before status; the pipeline must
        // still run status (priority 10) first. Observable through the
        // on_signal callback order.
        let server = mock_server!(
            429,
            insert_header("X-Capacity-Status", "healthy"),
            insert_header("Retry-After", "1")
        );

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let client = Client::builder()
            .with_capacity_headers()
            .with_http_status_handling()
            .on_signal({
                let seen = Arc::clone(&seen);
                move |_, signal| seen.lock().unwrap().push(signal.source)
            })
            .build();

        client.get(server.uri()).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["http", "capacity"]);
    }

    #[tokio::test]
    async fn test_post_and_head() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = Client::builder().build();
        let response = client.post(server.uri(), "payload").await.unwrap();
        assert_eq!(response.status(), 201);

        let response = client.head(server.uri()).await.unwrap();
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn test_wrap_preserves_underlying_client() {
        let server = mock_server!(200, insert_header("X-Capacity-Suggested-Concurrency", "25"));

        let inner = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        let client = Client::wrap(inner).with_capacity_headers().build();

        client.get(server.uri()).await.unwrap();
        let state = client.state(&server.uri()).unwrap();
        assert_eq!(state.suggested_concurrency, 25);
    }
}
