//! Switchboard — the request-routing core of a model-inference gateway.
//!
//! Requests name a model (optionally with an adapter suffix); the gateway
//! checks the model exists, triggers scale-from-zero, waits until the model
//! has at least one reachable backend replica, and forwards the request with
//! bounded retries. Two entry points share that pipeline: the synchronous
//! HTTP handler and the pub/sub messenger.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderValue;
use axum::response::Response;
use axum::routing::any;
use axum::Router;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

pub mod client;
pub mod config;
pub mod endpoints;
pub mod errors;
pub mod handlers;
pub mod load_balancer;
pub mod manifest;
pub mod messenger;
pub mod metrics;
pub mod request;
pub mod resolver;
#[cfg(test)]
pub mod test_utils;
pub mod transport;

use client::{backend_client, BackendClient, HttpClient};
use handlers::proxy_handler;
use load_balancer::Balancer;
use resolver::ModelResolver;

/// Every response advertises which proxy handled it.
pub const PROXY_HEADER: (&str, &str) = ("x-proxy", "lingo");

/// Optional hook applied to each outgoing backend request before it is sent,
/// passed at construction time (useful for tests and embedders).
pub type ProxyRewrite = Arc<dyn Fn(&mut axum::extract::Request) + Send + Sync>;

/// How the proxy reacts to backend failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Additional attempts after the first; `3` means up to four requests.
    pub max_retries: usize,
    /// Backend status codes treated as transient.
    pub retry_codes: HashSet<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_codes: [500, 502, 503, 504].into_iter().collect(),
        }
    }
}

/// Shared state for the HTTP entry point.
#[derive(Clone)]
pub struct AppState<C: HttpClient> {
    pub http_client: C,
    pub resolver: Arc<dyn ModelResolver>,
    pub balancer: Arc<dyn Balancer>,
    pub retry: RetryPolicy,
    /// How long a request may wait for a backend endpoint to appear.
    pub host_wait: Duration,
    /// Cancels host waits on server shutdown.
    pub shutdown: CancellationToken,
    pub rewrite: Option<ProxyRewrite>,
}

impl AppState<BackendClient> {
    pub fn new(resolver: Arc<dyn ModelResolver>, balancer: Arc<dyn Balancer>) -> Self {
        Self::with_client(backend_client(), resolver, balancer)
    }
}

impl<C: HttpClient> AppState<C> {
    /// State with a custom HTTP client (useful for testing).
    pub fn with_client(
        http_client: C,
        resolver: Arc<dyn ModelResolver>,
        balancer: Arc<dyn Balancer>,
    ) -> Self {
        Self {
            http_client,
            resolver,
            balancer,
            retry: RetryPolicy::default(),
            host_wait: Duration::from_secs(30),
            shutdown: CancellationToken::new(),
            rewrite: None,
        }
    }
}

impl<C: HttpClient> std::fmt::Debug for AppState<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("http_client", &self.http_client)
            .field("resolver", &self.resolver)
            .field("balancer", &self.balancer)
            .field("retry", &self.retry)
            .field("host_wait", &self.host_wait)
            .finish_non_exhaustive()
    }
}

async fn set_proxy_header(mut response: Response) -> Response {
    response
        .headers_mut()
        .insert(PROXY_HEADER.0, HeaderValue::from_static(PROXY_HEADER.1));
    response
}

/// Build the ingress router: every path, every method, one proxy pipeline.
#[instrument(skip(state))]
pub fn build_router<C: HttpClient + Clone + Send + Sync + 'static>(state: AppState<C>) -> Router {
    info!("building router");
    Router::new()
        .route("/", any(proxy_handler::<C>))
        .route("/{*path}", any(proxy_handler::<C>))
        .layer(axum::middleware::map_response(set_proxy_header))
        .with_state(state)
}
