/// HTTP client used to forward requests to inference backends.
///
/// Backend replicas are cluster-internal `host:port` addresses reached over
/// plain HTTP, so the client is built on an HTTP-only connector with the
/// pool tuned to keep replica connections warm across retries. Both the
/// HTTP handler and the messenger go through the [`HttpClient`] trait so
/// tests can substitute a scripted client.
use std::time::Duration;

use async_trait::async_trait;
use axum::response::IntoResponse;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::{client::legacy::Client, rt::TokioExecutor};

/// Retries are sent to the address selected for the first attempt, so idle
/// pooled connections are kept long enough for replays to reuse the socket.
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

pub type BackendClient = Client<HttpConnector, axum::body::Body>;

#[async_trait]
pub trait HttpClient: std::fmt::Debug {
    /// Send one forwarding attempt. A transport-level failure (no response
    /// at all) surfaces as `Err`, which the callers classify separately
    /// from retryable status codes.
    async fn request(
        &self,
        req: axum::extract::Request,
    ) -> Result<axum::response::Response, Box<dyn std::error::Error + Send + Sync>>;
}

#[async_trait]
impl HttpClient for BackendClient {
    async fn request(
        &self,
        req: axum::extract::Request,
    ) -> Result<axum::response::Response, Box<dyn std::error::Error + Send + Sync>> {
        self.request(req)
            .await
            .map(|res| res.into_response())
            .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)
    }
}

pub fn backend_client() -> BackendClient {
    let mut connector = HttpConnector::new();
    connector.set_nodelay(true);
    Client::builder(TokioExecutor::new())
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .build(connector)
}
