//! Test doubles shared by the library's unit tests. The integration tests
//! carry their own copies, since this module only exists under `cfg(test)`.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::http::StatusCode;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::client::HttpClient;
use crate::endpoints::Completion;
use crate::load_balancer::{AddressError, AddressRequest, Balancer};
use crate::resolver::ModelResolver;
use crate::transport::{Acker, Message};

#[derive(Debug)]
enum Behavior {
    /// Reply with the same status and body on every attempt.
    Reply { status: StatusCode, body: String },
    /// Fail every attempt as if the connection dropped before a response.
    Disconnect,
}

/// Records every request it is asked to send and replies from a script.
pub struct MockHttpClient {
    requests: Arc<Mutex<Vec<MockRequest>>>,
    behavior: Arc<Behavior>,
}

#[derive(Debug, Clone)]
pub struct MockRequest {
    pub method: String,
    pub uri: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl MockHttpClient {
    pub fn new(status: StatusCode, body: &str) -> Self {
        Self {
            requests: Arc::new(Mutex::new(Vec::new())),
            behavior: Arc::new(Behavior::Reply {
                status,
                body: body.to_string(),
            }),
        }
    }

    /// A client whose every attempt fails without a response.
    pub fn disconnecting() -> Self {
        Self {
            requests: Arc::new(Mutex::new(Vec::new())),
            behavior: Arc::new(Behavior::Disconnect),
        }
    }

    pub fn get_requests(&self) -> Vec<MockRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl std::fmt::Debug for MockHttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockHttpClient")
            .field("requests", &self.requests)
            .field("behavior", &self.behavior)
            .finish()
    }
}

impl Clone for MockHttpClient {
    fn clone(&self) -> Self {
        Self {
            requests: Arc::clone(&self.requests),
            behavior: Arc::clone(&self.behavior),
        }
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn request(
        &self,
        req: axum::extract::Request,
    ) -> Result<axum::response::Response, Box<dyn std::error::Error + Send + Sync>> {
        let method = req.method().to_string();
        let uri = req.uri().to_string();
        let headers = req
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
            .collect();
        let body = axum::body::to_bytes(req.into_body(), usize::MAX)
            .await
            .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)?
            .to_vec();

        self.requests.lock().unwrap().push(MockRequest {
            method,
            uri,
            headers,
            body,
        });

        match &*self.behavior {
            Behavior::Reply { status, body } => Ok(axum::response::Response::builder()
                .status(*status)
                .body(axum::body::Body::from(body.clone()))
                .unwrap()),
            Behavior::Disconnect => Err("connection reset by peer".into()),
        }
    }
}

/// Fakes both the model-resolution side and the address handout, the way a
/// backend environment would provide them.
#[derive(Debug, Clone, Default)]
pub struct MockModelApi {
    models: HashMap<String, HashSet<String>>,
    pub address: String,
    host_requests: Arc<AtomicUsize>,
}

impl MockModelApi {
    pub fn new(address: &str) -> Self {
        Self {
            models: HashMap::new(),
            address: address.to_string(),
            host_requests: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// An API knowing one adapterless model, served at `10.0.0.1:8000`.
    pub fn single(model: &str) -> Self {
        let mut api = Self::new("10.0.0.1:8000");
        api.add_model(model);
        api
    }

    pub fn add_model(&mut self, model: &str) -> &mut Self {
        self.models.entry(model.to_string()).or_default();
        self
    }

    pub fn add_adapter(&mut self, model: &str, adapter: &str) -> &mut Self {
        self.models
            .entry(model.to_string())
            .or_default()
            .insert(adapter.to_string());
        self
    }

    /// How many address handouts were requested.
    pub fn host_requests(&self) -> usize {
        self.host_requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelResolver for MockModelApi {
    async fn lookup_model(
        &self,
        model: &str,
        adapter: &str,
        _selectors: &[String],
    ) -> anyhow::Result<bool> {
        Ok(match self.models.get(model) {
            Some(adapters) => adapter.is_empty() || adapters.contains(adapter),
            None => false,
        })
    }

    async fn scale_at_least_one_replica(&self, _model: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Balancer for MockModelApi {
    async fn await_best_address(
        &self,
        _cancel: &CancellationToken,
        _req: &AddressRequest,
    ) -> Result<(String, Completion), AddressError> {
        self.host_requests.fetch_add(1, Ordering::SeqCst);
        Ok((self.address.clone(), Completion::disarmed()))
    }
}

#[derive(Debug)]
struct NoopAcker;

impl Acker for NoopAcker {
    fn can_nack(&self) -> bool {
        false
    }

    fn ack(self: Box<Self>) {}

    fn nack(self: Box<Self>) {}
}

/// A free-standing message with a no-op settlement handle, for parser tests.
pub fn loose_message(body: impl Into<String>) -> Message {
    Message::new(
        "test-message".to_string(),
        Bytes::from(body.into()),
        HashMap::new(),
        Box::new(NoopAcker),
    )
}
