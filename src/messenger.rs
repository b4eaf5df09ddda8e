//! The asynchronous pub/sub entry point.
//!
//! A single receive loop pulls requests off a subscription and dispatches
//! each to its own task, bounded by a semaphore of `max_handlers` permits.
//! Handlers mirror the HTTP pipeline — resolve, scale, wait for an address,
//! forward — and publish `{metadata, status_code, body}` responses to a
//! topic. Handlers run detached from the receive loop's lifetime: shutdown
//! stops receiving and then drains by acquiring the whole semaphore, so
//! in-flight messages settle their acks normally.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::body::Body;
use axum::http::header::{ACCEPT, CONTENT_TYPE};
use axum::http::{Method, StatusCode};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::value::RawValue;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::HttpClient;
use crate::load_balancer::{AddressRequest, Balancer};
use crate::metrics::{self, RequestKind};
use crate::request::split_model_adapter;
use crate::resolver::ModelResolver;
use crate::transport::{Message, Subscription, Topic, Transport};

const MAX_RESTART_ATTEMPTS: u32 = 20;
const MAX_RESTART_BACKOFF: Duration = Duration::from_secs(10);
const DEFAULT_PATH: &str = "/v1/completions";

pub struct Messenger<C: HttpClient> {
    shared: Arc<Shared<C>>,
    transport: Arc<dyn Transport>,
    requests_url: String,
    requests: Box<dyn Subscription>,
    max_handlers: usize,
    error_max_backoff: Duration,
}

struct Shared<C> {
    resolver: Arc<dyn ModelResolver>,
    balancer: Arc<dyn Balancer>,
    responses: Box<dyn Topic>,
    http_client: C,
    consecutive_errors: RwLock<u32>,
}

impl<C: HttpClient + Send + Sync + 'static> Messenger<C> {
    #[allow(clippy::too_many_arguments)]
    pub async fn new(
        transport: Arc<dyn Transport>,
        requests_url: &str,
        responses_url: &str,
        max_handlers: usize,
        error_max_backoff: Duration,
        resolver: Arc<dyn ModelResolver>,
        balancer: Arc<dyn Balancer>,
        http_client: C,
    ) -> anyhow::Result<Self> {
        let requests = transport.subscription(requests_url).await?;
        let responses = transport.topic(responses_url).await?;
        Ok(Self {
            shared: Arc::new(Shared {
                resolver,
                balancer,
                responses,
                http_client,
                consecutive_errors: RwLock::new(0),
            }),
            transport,
            requests_url: requests_url.to_string(),
            requests,
            max_handlers,
            error_max_backoff,
        })
    }

    /// Receive until `shutdown` fires or the subscription is beyond repair,
    /// then wait for every outstanding handler to finish.
    pub async fn run(mut self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.max_handlers));
        let mut restart_attempt: u32 = 0;

        info!(
            subscription = %self.requests_url,
            "messenger starting receive loop"
        );
        loop {
            let received = tokio::select! {
                received = self.requests.receive() => received,
                _ = shutdown.cancelled() => break,
            };
            let msg = match received {
                Ok(msg) => {
                    restart_attempt = 0;
                    msg
                }
                Err(err) => {
                    if restart_attempt >= MAX_RESTART_ATTEMPTS {
                        error!(
                            "error receiving message: {err:#}; restarted subscription {restart_attempt} times, giving up"
                        );
                        return Err(err);
                    }
                    // Recreate the subscription and keep going so existing
                    // handlers can continue settling their messages.
                    error!("error receiving message: {err:#}");
                    if let Err(shutdown_err) = self.requests.shutdown().await {
                        warn!(
                            "error shutting down requests subscription: {shutdown_err:#}; continuing to recreate it"
                        );
                    }
                    let wait = Duration::from_secs(restart_attempt.into()).min(MAX_RESTART_BACKOFF);
                    info!(
                        subscription = %self.requests_url,
                        "waiting {wait:?} before recreating requests subscription"
                    );
                    tokio::time::sleep(wait).await;
                    self.requests = self.transport.subscription(&self.requests_url).await?;
                    restart_attempt += 1;
                    continue;
                }
            };
            debug!(id = %msg.id, "received message");

            // Wait behind the semaphore before dispatching; on shutdown stop
            // waiting and move on to the drain.
            let permit = tokio::select! {
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = shutdown.cancelled() => break,
            };
            let shared = Arc::clone(&self.shared);
            tokio::spawn(async move {
                let _permit = permit;
                shared.handle(msg).await;
            });

            // Throttle after sustained failure so a poisoned topic or a dead
            // backend does not churn through messages at full speed.
            let consecutive = self.shared.consecutive_errors();
            if consecutive > 0 {
                let wait = Duration::from_secs(consecutive.into()).min(self.error_max_backoff);
                warn!("after {consecutive} consecutive errors, waiting {wait:?} before the next message");
                tokio::time::sleep(wait).await;
            }
        }

        // Drain: every permit free means every handler is done.
        let _ = semaphore.acquire_many(self.max_handlers as u32).await;
        Ok(())
    }
}

/// A parsed inbound message, body already rewritten for the backend.
struct MessageRequest {
    msg: Message,
    metadata: Value,
    path: String,
    body: Bytes,
    requested_model: String,
    model: String,
    adapter: String,
}

/// A message that failed parsing, with whatever metadata was recoverable so
/// the error response can still be correlated by the requester.
struct RejectedMessage {
    msg: Message,
    metadata: Value,
    error: MessageError,
}

#[derive(Debug, thiserror::Error)]
enum MessageError {
    #[error("message is not valid JSON: {0}")]
    Envelope(serde_json::Error),
    #[error("message missing 'body' field")]
    MissingBody,
    #[error("message body is not a JSON object: {0}")]
    Body(serde_json::Error),
    #[error("message body missing 'model' field")]
    MissingModel,
    #[error("message body 'model' field should be a string")]
    ModelNotString,
    #[error("re-encoding message body: {0}")]
    Rewrite(serde_json::Error),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    metadata: Value,
    #[serde(default)]
    path: String,
    body: Option<Box<RawValue>>,
}

impl MessageRequest {
    fn parse(msg: Message) -> Result<Self, RejectedMessage> {
        let envelope: Envelope = match serde_json::from_slice(&msg.body) {
            Ok(envelope) => envelope,
            Err(err) => {
                return Err(RejectedMessage {
                    msg,
                    metadata: Value::Null,
                    error: MessageError::Envelope(err),
                })
            }
        };
        let reject = |msg, metadata, error| Err(RejectedMessage { msg, metadata, error });

        let path = if envelope.path.is_empty() {
            DEFAULT_PATH.to_string()
        } else if !envelope.path.starts_with('/') {
            format!("/{}", envelope.path)
        } else {
            envelope.path
        };

        let Some(raw_body) = envelope.body else {
            return reject(msg, envelope.metadata, MessageError::MissingBody);
        };
        let mut body_object: serde_json::Map<String, Value> =
            match serde_json::from_str(raw_body.get()) {
                Ok(object) => object,
                Err(err) => return reject(msg, envelope.metadata, MessageError::Body(err)),
            };
        let requested_model = match body_object.get("model") {
            None => return reject(msg, envelope.metadata, MessageError::MissingModel),
            Some(Value::String(name)) => name.clone(),
            Some(_) => return reject(msg, envelope.metadata, MessageError::ModelNotString),
        };
        let (model, adapter) = split_model_adapter(&requested_model);

        // Backends address adapters through the model field.
        let body = if adapter.is_empty() {
            Bytes::copy_from_slice(raw_body.get().as_bytes())
        } else {
            body_object.insert("model".to_string(), Value::String(adapter.clone()));
            match serde_json::to_vec(&body_object) {
                Ok(rewritten) => Bytes::from(rewritten),
                Err(err) => return reject(msg, envelope.metadata, MessageError::Rewrite(err)),
            }
        };

        Ok(Self {
            msg,
            metadata: envelope.metadata,
            path,
            body,
            requested_model,
            model,
            adapter,
        })
    }
}

impl<C: HttpClient + Send + Sync> Shared<C> {
    async fn handle(self: Arc<Self>, msg: Message) {
        let req = match MessageRequest::parse(msg) {
            Ok(req) => req,
            Err(rejected) => {
                let body = self.json_error(format!("error parsing request: {}", rejected.error));
                self.send_response(rejected.msg, rejected.metadata, body, StatusCode::BAD_REQUEST)
                    .await;
                return;
            }
        };

        let _active = metrics::active_request(&req.model, RequestKind::Message);

        match self
            .resolver
            .lookup_model(&req.model, &req.adapter, &[])
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                // The requester still gets a response; the model may be
                // deployed later or another subscriber may handle it.
                let body = self.json_error(format!("model not found: {}", req.model));
                self.send_response(req.msg, req.metadata, body, StatusCode::NOT_FOUND)
                    .await;
                return;
            }
            Err(err) => {
                let body = self.json_error(format!("error checking if model exists: {err:#}"));
                self.send_response(
                    req.msg,
                    req.metadata,
                    body,
                    StatusCode::INTERNAL_SERVER_ERROR,
                )
                .await;
                return;
            }
        }

        // Best effort; availability is observed through the address wait.
        if let Err(err) = self.resolver.scale_at_least_one_replica(&req.model).await {
            debug!(model = %req.model, "scale request failed: {err:#}");
        }

        debug!(id = %req.msg.id, requested = %req.requested_model, "awaiting host for message");
        // Handlers run on a token detached from the receive loop so a
        // shutdown drains them instead of cancelling mid-flight.
        let cancel = CancellationToken::new();
        let address_request = AddressRequest {
            model: req.model.clone(),
            adapter: req.adapter.clone(),
            prefix: String::new(),
        };
        let (host, _completion) = match self
            .balancer
            .await_best_address(&cancel, &address_request)
            .await
        {
            Ok(handout) => handout,
            Err(err) => {
                let body = self.json_error(format!("error awaiting host for backend: {err}"));
                self.send_response(req.msg, req.metadata, body, StatusCode::BAD_GATEWAY)
                    .await;
                return;
            }
        };

        let url = format!("http://{}{}", host, req.path);
        debug!(id = %req.msg.id, url = %url, "sending request to backend");
        match self.forward(&url, req.body.clone()).await {
            Ok((payload, status)) => {
                self.send_response(req.msg, req.metadata, payload, status)
                    .await;
            }
            Err(err) => {
                let body = self.json_error(format!("error sending request to backend: {err:#}"));
                self.send_response(req.msg, req.metadata, body, StatusCode::BAD_GATEWAY)
                    .await;
            }
        }
    }

    async fn forward(&self, url: &str, body: Bytes) -> anyhow::Result<(Bytes, StatusCode)> {
        let request = axum::extract::Request::builder()
            .method(Method::POST)
            .uri(url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .body(Body::from(body))?;
        let response = self
            .http_client
            .request(request)
            .await
            .map_err(|err| anyhow::anyhow!("{err}"))?;
        let status = response.status();
        let payload = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        Ok((payload, status))
    }

    /// Publish the response and settle the message: ack on success, nack
    /// (where supported) when publishing fails so the broker redelivers.
    async fn send_response(&self, msg: Message, metadata: Value, body: Bytes, status: StatusCode) {
        debug!(id = %msg.id, status = status.as_u16(), "sending response for message");

        let body_json: Value = match serde_json::from_slice(&body) {
            Ok(value) => value,
            Err(_) => {
                self.add_consecutive_error();
                serde_json::json!({"error": {"message": "backend returned a non-JSON response"}})
            }
        };
        let response = serde_json::json!({
            "metadata": metadata,
            "status_code": status.as_u16(),
            "body": body_json,
        });
        let payload = match serde_json::to_vec(&response) {
            Ok(payload) => payload,
            Err(err) => {
                error!(id = %msg.id, "error encoding response: {err}");
                self.add_consecutive_error();
                if msg.can_nack() {
                    msg.nack();
                }
                return;
            }
        };

        let mut response_metadata = HashMap::new();
        response_metadata.insert("request_message_id".to_string(), msg.id.clone());
        if let Err(err) = self
            .responses
            .send(Bytes::from(payload), response_metadata)
            .await
        {
            error!(id = %msg.id, "error sending response: {err:#}");
            self.add_consecutive_error();
            // A response that cannot be sent should be redelivered.
            if msg.can_nack() {
                msg.nack();
            }
            return;
        }

        if status.as_u16() < 300 {
            self.reset_consecutive_errors();
        }
        msg.ack();
    }

    /// Build an OpenAI-style error body and count the failure toward the
    /// consecutive-error throttle.
    fn json_error(&self, message: String) -> Bytes {
        self.add_consecutive_error();
        warn!("{message}");
        Bytes::from(serde_json::json!({"error": {"message": message}}).to_string())
    }

    fn add_consecutive_error(&self) {
        *self.consecutive_errors.write().unwrap() += 1;
    }

    fn reset_consecutive_errors(&self) {
        *self.consecutive_errors.write().unwrap() = 0;
    }

    fn consecutive_errors(&self) -> u32 {
        *self.consecutive_errors.read().unwrap()
    }
}

impl<C: HttpClient> Messenger<C> {
    /// Number of immediately-adjacent handler failures, used to throttle the
    /// receive loop.
    pub fn consecutive_errors(&self) -> u32 {
        *self.shared.consecutive_errors.read().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockHttpClient, MockModelApi};
    use crate::transport::memory::MemoryTransport;
    use serde_json::json;
    use std::time::Duration;

    const REQUESTS: &str = "mem://requests";
    const RESPONSES: &str = "mem://responses";

    async fn start_messenger(
        client: MockHttpClient,
        api: MockModelApi,
    ) -> (
        Arc<MemoryTransport>,
        Box<dyn Topic>,
        Box<dyn Subscription>,
        CancellationToken,
        tokio::task::JoinHandle<anyhow::Result<()>>,
    ) {
        let transport = MemoryTransport::new();
        let requests_topic = transport.topic(REQUESTS).await.unwrap();
        let responses_sub = transport.subscription(RESPONSES).await.unwrap();

        let api = Arc::new(api);
        let messenger = Messenger::new(
            Arc::clone(&transport) as Arc<dyn Transport>,
            REQUESTS,
            RESPONSES,
            4,
            Duration::from_secs(1),
            Arc::clone(&api) as Arc<dyn ModelResolver>,
            api as Arc<dyn Balancer>,
            client,
        )
        .await
        .unwrap();

        let shutdown = CancellationToken::new();
        let worker = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { messenger.run(shutdown).await })
        };
        (transport, requests_topic, responses_sub, shutdown, worker)
    }

    async fn publish(topic: &dyn Topic, payload: Value) {
        topic
            .send(Bytes::from(payload.to_string()), HashMap::new())
            .await
            .unwrap();
    }

    async fn next_response(sub: &mut Box<dyn Subscription>) -> (Value, HashMap<String, String>) {
        let msg = tokio::time::timeout(Duration::from_secs(5), sub.receive())
            .await
            .unwrap()
            .unwrap();
        let value: Value = serde_json::from_slice(&msg.body).unwrap();
        let metadata = msg.metadata.clone();
        msg.ack();
        (value, metadata)
    }

    #[tokio::test]
    async fn forwards_and_publishes_backend_response() {
        let client = MockHttpClient::new(StatusCode::OK, r#"{"result":"ok"}"#);
        let (_transport, requests, mut responses, shutdown, worker) =
            start_messenger(client.clone(), MockModelApi::single("m1")).await;

        publish(
            &*requests,
            json!({
                "metadata": {"job": 7},
                "path": "/v1/completions",
                "body": {"model": "m1", "prompt": "hi"}
            }),
        )
        .await;

        let (response, metadata) = next_response(&mut responses).await;
        assert_eq!(response["status_code"], 200);
        assert_eq!(response["body"]["result"], "ok");
        assert_eq!(response["metadata"]["job"], 7);
        assert!(metadata.contains_key("request_message_id"));

        let backend = client.get_requests();
        assert_eq!(backend.len(), 1);
        assert_eq!(backend[0].method, "POST");
        assert_eq!(backend[0].uri, "http://10.0.0.1:8000/v1/completions");
        let body: Value = serde_json::from_slice(&backend[0].body).unwrap();
        assert_eq!(body["model"], "m1");

        shutdown.cancel();
        worker.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn rewrites_adapter_into_the_body() {
        let client = MockHttpClient::new(StatusCode::OK, r#"{"result":"ok"}"#);
        let mut api = MockModelApi::single("m3");
        api.add_adapter("m3", "a3");
        let (_transport, requests, mut responses, shutdown, worker) =
            start_messenger(client.clone(), api).await;

        publish(
            &*requests,
            json!({"metadata": {}, "body": {"model": "m3_a3", "prompt": "hi"}}),
        )
        .await;

        let (response, _) = next_response(&mut responses).await;
        assert_eq!(response["status_code"], 200);

        let backend = client.get_requests();
        assert_eq!(backend.len(), 1);
        // No explicit path: the completions endpoint is the default.
        assert_eq!(backend[0].uri, "http://10.0.0.1:8000/v1/completions");
        let body: Value = serde_json::from_slice(&backend[0].body).unwrap();
        assert_eq!(body["model"], "a3");
        assert_eq!(body["prompt"], "hi");

        shutdown.cancel();
        worker.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn unknown_model_gets_404_response() {
        let client = MockHttpClient::new(StatusCode::OK, "{}");
        let (_transport, requests, mut responses, shutdown, worker) =
            start_messenger(client.clone(), MockModelApi::single("m1")).await;

        publish(
            &*requests,
            json!({"metadata": {"id": 1}, "body": {"model": "missing"}}),
        )
        .await;

        let (response, _) = next_response(&mut responses).await;
        assert_eq!(response["status_code"], 404);
        assert_eq!(
            response["body"]["error"]["message"],
            "model not found: missing"
        );
        assert_eq!(response["metadata"]["id"], 1);
        assert!(client.get_requests().is_empty());

        shutdown.cancel();
        worker.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn malformed_message_gets_400_response() {
        let client = MockHttpClient::new(StatusCode::OK, "{}");
        let (_transport, requests, mut responses, shutdown, worker) =
            start_messenger(client.clone(), MockModelApi::single("m1")).await;

        requests
            .send(Bytes::from_static(b"this is not json"), HashMap::new())
            .await
            .unwrap();

        let (response, _) = next_response(&mut responses).await;
        assert_eq!(response["status_code"], 400);
        assert!(response["body"]["error"]["message"]
            .as_str()
            .unwrap()
            .starts_with("error parsing request:"));

        shutdown.cancel();
        worker.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn missing_model_in_body_gets_400_response() {
        let client = MockHttpClient::new(StatusCode::OK, "{}");
        let (_transport, requests, mut responses, shutdown, worker) =
            start_messenger(client.clone(), MockModelApi::single("m1")).await;

        publish(&*requests, json!({"metadata": {"id": 2}, "body": {}})).await;

        let (response, _) = next_response(&mut responses).await;
        assert_eq!(response["status_code"], 400);
        assert_eq!(response["metadata"]["id"], 2);

        shutdown.cancel();
        worker.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn backend_failure_publishes_502_and_counts_errors() {
        let client = MockHttpClient::disconnecting();
        let (_transport, requests, mut responses, shutdown, worker) =
            start_messenger(client.clone(), MockModelApi::single("m1")).await;

        publish(&*requests, json!({"metadata": {}, "body": {"model": "m1"}})).await;

        let (response, _) = next_response(&mut responses).await;
        assert_eq!(response["status_code"], 502);
        assert!(response["body"]["error"]["message"]
            .as_str()
            .unwrap()
            .starts_with("error sending request to backend:"));

        shutdown.cancel();
        worker.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn success_resets_consecutive_errors() {
        let client = MockHttpClient::new(StatusCode::OK, r#"{"result":"ok"}"#);
        let (_transport, requests, mut responses, shutdown, worker) =
            start_messenger(client.clone(), MockModelApi::single("m1")).await;

        // A failure first, then a success.
        publish(
            &*requests,
            json!({"metadata": {}, "body": {"model": "missing"}}),
        )
        .await;
        let (first, _) = next_response(&mut responses).await;
        assert_eq!(first["status_code"], 404);

        publish(&*requests, json!({"metadata": {}, "body": {"model": "m1"}})).await;
        let (second, _) = next_response(&mut responses).await;
        assert_eq!(second["status_code"], 200);

        shutdown.cancel();
        worker.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn broken_subscription_is_recreated_and_messages_flow() {
        use std::sync::atomic::{AtomicBool, Ordering};

        #[derive(Debug)]
        struct BrokenSubscription;

        #[async_trait::async_trait]
        impl Subscription for BrokenSubscription {
            async fn receive(&mut self) -> anyhow::Result<Message> {
                anyhow::bail!("connection lost")
            }

            async fn shutdown(&mut self) -> anyhow::Result<()> {
                Ok(())
            }
        }

        /// Hands out one dead subscription, then delegates to the in-memory
        /// broker.
        struct FlakyTransport {
            inner: Arc<MemoryTransport>,
            failed_once: AtomicBool,
        }

        #[async_trait::async_trait]
        impl Transport for FlakyTransport {
            async fn subscription(&self, url: &str) -> anyhow::Result<Box<dyn Subscription>> {
                if !self.failed_once.swap(true, Ordering::SeqCst) {
                    Ok(Box::new(BrokenSubscription))
                } else {
                    self.inner.subscription(url).await
                }
            }

            async fn topic(&self, url: &str) -> anyhow::Result<Box<dyn Topic>> {
                self.inner.topic(url).await
            }
        }

        let inner = MemoryTransport::new();
        let requests_topic = inner.topic(REQUESTS).await.unwrap();
        let mut responses_sub = inner.subscription(RESPONSES).await.unwrap();

        let api = Arc::new(MockModelApi::single("m1"));
        let client = MockHttpClient::new(StatusCode::OK, r#"{"result":"ok"}"#);
        let transport = Arc::new(FlakyTransport {
            inner,
            failed_once: AtomicBool::new(false),
        });
        let messenger = Messenger::new(
            transport as Arc<dyn Transport>,
            REQUESTS,
            RESPONSES,
            4,
            Duration::from_secs(1),
            Arc::clone(&api) as Arc<dyn ModelResolver>,
            api as Arc<dyn Balancer>,
            client,
        )
        .await
        .unwrap();

        let shutdown = CancellationToken::new();
        let worker = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { messenger.run(shutdown).await })
        };

        // The first receive fails; the messenger recreates the subscription
        // (zero backoff on the first restart) and the message goes through.
        publish(&*requests_topic, json!({"metadata": {}, "body": {"model": "m1"}})).await;
        let (response, _) = next_response(&mut responses_sub).await;
        assert_eq!(response["status_code"], 200);

        shutdown.cancel();
        worker.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn shutdown_drains_and_returns() {
        let client = MockHttpClient::new(StatusCode::OK, "{}");
        let (_transport, _requests, _responses, shutdown, worker) =
            start_messenger(client, MockModelApi::single("m1")).await;

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[test]
    fn path_defaults_and_normalization() {
        // Parsed via the envelope rules: empty → default, bare → leading /.
        for (given, expected) in [
            ("", DEFAULT_PATH),
            ("v1/chat/completions", "/v1/chat/completions"),
            ("/v1/embeddings", "/v1/embeddings"),
        ] {
            let payload = json!({"metadata": {}, "path": given, "body": {"model": "m"}});
            let msg = crate::test_utils::loose_message(payload.to_string());
            let parsed = MessageRequest::parse(msg).ok().unwrap();
            assert_eq!(parsed.path, expected);
        }
    }
}
