//! Inference-request gauges.
//!
//! The routing core reports one gauge, `inference_requests_active`, labelled
//! by model and ingress type. Increments and decrements are paired through
//! an RAII guard so the gauge balances on every exit path.

use std::sync::OnceLock;

use axum::http::header::CONTENT_TYPE;
use axum::routing::get;
use axum::Router;
use prometheus::{register_gauge_vec, Encoder, GaugeVec, TextEncoder};
use tracing::error;

pub struct Metrics {
    /// Requests currently inside the routing pipeline, by model and ingress
    /// type (`http` or `message`).
    pub inference_requests_active: GaugeVec,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

pub fn init_metrics() -> &'static Metrics {
    METRICS.get_or_init(|| {
        let inference_requests_active = register_gauge_vec!(
            "inference_requests_active",
            "Number of inference requests currently being routed",
            &["model", "type"]
        )
        .expect("failed to register inference_requests_active metric");
        Metrics {
            inference_requests_active,
        }
    })
}

/// How a request entered the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Http,
    Message,
}

impl RequestKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestKind::Http => "http",
            RequestKind::Message => "message",
        }
    }
}

/// Guard marking one request as active; the gauge is decremented on drop.
#[derive(Debug)]
pub struct ActiveRequest {
    model: String,
    kind: RequestKind,
}

pub fn active_request(model: &str, kind: RequestKind) -> ActiveRequest {
    init_metrics()
        .inference_requests_active
        .with_label_values(&[model, kind.as_str()])
        .inc();
    ActiveRequest {
        model: model.to_string(),
        kind,
    }
}

impl Drop for ActiveRequest {
    fn drop(&mut self) {
        init_metrics()
            .inference_requests_active
            .with_label_values(&[&self.model, self.kind.as_str()])
            .dec();
    }
}

/// Current gauge value for one (model, kind) pair.
pub fn active_requests(model: &str, kind: RequestKind) -> f64 {
    init_metrics()
        .inference_requests_active
        .with_label_values(&[model, kind.as_str()])
        .get()
}

/// Router serving the process-wide registry in Prometheus text format.
pub fn metrics_router() -> Router {
    Router::new().route(
        "/metrics",
        get(|| async {
            let families = prometheus::gather();
            let mut buffer = Vec::new();
            if let Err(err) = TextEncoder::new().encode(&families, &mut buffer) {
                error!("failed to encode metrics: {err}");
            }
            ([(CONTENT_TYPE, "text/plain; version=0.0.4")], buffer)
        }),
    )
}
