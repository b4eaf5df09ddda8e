//! Address selection facade over the endpoint registry.
//!
//! [`LoadBalancer`] is deliberately thin: it exists so the HTTP handler and
//! the messenger depend on the [`Balancer`] trait rather than on registry
//! internals, which also gives tests a clean injection point.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::endpoints::{Completion, GroupRegistry};

/// What the caller needs routed: the model picks the group, the adapter (and
/// the reserved prefix) influence selection within it.
#[derive(Debug, Clone, Default)]
pub struct AddressRequest {
    pub model: String,
    pub adapter: String,
    /// Reserved for prefix-affinity routing.
    pub prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("cancelled while waiting for an endpoint")]
    Cancelled,
    #[error("endpoint registry closed")]
    Closed,
}

#[async_trait]
pub trait Balancer: Send + Sync + std::fmt::Debug {
    /// Resolve `req` to a backend address, suspending until the model has at
    /// least one endpoint. The returned [`Completion`] releases the inflight
    /// slot when dropped.
    async fn await_best_address(
        &self,
        cancel: &CancellationToken,
        req: &AddressRequest,
    ) -> Result<(String, Completion), AddressError>;
}

#[derive(Debug, Clone)]
pub struct LoadBalancer {
    registry: Arc<GroupRegistry>,
}

impl LoadBalancer {
    pub fn new(registry: Arc<GroupRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Balancer for LoadBalancer {
    async fn await_best_address(
        &self,
        cancel: &CancellationToken,
        req: &AddressRequest,
    ) -> Result<(String, Completion), AddressError> {
        self.registry.group(&req.model).best_addr(cancel, req, false).await
    }
}
