//! The model-resolution interface the routing core consumes.
//!
//! The component that knows which models exist (and how to bring replicas
//! up) lives outside this crate; the entry points only need these two calls.

use async_trait::async_trait;

#[async_trait]
pub trait ModelResolver: Send + Sync + std::fmt::Debug {
    /// True iff `model` is registered and, when `adapter` is non-empty, the
    /// model has that adapter. `selectors` optionally narrow the lookup to
    /// deployments matching the given label selectors.
    async fn lookup_model(
        &self,
        model: &str,
        adapter: &str,
        selectors: &[String],
    ) -> anyhow::Result<bool>;

    /// Signal that `model` should have at least one replica. Returning `Ok`
    /// does not mean a replica exists yet; availability is observed through
    /// the endpoint registry.
    async fn scale_at_least_one_replica(&self, model: &str) -> anyhow::Result<()>;
}
