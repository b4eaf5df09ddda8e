//! Per-model endpoint groups and the registry that holds them.
//!
//! An [`EndpointGroup`] tracks the set of reachable backend replicas for one
//! logical model. Readers may arrive before any replica exists: `best_addr`
//! suspends until a reconciliation installs a non-empty snapshot, and every
//! reconciliation wakes every waiter so it can re-check. Endpoint snapshots
//! come from an external discovery source via [`GroupRegistry::reconcile`].

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::load_balancer::{AddressError, AddressRequest};

/// One reachable backend replica.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Network address in `host:port` form.
    pub address: String,
    /// Adapters this replica has loaded, if any.
    #[serde(default)]
    pub adapters: HashSet<String>,
}

impl Endpoint {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            adapters: HashSet::new(),
        }
    }
}

#[derive(Debug)]
struct TrackedEndpoint {
    endpoint: Endpoint,
    inflight: Arc<AtomicI64>,
}

/// Releases one inflight slot when dropped.
///
/// Every successful address handout carries one of these; dropping it is the
/// completion signal, so the decrement happens exactly once on every exit
/// path, including early returns and cancelled futures.
#[derive(Debug, Default)]
pub struct Completion {
    counters: Option<[Arc<AtomicI64>; 2]>,
}

impl Completion {
    fn armed(endpoint: Arc<AtomicI64>, group: Arc<AtomicI64>) -> Self {
        Self {
            counters: Some([endpoint, group]),
        }
    }

    /// A guard that releases nothing. Used for `await_only` handouts and by
    /// test doubles that do no accounting.
    pub fn disarmed() -> Self {
        Self { counters: None }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if let Some(counters) = self.counters.take() {
            for counter in &counters {
                counter.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }
}

/// The set of endpoints serving one logical model.
#[derive(Debug)]
pub struct EndpointGroup {
    endpoints: RwLock<HashMap<String, TrackedEndpoint>>,
    changed: watch::Sender<()>,
    inflight: Arc<AtomicI64>,
}

impl Default for EndpointGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl EndpointGroup {
    pub fn new() -> Self {
        let (changed, _) = watch::channel(());
        Self {
            endpoints: RwLock::new(HashMap::new()),
            changed,
            inflight: Arc::new(AtomicI64::new(0)),
        }
    }

    /// Replace the endpoint set with `snapshot` and wake every waiter.
    ///
    /// Inflight counters of replicas that survive the reconciliation are
    /// preserved. The replacement is observed atomically: readers see either
    /// the old set or the new one.
    pub fn reconcile(&self, snapshot: HashMap<String, Endpoint>) {
        {
            let mut endpoints = self.endpoints.write().unwrap();
            let previous = std::mem::take(&mut *endpoints);
            for (name, endpoint) in snapshot {
                let inflight = previous
                    .get(&name)
                    .map(|tracked| Arc::clone(&tracked.inflight))
                    .unwrap_or_default();
                endpoints.insert(name, TrackedEndpoint { endpoint, inflight });
            }
        }
        self.changed.send_replace(());
    }

    /// Hand out the address of one endpoint, waiting for a replica to appear
    /// if the group is currently empty.
    ///
    /// Selection is least-inflight with a lexicographic tie-break on the
    /// replica name; when the request names an adapter and at least one
    /// replica advertises it, only those replicas are considered.
    ///
    /// With `await_only` the inflight counters are left untouched and the
    /// returned guard releases nothing.
    pub async fn best_addr(
        &self,
        cancel: &CancellationToken,
        req: &AddressRequest,
        await_only: bool,
    ) -> Result<(String, Completion), AddressError> {
        // Subscribing before the first emptiness check means a reconcile
        // landing between the check and the await still marks the channel
        // changed, so no wake-up can be lost.
        let mut changed = self.changed.subscribe();
        loop {
            if let Some((address, inflight)) = self.select(req) {
                if await_only {
                    return Ok((address, Completion::disarmed()));
                }
                inflight.fetch_add(1, Ordering::SeqCst);
                self.inflight.fetch_add(1, Ordering::SeqCst);
                return Ok((
                    address,
                    Completion::armed(inflight, Arc::clone(&self.inflight)),
                ));
            }
            tokio::select! {
                res = changed.changed() => {
                    if res.is_err() {
                        return Err(AddressError::Closed);
                    }
                }
                _ = cancel.cancelled() => return Err(AddressError::Cancelled),
            }
        }
    }

    fn select(&self, req: &AddressRequest) -> Option<(String, Arc<AtomicI64>)> {
        let endpoints = self.endpoints.read().unwrap();
        let has_adapter =
            |tracked: &TrackedEndpoint| tracked.endpoint.adapters.contains(&req.adapter);
        let restrict = !req.adapter.is_empty() && endpoints.values().any(has_adapter);
        endpoints
            .iter()
            .filter(|(_, tracked)| !restrict || has_adapter(tracked))
            .min_by(|(a_name, a), (b_name, b)| {
                a.inflight
                    .load(Ordering::SeqCst)
                    .cmp(&b.inflight.load(Ordering::SeqCst))
                    .then_with(|| a_name.cmp(b_name))
            })
            .map(|(_, tracked)| (tracked.endpoint.address.clone(), Arc::clone(&tracked.inflight)))
    }

    /// Snapshot of all addresses currently registered.
    pub fn all_addrs(&self) -> Vec<String> {
        self.endpoints
            .read()
            .unwrap()
            .values()
            .map(|tracked| tracked.endpoint.address.clone())
            .collect()
    }

    pub fn addr_count(&self) -> usize {
        self.endpoints.read().unwrap().len()
    }

    /// Outstanding handouts across the whole group.
    pub fn total_inflight(&self) -> i64 {
        self.inflight.load(Ordering::SeqCst)
    }
}

/// Model name → endpoint group, with groups created lazily so callers can
/// block on a group before its endpoints are ever known.
#[derive(Debug, Default)]
pub struct GroupRegistry {
    groups: DashMap<String, Arc<EndpointGroup>>,
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The group for `model`, created empty if absent.
    pub fn group(&self, model: &str) -> Arc<EndpointGroup> {
        self.groups
            .entry(model.to_string())
            .or_insert_with(|| Arc::new(EndpointGroup::new()))
            .clone()
    }

    /// Install per-model endpoint snapshots. Groups absent from `snapshot`
    /// are cleared but the group object persists, so waiters blocked on it
    /// still observe the broadcast.
    pub fn reconcile(&self, snapshot: HashMap<String, HashMap<String, Endpoint>>) {
        for entry in self.groups.iter() {
            if !snapshot.contains_key(entry.key()) {
                entry.value().reconcile(HashMap::new());
            }
        }
        for (model, endpoints) in snapshot {
            self.group(&model).reconcile(endpoints);
        }
    }
}
