//! File-backed model manifest.
//!
//! The binary has no cluster discovery or autoscaler behind it; instead a
//! JSON manifest declares the known models, their adapters, and any static
//! endpoints. The manifest doubles as the [`ModelResolver`] implementation
//! and as the feed for the endpoint registry, and can be hot-reloaded when
//! the file changes.
//!
//! ```json
//! {
//!   "models": {
//!     "llama-3": {
//!       "adapters": ["finance"],
//!       "endpoints": {
//!         "replica-0": { "address": "10.0.0.5:8000", "adapters": ["finance"] }
//!       }
//!     }
//!   }
//! }
//! ```

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use anyhow::anyhow;
use async_trait::async_trait;
use notify::{Config as NotifyConfig, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::endpoints::{Endpoint, GroupRegistry};
use crate::resolver::ModelResolver;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub models: HashMap<String, ModelSpec>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelSpec {
    #[serde(default)]
    pub adapters: HashSet<String>,
    #[serde(default)]
    pub endpoints: HashMap<String, Endpoint>,
}

impl Manifest {
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("failed to read manifest {}: {}", path.display(), e))?;
        serde_json::from_str(&contents)
            .map_err(|e| anyhow!("failed to parse manifest {}: {}", path.display(), e))
    }

    /// Per-model endpoint snapshot in the shape the registry reconciles.
    pub fn endpoint_snapshot(&self) -> HashMap<String, HashMap<String, Endpoint>> {
        self.models
            .iter()
            .map(|(model, spec)| (model.clone(), spec.endpoints.clone()))
            .collect()
    }
}

/// [`ModelResolver`] over a (reloadable) manifest.
#[derive(Debug)]
pub struct ManifestModels {
    inner: RwLock<Manifest>,
}

impl ManifestModels {
    pub fn new(manifest: Manifest) -> Self {
        Self {
            inner: RwLock::new(manifest),
        }
    }

    pub fn replace(&self, manifest: Manifest) {
        *self.inner.write().unwrap() = manifest;
    }
}

#[async_trait]
impl ModelResolver for ManifestModels {
    async fn lookup_model(
        &self,
        model: &str,
        adapter: &str,
        _selectors: &[String],
    ) -> anyhow::Result<bool> {
        let manifest = self.inner.read().unwrap();
        Ok(match manifest.models.get(model) {
            Some(spec) => adapter.is_empty() || spec.adapters.contains(adapter),
            None => false,
        })
    }

    async fn scale_at_least_one_replica(&self, model: &str) -> anyhow::Result<()> {
        // Static endpoints have no autoscaler behind them; availability is
        // observed through the endpoint registry.
        debug!(model, "scale-up requested");
        Ok(())
    }
}

/// Watch the manifest file and re-apply it to `models` and `registry` on
/// every change.
pub fn watch_manifest(
    path: PathBuf,
    models: Arc<ManifestModels>,
    registry: Arc<GroupRegistry>,
) -> anyhow::Result<()> {
    let (file_tx, mut file_rx) = mpsc::channel(100);

    let mut watcher = RecommendedWatcher::new(
        move |res| {
            let _ = file_tx.blocking_send(res);
        },
        NotifyConfig::default(),
    )?;
    watcher.watch(&path, RecursiveMode::NonRecursive)?;

    tokio::spawn(async move {
        while let Some(res) = file_rx.recv().await {
            match res {
                Ok(event) if event.kind.is_modify() => {
                    info!("manifest changed, reloading");
                    match Manifest::load(&path).await {
                        Ok(manifest) => {
                            registry.reconcile(manifest.endpoint_snapshot());
                            models.replace(manifest);
                        }
                        Err(err) => error!("failed to reload manifest: {err:#}"),
                    }
                }
                Ok(_) => {}
                Err(err) => error!("manifest watch error: {err}"),
            }
        }
    });

    // Keep the watcher alive for the life of the process.
    std::mem::forget(watcher);

    Ok(())
}
