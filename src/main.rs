use std::sync::Arc;
use std::time::Duration;

use clap::Parser as _;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use switchboard::client::backend_client;
use switchboard::config::Config;
use switchboard::endpoints::GroupRegistry;
use switchboard::load_balancer::{Balancer, LoadBalancer};
use switchboard::manifest::{self, Manifest, ManifestModels};
use switchboard::messenger::Messenger;
use switchboard::metrics;
use switchboard::resolver::ModelResolver;
use switchboard::transport::{memory::MemoryTransport, Transport};
use switchboard::{build_router, AppState, RetryPolicy};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse().validate()?;
    info!("starting switchboard with config: {config:?}");

    let manifest = Manifest::load(&config.manifest).await?;
    info!("loaded {} models from manifest", manifest.models.len());

    let registry = Arc::new(GroupRegistry::new());
    registry.reconcile(manifest.endpoint_snapshot());
    let models = Arc::new(ManifestModels::new(manifest));
    if config.watch {
        manifest::watch_manifest(
            config.manifest.clone(),
            Arc::clone(&models),
            Arc::clone(&registry),
        )?;
    }

    let resolver: Arc<dyn ModelResolver> = models;
    let balancer: Arc<dyn Balancer> = Arc::new(LoadBalancer::new(registry));
    let shutdown = CancellationToken::new();

    let mut state = AppState::new(Arc::clone(&resolver), Arc::clone(&balancer));
    state.retry = RetryPolicy {
        max_retries: config.max_retries,
        retry_codes: config.retry_codes.iter().copied().collect(),
    };
    state.host_wait = Duration::from_secs(config.host_wait_secs);
    state.shutdown = shutdown.clone();

    if let (Some(requests_url), Some(responses_url)) =
        (&config.requests_url, &config.responses_url)
    {
        // The built-in broker is process-local; cloud brokers plug in
        // through the Transport trait when embedding the library.
        let transport: Arc<dyn Transport> = MemoryTransport::new();
        let messenger = Messenger::new(
            transport,
            requests_url,
            responses_url,
            config.max_handlers,
            Duration::from_secs(config.error_max_backoff_secs),
            resolver,
            balancer,
            backend_client(),
        )
        .await?;
        let worker_shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(err) = messenger.run(worker_shutdown).await {
                error!("messenger stopped: {err:#}");
            }
        });
    }

    let router = build_router(state).merge(metrics::metrics_router());
    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&bind_addr).await?;
    info!("switchboard listening on {bind_addr}");

    axum::serve(listener, router).await?;

    Ok(())
}
