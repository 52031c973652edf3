//! uptrail - distributed uptime monitoring.

use uptrail::agents::{Agent, AgentRegistry};
use uptrail::archive::{ArchivePolicy, ArchiveService};
use uptrail::clock::{Clock, SystemClock};
use uptrail::config::ServerConfig;
use uptrail::db::{Persistence, Store};
use uptrail::maintenance::{MaintenanceResolver, NoticeLog};
use uptrail::observer::TracingObserver;
use uptrail::probe::{HttpProber, StaticThresholds};
use uptrail::queue::{QueueLimits, RemoteJobQueue};
use uptrail::scheduler::{Orchestrator, OrchestratorParts, OrchestratorSettings, TokioTimers};
use uptrail::web::Server;

use std::sync::{Arc, RwLock};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("uptrail=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting uptrail on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    let persistence: Arc<dyn Persistence> = store.clone();
    tracing::info!("Database initialized successfully");

    let registry = load_registry(&cfg, persistence.as_ref())?;
    tracing::info!("Loaded {} agents", registry.len());
    let registry = registry.into_shared();

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let observer = Arc::new(TracingObserver);
    let tz = cfg.site_offset();

    let queue = RemoteJobQueue::new(
        persistence.clone(),
        registry.clone(),
        clock.clone(),
        QueueLimits {
            max_size: cfg.queue_max_size,
            ttl_secs: cfg.queue_ttl_secs,
        },
    )
    .with_observer(observer.clone());

    let orchestrator = Orchestrator::new(OrchestratorParts {
        queue: Arc::new(queue),
        registry,
        maintenance: Arc::new(RwLock::new(MaintenanceResolver::load(persistence.as_ref(), tz))),
        notices: Arc::new(NoticeLog::load(persistence.clone(), observer)),
        archive: Arc::new(ArchiveService::load(
            persistence,
            ArchivePolicy {
                tz,
                retention_days: cfg.retention_days,
            },
        )),
        prober: Arc::new(HttpProber::default()),
        thresholds: Arc::new(StaticThresholds {
            latency_seconds: cfg.latency_threshold_secs,
        }),
        timers: Arc::new(TokioTimers::new(clock.clone())),
        clock,
        settings: OrchestratorSettings::from(&cfg),
    });

    // Start scheduler
    orchestrator.start();

    // Start web server
    let server = Server::new(cfg, store, orchestrator.clone());
    server
        .start(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutting down");
        })
        .await?;

    orchestrator.shutdown().await;
    Ok(())
}

/// Agents file first, then the stored list, then a single local agent.
fn load_registry(
    cfg: &ServerConfig,
    store: &dyn Persistence,
) -> Result<AgentRegistry, Box<dyn std::error::Error + Send + Sync>> {
    let registry = match &cfg.agents_file {
        Some(path) => {
            tracing::info!("Reading agents from {}", path);
            AgentRegistry::from_file(path)?
        }
        None => AgentRegistry::load(store),
    };

    let registry = if registry.is_empty() {
        tracing::info!("No agents configured, adding agent 'local'");
        AgentRegistry::new([Agent::new("local")])
    } else {
        registry
    };

    registry.save(store)?;
    Ok(registry)
}
