use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

use vigilia::clock::Clock;
use vigilia::config::{Config, StorageConfig, read_config_file};
use vigilia::heartbeat::HeartbeatService;
use vigilia::maintenance::MaintenanceService;
use vigilia::manager::MonitorManager;
use vigilia::notify::{DispatcherDeps, DispatcherHandle, SenderRegistry};
use vigilia::probe::ProbeRegistry;
use vigilia::repo::memory::MemoryStore;
use vigilia::repo::{
    HeartbeatRepository, MaintenanceRepository, MonitorRepository, NotificationChannelRepository,
    ProxyRepository, StatusPageRepository,
};
use vigilia::runner::RunnerDeps;
use vigilia::EventBus;

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,
}

fn init() {
    let filter = filter::Targets::new().with_target("vigilia", LevelFilter::TRACE);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .pretty()
                .with_writer(std::io::stderr)
                .compact(),
        )
        .with(filter)
        .init();
}

/// Every repository handle the core needs, resolved to one backend.
struct Repositories {
    monitors: Arc<dyn MonitorRepository>,
    heartbeats: Arc<dyn HeartbeatRepository>,
    maintenances: Arc<dyn MaintenanceRepository>,
    channels: Arc<dyn NotificationChannelRepository>,
    proxies: Arc<dyn ProxyRepository>,
    status_pages: Arc<dyn StatusPageRepository>,
}

impl Repositories {
    fn from_memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            monitors: store.clone(),
            heartbeats: store.clone(),
            maintenances: store.clone(),
            channels: store.clone(),
            proxies: store.clone(),
            status_pages: store,
        }
    }

    #[cfg(feature = "storage-sqlite")]
    fn from_sqlite(store: Arc<vigilia::repo::sqlite::SqliteStore>) -> Self {
        Self {
            monitors: store.clone(),
            heartbeats: store.clone(),
            maintenances: store.clone(),
            channels: store.clone(),
            proxies: store.clone(),
            status_pages: store,
        }
    }
}

/// Returns the repositories plus the retention settings when persistence
/// is enabled.
async fn initialize_storage(config: &Option<StorageConfig>) -> (Repositories, Option<(u32, u32)>) {
    match config.clone().unwrap_or_default() {
        StorageConfig::None => {
            info!("using in-memory storage (no persistence)");
            (Repositories::from_memory(), None)
        }

        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite {
            path,
            retention_days,
            cleanup_interval_hours,
        } => {
            info!(
                "initializing SQLite storage at {:?} (retention: {} days, cleanup: every {} hours)",
                path, retention_days, cleanup_interval_hours
            );
            match vigilia::repo::sqlite::SqliteStore::new(&path).await {
                Ok(store) => (
                    Repositories::from_sqlite(Arc::new(store)),
                    Some((retention_days, cleanup_interval_hours)),
                ),
                Err(e) => {
                    error!("failed to initialize SQLite storage: {e}");
                    warn!("falling back to in-memory storage");
                    (Repositories::from_memory(), None)
                }
            }
        }

        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => {
            warn!("built without storage-sqlite, falling back to in-memory storage");
            (Repositories::from_memory(), None)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();

    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = read_config_file(&args.file)?;
    if let Err(e) = config.validate() {
        error!("invalid configuration: {e}");
        return Err(anyhow::anyhow!("configuration validation failed: {e}"));
    }

    run(config).await
}

async fn run(config: Config) -> anyhow::Result<()> {
    let clock = Clock::new(&config.timezone);
    let bus = EventBus::new(config.bus_capacity);

    let (repos, retention) = initialize_storage(&config.storage).await;

    let heartbeats = HeartbeatService::new(repos.heartbeats.clone(), bus.clone());
    let maintenance = MaintenanceService::new(repos.maintenances.clone(), clock);
    let probes = Arc::new(ProbeRegistry::default());
    let senders = Arc::new(SenderRegistry::default());

    let runner_deps = RunnerDeps {
        clock,
        probes,
        heartbeats: heartbeats.clone(),
        maintenance: maintenance.clone(),
        proxies: repos.proxies.clone(),
        bus: bus.clone(),
    };

    // The dispatcher subscribes before runners start so no startup beat is
    // missed.
    let dispatcher = DispatcherHandle::spawn(
        bus.clone(),
        DispatcherDeps {
            monitors: repos.monitors.clone(),
            heartbeats: repos.heartbeats.clone(),
            channels: repos.channels.clone(),
            maintenance,
            senders,
            clock,
        },
    );
    info!("notification dispatcher started");

    let manager = MonitorManager::new(
        repos.monitors.clone(),
        repos.maintenances.clone(),
        repos.channels.clone(),
        repos.status_pages.clone(),
        runner_deps,
    );
    manager.start().await?;
    info!("monitor manager started");

    let retention_token = CancellationToken::new();
    if let Some((retention_days, cleanup_interval_hours)) = retention {
        let service = heartbeats.clone();
        let token = retention_token.clone();
        let clock_for_cleanup = clock;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(
                cleanup_interval_hours as u64 * 3600,
            ));
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {}
                }
                let cutoff =
                    clock_for_cleanup.now() - chrono::Duration::days(retention_days as i64);
                match service.purge_older_than(cutoff).await {
                    Ok(0) => {}
                    Ok(deleted) => info!("retention purged {deleted} heartbeats"),
                    Err(e) => warn!("retention purge failed: {e}"),
                }
            }
        });
        info!("retention job scheduled (every {cleanup_interval_hours}h)");
    }

    info!("press Ctrl+C to shutdown gracefully");
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received shutdown signal, stopping"),
        Err(err) => error!("unable to listen for shutdown signal: {err}"),
    }

    retention_token.cancel();
    manager.shutdown().await;
    dispatcher.stop().await;
    info!("all components stopped, exiting");

    Ok(())
}
