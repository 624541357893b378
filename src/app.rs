//! Wires configuration, storage, transport and sync services together

use crate::api::resilience::{FanoutSink, LoggingSink};
use crate::api::{HttpTransport, MetricsCollector, PlatformClient, ReqwestTransport, ResilientTransport, TelemetrySink};
use crate::config::Config;
use crate::domain::LocalRepository;
use crate::orders::OrderStateMachine;
use crate::store::{SqliteLocalRepository, SqliteSyncStore, SyncStore, db};
use crate::sync::{ItemProcessor, RetryQueue, SyncHealthProvider, SyncOrchestrator};
use anyhow::Result;
use log::info;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct SyncApp {
    pub config: Config,
    pub pool: SqlitePool,
    pub client: PlatformClient,
    pub repository: Arc<dyn LocalRepository>,
    pub store: Arc<dyn SyncStore>,
    pub items: ItemProcessor,
    pub queue: RetryQueue,
    pub orchestrator: SyncOrchestrator,
    pub orders: OrderStateMachine,
    pub metrics: MetricsCollector,
    pub shutdown: CancellationToken,
}

impl SyncApp {
    /// Open the configured database and talk to the platform over HTTP
    pub async fn open(config: Config) -> Result<Self> {
        let pool = db::open(&config.sync.database_path).await?;
        let http = ReqwestTransport::new(
            config.platform.api_key.as_deref(),
            config.request_timeout(),
            config.connect_timeout(),
        )?;
        info!(
            "Opened {:?}, platform at {}",
            config.sync.database_path, config.platform.base_url
        );
        Ok(Self::assemble(config, pool, Arc::new(http)))
    }

    /// Build the services over an existing pool and send primitive
    pub fn assemble(config: Config, pool: SqlitePool, http: Arc<dyn HttpTransport>) -> Self {
        let shutdown = CancellationToken::new();
        let resilience = config.resilience_config();
        let metrics = MetricsCollector::new();
        let telemetry: Arc<dyn TelemetrySink> = Arc::new(
            FanoutSink::new()
                .with(Arc::new(LoggingSink::new(resilience.monitoring.clone())))
                .with(Arc::new(metrics.clone())),
        );

        let transport = ResilientTransport::new(http, resilience, telemetry.clone()).with_shutdown(shutdown.clone());
        let health = SyncHealthProvider::new(Some(transport.breaker().clone()));
        let client = PlatformClient::new(config.platform.base_url.clone(), transport)
            .with_changed_since(config.platform.supports_changed_since);

        let repository: Arc<dyn LocalRepository> = Arc::new(SqliteLocalRepository::new(pool.clone()));
        let store: Arc<dyn SyncStore> = Arc::new(SqliteSyncStore::new(pool.clone()));
        let items = ItemProcessor::new(client.clone(), repository.clone());
        let queue = RetryQueue::new(store.clone(), config.retry_queue_config());
        let orchestrator = SyncOrchestrator::new(items.clone(), store.clone(), queue.clone(), health, telemetry);
        let orders = OrderStateMachine::new(repository.clone());

        Self {
            config,
            pool,
            client,
            repository,
            store,
            items,
            queue,
            orchestrator,
            orders,
            metrics,
            shutdown,
        }
    }

    /// Start the background retry worker; it stops with [`SyncApp::shutdown`]
    pub fn spawn_retry_worker(&self) -> JoinHandle<()> {
        self.queue
            .spawn_worker(Arc::new(self.items.clone()), self.shutdown.child_token())
    }
}
