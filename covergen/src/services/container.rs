//! Service container for dependency injection.
//!
//! The ServiceContainer wires the job store, stage runner, task queue and
//! asset collector together and manages their lifecycle.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sqlx::SqlitePool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::cover::CoverService;
use crate::Result;
use crate::assets::{AssetCollector, AssetLayout};
use crate::config::EngineConfig;
use crate::database::{
    self,
    repositories::{HistoryRepository, JobRepository, SqlxHistoryRepository, SqlxJobRepository},
};
use crate::pipeline::PipelineExecutor;
use crate::queue::{TaskQueue, TaskQueueStats};
use crate::runner::{CommandRunner, StageRunner};
use crate::scheduler::spawn_periodic;

/// Default shutdown timeout.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Service container holding all engine services.
pub struct ServiceContainer {
    /// Database connection pool.
    pub pool: SqlitePool,
    pub config: EngineConfig,
    pub repo: Arc<dyn JobRepository>,
    pub history: Arc<dyn HistoryRepository>,
    pub layout: AssetLayout,
    /// `None` when no stage runner is configured.
    pub queue: Option<Arc<TaskQueue>>,
    pub collector: Arc<AssetCollector>,
    pub cover_service: Arc<CoverService>,
    /// Cancellation token for graceful shutdown.
    cancellation_token: CancellationToken,
    background_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ServiceContainer {
    /// Open the database, apply migrations and build every service.
    pub async fn from_config(config: EngineConfig) -> Result<Self> {
        let pool = database::init_pool(&config.database_url).await?;
        database::run_migrations(&pool).await?;
        Ok(Self::new(pool, config))
    }

    /// Build the services on an existing pool with the external command runner.
    ///
    /// An incomplete runner configuration is not fatal: the container comes
    /// up without a task queue and submissions are refused.
    pub fn new(pool: SqlitePool, config: EngineConfig) -> Self {
        let runner: Option<Arc<dyn StageRunner>> = match CommandRunner::new(config.runner.clone()) {
            Ok(runner) => Some(Arc::new(runner)),
            Err(e) => {
                warn!("Cover runtime disabled: {}", e);
                None
            }
        };
        Self::build(pool, config, runner)
    }

    /// Build the services with a caller-supplied stage runner.
    pub fn with_runner(pool: SqlitePool, config: EngineConfig, runner: Arc<dyn StageRunner>) -> Self {
        Self::build(pool, config, Some(runner))
    }

    fn build(pool: SqlitePool, config: EngineConfig, runner: Option<Arc<dyn StageRunner>>) -> Self {
        info!("Initializing service container");

        let repo: Arc<dyn JobRepository> = Arc::new(SqlxJobRepository::new(pool.clone()));
        let history: Arc<dyn HistoryRepository> = Arc::new(SqlxHistoryRepository::new(pool.clone()));
        let layout = AssetLayout::new(&config.asset_root);

        let queue = runner.map(|runner| {
            let executor = Arc::new(
                PipelineExecutor::new(
                    Arc::clone(&repo),
                    runner,
                    layout.clone(),
                    config.pipeline.clone(),
                )
                .with_history(Arc::clone(&history)),
            );
            Arc::new(TaskQueue::new(executor, config.queue.clone()))
        });

        let collector = Arc::new(AssetCollector::new(
            Arc::clone(&repo),
            &config.asset_root,
            config.collector.clone(),
        ));

        let cover_service = Arc::new(
            CoverService::new(
                Arc::clone(&repo),
                layout.clone(),
                queue.clone(),
                config.upload.clone(),
            )
            .with_history(Arc::clone(&history)),
        );

        info!("Service container initialized");

        Self {
            pool,
            config,
            repo,
            history,
            layout,
            queue,
            collector,
            cover_service,
            cancellation_token: CancellationToken::new(),
            background_tasks: Mutex::new(Vec::new()),
        }
    }

    /// Start the workers, resolve jobs left by a previous process and start
    /// the periodic asset collector.
    pub async fn initialize(&self) -> Result<()> {
        info!("Initializing services");

        if let Some(queue) = &self.queue {
            queue.start();
        }

        let recovered = self.cover_service.recover_jobs().await?;
        info!(
            "Recovered {} interrupted and {} queued jobs",
            recovered.failed, recovered.redispatched
        );

        let handle = spawn_periodic(
            Arc::clone(&self.collector),
            self.config.collector.interval(),
            self.cancellation_token.child_token(),
        );
        self.background_tasks.lock().push(handle);

        info!("Services initialized");
        Ok(())
    }

    /// Track a task that should be joined on shutdown.
    pub fn register_background_task(&self, handle: JoinHandle<()>) {
        self.background_tasks.lock().push(handle);
    }

    /// Shutdown all services gracefully.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await
    }

    /// Shutdown all services gracefully with a custom timeout.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) -> Result<()> {
        info!("Shutting down services (timeout: {:?})", timeout);

        self.cancellation_token.cancel();

        let tasks = std::mem::take(&mut *self.background_tasks.lock());
        let shutdown_result = tokio::time::timeout(timeout, async {
            if let Some(queue) = &self.queue {
                queue.stop().await;
            }
            for task in tasks {
                let _ = task.await;
            }
        })
        .await;

        if shutdown_result.is_err() {
            warn!("Shutdown timeout reached, forcing shutdown");
        }

        info!("Closing database pool...");
        self.pool.close().await;

        info!("Services shut down");
        Ok(())
    }

    /// Get the cancellation token for external use.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Check if shutdown has been requested.
    pub fn is_shutting_down(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Get service statistics.
    pub async fn stats(&self) -> Result<ServiceStats> {
        Ok(ServiceStats {
            jobs_by_status: self.cover_service.stats().await?,
            queue: self.queue.as_ref().map(|q| q.stats()),
            runtime_available: self.cover_service.is_available(),
        })
    }
}

/// Service statistics.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ServiceStats {
    /// Number of jobs per status.
    pub jobs_by_status: BTreeMap<String, i64>,
    /// Task queue counters, absent without a runner.
    pub queue: Option<TaskQueueStats>,
    /// Whether submissions are accepted.
    pub runtime_available: bool,
}
