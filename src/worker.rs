//! Postgres-backed worker assembly.

use std::sync::Arc;

use anyhow::Result;
use sqlx::PgPool;
use tokio::sync::watch;
use tracing::info;

use sharepack_core::{
    Orchestrator, PlatformConnector, ProvisioningHandler, Repositories, SharePackConsumer,
    SharePackService, TemporalStore, WorkQueue,
};
use sharepack_postgres::{PgTemporalStore, PgWorkQueue};

use crate::config::ProvisionerConfig;
use crate::platform_http::HttpConnector;

/// Everything one worker process needs, built over a single pool.
pub struct Worker {
    pub repos: Repositories,
    pub service: SharePackService,
    pub consumer: SharePackConsumer,
}

impl Worker {
    pub fn new(pool: PgPool, connector: Arc<dyn PlatformConnector>, config: &ProvisionerConfig) -> Self {
        let store: Arc<dyn TemporalStore> = Arc::new(PgTemporalStore::new(pool.clone()));
        let queue: Arc<dyn WorkQueue> = Arc::new(PgWorkQueue::new(pool));
        let repos = Repositories::new(store);

        let handler: Arc<dyn ProvisioningHandler> =
            Arc::new(Orchestrator::new(repos.clone(), connector.clone()));
        let service = SharePackService::new(repos.share_packs.clone(), connector, queue.clone());
        let consumer = SharePackConsumer::new(
            queue,
            repos.share_packs.clone(),
            handler,
            config.consumer_config(),
        );

        Self {
            repos,
            service,
            consumer,
        }
    }

    /// Connect, migrate and assemble from configuration.
    pub async fn from_config(config: &ProvisionerConfig) -> Result<Self> {
        let pool =
            sharepack_postgres::connect(&config.database_url()?, config.database.max_connections)
                .await?;
        sharepack_postgres::run_migrations(&pool).await?;

        let connector: Arc<dyn PlatformConnector> = Arc::new(HttpConnector::new(
            config.platform_token()?,
            config.request_timeout(),
        ));
        Ok(Self::new(pool, connector, config))
    }

    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        info!(
            poll_ms = self.consumer.config().poll_interval.as_millis() as u64,
            "worker running"
        );
        self.consumer.run(shutdown).await;
    }
}
