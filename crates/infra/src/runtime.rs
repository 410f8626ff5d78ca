//! Service wiring shared by the API and the stage processes.

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use scout_queue::{InMemoryTransport, QueueTransport, TransportError};
use scout_search::{CannedSearch, QueryEngine};

use crate::config::{ConfigError, Settings};
use crate::notify::{DeliveryError, NotificationPublisher};
use crate::pipeline::{DeliveryStage, RetryStage, SubmissionStage, WorkerStage};
use crate::store::{InMemoryTaskStore, PostgresTaskStore, StoreError, TaskStore};
use crate::workers::{ConsumerConfig, ConsumerPool, PoolHandle};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error("persistent stores need the `{0}` feature")]
    FeatureDisabled(&'static str),
}

/// Explicitly constructed service handles. Cloning shares them.
#[derive(Clone)]
pub struct Runtime {
    pub settings: Settings,
    pub store: Arc<dyn TaskStore>,
    pub transport: Arc<dyn QueueTransport>,
    pub publisher: Arc<NotificationPublisher>,
    pub engine: Arc<dyn QueryEngine>,
    postgres: Option<PostgresTaskStore>,
}

impl Runtime {
    /// Assemble handles from explicit parts (tests, custom setups).
    pub fn from_parts(
        settings: Settings,
        store: Arc<dyn TaskStore>,
        transport: Arc<dyn QueueTransport>,
        publisher: Arc<NotificationPublisher>,
        engine: Arc<dyn QueryEngine>,
    ) -> Self {
        Self {
            settings,
            store,
            transport,
            publisher,
            engine,
            postgres: None,
        }
    }

    /// In-memory store and transport; nothing outlives the process.
    pub fn in_memory(settings: Settings) -> Result<Self, RuntimeError> {
        let publisher = NotificationPublisher::from_settings(&settings.telegram)?;
        Ok(Self::from_parts(
            settings,
            InMemoryTaskStore::arc(),
            Arc::new(InMemoryTransport::new()),
            Arc::new(publisher),
            Arc::new(CannedSearch::new()),
        ))
    }

    /// Postgres store and Redis Streams transport.
    #[cfg(feature = "redis")]
    pub async fn persistent(settings: Settings) -> Result<Self, RuntimeError> {
        let database_url = settings
            .database_url
            .clone()
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let postgres =
            PostgresTaskStore::connect(&database_url, settings.database_max_connections).await?;
        let transport = crate::transport::RedisStreamsTransport::new(
            &settings.redis_url,
            settings.consumer_group.clone(),
            settings.visibility_timeout,
        )?
        .with_command_timeout(settings.transport_timeout);
        let publisher = NotificationPublisher::from_settings(&settings.telegram)?;

        info!(
            raw_queue = %settings.raw_queue,
            completed_queue = %settings.completed_queue,
            "persistent runtime ready"
        );

        Ok(Self {
            settings,
            store: Arc::new(postgres.clone()),
            transport: Arc::new(transport),
            publisher: Arc::new(publisher),
            engine: Arc::new(CannedSearch::new()),
            postgres: Some(postgres),
        })
    }

    #[cfg(not(feature = "redis"))]
    pub async fn persistent(_settings: Settings) -> Result<Self, RuntimeError> {
        Err(RuntimeError::FeatureDisabled("redis"))
    }

    /// Persistent or in-memory, as `USE_PERSISTENT_STORES` says.
    pub async fn from_settings(settings: Settings) -> Result<Self, RuntimeError> {
        if settings.use_persistent_stores {
            Self::persistent(settings).await
        } else {
            info!("using in-memory store and transport");
            Self::in_memory(settings)
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.postgres.is_some()
    }

    pub fn submission(&self) -> SubmissionStage {
        SubmissionStage::new(
            Arc::clone(&self.store),
            Arc::clone(&self.transport),
            self.settings.raw_queue.clone(),
        )
    }

    pub fn retry(&self) -> RetryStage {
        RetryStage::new(
            Arc::clone(&self.store),
            Arc::clone(&self.transport),
            self.settings.raw_queue.clone(),
        )
    }

    pub fn worker(&self) -> WorkerStage {
        WorkerStage::new(
            Arc::clone(&self.store),
            Arc::clone(&self.transport),
            Arc::clone(&self.engine),
            self.settings.completed_queue.clone(),
        )
    }

    pub fn delivery(&self) -> DeliveryStage {
        DeliveryStage::new(Arc::clone(&self.store), Arc::clone(&self.publisher))
    }

    /// Start the worker stage: one slot per `WORKER_PREFETCH`.
    pub fn spawn_worker_pool(&self, cancel: CancellationToken) -> PoolHandle {
        let config = ConsumerConfig::new("worker", self.settings.raw_queue.clone())
            .with_slots(self.settings.worker_prefetch);
        ConsumerPool::spawn(Arc::clone(&self.transport), Arc::new(self.worker()), config, cancel)
    }

    /// Start the delivery stage.
    pub fn spawn_delivery_pool(&self, cancel: CancellationToken) -> PoolHandle {
        let config = ConsumerConfig::new("delivery", self.settings.completed_queue.clone())
            .with_slots(self.settings.worker_prefetch);
        ConsumerPool::spawn(Arc::clone(&self.transport), Arc::new(self.delivery()), config, cancel)
    }

    /// Release pooled connections.
    pub async fn close(&self) {
        if let Some(postgres) = &self.postgres {
            postgres.close().await;
        }
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("persistent", &self.is_persistent())
            .field("publisher", &self.publisher)
            .finish_non_exhaustive()
    }
}
