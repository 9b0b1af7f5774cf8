use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use evalhub_infra::{
    config::EvaluatorConfig,
    jobs::{
        ConsumerConfig, DeadLetterSink, Enqueuer, InMemoryDeadLetterStore, InMemorySetCatalog,
        ManifestSetResolver, QueueConsumer, SetResolver,
    },
    pipeline::{EvaluationPipeline, HttpEvaluationPipeline},
    queue::{InMemoryQueue, JobQueue, QueueError},
    store::{ExperimentStore, InMemoryExperimentStore, PostgresExperimentStore, StoreError},
};
#[cfg(feature = "redis")]
use evalhub_infra::queue::{RedisStreamsConfig, RedisStreamsQueue};

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("queue setup failed: {0}")]
    Queue(#[from] QueueError),

    #[error("store setup failed: {0}")]
    Store(#[from] StoreError),
}

/// Backends shared by every handler and by the background consumer.
pub struct AppServices {
    pub enqueuer: Enqueuer,
    pub queue: Arc<dyn JobQueue>,
    pub dead_letters: Arc<dyn DeadLetterSink>,
    pub store: Arc<dyn ExperimentStore>,
}

impl AppServices {
    pub fn new(
        resolver: Arc<dyn SetResolver>,
        queue: Arc<dyn JobQueue>,
        dead_letters: Arc<dyn DeadLetterSink>,
        store: Arc<dyn ExperimentStore>,
        config: &EvaluatorConfig,
    ) -> Self {
        Self {
            enqueuer: Enqueuer::new(resolver, queue.clone(), config.enqueuer()),
            queue,
            dead_letters,
            store,
        }
    }

    /// Everything in process memory; used by tests and local runs.
    pub fn in_memory(resolver: Arc<dyn SetResolver>, config: &EvaluatorConfig) -> Self {
        Self::new(
            resolver,
            Arc::new(InMemoryQueue::new(config.visibility_timeout)),
            Arc::new(InMemoryDeadLetterStore::new()),
            Arc::new(InMemoryExperimentStore::new()),
            config,
        )
    }

    pub fn consumer(&self, pipeline: Arc<dyn EvaluationPipeline>, config: ConsumerConfig) -> QueueConsumer {
        QueueConsumer::new(
            self.queue.clone(),
            self.dead_letters.clone(),
            pipeline,
            self.store.clone(),
            config,
        )
    }
}

/// HTTP pipeline for the configured evaluation URL, if any.
pub fn build_pipeline(config: &EvaluatorConfig) -> Option<Arc<dyn EvaluationPipeline>> {
    let url = config.evaluation_url.as_ref()?;
    Some(Arc::new(HttpEvaluationPipeline::new(
        url.clone(),
        config.dead_letter_statuses.clone(),
    )))
}

fn build_resolver(config: &EvaluatorConfig) -> Arc<dyn SetResolver> {
    match &config.sets_dir {
        Some(dir) => {
            info!(sets_dir = %dir.display(), "resolving sets from manifest files");
            Arc::new(ManifestSetResolver::new(dir.clone()))
        }
        None => {
            warn!("SETS_DIR not set; every set resolves as unknown");
            Arc::new(InMemorySetCatalog::new())
        }
    }
}

async fn build_store(config: &EvaluatorConfig) -> Result<Arc<dyn ExperimentStore>, BootstrapError> {
    match &config.database_url {
        Some(url) => {
            let store = PostgresExperimentStore::connect(url).await?;
            store.ensure_schema().await?;
            info!("using Postgres experiment store");
            Ok(Arc::new(store))
        }
        None => {
            info!("DATABASE_URL not set; using in-memory experiment store");
            Ok(Arc::new(InMemoryExperimentStore::new()))
        }
    }
}

#[cfg(feature = "redis")]
async fn build_queue(
    config: &EvaluatorConfig,
) -> Result<(Arc<dyn JobQueue>, Arc<dyn DeadLetterSink>), BootstrapError> {
    let Some(url) = &config.redis_url else {
        info!("REDIS_URL not set; using in-memory queue");
        return Ok(in_memory_queue(config));
    };

    let mut redis_config = RedisStreamsConfig::new(url.clone());
    redis_config.visibility_timeout = config.visibility_timeout;
    if let Some(key) = &config.queue_key {
        redis_config.stream_key = key.clone();
    }
    if let Some(key) = &config.dead_letter_key {
        redis_config.dead_letter_key = key.clone();
    }
    if let Some(group) = &config.consumer_group {
        redis_config.group = group.clone();
    }

    let queue = Arc::new(RedisStreamsQueue::new(redis_config)?);
    queue.ensure_consumer_group().await?;
    info!("using Redis Streams queue");
    let dead_letters: Arc<dyn DeadLetterSink> = queue.clone();
    let queue: Arc<dyn JobQueue> = queue;
    Ok((queue, dead_letters))
}

#[cfg(not(feature = "redis"))]
async fn build_queue(
    config: &EvaluatorConfig,
) -> Result<(Arc<dyn JobQueue>, Arc<dyn DeadLetterSink>), BootstrapError> {
    if config.redis_url.is_some() {
        warn!("REDIS_URL set but built without the `redis` feature; using in-memory queue");
    }
    Ok(in_memory_queue(config))
}

fn in_memory_queue(config: &EvaluatorConfig) -> (Arc<dyn JobQueue>, Arc<dyn DeadLetterSink>) {
    (
        Arc::new(InMemoryQueue::new(config.visibility_timeout)),
        Arc::new(InMemoryDeadLetterStore::new()),
    )
}

/// Wire backends from configuration: Postgres and Redis when configured,
/// in-memory otherwise.
pub async fn build_services(config: &EvaluatorConfig) -> Result<AppServices, BootstrapError> {
    let resolver = build_resolver(config);
    let store = build_store(config).await?;
    let (queue, dead_letters) = build_queue(config).await?;
    Ok(AppServices::new(resolver, queue, dead_letters, store, config))
}
