use std::sync::{Arc, Mutex};
use std::time::Duration;

use mongodb::Client as MongoClient;
use rand::rngs::StdRng;
use rand::SeedableRng;
use redis::aio::ConnectionManager;

use crate::config::{Config, StoreBackend};
use crate::store::{CatalogSeed, InMemoryStore, LearningStore, MongoStore};
use crate::utils::time::{Clock, SystemClock};
use scope_lock::ScopeLocks;

pub mod certificate_service;
pub mod evaluation_service;
pub mod exercise_service;
pub mod lesson_service;
pub mod progress_service;
pub mod ranking_service;
pub mod scope_lock;
pub mod scoring;

/// Random source shared by every request. Seeded from the OS in production
/// and from a fixed value in tests.
pub type SharedRng = Arc<Mutex<StdRng>>;

pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn LearningStore>,
    pub locks: Arc<ScopeLocks>,
    pub clock: Arc<dyn Clock>,
    pub rng: SharedRng,
}

impl AppState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let store: Arc<dyn LearningStore> = match config.store_backend {
            StoreBackend::Mongo => {
                tracing::info!("Connecting to MongoDB...");
                let client = tokio::time::timeout(
                    Duration::from_secs(30),
                    MongoClient::with_uri_str(&config.mongo_uri),
                )
                .await
                .map_err(|_| anyhow::anyhow!("MongoDB connection timeout after 30s"))??;
                let db = client.database(&config.mongo_database);
                let store = MongoStore::new(client, db);
                store.ping().await?;
                store.ensure_indexes().await?;
                tracing::info!("MongoDB connection established successfully");
                Arc::new(store)
            }
            StoreBackend::Memory => {
                tracing::warn!("Using the in-memory store; data is lost on restart");
                Arc::new(InMemoryStore::new())
            }
        };

        if let Some(path) = &config.seed_path {
            let seed = CatalogSeed::from_path(path)?;
            store.load_catalog(seed).await?;
            tracing::info!("Catalog seed loaded from {}", path);
        }

        let locks = match &config.redis_uri {
            Some(uri) => {
                tracing::info!("Attempting to connect to Redis...");
                let redis_client = redis::Client::open(uri.as_str())?;
                let redis = tokio::time::timeout(
                    Duration::from_secs(30),
                    ConnectionManager::new(redis_client),
                )
                .await
                .map_err(|_| anyhow::anyhow!("Redis connection timeout after 30s"))??;

                let mut conn = redis.clone();
                tokio::time::timeout(
                    Duration::from_secs(5),
                    redis::cmd("PING").query_async::<String>(&mut conn),
                )
                .await
                .map_err(|_| anyhow::anyhow!("Redis PING timeout after 5s"))??;

                tracing::info!("Redis connection established, scope locks are distributed");
                ScopeLocks::redis(
                    redis,
                    config.lock_ttl_ms,
                    Duration::from_millis(config.lock_wait_ms),
                )
            }
            None => {
                tracing::info!("No Redis configured, scope locks are in-process");
                ScopeLocks::local(Duration::from_millis(config.lock_wait_ms))
            }
        };

        Ok(Self {
            config,
            store,
            locks: Arc::new(locks),
            clock: Arc::new(SystemClock),
            rng: Arc::new(Mutex::new(StdRng::from_os_rng())),
        })
    }

    /// Assembles a state around an existing store with in-process locks.
    pub fn with_parts(
        config: Config,
        store: Arc<dyn LearningStore>,
        clock: Arc<dyn Clock>,
        rng: StdRng,
    ) -> Self {
        let locks = ScopeLocks::local(Duration::from_millis(config.lock_wait_ms));
        Self {
            config,
            store,
            locks: Arc::new(locks),
            clock,
            rng: Arc::new(Mutex::new(rng)),
        }
    }
}
