use serde::Deserialize;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Mongo,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = config::ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "mongo" | "mongodb" => Ok(StoreBackend::Mongo),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(config::ConfigError::Message(format!(
                "unknown store backend '{}', expected 'mongo' or 'memory'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EvaluationPolicy {
    pub retry_cooldown_hours: i64,
    pub require_lessons_completed: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub store_backend: StoreBackend,
    pub mongo_uri: String,
    pub mongo_database: String,
    /// Without a Redis URI scope locks stay in-process.
    pub redis_uri: Option<String>,
    pub jwt_secret: String,
    pub seed_path: Option<String>,
    pub evaluation: EvaluationPolicy,
    pub ranking_default_limit: usize,
    pub lock_ttl_ms: u64,
    pub lock_wait_ms: u64,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Root .env first, then the local one
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        let env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", env)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let store_backend = settings
            .get_string("store.backend")
            .or_else(|_| env::var("STORE_BACKEND"))
            .unwrap_or_else(|_| "mongo".to_string())
            .parse()?;

        let mongo_uri = settings
            .get_string("database.mongo_uri")
            .or_else(|_| env::var("MONGO_URI"))
            .unwrap_or_else(|_| "mongodb://localhost:27017/?replicaSet=rs0".to_string());

        let mongo_database = settings
            .get_string("database.mongo_database")
            .or_else(|_| env::var("MONGO_DATABASE"))
            .unwrap_or_else(|_| "courseware".to_string());

        let redis_uri = settings
            .get_string("redis.uri")
            .or_else(|_| env::var("REDIS_URI"))
            .ok()
            .filter(|uri| !uri.is_empty());

        let jwt_secret = match settings
            .get_string("auth.jwt_secret")
            .or_else(|_| env::var("JWT_SECRET"))
        {
            Ok(secret) => secret,
            Err(_) if env == "prod" => {
                return Err(config::ConfigError::Message(
                    "JWT_SECRET must be set in production".to_string(),
                ))
            }
            Err(_) => {
                eprintln!("WARNING: Using default JWT_SECRET (dev mode only!)");
                "dev-secret-only-for-local-testing".to_string()
            }
        };

        let seed_path = settings
            .get_string("store.seed_path")
            .or_else(|_| env::var("CATALOG_SEED_PATH"))
            .ok();

        let evaluation = EvaluationPolicy {
            retry_cooldown_hours: settings
                .get_int("evaluation.retry_cooldown_hours")
                .unwrap_or(24),
            require_lessons_completed: settings
                .get_bool("evaluation.require_lessons_completed")
                .unwrap_or(true),
        };

        let ranking_default_limit = settings
            .get_int("ranking.default_limit")
            .ok()
            .and_then(|v| usize::try_from(v).ok())
            .filter(|v| *v > 0)
            .unwrap_or(5);

        let lock_ttl_ms = settings
            .get_int("locks.ttl_ms")
            .ok()
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or(10_000);
        let lock_wait_ms = settings
            .get_int("locks.wait_ms")
            .ok()
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or(2_000);

        Ok(Config {
            store_backend,
            mongo_uri,
            mongo_database,
            redis_uri,
            jwt_secret,
            seed_path,
            evaluation,
            ranking_default_limit,
            lock_ttl_ms,
            lock_wait_ms,
        })
    }

    /// In-process configuration: memory store, local locks.
    pub fn for_tests() -> Self {
        Config {
            store_backend: StoreBackend::Memory,
            mongo_uri: String::new(),
            mongo_database: "courseware_test".to_string(),
            redis_uri: None,
            jwt_secret: "test-secret".to_string(),
            seed_path: None,
            evaluation: EvaluationPolicy {
                retry_cooldown_hours: 24,
                require_lessons_completed: true,
            },
            ranking_default_limit: 5,
            lock_ttl_ms: 10_000,
            lock_wait_ms: 2_000,
        }
    }
}
