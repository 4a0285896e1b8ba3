use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use redis::aio::ConnectionManager;
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use crate::error::{ConflictKind, LearningError, LearningResult};
use crate::metrics::record_lock_wait;

const REDIS_POLL_INTERVAL: Duration = Duration::from_millis(25);
const LOCAL_SWEEP_THRESHOLD: usize = 1024;

/// Deletes the key only if it still holds our token.
const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

pub fn evaluation_scope(user_id: &str, evaluation_id: &str) -> String {
    format!("lock:evaluation:{}:{}", user_id, evaluation_id)
}

pub fn progress_scope(user_id: &str, module_id: &str) -> String {
    format!("lock:progress:{}:{}", user_id, module_id)
}

/// Serializes operations of one user on one scope. Callers always acquire
/// the evaluation scope before the progress scope.
pub enum ScopeLocks {
    Local(LocalLocks),
    Redis(RedisLocks),
}

pub struct LocalLocks {
    slots: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    wait: Duration,
}

pub struct RedisLocks {
    conn: ConnectionManager,
    ttl_ms: u64,
    wait: Duration,
}

#[must_use = "a scope guard has to be released"]
pub enum ScopeGuard {
    Local(OwnedMutexGuard<()>),
    Redis {
        conn: ConnectionManager,
        key: String,
        token: String,
    },
}

impl ScopeLocks {
    pub fn local(wait: Duration) -> Self {
        ScopeLocks::Local(LocalLocks {
            slots: Mutex::new(HashMap::new()),
            wait,
        })
    }

    pub fn redis(conn: ConnectionManager, ttl_ms: u64, wait: Duration) -> Self {
        ScopeLocks::Redis(RedisLocks { conn, ttl_ms, wait })
    }

    pub async fn acquire(&self, scope: &str) -> LearningResult<ScopeGuard> {
        match self {
            ScopeLocks::Local(locks) => locks.acquire(scope).await,
            ScopeLocks::Redis(locks) => locks.acquire(scope).await,
        }
    }

    pub fn backend(&self) -> &'static str {
        match self {
            ScopeLocks::Local(_) => "local",
            ScopeLocks::Redis(_) => "redis",
        }
    }

    /// Round trip to the lock backend. Always succeeds for in-process locks.
    pub async fn ping(&self) -> LearningResult<()> {
        match self {
            ScopeLocks::Local(_) => Ok(()),
            ScopeLocks::Redis(locks) => {
                let mut conn = locks.conn.clone();
                redis::cmd("PING")
                    .query_async::<String>(&mut conn)
                    .await
                    .map(|_| ())
                    .map_err(LearningError::storage)
            }
        }
    }
}

fn busy(scope: &str) -> LearningError {
    ConflictKind::Busy {
        scope: scope.to_string(),
    }
    .into()
}

impl LocalLocks {
    async fn acquire(&self, scope: &str) -> LearningResult<ScopeGuard> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            if slots.len() > LOCAL_SWEEP_THRESHOLD {
                slots.retain(|_, slot| Arc::strong_count(slot) > 1);
            }
            slots
                .entry(scope.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };

        let started = Instant::now();
        match tokio::time::timeout(self.wait, slot.lock_owned()).await {
            Ok(guard) => {
                record_lock_wait("local", true, started.elapsed());
                Ok(ScopeGuard::Local(guard))
            }
            Err(_) => {
                record_lock_wait("local", false, started.elapsed());
                tracing::warn!("Timed out waiting for scope lock {}", scope);
                Err(busy(scope))
            }
        }
    }
}

impl RedisLocks {
    async fn acquire(&self, scope: &str) -> LearningResult<ScopeGuard> {
        let token = Uuid::new_v4().to_string();
        let mut conn = self.conn.clone();
        let started = Instant::now();

        loop {
            let acquired: Option<String> = redis::cmd("SET")
                .arg(scope)
                .arg(&token)
                .arg("NX")
                .arg("PX")
                .arg(self.ttl_ms)
                .query_async(&mut conn)
                .await
                .map_err(|e| LearningError::storage(format!("Failed to acquire lock: {}", e)))?;

            if acquired.is_some() {
                record_lock_wait("redis", true, started.elapsed());
                return Ok(ScopeGuard::Redis {
                    conn,
                    key: scope.to_string(),
                    token,
                });
            }

            if started.elapsed() >= self.wait {
                record_lock_wait("redis", false, started.elapsed());
                tracing::warn!("Timed out waiting for scope lock {}", scope);
                return Err(busy(scope));
            }
            tokio::time::sleep(REDIS_POLL_INTERVAL).await;
        }
    }
}

impl ScopeGuard {
    /// Releases the scope. A failed Redis release is only logged: the key
    /// expires after its TTL.
    pub async fn release(self) {
        match self {
            ScopeGuard::Local(guard) => drop(guard),
            ScopeGuard::Redis {
                mut conn,
                key,
                token,
            } => {
                let result: redis::RedisResult<i32> = redis::Script::new(RELEASE_SCRIPT)
                    .key(&key)
                    .arg(&token)
                    .invoke_async(&mut conn)
                    .await;
                match result {
                    Ok(1) => {}
                    Ok(_) => tracing::warn!("Scope lock {} expired before release", key),
                    Err(e) => tracing::warn!("Failed to release scope lock {}: {}", key, e),
                }
            }
        }
    }
}
