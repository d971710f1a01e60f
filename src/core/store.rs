use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::config::RedisSettings;
use crate::utils::{ProtectionError, ProtectionResult};

/// Deadline for establishing the initial connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared handle to the remote key-value store.
///
/// All operations are bounded by a per-operation deadline. Failures flip the
/// degraded flag so health checks and the request path can observe outages;
/// the caller decides whether to fail open.
#[derive(Clone)]
pub struct RemoteStore {
    conn: ConnectionManager,
    op_timeout: Duration,
    degraded: Arc<AtomicBool>,
}

impl RemoteStore {
    /// Connect to the configured Redis instance.
    pub async fn connect(settings: &RedisSettings, op_timeout: Duration) -> ProtectionResult<Self> {
        let client = redis::Client::open(settings.url())?;
        let conn = tokio::time::timeout(CONNECT_TIMEOUT, ConnectionManager::new(client))
            .await
            .map_err(|_| {
                ProtectionError::StoreUnavailable(format!(
                    "connect timeout after {CONNECT_TIMEOUT:?}"
                ))
            })??;

        Ok(Self {
            conn,
            op_timeout,
            degraded: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Whether the last remote operation failed.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    async fn run<T>(
        &self,
        op: impl std::future::Future<Output = redis::RedisResult<T>>,
    ) -> ProtectionResult<T> {
        match tokio::time::timeout(self.op_timeout, op).await {
            Ok(Ok(value)) => {
                self.degraded.store(false, Ordering::Relaxed);
                Ok(value)
            }
            Ok(Err(err)) => {
                self.degraded.store(true, Ordering::Relaxed);
                Err(ProtectionError::StoreUnavailable(err.to_string()))
            }
            Err(_) => {
                self.degraded.store(true, Ordering::Relaxed);
                Err(ProtectionError::StoreUnavailable(format!(
                    "operation timeout after {:?}",
                    self.op_timeout
                )))
            }
        }
    }

    /// PING the store; used by the health checker.
    pub async fn ping(&self) -> ProtectionResult<()> {
        let mut conn = self.conn.clone();
        self.run(async move {
            redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
            Ok(())
        })
        .await
    }

    /// Whether `key` exists.
    pub async fn exists(&self, key: &str) -> ProtectionResult<bool> {
        let mut conn = self.conn.clone();
        let key = key.to_string();
        self.run(async move { conn.exists(key).await }).await
    }

    /// Set `key` to a marker value, with an optional TTL.
    pub async fn set_marker(&self, key: &str, ttl: Option<Duration>) -> ProtectionResult<()> {
        let mut conn = self.conn.clone();
        let key = key.to_string();
        self.run(async move {
            match ttl {
                Some(ttl) => conn.set_ex(key, "1", ttl.as_secs().max(1)).await,
                None => conn.set(key, "1").await,
            }
        })
        .await
    }

    /// Delete `key`.
    pub async fn delete(&self, key: &str) -> ProtectionResult<()> {
        let mut conn = self.conn.clone();
        let key = key.to_string();
        self.run(async move { conn.del(key).await }).await
    }

    /// Sliding-window admission bookkeeping for the distributed rate limiter.
    ///
    /// Atomically drops entries older than the window, counts the remainder,
    /// appends the current timestamp and refreshes the TTL. Returns the count
    /// *before* the append, so callers admit while `count < limit`.
    pub async fn sliding_window_count(
        &self,
        key: &str,
        window: Duration,
    ) -> ProtectionResult<i64> {
        let mut conn = self.conn.clone();
        let key = key.to_string();
        let now = chrono::Utc::now();
        let cutoff = now.timestamp() - window.as_secs() as i64;
        let member = now.timestamp_nanos_opt().unwrap_or_else(|| now.timestamp());
        let ttl = window.as_secs().max(1) as i64;

        self.run(async move {
            let (count,): (i64,) = redis::pipe()
                .atomic()
                .cmd("ZREMRANGEBYSCORE")
                .arg(&key)
                .arg(0)
                .arg(cutoff)
                .ignore()
                .cmd("ZCARD")
                .arg(&key)
                .cmd("ZADD")
                .arg(&key)
                .arg(now.timestamp())
                .arg(member)
                .ignore()
                .cmd("EXPIRE")
                .arg(&key)
                .arg(ttl)
                .ignore()
                .query_async(&mut conn)
                .await?;
            Ok(count)
        })
        .await
    }
}

impl std::fmt::Debug for RemoteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStore")
            .field("op_timeout", &self.op_timeout)
            .field("degraded", &self.is_degraded())
            .finish_non_exhaustive()
    }
}
