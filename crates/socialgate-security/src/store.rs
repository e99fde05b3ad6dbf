use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use socialgate_core::{AdmissionConfig, CounterStoreKind, GatewayError, GatewayResult};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::info;

/// Shared key-counter service consulted by admission policies.
///
/// Implementations must be safe to call from many requests at once; the
/// gateway treats them as atomic.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment `key` and return the new value. `ttl` is applied when the
    /// key is created and ignored afterwards.
    async fn incr(&self, key: &str, ttl: Option<Duration>) -> GatewayResult<u64>;
    /// Decrement `key`, never below zero, and return the new value.
    async fn decr(&self, key: &str) -> GatewayResult<u64>;
}

/// Key count above which expired counters are swept on the next `incr`.
const SWEEP_THRESHOLD: usize = 10_000;

struct Counter {
    value: u64,
    expires_at: Option<Instant>,
}

impl Counter {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-process counter store. Counters are lost on restart and not shared
/// between gateway replicas.
#[derive(Default)]
pub struct MemoryCounterStore {
    counters: Mutex<HashMap<String, Counter>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn incr(&self, key: &str, ttl: Option<Duration>) -> GatewayResult<u64> {
        let mut counters = self.counters.lock().await;
        let now = Instant::now();

        if counters.len() >= SWEEP_THRESHOLD {
            counters.retain(|_, c| !c.expired(now));
        }

        let counter = counters.entry(key.to_string()).or_insert_with(|| Counter {
            value: 0,
            expires_at: ttl.map(|t| now + t),
        });
        if counter.expired(now) {
            counter.value = 0;
            counter.expires_at = ttl.map(|t| now + t);
        }
        counter.value += 1;
        Ok(counter.value)
    }

    async fn decr(&self, key: &str) -> GatewayResult<u64> {
        let mut counters = self.counters.lock().await;
        let Some(counter) = counters.get_mut(key) else {
            return Ok(0);
        };
        counter.value = if counter.expired(Instant::now()) {
            0
        } else {
            counter.value.saturating_sub(1)
        };
        let value = counter.value;
        if value == 0 {
            counters.remove(key);
        }
        Ok(value)
    }
}

/// Counter store backed by Redis `INCR` / `EXPIRE` / `DECR`.
#[derive(Clone)]
pub struct RedisCounterStore {
    conn: ConnectionManager,
}

impl RedisCounterStore {
    /// Connect to Redis. Supports `redis://` and `rediss://` URLs.
    pub async fn connect(url: &str) -> GatewayResult<Self> {
        let client = redis::Client::open(url).map_err(store_error)?;
        let conn = ConnectionManager::new(client).await.map_err(store_error)?;
        Ok(Self { conn })
    }
}

fn store_error(e: redis::RedisError) -> GatewayError {
    GatewayError::Store(e.to_string())
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn incr(&self, key: &str, ttl: Option<Duration>) -> GatewayResult<u64> {
        let mut conn = self.conn.clone();
        let value: u64 = conn.incr(key, 1u64).await.map_err(store_error)?;
        if value == 1 {
            if let Some(ttl) = ttl {
                let secs = i64::try_from(ttl.as_secs().max(1)).unwrap_or(i64::MAX);
                let _: bool = conn.expire(key, secs).await.map_err(store_error)?;
            }
        }
        Ok(value)
    }

    async fn decr(&self, key: &str) -> GatewayResult<u64> {
        let mut conn = self.conn.clone();
        let value: i64 = conn.decr(key, 1i64).await.map_err(store_error)?;
        if value < 0 {
            let _: i64 = conn.del(key).await.map_err(store_error)?;
        }
        Ok(u64::try_from(value).unwrap_or(0))
    }
}

/// Open the counter store selected by `config`.
pub async fn connect_counter_store(
    config: &AdmissionConfig,
) -> GatewayResult<Arc<dyn CounterStore>> {
    match config.counter_store {
        CounterStoreKind::Memory => Ok(Arc::new(MemoryCounterStore::new())),
        CounterStoreKind::Redis => {
            let url = config.redis_url.as_deref().ok_or_else(|| {
                GatewayError::Config("redis counter store selected without a URL".to_string())
            })?;
            let store = RedisCounterStore::connect(url).await?;
            info!("Connected to Redis counter store");
            Ok(Arc::new(store))
        }
    }
}
