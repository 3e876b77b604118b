//! TTL cache in front of the persistent store.
//!
//! [`KvStore`] is the string-keyed, string-valued store contract with
//! expiry. Two backends are provided:
//!
//! - **[`MemoryKvStore`]**: bounded in-process `moka` cache; each entry expires after its own TTL.
//! - **[`RedisKvStore`]**: `SETEX`/`GET`/`DEL` through a reconnecting connection manager.
//!
//! [`ResultCache`] layers JSON (de)serialization on top and absorbs every
//! failure: a broken cache reads as a miss and writes become no-ops, so the
//! request path it accelerates is never blocked by it.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::CacheConfig;

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Returns the value if present and not expired.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Stores `value` under `key`, replacing any previous value, expiring after `ttl_secs`.
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;
}

// ============ Memory backend ============

/// Upper bound on in-process entries; least-used entries are evicted past it.
pub const DEFAULT_MAX_ENTRIES: u64 = 10_000;

#[derive(Clone)]
struct MemoryEntry {
    value: String,
    ttl: Duration,
}

/// Expires each entry after the TTL it was written with.
struct PerEntryTtl;

impl Expiry<String, MemoryEntry> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &MemoryEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &MemoryEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-process backend on a bounded `moka` cache with per-entry expiry.
pub struct MemoryKvStore {
    entries: Cache<String, MemoryEntry>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_ENTRIES)
    }

    pub fn with_capacity(max_entries: u64) -> Self {
        Self {
            entries: Cache::builder()
                .max_capacity(max_entries)
                .expire_after(PerEntryTtl)
                .build(),
        }
    }
}

impl Default for MemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).await.map(|entry| entry.value))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        self.entries
            .insert(
                key.to_string(),
                MemoryEntry {
                    value: value.to_string(),
                    ttl: Duration::from_secs(ttl_secs),
                },
            )
            .await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.invalidate(key).await;
        Ok(())
    }
}

// ============ Redis backend ============

pub struct RedisKvStore {
    connection: ConnectionManager,
}

impl RedisKvStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let config = ConnectionManagerConfig::new().set_number_of_retries(1);
        let client = redis::Client::open(url)?;
        let connection = client.get_connection_manager_with_config(config).await?;
        Ok(Self { connection })
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: () = conn.set_ex(key, value, ttl_secs).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }
}

/// Builds the configured backend.
pub async fn create_store(config: &CacheConfig) -> Result<Arc<dyn KvStore>> {
    match config.backend.as_str() {
        "memory" => Ok(Arc::new(MemoryKvStore::with_capacity(config.max_entries))),
        "redis" => {
            let url = config
                .url
                .as_deref()
                .ok_or_else(|| anyhow!("cache.url required for redis backend"))?;
            Ok(Arc::new(RedisKvStore::connect(url).await?))
        }
        other => anyhow::bail!("Unknown cache backend: {}", other),
    }
}

// ============ Result cache ============

/// Best-effort JSON cache. `None` from [`get`](ResultCache::get) is the miss signal.
#[derive(Clone)]
pub struct ResultCache {
    store: Arc<dyn KvStore>,
    default_ttl_secs: u64,
}

impl ResultCache {
    pub const DEFAULT_TTL_SECS: u64 = 3600;

    pub fn new(store: Arc<dyn KvStore>, default_ttl_secs: u64) -> Self {
        Self {
            store,
            default_ttl_secs,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryKvStore::new()), Self::DEFAULT_TTL_SECS)
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> bool {
        self.set_with_ttl(key, value, self.default_ttl_secs).await
    }

    /// Returns whether the value was stored. Failures are logged and absorbed.
    pub async fn set_with_ttl<T: Serialize>(&self, key: &str, value: &T, ttl_secs: u64) -> bool {
        let serialized = match serde_json::to_string(value) {
            Ok(s) => s,
            Err(e) => {
                warn!(key, error = %e, "cache set: serialization failed");
                return false;
            }
        };
        match self.store.set_ex(key, &serialized, ttl_secs).await {
            Ok(()) => true,
            Err(e) => {
                warn!(key, error = %e, "cache set failed");
                false
            }
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.store.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!(key, "cache miss");
                return None;
            }
            Err(e) => {
                warn!(key, error = %e, "cache get failed");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => {
                debug!(key, "cache hit");
                Some(value)
            }
            Err(e) => {
                warn!(key, error = %e, "cache get: stale or corrupt entry");
                None
            }
        }
    }

    pub async fn invalidate(&self, key: &str) {
        if let Err(e) = self.store.delete(key).await {
            warn!(key, error = %e, "cache invalidate failed");
        }
    }
}
