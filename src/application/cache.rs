// In-memory result cache with TTL expiry and LRU eviction
use crate::domain::execution::ExecutionResult;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_MAX_ENTRIES: usize = 1000;
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(300);
/// Longer TTLs are clamped to this.
pub const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache is closed")]
    Closed,

    #[error("failed to serialize cached result: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub hit_rate: f64,
    pub last_cleanup: Option<DateTime<Utc>>,
}

/// Key-agnostic store of execution results. `get` never fails: anything
/// unusable is a miss.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Option<ExecutionResult>;

    async fn set(&self, key: &str, result: &ExecutionResult, ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    async fn clear(&self) -> Result<(), CacheError>;

    async fn stats(&self) -> CacheStats;

    /// Stops background work and drops every entry. Safe to call repeatedly.
    async fn close(&self) -> Result<(), CacheError>;
}

struct Entry {
    payload: Bytes,
    expires_at: Instant,
    last_used: AtomicU64,
}

struct Shared {
    entries: RwLock<HashMap<String, Entry>>,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    clock: AtomicU64,
    closed: AtomicBool,
    last_cleanup: Mutex<Option<DateTime<Utc>>>,
}

impl Shared {
    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        let removed = before - entries.len();
        drop(entries);

        if let Ok(mut last) = self.last_cleanup.lock() {
            *last = Some(Utc::now());
        }
        removed
    }
}

pub struct MemoryCache {
    shared: Arc<Shared>,
    shutdown: CancellationToken,
    cleanup: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                entries: RwLock::new(HashMap::new()),
                max_entries: max_entries.max(1),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                clock: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                last_cleanup: Mutex::new(None),
            }),
            shutdown: CancellationToken::new(),
            cleanup: Mutex::new(None),
        }
    }

    /// Cache with a background task purging expired entries every `interval`.
    /// Must be called from within a tokio runtime.
    pub fn with_cleanup(max_entries: usize, interval: Duration) -> Self {
        let cache = Self::new(max_entries);
        cache.start_cleanup(interval);
        cache
    }

    fn start_cleanup(&self, interval: Duration) {
        let shared = self.shared.clone();
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = shared.purge_expired().await;
                        tracing::debug!(removed, "Cache cleanup pass");
                    }
                }
            }
        });

        if let Ok(mut slot) = self.cleanup.lock() {
            *slot = Some(handle);
        }
    }

    /// Drop expired entries now, returning how many were removed.
    pub async fn purge_expired(&self) -> usize {
        self.shared.purge_expired().await
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Option<ExecutionResult> {
        let entries = self.shared.entries.read().await;
        let hit = entries
            .get(key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| {
                entry.last_used.store(self.shared.tick(), Ordering::Relaxed);
                entry.payload.clone()
            });
        drop(entries);

        let decoded = hit.and_then(|payload| match serde_json::from_slice(&payload) {
            Ok(result) => Some(result),
            Err(err) => {
                tracing::warn!(key, error = %err, "Discarding undecodable cache entry");
                None
            }
        });

        let counter = if decoded.is_some() { &self.shared.hits } else { &self.shared.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        decoded
    }

    async fn set(&self, key: &str, result: &ExecutionResult, ttl: Duration) -> Result<(), CacheError> {
        if self.is_closed() {
            return Err(CacheError::Closed);
        }
        let payload = Bytes::from(serde_json::to_vec(result)?);
        let now = Instant::now();

        let mut entries = self.shared.entries.write().await;
        if !entries.contains_key(key) && entries.len() >= self.shared.max_entries {
            entries.retain(|_, entry| entry.expires_at > now);
            if entries.len() >= self.shared.max_entries {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.last_used.load(Ordering::Relaxed))
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    tracing::debug!(key = %oldest, "Evicting least recently used cache entry");
                    entries.remove(&oldest);
                }
            }
        }

        entries.insert(
            key.to_string(),
            Entry {
                payload,
                // An unrepresentable deadline stores an already expired entry.
                expires_at: now.checked_add(ttl.min(MAX_TTL)).unwrap_or(now),
                last_used: AtomicU64::new(self.shared.tick()),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.shared.entries.write().await.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.shared.entries.write().await.clear();
        Ok(())
    }

    async fn stats(&self) -> CacheStats {
        let hits = self.shared.hits.load(Ordering::Relaxed);
        let misses = self.shared.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            entries: self.shared.entries.read().await.len(),
            hit_rate: if total == 0 { 0.0 } else { hits as f64 / total as f64 },
            last_cleanup: self.shared.last_cleanup.lock().ok().and_then(|last| *last),
        }
    }

    async fn close(&self) -> Result<(), CacheError> {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.shutdown.cancel();

        let handle = self.cleanup.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "Cache cleanup task ended abnormally");
            }
        }

        self.shared.entries.write().await.clear();
        tracing::info!("Cache closed");
        Ok(())
    }
}

impl Drop for MemoryCache {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
