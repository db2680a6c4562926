//! Two-tier response cache.
//!
//! The memory tier ([`ResponseCache`]) is authoritative for the session and
//! writes behind to a [`DiskStore`], which survives restarts. Freshness is
//! decided per read by a [`CacheBehavior`]; entries are never mutated by it.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::config::FRESHNESS_WINDOW;
use crate::error::{StoreError, StoreResult};

/// How a read treats an entry's age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBehavior {
    /// Valid while younger than the freshness window.
    #[default]
    Default,
    /// Never valid; forces a refetch.
    Ignore,
    /// Always valid regardless of age.
    Offline,
}

impl std::str::FromStr for CacheBehavior {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "default" => Ok(CacheBehavior::Default),
            "ignore" => Ok(CacheBehavior::Ignore),
            "offline" => Ok(CacheBehavior::Offline),
            other => Err(format!("unknown cache behavior '{}'", other)),
        }
    }
}

/// Type tag persisted next to every value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Json,
    Raw,
}

impl ValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::Json => "json",
            ValueKind::Raw => "raw",
        }
    }

    pub fn parse(tag: &str) -> Option<ValueKind> {
        match tag {
            "json" => Some(ValueKind::Json),
            "raw" => Some(ValueKind::Raw),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CachedValue {
    Json(serde_json::Value),
    Raw(Vec<u8>),
}

impl CachedValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            CachedValue::Json(_) => ValueKind::Json,
            CachedValue::Raw(_) => ValueKind::Raw,
        }
    }

    /// Serialized form written to disk.
    pub fn to_bytes(&self) -> StoreResult<Vec<u8>> {
        match self {
            CachedValue::Json(value) => Ok(serde_json::to_vec(value)?),
            CachedValue::Raw(bytes) => Ok(bytes.clone()),
        }
    }

    pub fn from_bytes(kind: ValueKind, bytes: Vec<u8>) -> StoreResult<CachedValue> {
        match kind {
            ValueKind::Json => Ok(CachedValue::Json(serde_json::from_slice(&bytes)?)),
            ValueKind::Raw => Ok(CachedValue::Raw(bytes)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    pub value: CachedValue,
    pub timestamp: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, value: CachedValue) -> Self {
        Self::with_timestamp(key, value, Utc::now())
    }

    pub fn with_timestamp(
        key: impl Into<String>,
        value: CachedValue,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            key: key.into(),
            value,
            timestamp,
        }
    }

    /// Age relative to `now`; an entry stamped in the future has age zero.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.timestamp).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn is_valid(&self, behavior: CacheBehavior) -> bool {
        self.is_valid_at(behavior, Utc::now(), FRESHNESS_WINDOW)
    }

    pub fn is_valid_at(
        &self,
        behavior: CacheBehavior,
        now: DateTime<Utc>,
        freshness_window: Duration,
    ) -> bool {
        match behavior {
            CacheBehavior::Default => self.age(now) < freshness_window,
            CacheBehavior::Ignore => false,
            CacheBehavior::Offline => true,
        }
    }
}

/// Size summary of a disk tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: u64,
}

impl CacheStats {
    pub fn human_size(&self) -> String {
        const KB: u64 = 1024;
        const MB: u64 = 1024 * KB;

        if self.total_bytes >= MB {
            format!("{:.1} MiB", self.total_bytes as f64 / MB as f64)
        } else if self.total_bytes >= KB {
            format!("{:.1} KiB", self.total_bytes as f64 / KB as f64)
        } else {
            format!("{} B", self.total_bytes)
        }
    }
}

/// Persistent key-value tier.
///
/// Every `store` is a full replace. `load_all` sweeps records older than the
/// store's TTL and treats scan failures as an empty cache.
#[async_trait]
pub trait DiskStore: Send + Sync {
    async fn store(&self, key: &str, value: &CachedValue) -> StoreResult<()>;

    /// Fails with [`StoreError::NotFound`] when there is no record or it was
    /// stored with a different kind.
    async fn retrieve(&self, key: &str, kind: ValueKind) -> StoreResult<CachedValue>;

    async fn remove(&self, key: &str) -> StoreResult<()>;

    async fn load_all(&self) -> HashMap<String, CacheEntry>;

    async fn clear_cache(&self) -> StoreResult<()>;

    async fn stats(&self) -> StoreResult<CacheStats>;
}

enum DiskOp {
    Store(String, CachedValue),
    Remove(String),
    Clear(oneshot::Sender<StoreResult<()>>),
    Flush(oneshot::Sender<()>),
}

#[derive(Default)]
struct MemoryTier {
    entries: HashMap<String, CacheEntry>,
    /// The disk load has not been merged yet.
    warming: bool,
    /// Removed while warming; their disk copies must not come back.
    removed: HashSet<String>,
    /// Cleared while warming; the whole disk load is dropped.
    cleared: bool,
}

impl MemoryTier {
    fn remove(&mut self, key: &str) {
        self.entries.remove(key);
        if self.warming {
            self.removed.insert(key.to_string());
        }
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.removed.clear();
        self.cleared = self.warming;
    }

    /// Fold the disk load in under anything written, removed or cleared
    /// since construction.
    fn merge(&mut self, loaded: HashMap<String, CacheEntry>) -> usize {
        let mut merged = 0;
        if !self.cleared {
            for (key, entry) in loaded {
                if self.removed.contains(&key) || self.entries.contains_key(&key) {
                    continue;
                }
                self.entries.insert(key, entry);
                merged += 1;
            }
        }
        self.warming = false;
        self.cleared = false;
        self.removed.clear();
        merged
    }
}

/// In-memory tier, optionally backed by a [`DiskStore`].
///
/// Disk writes go through a single queue so they land in call order.
pub struct ResponseCache {
    memory: Arc<Mutex<MemoryTier>>,
    writer: Option<mpsc::UnboundedSender<DiskOp>>,
    freshness_window: Duration,
}

impl ResponseCache {
    /// Memory-only cache; nothing survives the process.
    pub fn in_memory(freshness_window: Duration) -> Self {
        Self {
            memory: Arc::new(Mutex::new(MemoryTier::default())),
            writer: None,
            freshness_window,
        }
    }

    /// Cache backed by `disk`. Must be called within a tokio runtime.
    ///
    /// Non-expired disk records are loaded in the background; reads issued
    /// before that finishes may miss them.
    pub fn new(disk: Arc<dyn DiskStore>, freshness_window: Duration) -> Self {
        let memory = Arc::new(Mutex::new(MemoryTier {
            warming: true,
            ..MemoryTier::default()
        }));
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(run_writer(disk, Arc::clone(&memory), rx));

        Self {
            memory,
            writer: Some(tx),
            freshness_window,
        }
    }

    pub fn freshness_window(&self) -> Duration {
        self.freshness_window
    }

    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        lock(&self.memory).entries.get(key).cloned()
    }

    /// Returns the entry only if it satisfies `behavior`.
    pub fn get_valid(&self, key: &str, behavior: CacheBehavior) -> Option<CacheEntry> {
        let entry = self.get(key)?;
        if entry.is_valid_at(behavior, Utc::now(), self.freshness_window) {
            Some(entry)
        } else {
            None
        }
    }

    /// Store `value` stamped with the current time and queue it for disk.
    pub fn set(&self, value: CachedValue, key: &str) {
        let entry = CacheEntry::new(key, value.clone());
        lock(&self.memory).entries.insert(key.to_string(), entry);
        self.send(DiskOp::Store(key.to_string(), value));
    }

    pub fn remove(&self, key: &str) {
        lock(&self.memory).remove(key);
        self.send(DiskOp::Remove(key.to_string()));
    }

    pub fn len(&self) -> usize {
        lock(&self.memory).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wipe both tiers.
    pub async fn clear(&self) -> StoreResult<()> {
        lock(&self.memory).clear();
        let Some(writer) = &self.writer else {
            return Ok(());
        };

        let (tx, rx) = oneshot::channel();
        writer
            .send(DiskOp::Clear(tx))
            .map_err(|_| StoreError::WriterClosed)?;
        rx.await.unwrap_or(Err(StoreError::WriterClosed))
    }

    /// Wait until the initial disk load and every queued write are done.
    pub async fn flush(&self) {
        let Some(writer) = &self.writer else {
            return;
        };
        let (tx, rx) = oneshot::channel();
        if writer.send(DiskOp::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    fn send(&self, op: DiskOp) {
        if let Some(writer) = &self.writer {
            if writer.send(op).is_err() {
                warn!("disk writer has stopped; cache write not persisted");
            }
        }
    }
}

async fn run_writer(
    disk: Arc<dyn DiskStore>,
    memory: Arc<Mutex<MemoryTier>>,
    mut ops: mpsc::UnboundedReceiver<DiskOp>,
) {
    let loaded = disk.load_all().await;
    let on_disk = loaded.len();
    let merged = lock(&memory).merge(loaded);
    debug!(on_disk, merged, "loaded response cache from disk");

    while let Some(op) = ops.recv().await {
        match op {
            DiskOp::Store(key, value) => {
                if let Err(e) = disk.store(&key, &value).await {
                    warn!(%key, error = %e, "failed to persist cache entry");
                }
            }
            DiskOp::Remove(key) => {
                if let Err(e) = disk.remove(&key).await {
                    warn!(%key, error = %e, "failed to remove cache entry");
                }
            }
            DiskOp::Clear(done) => {
                let _ = done.send(disk.clear_cache().await);
            }
            DiskOp::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
