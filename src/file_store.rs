//! Filesystem disk tier.
//!
//! One file per key, named `<md5(key)>.<kind>`. Each file starts with a JSON
//! header line carrying the original key and creation time; the payload
//! follows verbatim.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::cache::{CacheEntry, CacheStats, CachedValue, DiskStore, ValueKind};
use crate::error::{StoreError, StoreResult};

const KINDS: [ValueKind; 2] = [ValueKind::Json, ValueKind::Raw];

#[derive(Debug, Serialize, Deserialize)]
struct RecordHeader {
    key: String,
    created_at: DateTime<Utc>,
}

pub struct FileStore {
    dir: PathBuf,
    ttl: Duration,
    /// Held by every mutation so writes never interleave.
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            dir: dir.into(),
            ttl,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, key: &str, kind: ValueKind) -> PathBuf {
        self.dir
            .join(format!("{:x}.{}", md5::compute(key.as_bytes()), kind.as_str()))
    }

    /// Upsert a complete entry, keeping its timestamp.
    pub async fn store_entry(&self, entry: CacheEntry) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        fs::create_dir_all(&self.dir).await?;

        for kind in KINDS {
            remove_if_present(&self.record_path(&entry.key, kind)).await?;
        }

        let kind = entry.value.kind();
        let header = RecordHeader {
            key: entry.key.clone(),
            created_at: entry.timestamp,
        };
        let mut contents = serde_json::to_vec(&header)?;
        contents.push(b'\n');
        contents.extend(entry.value.to_bytes()?);

        // Write then rename so a reader never sees a half-written record
        let path = self.record_path(&entry.key, kind);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, contents).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn read_record(path: &Path, kind: ValueKind) -> StoreResult<CacheEntry> {
        let contents = fs::read(path).await?;
        let split = contents
            .iter()
            .position(|b| *b == b'\n')
            .ok_or_else(|| StoreError::NotFound(path.display().to_string()))?;
        let header: RecordHeader = serde_json::from_slice(&contents[..split])?;
        let value = CachedValue::from_bytes(kind, contents[split + 1..].to_vec())?;
        Ok(CacheEntry::with_timestamp(header.key, value, header.created_at))
    }

    async fn scan(&self) -> StoreResult<HashMap<String, CacheEntry>> {
        let mut live = HashMap::new();
        let mut expired = Vec::new();
        let now = Utc::now();

        let mut dir = match fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(live),
            Err(e) => return Err(e.into()),
        };

        while let Some(file) = dir.next_entry().await? {
            let path = file.path();
            let Some(kind) = path
                .extension()
                .and_then(|ext| ext.to_str())
                .and_then(ValueKind::parse)
            else {
                continue;
            };

            match Self::read_record(&path, kind).await {
                Ok(entry) if entry.age(now) < self.ttl => {
                    live.insert(entry.key.clone(), entry);
                }
                Ok(_) => expired.push(path),
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "dropping unreadable cache record");
                    expired.push(path);
                }
            }
        }

        if !expired.is_empty() {
            let _guard = self.write_lock.lock().await;
            for path in &expired {
                remove_if_present(path).await?;
            }
            debug!(count = expired.len(), "swept expired cache records");
        }

        Ok(live)
    }
}

async fn remove_if_present(path: &Path) -> StoreResult<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl DiskStore for FileStore {
    async fn store(&self, key: &str, value: &CachedValue) -> StoreResult<()> {
        self.store_entry(CacheEntry::new(key, value.clone())).await
    }

    async fn retrieve(&self, key: &str, kind: ValueKind) -> StoreResult<CachedValue> {
        let path = self.record_path(key, kind);
        match Self::read_record(&path, kind).await {
            Ok(entry) if entry.key == key => Ok(entry.value),
            Ok(_) => Err(StoreError::NotFound(key.to_string())),
            Err(StoreError::Io(e)) if e.kind() == ErrorKind::NotFound => {
                Err(StoreError::NotFound(key.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    async fn remove(&self, key: &str) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        for kind in KINDS {
            remove_if_present(&self.record_path(key, kind)).await?;
        }
        Ok(())
    }

    async fn load_all(&self) -> HashMap<String, CacheEntry> {
        match self.scan().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "failed to scan cache directory; starting cold");
                HashMap::new()
            }
        }
    }

    async fn clear_cache(&self) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut dir = match fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        while let Some(file) = dir.next_entry().await? {
            let path = file.path();
            let ours = matches!(
                path.extension().and_then(|ext| ext.to_str()),
                Some("json" | "raw" | "tmp")
            );
            if ours {
                remove_if_present(&path).await?;
            }
        }
        Ok(())
    }

    async fn stats(&self) -> StoreResult<CacheStats> {
        let mut stats = CacheStats {
            entries: 0,
            total_bytes: 0,
        };
        let mut dir = match fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(stats),
            Err(e) => return Err(e.into()),
        };

        while let Some(file) = dir.next_entry().await? {
            let path = file.path();
            if path
                .extension()
                .and_then(|ext| ext.to_str())
                .and_then(ValueKind::parse)
                .is_some()
            {
                stats.entries += 1;
                stats.total_bytes += file.metadata().await.map(|m| m.len()).unwrap_or(0);
            }
        }
        Ok(stats)
    }
}
