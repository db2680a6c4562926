use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::{debug, warn};

use crate::cache::{CacheEntry, CacheStats, CachedValue, DiskStore, ValueKind};
use crate::error::{StoreError, StoreResult};

/// Disk tier kept in a single SQLite table.
///
/// The connection sits behind a mutex, so writes are serialized; every call
/// runs on the blocking pool.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    ttl: Duration,
}

impl SqliteStore {
    pub fn open(path: &Path, ttl: Duration) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::with_connection(Connection::open(path)?, ttl)
    }

    /// A private in-memory database, mostly for tests.
    pub fn in_memory(ttl: Duration) -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?, ttl)
    }

    fn with_connection(conn: Connection, ttl: Duration) -> StoreResult<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS response_cache (
                key TEXT NOT NULL,
                kind TEXT NOT NULL,
                value BLOB NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_response_cache_key ON response_cache(key)",
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            ttl,
        })
    }

    /// Upsert a complete entry, keeping its timestamp.
    pub async fn store_entry(&self, entry: CacheEntry) -> StoreResult<()> {
        let bytes = entry.value.to_bytes()?;
        let kind = entry.value.kind();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM response_cache WHERE key = ?1", params![entry.key])?;
            tx.execute(
                "INSERT INTO response_cache (key, kind, value, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![entry.key, kind.as_str(), bytes, entry.timestamp.to_rfc3339()],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn with_conn<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|_| StoreError::Lock)?;
            f(&mut *conn)
        })
        .await?
    }

    fn scan(conn: &mut Connection, ttl: Duration) -> StoreResult<HashMap<String, CacheEntry>> {
        let now = Utc::now();
        let mut live = HashMap::new();
        let mut expired = Vec::new();

        {
            let mut stmt =
                conn.prepare("SELECT key, kind, value, created_at FROM response_cache")?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Vec<u8>>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?;

            for row in rows {
                let (key, kind, value, created_at) = row?;
                match decode_row(&key, &kind, value, &created_at) {
                    Some(entry) if entry.age(now) < ttl => {
                        live.insert(key, entry);
                    }
                    _ => expired.push(key),
                }
            }
        }

        if !expired.is_empty() {
            let tx = conn.transaction()?;
            for key in &expired {
                tx.execute("DELETE FROM response_cache WHERE key = ?1", params![key])?;
            }
            tx.commit()?;
            debug!(count = expired.len(), "swept expired cache records");
        }

        Ok(live)
    }
}

fn decode_row(key: &str, kind: &str, value: Vec<u8>, created_at: &str) -> Option<CacheEntry> {
    let kind = ValueKind::parse(kind)?;
    let timestamp = DateTime::parse_from_rfc3339(created_at)
        .ok()?
        .with_timezone(&Utc);
    let value = CachedValue::from_bytes(kind, value).ok()?;
    Some(CacheEntry::with_timestamp(key, value, timestamp))
}

#[async_trait]
impl DiskStore for SqliteStore {
    async fn store(&self, key: &str, value: &CachedValue) -> StoreResult<()> {
        self.store_entry(CacheEntry::new(key, value.clone())).await
    }

    async fn retrieve(&self, key: &str, kind: ValueKind) -> StoreResult<CachedValue> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let row = conn.query_row(
                "SELECT kind, value FROM response_cache WHERE key = ?1",
                params![key],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?)),
            );

            let (stored_kind, bytes) = match row {
                Ok(row) => row,
                Err(rusqlite::Error::QueryReturnedNoRows) => return Err(StoreError::NotFound(key)),
                Err(e) => return Err(e.into()),
            };

            if ValueKind::parse(&stored_kind) != Some(kind) {
                return Err(StoreError::NotFound(key));
            }
            CachedValue::from_bytes(kind, bytes)
        })
        .await
    }

    async fn remove(&self, key: &str) -> StoreResult<()> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM response_cache WHERE key = ?1", params![key])?;
            Ok(())
        })
        .await
    }

    async fn load_all(&self) -> HashMap<String, CacheEntry> {
        let ttl = self.ttl;
        match self.with_conn(move |conn| Self::scan(conn, ttl)).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "failed to scan response cache; starting cold");
                HashMap::new()
            }
        }
    }

    async fn clear_cache(&self) -> StoreResult<()> {
        self.with_conn(|conn| {
            let deleted = conn.execute("DELETE FROM response_cache", [])?;
            debug!(deleted, "cleared response cache");
            Ok(())
        })
        .await
    }

    async fn stats(&self) -> StoreResult<CacheStats> {
        self.with_conn(|conn| {
            let (entries, total_bytes) = conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(LENGTH(value)), 0) FROM response_cache",
                [],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
            )?;
            Ok(CacheStats {
                entries: entries as usize,
                total_bytes: total_bytes as u64,
            })
        })
        .await
    }
}
