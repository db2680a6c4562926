//! Shared fixtures: an in-process stand-in for the item API.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use hn_thread_loader::config::FRESHNESS_WINDOW;
use hn_thread_loader::error::FetchResult;
use hn_thread_loader::{FetchError, Fetcher, ItemId, ItemSource, ResponseCache};

/// Serves canned payloads and counts every request per path.
#[derive(Default)]
pub struct MockSource {
    json: Mutex<HashMap<String, Value>>,
    raw: Mutex<HashMap<String, Vec<u8>>>,
    failing: Mutex<HashSet<String>>,
    calls: Mutex<HashMap<String, usize>>,
    delay: Duration,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every request sleeps this long before answering.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn put(&self, path: &str, value: Value) {
        self.json.lock().unwrap().insert(path.to_string(), value);
    }

    pub fn put_raw(&self, path: &str, body: &[u8]) {
        self.raw.lock().unwrap().insert(path.to_string(), body.to_vec());
    }

    pub fn story(&self, id: ItemId, kids: &[ItemId]) {
        self.put(
            &format!("item/{}", id),
            json!({
                "id": id, "type": "story", "by": "author", "title": format!("Story {}", id),
                "score": 10, "time": 1_700_000_000, "kids": kids, "descendants": kids.len(),
                "url": "https://example.com/post"
            }),
        );
    }

    pub fn comment(&self, id: ItemId, parent: ItemId, kids: &[ItemId]) {
        self.put(
            &format!("item/{}", id),
            json!({
                "id": id, "type": "comment", "by": format!("user{}", id), "parent": parent,
                "kids": kids, "text": format!("comment {}", id), "time": 1_700_000_100
            }),
        );
    }

    pub fn deleted(&self, id: ItemId, parent: ItemId) {
        self.put(
            &format!("item/{}", id),
            json!({"id": id, "deleted": true, "type": "comment", "parent": parent, "time": 1_700_000_000}),
        );
    }

    /// Requests for `path` fail with a generic error.
    pub fn fail(&self, path: &str) {
        self.failing.lock().unwrap().insert(path.to_string());
    }

    pub fn calls(&self, path: &str) -> usize {
        self.calls.lock().unwrap().get(path).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    async fn record(&self, path: &str) -> FetchResult<()> {
        *self.calls.lock().unwrap().entry(path.to_string()).or_insert(0) += 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.lock().unwrap().contains(path) {
            return Err(FetchError::Generic(format!("connection reset fetching {}", path)));
        }
        Ok(())
    }
}

#[async_trait]
impl ItemSource for MockSource {
    async fn get_json(&self, path: &str) -> FetchResult<Value> {
        self.record(path).await?;
        Ok(self.json.lock().unwrap().get(path).cloned().unwrap_or(Value::Null))
    }

    async fn get_bytes(&self, path: &str) -> FetchResult<Vec<u8>> {
        self.record(path).await?;
        self.raw
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| FetchError::Generic(format!("404 for {}", path)))
    }
}

/// Fetcher over `source` with an empty, memory-only cache.
pub fn memory_fetcher(source: &Arc<MockSource>) -> Fetcher {
    let source: Arc<dyn ItemSource> = source.clone();
    Fetcher::new(
        source,
        Arc::new(ResponseCache::in_memory(FRESHNESS_WINDOW)),
        Duration::from_secs(15),
    )
}
