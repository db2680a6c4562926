//! Cache-aware fetch layer.
//!
//! Single entry point for stories, comments, users and feeds. Reads consult
//! the memory tier first; misses and stale entries go to the network and the
//! decoded payload is written back (which in turn persists to disk).

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::cache::{CacheBehavior, CachedValue, ResponseCache};
use crate::error::{FetchError, FetchResult};
use crate::hn_client::ItemSource;
use crate::models::{Comment, Feed, Item, ItemId, Story, User};

/// Where a fetched value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Cache,
    Network,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<T> {
    pub value: T,
    pub source: Source,
}

impl<T> Fetched<T> {
    fn map<U>(self, f: impl FnOnce(T) -> FetchResult<U>) -> FetchResult<Fetched<U>> {
        Ok(Fetched {
            value: f(self.value)?,
            source: self.source,
        })
    }
}

pub fn item_key(id: ItemId) -> String {
    format!("item/{}", id)
}

pub fn user_key(name: &str) -> String {
    format!("user/{}", urlencoding::encode(name))
}

pub fn feed_key(feed: Feed) -> String {
    format!("feed/{}", feed.name())
}

#[derive(Clone)]
pub struct Fetcher {
    source: Arc<dyn ItemSource>,
    cache: Arc<ResponseCache>,
    timeout: Duration,
}

impl Fetcher {
    pub fn new(source: Arc<dyn ItemSource>, cache: Arc<ResponseCache>, timeout: Duration) -> Self {
        Self {
            source,
            cache,
            timeout,
        }
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub async fn fetch_item(&self, id: ItemId, behavior: CacheBehavior) -> FetchResult<Fetched<Item>> {
        let key = item_key(id);
        self.fetch_json(&key, &key, behavior, Item::from_value).await
    }

    pub async fn fetch_story(&self, id: ItemId, behavior: CacheBehavior) -> FetchResult<Fetched<Story>> {
        self.fetch_item(id, behavior).await?.map(Item::into_story)
    }

    pub async fn fetch_comment(
        &self,
        id: ItemId,
        behavior: CacheBehavior,
    ) -> FetchResult<Fetched<Comment>> {
        self.fetch_item(id, behavior).await?.map(Item::into_comment)
    }

    pub async fn fetch_user(&self, name: &str, behavior: CacheBehavior) -> FetchResult<Fetched<User>> {
        let key = user_key(name);
        self.fetch_json(&key, &key, behavior, User::from_value).await
    }

    /// Ordered story ids of a listing.
    pub async fn fetch_feed(&self, feed: Feed, behavior: CacheBehavior) -> FetchResult<Fetched<Vec<ItemId>>> {
        self.fetch_json(&feed_key(feed), feed.path(), behavior, |value| {
            Ok(serde_json::from_value(value.clone())?)
        })
        .await
    }

    /// Fetch several stories concurrently; results keep the order of `ids`.
    pub async fn fetch_stories(&self, ids: &[ItemId], behavior: CacheBehavior) -> Vec<FetchResult<Story>> {
        let mut tasks = JoinSet::new();
        for (index, id) in ids.iter().copied().enumerate() {
            let fetcher = self.clone();
            tasks.spawn(async move {
                let story = fetcher.fetch_story(id, behavior).await.map(|f| f.value);
                (index, story)
            });
        }

        let mut results: Vec<Option<FetchResult<Story>>> = ids.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, story)) => results[index] = Some(story),
                Err(e) => warn!(error = %e, "story fetch task failed"),
            }
        }

        results
            .into_iter()
            .map(|r| r.unwrap_or_else(|| Err(FetchError::Generic("story fetch task failed".to_string()))))
            .collect()
    }

    /// Fetch a resource body verbatim, cached as raw bytes.
    pub async fn fetch_raw(&self, path: &str, behavior: CacheBehavior) -> FetchResult<Fetched<Vec<u8>>> {
        if let Some(entry) = self.cache.get_valid(path, behavior) {
            if let CachedValue::Raw(bytes) = entry.value {
                debug!(key = path, "cache hit");
                return Ok(Fetched {
                    value: bytes,
                    source: Source::Cache,
                });
            }
        }

        let bytes = self.with_timeout(self.source.get_bytes(path)).await?;
        self.cache.set(CachedValue::Raw(bytes.clone()), path);
        Ok(Fetched {
            value: bytes,
            source: Source::Network,
        })
    }

    async fn fetch_json<T, F>(
        &self,
        key: &str,
        path: &str,
        behavior: CacheBehavior,
        decode: F,
    ) -> FetchResult<Fetched<T>>
    where
        F: Fn(&serde_json::Value) -> FetchResult<T>,
    {
        if let Some(entry) = self.cache.get_valid(key, behavior) {
            if let CachedValue::Json(value) = &entry.value {
                match decode(value) {
                    Ok(decoded) => {
                        debug!(key, "cache hit");
                        return Ok(Fetched {
                            value: decoded,
                            source: Source::Cache,
                        });
                    }
                    Err(FetchError::Deleted(id)) => return Err(FetchError::Deleted(id)),
                    Err(e) => warn!(key, error = %e, "ignoring undecodable cache entry"),
                }
            }
        }

        debug!(key, "cache miss; fetching");
        let value = self.with_timeout(self.source.get_json(path)).await?;

        match decode(&value) {
            Ok(decoded) => {
                self.cache.set(CachedValue::Json(value), key);
                Ok(Fetched {
                    value: decoded,
                    source: Source::Network,
                })
            }
            Err(FetchError::Deleted(id)) => {
                // Tombstones are a valid answer; remember them
                self.cache.set(CachedValue::Json(value), key);
                Err(FetchError::Deleted(id))
            }
            Err(e) => {
                warn!(key, error = %e, "failed to decode response");
                Err(e)
            }
        }
    }

    async fn with_timeout<T>(
        &self,
        request: impl std::future::Future<Output = FetchResult<T>>,
    ) -> FetchResult<T> {
        tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| FetchError::Timeout(self.timeout))?
    }
}
