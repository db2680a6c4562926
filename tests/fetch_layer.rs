//! Cache-aware fetching across both cache tiers.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;

use common::{memory_fetcher, MockSource};
use hn_thread_loader::config::{DISK_TTL, FRESHNESS_WINDOW};
use hn_thread_loader::{
    CacheBehavior, CacheEntry, CachedValue, DiskStore, Feed, FetchError, Fetcher, FileStore,
    ItemSource, ResponseCache, Source, SqliteStore, ValueKind,
};

fn fetcher_with(source: &Arc<MockSource>, cache: Arc<ResponseCache>) -> Fetcher {
    let source: Arc<dyn ItemSource> = source.clone();
    Fetcher::new(source, cache, Duration::from_secs(15))
}

#[tokio::test]
async fn second_fetch_within_window_is_served_from_cache() {
    let source = Arc::new(MockSource::new());
    source.story(42, &[]);
    let disk = Arc::new(SqliteStore::in_memory(DISK_TTL).unwrap());
    let cache = Arc::new(ResponseCache::new(disk.clone(), FRESHNESS_WINDOW));
    let fetcher = fetcher_with(&source, Arc::clone(&cache));

    let first = fetcher.fetch_item(42, CacheBehavior::Default).await.unwrap();
    assert_eq!(first.source, Source::Network);
    assert_eq!(source.calls("item/42"), 1);

    let second = fetcher.fetch_item(42, CacheBehavior::Default).await.unwrap();
    assert_eq!(second.source, Source::Cache);
    assert_eq!(second.value, first.value);
    assert_eq!(source.total_calls(), 1);

    // The write-behind reached the disk tier
    cache.flush().await;
    assert!(matches!(
        disk.retrieve("item/42", ValueKind::Json).await,
        Ok(CachedValue::Json(_))
    ));
}

#[tokio::test]
async fn ignore_always_refetches() {
    let source = Arc::new(MockSource::new());
    source.story(1, &[]);
    let fetcher = memory_fetcher(&source);

    fetcher.fetch_item(1, CacheBehavior::Default).await.unwrap();
    let again = fetcher.fetch_item(1, CacheBehavior::Ignore).await.unwrap();

    assert_eq!(again.source, Source::Network);
    assert_eq!(source.calls("item/1"), 2);
}

#[tokio::test]
async fn offline_serves_stale_entries_default_does_not() {
    let source = Arc::new(MockSource::new());
    source.story(5, &[]);
    let disk = Arc::new(SqliteStore::in_memory(DISK_TTL).unwrap());
    let stale = CacheEntry::with_timestamp(
        "item/5",
        CachedValue::Json(json!({"id": 5, "type": "story", "title": "Cached title", "time": 1})),
        Utc::now() - ChronoDuration::hours(1),
    );
    disk.store_entry(stale).await.unwrap();

    let cache = Arc::new(ResponseCache::new(disk, FRESHNESS_WINDOW));
    cache.flush().await;
    let fetcher = fetcher_with(&source, cache);

    let offline = fetcher.fetch_story(5, CacheBehavior::Offline).await.unwrap();
    assert_eq!(offline.source, Source::Cache);
    assert_eq!(offline.value.title, "Cached title");
    assert_eq!(source.total_calls(), 0);

    let fresh = fetcher.fetch_story(5, CacheBehavior::Default).await.unwrap();
    assert_eq!(fresh.source, Source::Network);
    assert_eq!(fresh.value.title, "Story 5");
}

#[tokio::test]
async fn cache_survives_restart_on_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(MockSource::new());
    source.comment(9, 1, &[]);

    {
        let disk = Arc::new(FileStore::new(dir.path(), DISK_TTL));
        let cache = Arc::new(ResponseCache::new(disk, FRESHNESS_WINDOW));
        let fetcher = fetcher_with(&source, Arc::clone(&cache));
        fetcher.fetch_comment(9, CacheBehavior::Default).await.unwrap();
        cache.flush().await;
    }

    let disk = Arc::new(FileStore::new(dir.path(), DISK_TTL));
    let cache = Arc::new(ResponseCache::new(disk, FRESHNESS_WINDOW));
    cache.flush().await;
    let fetcher = fetcher_with(&source, cache);

    let comment = fetcher.fetch_comment(9, CacheBehavior::Default).await.unwrap();
    assert_eq!(comment.source, Source::Cache);
    assert_eq!(comment.value.parent_id, 1);
    assert_eq!(source.calls("item/9"), 1);
}

#[tokio::test]
async fn decode_failure_leaves_cache_untouched() {
    let source = Arc::new(MockSource::new());
    source.put("item/5", json!({"id": 5, "type": "comment"}));
    let fetcher = memory_fetcher(&source);

    let err = fetcher.fetch_item(5, CacheBehavior::Default).await.unwrap_err();
    assert!(matches!(err, FetchError::Decode(_)));
    assert!(fetcher.cache().get("item/5").is_none());
}

#[tokio::test]
async fn tombstones_fail_as_deleted_and_are_remembered() {
    let source = Arc::new(MockSource::new());
    source.deleted(7, 1);
    let fetcher = memory_fetcher(&source);

    for _ in 0..2 {
        let err = fetcher.fetch_item(7, CacheBehavior::Default).await.unwrap_err();
        assert_eq!(err, FetchError::Deleted(7));
    }
    assert_eq!(source.calls("item/7"), 1);
}

#[tokio::test]
async fn unknown_ids_are_generic_failures() {
    let source = Arc::new(MockSource::new());
    let fetcher = memory_fetcher(&source);

    let err = fetcher.fetch_item(404, CacheBehavior::Default).await.unwrap_err();
    assert!(matches!(err, FetchError::Generic(_)));
    assert!(fetcher.cache().is_empty());
}

#[tokio::test(start_paused = true)]
async fn slow_requests_time_out() {
    let source = Arc::new(MockSource::with_delay(Duration::from_secs(60)));
    source.story(1, &[]);
    let fetcher = memory_fetcher(&source);

    let err = fetcher.fetch_item(1, CacheBehavior::Default).await.unwrap_err();
    assert_eq!(err, FetchError::Timeout(Duration::from_secs(15)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn batch_story_load_keeps_input_order() {
    let source = Arc::new(MockSource::new());
    for id in [3, 1, 2] {
        source.story(id, &[]);
    }
    let fetcher = memory_fetcher(&source);

    let stories = fetcher
        .fetch_stories(&[3, 99, 1, 2], CacheBehavior::Default)
        .await;

    assert_eq!(stories.len(), 4);
    assert_eq!(stories[0].as_ref().unwrap().id, 3);
    assert!(stories[1].is_err());
    assert_eq!(stories[2].as_ref().unwrap().id, 1);
    assert_eq!(stories[3].as_ref().unwrap().id, 2);
}

#[tokio::test]
async fn feeds_users_and_raw_bodies() {
    let source = Arc::new(MockSource::new());
    source.put("topstories", json!([30, 10, 20]));
    source.put(
        "user/pg",
        json!({"id": "pg", "karma": 155111, "created": 1160418092, "submitted": [1, 2, 3]}),
    );
    source.put_raw("item/1/page", b"<html>cached</html>");
    let fetcher = memory_fetcher(&source);

    let feed = fetcher.fetch_feed(Feed::Top, CacheBehavior::Default).await.unwrap();
    assert_eq!(feed.value, vec![30, 10, 20]);
    assert!(fetcher.cache().get("feed/top").is_some());

    let user = fetcher.fetch_user("pg", CacheBehavior::Default).await.unwrap();
    assert_eq!(user.value.karma, 155111);
    assert_eq!(user.value.submitted.len(), 3);

    for expected in [Source::Network, Source::Cache] {
        let raw = fetcher.fetch_raw("item/1/page", CacheBehavior::Default).await.unwrap();
        assert_eq!(raw.source, expected);
        assert_eq!(raw.value, b"<html>cached</html>".to_vec());
    }
    assert_eq!(source.calls("item/1/page"), 1);
}

#[tokio::test]
async fn clear_forces_network_again() {
    let source = Arc::new(MockSource::new());
    source.story(1, &[]);
    let disk = Arc::new(SqliteStore::in_memory(DISK_TTL).unwrap());
    let cache = Arc::new(ResponseCache::new(disk.clone(), FRESHNESS_WINDOW));
    let fetcher = fetcher_with(&source, Arc::clone(&cache));

    fetcher.fetch_item(1, CacheBehavior::Default).await.unwrap();
    cache.clear().await.unwrap();
    assert_eq!(disk.stats().await.unwrap().entries, 0);

    let again = fetcher.fetch_item(1, CacheBehavior::Default).await.unwrap();
    assert_eq!(again.source, Source::Network);
    assert_eq!(source.calls("item/1"), 2);
}
