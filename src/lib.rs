//! Comment tree loading for a Hacker News reader.
//!
//! Stories, comments and users are fetched through a [`Fetcher`] that sits
//! on a memory + disk [`ResponseCache`]. On top of it, [`ThreadLoader`]
//! streams a story's comment tree into a flat display list and
//! [`CommentLoader`] resolves a single comment's ancestors.
//!
//! Caches and loaders are plain values; the caller creates them and passes
//! them where they are needed.

pub mod cache;
pub mod comment_loader;
pub mod comment_tree;
pub mod config;
pub mod db;
pub mod error;
pub mod fetcher;
pub mod file_store;
pub mod hn_client;
pub mod models;
pub mod settle;
pub mod text;
pub mod thread_loader;

pub use cache::{CacheBehavior, CacheEntry, CachedValue, DiskStore, ResponseCache, ValueKind};
pub use comment_loader::{CommentLoader, CommentLoaderContainer};
pub use comment_tree::{CommentTree, CommentViewModel};
pub use config::{CacheBackend, Config};
pub use db::SqliteStore;
pub use error::{FetchError, InsertError, StoreError};
pub use fetcher::{Fetched, Fetcher, Source};
pub use file_store::FileStore;
pub use hn_client::{HackerNewsClient, ItemSource};
pub use models::{Comment, Feed, Item, ItemId, Story, StoryKind, User};
pub use settle::SettleTimer;
pub use thread_loader::{CommentFailure, ThreadLoader, ThreadSettings};
