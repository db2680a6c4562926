//! Upward traversal: from a single comment to the story that owns it.
//!
//! Used for "show in context". Concurrent walks that reach the same parent
//! share one fetch of it.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::OnceCell;
use tracing::debug;

use crate::cache::CacheBehavior;
use crate::comment_tree::{CommentTree, CommentViewModel};
use crate::error::{FetchError, FetchResult};
use crate::fetcher::Fetcher;
use crate::models::{Comment, Item, ItemId, Story};

/// Outcome of [`CommentLoader::traverse`].
#[derive(Debug, Clone)]
pub struct CommentLoaderContainer {
    pub focused_comment: Comment,
    /// Ancestors of the focused comment, top-level first. Excludes the
    /// focused comment itself.
    pub comment_chain: Vec<Comment>,
    /// The chain followed by the focused comment, each row's parent set to
    /// the row before it.
    pub view_models: Vec<CommentViewModel>,
    pub story: Option<Story>,
}

type InFlight = Arc<OnceCell<FetchResult<Item>>>;

pub struct CommentLoader {
    fetcher: Fetcher,
    behavior: CacheBehavior,
    in_flight: Mutex<HashMap<ItemId, InFlight>>,
}

impl CommentLoader {
    pub fn new(fetcher: Fetcher, behavior: CacheBehavior) -> Self {
        Self {
            fetcher,
            behavior,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve every ancestor of `comment` up to its story.
    ///
    /// Fails with [`FetchError::Deleted`] naming the first removed ancestor;
    /// no partial result is returned.
    pub async fn traverse(&self, comment: &Comment) -> FetchResult<CommentLoaderContainer> {
        let mut chain = Vec::new();
        let mut visited = HashSet::from([comment.id]);
        let mut next = comment.parent_id;

        let story = loop {
            if !visited.insert(next) {
                return Err(FetchError::Decode(format!(
                    "comment {} has a cyclic ancestry at {}",
                    comment.id, next
                )));
            }

            match self.fetch_parent(next).await? {
                Item::Comment(parent) => {
                    next = parent.parent_id;
                    chain.push(parent);
                }
                Item::Story(story) => break story,
            }
        };
        chain.reverse();
        debug!(comment = comment.id, story = story.id, depth = chain.len(), "resolved comment context");

        let view_models = Self::build_view_models(&chain, comment);
        Ok(CommentLoaderContainer {
            focused_comment: comment.clone(),
            comment_chain: chain,
            view_models,
            story: Some(story),
        })
    }

    /// Fetch `id`, joining a fetch of the same id that is already running.
    async fn fetch_parent(&self, id: ItemId) -> FetchResult<Item> {
        let cell = Arc::clone(
            self.lock_in_flight()
                .entry(id)
                .or_insert_with(|| Arc::new(OnceCell::new())),
        );

        let result = cell
            .get_or_init(|| async {
                self.fetcher
                    .fetch_item(id, self.behavior)
                    .await
                    .map(|fetched| fetched.value)
            })
            .await
            .clone();

        // Only de-duplicate while in flight; later walks go through the cache
        let mut in_flight = self.lock_in_flight();
        if in_flight.get(&id).is_some_and(|current| Arc::ptr_eq(current, &cell)) {
            in_flight.remove(&id);
        }

        result
    }

    fn build_view_models(chain: &[Comment], focused: &Comment) -> Vec<CommentViewModel> {
        let mut tree = CommentTree::new();
        let mut parent = None;
        for comment in chain.iter().chain(std::iter::once(focused)) {
            // Each parent is inserted just before its child, so this cannot fail
            if tree.insert(comment.clone(), parent).is_err() {
                break;
            }
            parent = Some(comment.id);
        }
        tree.flatten()
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, HashMap<ItemId, InFlight>> {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
