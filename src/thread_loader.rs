//! Downward traversal for the story detail page.
//!
//! Every comment is fetched as its own task and its children are dispatched
//! as soon as it lands, so subtrees stream in concurrently and out of order.
//! The display list is rebuilt by pre-order flattening whenever the global
//! loaded-counter has been quiet for the settle window.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::cache::CacheBehavior;
use crate::comment_tree::{CommentTree, CommentViewModel};
use crate::config::Config;
use crate::error::{FetchError, FetchResult};
use crate::fetcher::Fetcher;
use crate::models::{ItemId, Story};
use crate::settle::SettleTimer;

#[derive(Debug, Clone, Copy)]
pub struct ThreadSettings {
    pub behavior: CacheBehavior,
    /// Quiet period after which the display list is rebuilt.
    pub settle_window: Duration,
    /// Quiet period a dispatched subtree needs before more may be loaded.
    pub ready_window: Duration,
    pub initial_top_level: usize,
}

impl ThreadSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            behavior: config.cache_behavior,
            settle_window: config.settle_window,
            ready_window: config.ready_window,
            initial_top_level: config.initial_top_level,
        }
    }
}

impl Default for ThreadSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// A comment that could not be loaded. The rest of the thread carries on.
#[derive(Debug, Clone)]
pub struct CommentFailure {
    pub comment_id: ItemId,
    pub parent_id: Option<ItemId>,
    pub error: FetchError,
}

#[derive(Default)]
struct ThreadState {
    story: Option<Story>,
    tree: CommentTree,
    root_ids: Vec<ItemId>,
    loaded_top_level: HashSet<ItemId>,
    /// Bumped per `load_comments`; results for older sessions are dropped.
    session: u64,
    /// Bumped per top-level dispatch; only the newest may re-arm readiness.
    gate: u64,
}

struct Inner {
    fetcher: Fetcher,
    settings: ThreadSettings,
    state: Mutex<ThreadState>,
    loaded: watch::Sender<u64>,
    pending: watch::Sender<usize>,
    display: watch::Sender<Vec<CommentViewModel>>,
    ready: watch::Sender<bool>,
    errors: broadcast::Sender<CommentFailure>,
}

/// Detail-page controller. Cheap to clone; clones share one session.
#[derive(Clone)]
pub struct ThreadLoader {
    inner: Arc<Inner>,
}

impl ThreadLoader {
    /// Must be called within a tokio runtime.
    pub fn new(fetcher: Fetcher, settings: ThreadSettings) -> Self {
        let (loaded, loaded_rx) = watch::channel(0);
        let (errors, _) = broadcast::channel(64);

        let inner = Arc::new(Inner {
            fetcher,
            settings,
            state: Mutex::new(ThreadState::default()),
            loaded,
            pending: watch::channel(0).0,
            display: watch::channel(Vec::new()).0,
            ready: watch::channel(false).0,
            errors,
        });

        // The observer must not keep the loader alive, or it would never stop
        let weak: Weak<Inner> = Arc::downgrade(&inner);
        SettleTimer::new(settings.settle_window).spawn(loaded_rx, move |count| {
            if let Some(inner) = weak.upgrade() {
                debug!(count, "comment loading settled");
                inner.publish();
            }
        });

        Self { inner }
    }

    /// Open a story: fetch it, reset the session and start loading the first
    /// top-level comments. Failing to load the story itself is the only
    /// error that blocks the page.
    pub async fn load_comments(&self, story_id: ItemId) -> FetchResult<Story> {
        let inner = &self.inner;
        let story = inner
            .fetcher
            .fetch_story(story_id, inner.settings.behavior)
            .await?
            .value;

        let (session, first) = {
            let mut guard = inner.lock_state();
            let state = &mut *guard;
            state.session += 1;
            state.root_ids = story.top_level_ids().to_vec();
            state.tree = CommentTree::with_root_order(&state.root_ids);
            state.loaded_top_level.clear();
            state.story = Some(story.clone());

            let first: Vec<ItemId> = state
                .root_ids
                .iter()
                .take(inner.settings.initial_top_level)
                .copied()
                .collect();
            (state.session, first)
        };

        inner.display.send_replace(Vec::new());
        inner.ready.send_replace(false);
        info!(
            story = story.id,
            top_level = story.top_level_ids().len(),
            dispatching = first.len(),
            "loading comments"
        );

        for id in &first {
            Inner::dispatch_top_level(inner, *id, session);
        }
        if first.is_empty() && self.has_more() {
            inner.ready.send_replace(true);
        }

        Ok(story)
    }

    /// Dispatch the next top-level comment that has not been loaded yet.
    ///
    /// Callers should wait for [`ThreadLoader::is_ready_to_load_more`];
    /// this does not check it.
    pub fn load_more_items(&self) -> Option<ItemId> {
        let (session, next) = {
            let state = self.inner.lock_state();
            let next = state
                .root_ids
                .iter()
                .find(|id| !state.loaded_top_level.contains(*id))
                .copied();
            (state.session, next)
        };

        let id = next?;
        Inner::dispatch_top_level(&self.inner, id, session);
        Some(id)
    }

    pub fn story(&self) -> Option<Story> {
        self.inner.lock_state().story.clone()
    }

    /// Top-level comments not dispatched yet.
    pub fn remaining(&self) -> usize {
        let state = self.inner.lock_state();
        state
            .root_ids
            .iter()
            .filter(|id| !state.loaded_top_level.contains(*id))
            .count()
    }

    pub fn has_more(&self) -> bool {
        self.remaining() > 0
    }

    /// Latest settled display list.
    pub fn display(&self) -> watch::Receiver<Vec<CommentViewModel>> {
        self.inner.display.subscribe()
    }

    pub fn ready_to_load_more(&self) -> watch::Receiver<bool> {
        self.inner.ready.subscribe()
    }

    pub fn is_ready_to_load_more(&self) -> bool {
        *self.inner.ready.borrow()
    }

    pub fn subscribe_errors(&self) -> broadcast::Receiver<CommentFailure> {
        self.inner.errors.subscribe()
    }

    /// Comments fetched so far, including failures.
    pub fn loaded_count(&self) -> u64 {
        *self.inner.loaded.borrow()
    }

    /// Flatten the tree as it stands, without waiting for it to settle.
    pub fn flatten(&self) -> Vec<CommentViewModel> {
        self.inner.lock_state().tree.flatten()
    }

    /// Collapse or expand a comment and republish the display list.
    pub fn toggle_collapsed(&self, id: ItemId) -> Option<bool> {
        let collapsed = self.inner.lock_state().tree.toggle_collapsed(id)?;
        self.inner.publish();
        Some(collapsed)
    }

    /// Resolve once no comment fetch is outstanding.
    pub async fn wait_until_idle(&self) {
        let mut pending = self.inner.pending.subscribe();
        let _ = pending.wait_for(|count| *count == 0).await;
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, ThreadState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self) {
        let rows = self.lock_state().tree.flatten();
        debug!(rows = rows.len(), "publishing comment list");
        self.display.send_replace(rows);
    }

    fn dispatch_top_level(inner: &Arc<Inner>, id: ItemId, session: u64) {
        let gate = {
            let mut state = inner.lock_state();
            if state.session != session || !state.loaded_top_level.insert(id) {
                return;
            }
            state.gate += 1;
            state.gate
        };
        inner.ready.send_replace(false);
        debug!(id, "dispatching top-level comment");

        let (subtree, subtree_rx) = watch::channel(0u64);
        let subtree = Arc::new(subtree);
        Inner::spawn_fetch(Arc::clone(inner), id, None, session, Arc::clone(&subtree));
        tokio::spawn(Inner::arm_gate(Arc::clone(inner), id, session, gate, subtree, subtree_rx));
    }

    /// Re-arm `ready` once the subtree rooted at `id` has gone quiet:
    /// straight away for a leaf, after the ready window otherwise.
    async fn arm_gate(
        inner: Arc<Inner>,
        id: ItemId,
        session: u64,
        gate: u64,
        // Held so the quiet window is measured by time, not by the last
        // fetch task finishing
        _subtree: Arc<watch::Sender<u64>>,
        mut counter: watch::Receiver<u64>,
    ) {
        if counter.changed().await.is_err() {
            return;
        }

        let has_children = inner
            .lock_state()
            .tree
            .get(id)
            .is_some_and(|row| row.comment.has_children());
        if has_children {
            SettleTimer::new(inner.settings.ready_window)
                .wait_quiet(&mut counter)
                .await;
        }

        let current = {
            let state = inner.lock_state();
            state.session == session && state.gate == gate
        };
        if current {
            debug!(id, "ready to load more");
            inner.ready.send_replace(true);
        }
    }

    fn spawn_fetch(
        inner: Arc<Inner>,
        id: ItemId,
        parent: Option<ItemId>,
        session: u64,
        subtree: Arc<watch::Sender<u64>>,
    ) {
        inner.pending.send_modify(|count| *count += 1);

        tokio::spawn(async move {
            match inner.fetcher.fetch_comment(id, inner.settings.behavior).await {
                Ok(fetched) => {
                    let comment = fetched.value;
                    let children = comment.child_ids().to_vec();
                    let inserted = {
                        let mut state = inner.lock_state();
                        if state.session == session {
                            Some(state.tree.insert(comment, parent))
                        } else {
                            None
                        }
                    };

                    match inserted {
                        Some(Ok(Some(_))) => {
                            for child in children {
                                Inner::spawn_fetch(
                                    Arc::clone(&inner),
                                    child,
                                    Some(id),
                                    session,
                                    Arc::clone(&subtree),
                                );
                            }
                        }
                        // Already in the tree: its children were dispatched then
                        Some(Ok(None)) => debug!(id, "skipping repeated comment"),
                        Some(Err(e)) => {
                            inner.report(id, parent, FetchError::Generic(e.to_string()))
                        }
                        // Left over from a story that is no longer shown
                        None => {}
                    }
                }
                Err(e) => inner.report(id, parent, e),
            }

            subtree.send_modify(|count| *count += 1);
            inner.loaded.send_modify(|count| *count += 1);
            inner.pending.send_modify(|count| *count = count.saturating_sub(1));
        });
    }

    fn report(&self, comment_id: ItemId, parent_id: Option<ItemId>, error: FetchError) {
        warn!(comment_id, ?parent_id, error = %error, "failed to load comment");
        // No subscribers is fine
        let _ = self.errors.send(CommentFailure {
            comment_id,
            parent_id,
            error,
        });
    }
}
