//! Quiet-period detection over a monotonically increasing counter.
//!
//! Upstream gives no completion signal for a comment tree, so "loading has
//! settled" is inferred from the loaded-counter not moving for a window.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy)]
pub struct SettleTimer {
    window: Duration,
}

impl SettleTimer {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Resolve once `counter` has not changed for a full window, starting
    /// now. Returns the counter value at that point.
    pub async fn wait_quiet(&self, counter: &mut watch::Receiver<u64>) -> u64 {
        loop {
            match tokio::time::timeout(self.window, counter.changed()).await {
                Ok(Ok(())) => continue,
                // Sender dropped: nothing can change any more
                Ok(Err(_)) | Err(_) => return *counter.borrow_and_update(),
            }
        }
    }

    /// Wait for the next change, then for the quiet window after it.
    /// `None` once the sender is gone and no change is pending.
    pub async fn next_settled(&self, counter: &mut watch::Receiver<u64>) -> Option<u64> {
        counter.changed().await.ok()?;
        Some(self.wait_quiet(counter).await)
    }

    /// Call `on_settle` every time the counter settles, until the sender is
    /// dropped.
    pub fn spawn<F>(self, mut counter: watch::Receiver<u64>, mut on_settle: F) -> JoinHandle<()>
    where
        F: FnMut(u64) + Send + 'static,
    {
        tokio::spawn(async move {
            while let Some(value) = self.next_settled(&mut counter).await {
                on_settle(value);
            }
        })
    }
}
