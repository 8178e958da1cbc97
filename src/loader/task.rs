//! One unit of background fetch work.

use crate::key::ContentKey;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// An in-flight load of one locator at one target size.
///
/// A task is shared as `Arc<FetchTask>` between the spawned worker and
/// the [`DisplaySlot`](crate::loader::DisplaySlot) it was bound to; the
/// slot holds only a `Weak`, so a finished task drops out of the slot on
/// its own. Cancellation is cooperative: the worker checks the token at
/// every suspension point.
#[derive(Debug)]
pub struct FetchTask {
    key: ContentKey,
    locator: String,
    width: u32,
    height: u32,
    cancel: CancellationToken,
}

impl FetchTask {
    pub fn new(key: ContentKey, locator: &str, width: u32, height: u32) -> Self {
        Self {
            key,
            locator: locator.to_string(),
            width,
            height,
            cancel: CancellationToken::new(),
        }
    }

    /// The sized key this task will populate.
    pub fn key(&self) -> &ContentKey {
        &self.key
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Request cancellation. Idempotent; the worker notices at its next
    /// suspension point.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the task has been cancelled.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_starts_live() {
        let key = ContentKey::derive("https://example.com/a.jpg", 10, 10);
        let task = FetchTask::new(key.clone(), "https://example.com/a.jpg", 10, 10);
        assert!(!task.is_cancelled());
        assert_eq!(task.key(), &key);
        assert_eq!(task.locator(), "https://example.com/a.jpg");
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let key = ContentKey::derive("https://example.com/a.jpg", 10, 10);
        let task = FetchTask::new(key, "https://example.com/a.jpg", 10, 10);
        task.cancel();
        task.cancel();
        assert!(task.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_future_resolves() {
        let key = ContentKey::derive("https://example.com/a.jpg", 10, 10);
        let task = FetchTask::new(key, "https://example.com/a.jpg", 10, 10);
        task.cancel();
        task.cancelled().await;
    }
}
