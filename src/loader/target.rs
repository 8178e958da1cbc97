//! Display targets for loaded images.

use crate::decode::DecodedImage;
use crate::loader::task::FetchTask;
use std::sync::{Arc, Mutex, Weak};
use tracing::trace;

/// What a slot currently shows.
enum SlotContent {
    /// Nothing requested yet, or the last request failed (placeholder).
    Empty,
    /// A background task is working on this slot's behalf.
    Pending(Weak<FetchTask>),
    /// A decoded image is on display.
    Image(Arc<DecodedImage>),
}

/// A display target that images are loaded into.
///
/// Clones share the same underlying slot. While a load is in flight the
/// slot remembers the task through a `Weak`, so the task's identity can
/// be compared later: a worker only publishes its result if the slot is
/// still bound to it, which is what makes rebinding safe.
#[derive(Clone)]
pub struct DisplaySlot {
    inner: Arc<Mutex<SlotContent>>,
}

impl DisplaySlot {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SlotContent::Empty)),
        }
    }

    /// The image on display, if any.
    pub fn image(&self) -> Option<Arc<DecodedImage>> {
        match &*self.inner.lock().unwrap() {
            SlotContent::Image(image) => Some(Arc::clone(image)),
            _ => None,
        }
    }

    /// The task currently bound to this slot, if one is still alive.
    pub fn pending_task(&self) -> Option<Arc<FetchTask>> {
        match &*self.inner.lock().unwrap() {
            SlotContent::Pending(weak) => weak.upgrade(),
            _ => None,
        }
    }

    /// Bind a new task, displacing whatever was here before.
    pub fn bind(&self, task: &Arc<FetchTask>) {
        *self.inner.lock().unwrap() = SlotContent::Pending(Arc::downgrade(task));
    }

    /// Whether this slot is still bound to `task`.
    pub fn is_current(&self, task: &Arc<FetchTask>) -> bool {
        match &*self.inner.lock().unwrap() {
            SlotContent::Pending(weak) => Weak::as_ptr(weak) == Arc::as_ptr(task),
            _ => false,
        }
    }

    /// Display an image directly, without any task involved.
    pub fn show(&self, image: Arc<DecodedImage>) {
        *self.inner.lock().unwrap() = SlotContent::Image(image);
    }

    /// Publish a task's result, but only if the slot is still bound to
    /// that task. Returns whether the image was accepted.
    pub fn complete(&self, task: &Arc<FetchTask>, image: Arc<DecodedImage>) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match &*inner {
            SlotContent::Pending(weak) if Weak::as_ptr(weak) == Arc::as_ptr(task) => {
                *inner = SlotContent::Image(image);
                true
            }
            _ => {
                trace!(key = %task.key(), "stale task result dropped");
                false
            }
        }
    }

    /// Reset to empty, cancelling any in-flight work for this slot.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        if let SlotContent::Pending(weak) = &*inner {
            if let Some(task) = weak.upgrade() {
                task.cancel();
            }
        }
        *inner = SlotContent::Empty;
    }
}

impl Default for DisplaySlot {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::ContentKey;
    use image::RgbaImage;

    fn test_task(n: u32) -> Arc<FetchTask> {
        let locator = format!("https://example.com/{}.jpg", n);
        Arc::new(FetchTask::new(
            ContentKey::derive(&locator, 10, 10),
            &locator,
            10,
            10,
        ))
    }

    fn test_image() -> Arc<DecodedImage> {
        Arc::new(DecodedImage::new(RgbaImage::new(2, 2)))
    }

    #[test]
    fn test_slot_starts_empty() {
        let slot = DisplaySlot::new();
        assert!(slot.image().is_none());
        assert!(slot.pending_task().is_none());
    }

    #[test]
    fn test_bind_and_complete() {
        let slot = DisplaySlot::new();
        let task = test_task(1);

        slot.bind(&task);
        assert!(slot.is_current(&task));
        assert!(Arc::ptr_eq(&slot.pending_task().unwrap(), &task));

        let image = test_image();
        assert!(slot.complete(&task, Arc::clone(&image)));
        assert!(Arc::ptr_eq(&slot.image().unwrap(), &image));
    }

    #[test]
    fn test_stale_task_result_rejected() {
        let slot = DisplaySlot::new();
        let first = test_task(1);
        let second = test_task(2);

        slot.bind(&first);
        slot.bind(&second);

        assert!(!slot.is_current(&first));
        assert!(!slot.complete(&first, test_image()));
        assert!(slot.image().is_none());

        assert!(slot.complete(&second, test_image()));
        assert!(slot.image().is_some());
    }

    #[test]
    fn test_completion_after_show_rejected() {
        let slot = DisplaySlot::new();
        let task = test_task(1);
        slot.bind(&task);

        slot.show(test_image());
        assert!(!slot.complete(&task, test_image()));
    }

    #[test]
    fn test_clear_cancels_pending_work() {
        let slot = DisplaySlot::new();
        let task = test_task(1);
        slot.bind(&task);

        slot.clear();
        assert!(task.is_cancelled());
        assert!(slot.pending_task().is_none());
        assert!(!slot.complete(&task, test_image()));
    }

    #[test]
    fn test_dead_task_is_not_pending() {
        let slot = DisplaySlot::new();
        let task = test_task(1);
        slot.bind(&task);
        drop(task);

        assert!(slot.pending_task().is_none());
    }

    #[test]
    fn test_clones_share_state() {
        let slot = DisplaySlot::new();
        let clone = slot.clone();

        slot.show(test_image());
        assert!(clone.image().is_some());
    }
}
