//! Fixed set of pending work items shared by the worker pool

use std::collections::VecDeque;

use parking_lot::Mutex;
use url::Url;

use crate::models::WorkItem;

/// Multi-consumer queue populated once at startup
///
/// Items cannot be added after construction, so an empty queue means the
/// pool is done.
#[derive(Debug, Default)]
pub struct RequestQueue {
    items: Mutex<VecDeque<WorkItem>>,
}

impl RequestQueue {
    pub fn new(items: impl IntoIterator<Item = WorkItem>) -> Self {
        Self {
            items: Mutex::new(items.into_iter().collect()),
        }
    }

    /// Queue `count` items targeting `url`
    pub fn repeat(url: &Url, count: usize) -> Self {
        Self::new(std::iter::repeat_with(|| WorkItem::new(url.clone())).take(count))
    }

    /// Take the next item, `None` once the queue is drained
    pub fn try_dequeue(&self) -> Option<WorkItem> {
        self.items.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}
