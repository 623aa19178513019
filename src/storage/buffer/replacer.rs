use std::fmt::Debug;

use crate::storage::page::PageId;

/// Chooses which cached page to evict.
pub trait Replacer: Send + Sync + Debug {
    /// Record that `page_id` was just accessed.
    fn record_access(&mut self, page_id: PageId);

    /// The page that should be evicted next, if any is tracked.
    fn victim(&self) -> Option<PageId>;

    /// Stop tracking `page_id`.
    fn remove(&mut self, page_id: PageId);

    /// Tracked pages, next victim first.
    fn eviction_order(&self) -> Vec<PageId>;

    /// Get the number of tracked pages.
    fn size(&self) -> usize;
}
