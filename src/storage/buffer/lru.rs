use std::collections::{BTreeMap, HashMap};

use super::replacer::Replacer;
use crate::storage::page::PageId;

/// Least-recently-used replacer.
///
/// Every access stamps the page with the next value of a logical clock, so
/// the smallest stamp is always the least recently accessed page.
#[derive(Debug, Default)]
pub struct LruReplacer {
    clock: u64,
    /// Stamp -> page, oldest first.
    by_stamp: BTreeMap<u64, PageId>,
    stamps: HashMap<PageId, u64>,
}

impl LruReplacer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Replacer for LruReplacer {
    fn record_access(&mut self, page_id: PageId) {
        self.clock += 1;
        if let Some(old) = self.stamps.insert(page_id, self.clock) {
            self.by_stamp.remove(&old);
        }
        self.by_stamp.insert(self.clock, page_id);
    }

    fn victim(&self) -> Option<PageId> {
        self.by_stamp.values().next().copied()
    }

    fn remove(&mut self, page_id: PageId) {
        if let Some(stamp) = self.stamps.remove(&page_id) {
            self.by_stamp.remove(&stamp);
        }
    }

    fn eviction_order(&self) -> Vec<PageId> {
        self.by_stamp.values().copied().collect()
    }

    fn size(&self) -> usize {
        self.stamps.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(n: u32) -> PageId {
        PageId::new(1, n)
    }

    #[test]
    fn test_basic_lru_operations() {
        let mut replacer = LruReplacer::new();

        assert_eq!(replacer.size(), 0);
        assert_eq!(replacer.victim(), None);

        replacer.record_access(page(1));
        replacer.record_access(page(2));
        replacer.record_access(page(3));
        assert_eq!(replacer.size(), 3);
        assert_eq!(replacer.victim(), Some(page(1)));
        assert_eq!(replacer.eviction_order(), vec![page(1), page(2), page(3)]);
    }

    #[test]
    fn test_access_refreshes_position() {
        let mut replacer = LruReplacer::new();

        replacer.record_access(page(1));
        replacer.record_access(page(2));
        replacer.record_access(page(1));

        assert_eq!(replacer.size(), 2);
        assert_eq!(replacer.victim(), Some(page(2)));
        assert_eq!(replacer.eviction_order(), vec![page(2), page(1)]);
    }

    #[test]
    fn test_remove() {
        let mut replacer = LruReplacer::new();

        replacer.record_access(page(1));
        replacer.record_access(page(2));
        replacer.remove(page(1));
        replacer.remove(page(9));

        assert_eq!(replacer.size(), 1);
        assert_eq!(replacer.victim(), Some(page(2)));

        replacer.remove(page(2));
        assert_eq!(replacer.victim(), None);
    }
}
