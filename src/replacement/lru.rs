//! LRU (Least Recently Used) replacement policy.
//!
//! Every access stamps the page with a monotonically increasing tick. The victim is the
//! evictable page with the smallest tick.
//!
//! # Complexity
//!
//! - Hit: O(1)
//! - Eviction: O(n) over cached pages

use std::collections::HashMap;

use crate::page::PageId;

#[derive(Debug)]
pub struct PolicyState {
    last_access: HashMap<PageId, u64>,
    clock: u64,
}

impl PolicyState {
    pub fn new(capacity: usize) -> Self {
        Self {
            last_access: HashMap::with_capacity(capacity),
            clock: 0,
        }
    }

    fn touch(&mut self, page_id: &PageId) {
        self.clock += 1;
        self.last_access.insert(*page_id, self.clock);
    }

    /// Records a cache hit by making the page the most recently used.
    pub fn record_hit(&mut self, page_id: &PageId) {
        self.touch(page_id);
    }

    pub fn on_page_cached(&mut self, page_id: &PageId) {
        self.touch(page_id);
    }

    pub fn on_page_removed(&mut self, page_id: &PageId) {
        self.last_access.remove(page_id);
    }

    /// Selects the least recently used page for which `evictable` holds.
    pub fn evict_candidate<F>(&mut self, evictable: F) -> Option<PageId>
    where
        F: Fn(&PageId) -> bool,
    {
        self.last_access
            .iter()
            .filter(|(page_id, _)| evictable(page_id))
            .min_by_key(|(_, tick)| **tick)
            .map(|(page_id, _)| *page_id)
    }
}
