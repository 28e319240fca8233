//! Clock (Second-Chance) replacement policy.
//!
//! # Algorithm
//!
//! - On hit: Set reference bit
//! - On allocation: Set reference bit
//! - On eviction: Sweep clock hand circularly
//!   - If page not evictable: skip
//!   - If ref bit set: clear bit and continue
//!   - Otherwise: evict page
//!
//! # Complexity
//!
//! - Hit: O(1)
//! - Eviction: O(n) worst case (two full sweeps)

use std::collections::HashMap;

use crate::page::PageId;

#[derive(Debug)]
pub struct PolicyState {
    /// Cached pages in clock order
    ring: Vec<PageId>,
    ref_bits: HashMap<PageId, bool>,
    /// Clock hand position (next slot of `ring` to examine)
    hand: usize,
}

impl PolicyState {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: Vec::with_capacity(capacity),
            ref_bits: HashMap::with_capacity(capacity),
            hand: 0,
        }
    }

    /// Records a cache hit by setting the page's reference bit.
    pub fn record_hit(&mut self, page_id: &PageId) {
        if let Some(bit) = self.ref_bits.get_mut(page_id) {
            *bit = true;
        }
    }

    /// Gives a newly cached page a "second chance".
    pub fn on_page_cached(&mut self, page_id: &PageId) {
        if self.ref_bits.insert(*page_id, true).is_none() {
            self.ring.push(*page_id);
        }
    }

    pub fn on_page_removed(&mut self, page_id: &PageId) {
        if self.ref_bits.remove(page_id).is_none() {
            return;
        }
        if let Some(idx) = self.ring.iter().position(|p| p == page_id) {
            self.ring.remove(idx);
            if idx < self.hand {
                self.hand -= 1;
            }
            if self.hand >= self.ring.len() {
                self.hand = 0;
            }
        }
    }

    /// Sweeps the hand, clearing reference bits, until it finds an evictable page whose bit
    /// is already clear. Returns None if no page qualifies after two full sweeps.
    pub fn evict_candidate<F>(&mut self, evictable: F) -> Option<PageId>
    where
        F: Fn(&PageId) -> bool,
    {
        let len = self.ring.len();
        for _ in 0..(len * 2) {
            let page_id = self.ring[self.hand];
            self.hand = (self.hand + 1) % len;
            if !evictable(&page_id) {
                continue;
            }
            let bit = self.ref_bits.entry(page_id).or_insert(false);
            if *bit {
                *bit = false;
                continue;
            }
            return Some(page_id);
        }
        None
    }
}
