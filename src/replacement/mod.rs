//! Buffer pool replacement policies for cache eviction.
//!
//! This module provides two replacement policies, each enabled via Cargo features.
//! Exactly one must be enabled at compile time.
//!
//! # Available Policies
//!
//! - **LRU** (`replacement_lru`): Least Recently Used. Evicts the evictable page whose last
//!   access is oldest.
//!
//! - **Clock** (`replacement_clock`): Second-chance algorithm with a circular hand and
//!   reference bits. Approximates LRU with cheaper hits.
//!
//! # Interface
//!
//! Both policies expose a `PolicyState` struct:
//! - `record_hit()`: called on a cache hit
//! - `on_page_cached()`: called when a page enters the cache
//! - `on_page_removed()`: called when a page leaves the cache (eviction or discard)
//! - `evict_candidate()`: picks a victim among the pages the caller reports as evictable
//!
//! The buffer pool only reports clean pages as evictable, so a policy never has to know
//! about dirty state.

#[cfg(all(feature = "replacement_lru", feature = "replacement_clock"))]
compile_error!("Enable only one buffer replacement policy feature (LRU or Clock)");

#[cfg(not(any(feature = "replacement_lru", feature = "replacement_clock")))]
compile_error!("At least one buffer replacement policy feature must be enabled");

#[cfg(feature = "replacement_lru")]
mod lru;
#[cfg(feature = "replacement_lru")]
pub use lru::PolicyState;

#[cfg(feature = "replacement_clock")]
mod clock;
#[cfg(feature = "replacement_clock")]
pub use clock::PolicyState;
