use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, RwLock,
    },
};

use log::{debug, trace, warn};

use crate::{
    catalog::Catalog,
    error::{DbError, DbResult},
    lock_table::{LockTable, LockType},
    page::{PageId, PageRef, TableId},
    replacement::PolicyState,
    tuple::Tuple,
    TransactionID,
};

/// The access a transaction asks for when fetching a page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permissions {
    ReadOnly,
    ReadWrite,
}

impl From<Permissions> for LockType {
    fn from(value: Permissions) -> Self {
        match value {
            Permissions::ReadOnly => LockType::Shared,
            Permissions::ReadWrite => LockType::Exclusive,
        }
    }
}

#[derive(Debug)]
struct Frame {
    page: PageRef,
    dirtied_by: Option<TransactionID>, //  set by insert/delete, cleared by flush or discard
    writer: Option<TransactionID>,     //  last transaction to fetch the page ReadWrite
    write_pins: usize,                 //  ReadWrite fetches by `writer` not yet unpinned
}

impl Frame {
    fn new(page: PageRef) -> Self {
        Self {
            page,
            dirtied_by: None,
            writer: None,
            write_pins: 0,
        }
    }

    fn pin_for_write(&mut self, txn: TransactionID) {
        self.writer = Some(txn);
        self.write_pins += 1;
    }

    /// Only clean pages that no live transaction holds for writing may leave the pool. A
    /// page that is latched right now is treated as in use.
    fn is_evictable(&self) -> bool {
        self.dirtied_by.is_none()
            && self.write_pins == 0
            && self.page.try_read().is_ok_and(|page| !page.is_dirty())
    }

    /// Whether `txn` has uncommitted changes on this page
    fn is_dirtied_by(&self, txn: TransactionID) -> bool {
        self.dirtied_by == Some(txn)
            || (self.writer == Some(txn) && self.page.read().unwrap().is_dirty())
    }
}

struct PoolState {
    frames: HashMap<PageId, Frame>,
    policy: PolicyState,
}

/// Hit, miss and eviction counters for a [`BufferPool`]
#[derive(Debug, Default)]
pub struct BufferStats {
    pub hits: AtomicUsize,
    pub misses: AtomicUsize,
    pub evictions: AtomicUsize,
}

impl BufferStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(hits, misses)`
    pub fn get(&self) -> (usize, usize) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }

    pub fn evictions(&self) -> usize {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
    }

    pub fn hit_rate(&self) -> f64 {
        let (hits, misses) = self.get();
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            (hits as f64 / total as f64) * 100.0
        }
    }
}

/// Bounded page cache shared by all transactions.
///
/// Every page access is preceded by a page lock from the [`LockTable`], so the pool is also
/// the enforcement point for strict two-phase locking. The pool never writes a page on
/// behalf of a transaction that is still running: dirty pages stay cached until
/// [`BufferPool::transaction_complete`] flushes or discards them.
pub struct BufferPool {
    catalog: Arc<Catalog>,
    lock_table: LockTable,
    state: Mutex<PoolState>,
    capacity: usize,
    stats: BufferStats,
}

impl BufferPool {
    pub const DEFAULT_PAGES: usize = 50;

    pub fn new(catalog: Arc<Catalog>, capacity: usize) -> Self {
        assert!(capacity > 0, "buffer pool needs room for at least one page");
        Self {
            catalog,
            lock_table: LockTable::new(),
            state: Mutex::new(PoolState {
                frames: HashMap::with_capacity(capacity),
                policy: PolicyState::new(capacity),
            }),
            capacity,
            stats: BufferStats::new(),
        }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Fetch a page under the lock implied by `perm`.
    ///
    /// Blocks while another transaction holds a conflicting lock and fails with
    /// [`DbError::Deadlock`] if waiting would close a cycle. The pool latch is only taken
    /// once the page lock is held.
    pub fn get_page(
        &self,
        txn: TransactionID,
        page_id: &PageId,
        perm: Permissions,
    ) -> DbResult<PageRef> {
        self.lock_table.acquire(txn, page_id, perm.into())?;

        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        if let Some(frame) = state.frames.get_mut(page_id) {
            if perm == Permissions::ReadWrite {
                frame.pin_for_write(txn);
            }
            let page = Arc::clone(&frame.page);
            state.policy.record_hit(page_id);
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            trace!("buffer hit for page {} (txn {})", page_id, txn);
            return Ok(page);
        }

        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        if state.frames.len() >= self.capacity {
            self.evict_page(state)?;
        }
        let file = self.catalog.file(page_id.table_id)?;
        let page = Arc::new(RwLock::new(file.read_page(page_id)?));
        let mut frame = Frame::new(Arc::clone(&page));
        if perm == Permissions::ReadWrite {
            frame.pin_for_write(txn);
        }
        state.frames.insert(*page_id, frame);
        state.policy.on_page_cached(page_id);
        trace!("buffer miss: loaded page {} (txn {})", page_id, txn);
        Ok(page)
    }

    /// Drop one clean page chosen by the replacement policy
    fn evict_page(&self, state: &mut PoolState) -> DbResult<()> {
        let frames = &state.frames;
        let victim = state
            .policy
            .evict_candidate(|page_id| frames.get(page_id).is_some_and(Frame::is_evictable));
        match victim {
            Some(page_id) => {
                state.frames.remove(&page_id);
                state.policy.on_page_removed(&page_id);
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                debug!("evicted page {}", page_id);
                Ok(())
            }
            None => {
                warn!(
                    "buffer pool exhausted: all {} pages are dirty or in use",
                    self.capacity
                );
                Err(DbError::PoolExhausted {
                    capacity: self.capacity,
                })
            }
        }
    }

    /// Give back one ReadWrite fetch of a page that `txn` left unmodified, so the page can be
    /// evicted again. The exclusive lock is kept until the transaction ends.
    pub fn unpin_page(&self, txn: TransactionID, page_id: &PageId) {
        let mut guard = self.state.lock().unwrap();
        if let Some(frame) = guard.frames.get_mut(page_id) {
            if frame.writer == Some(txn) && frame.write_pins > 0 {
                frame.write_pins -= 1;
                trace!("txn {} unpinned page {}", txn, page_id);
            }
        }
    }

    /// Insert a tuple into a table on behalf of `txn`. The page that receives it stays
    /// cached and dirty until the transaction completes.
    pub fn insert_tuple(
        &self,
        txn: TransactionID,
        table_id: TableId,
        tuple: &mut Tuple,
    ) -> DbResult<()> {
        let file = self.catalog.file(table_id)?;
        let pages = file.insert_tuple(self, txn, tuple)?;
        self.mark_dirty(txn, pages)
    }

    /// Delete a tuple, located by its record id, on behalf of `txn`
    pub fn delete_tuple(&self, txn: TransactionID, tuple: &Tuple) -> DbResult<()> {
        let record_id = tuple.record_id().ok_or(DbError::MissingRecordId)?;
        let file = self.catalog.file(record_id.page_id.table_id)?;
        let pages = file.delete_tuple(self, txn, tuple)?;
        self.mark_dirty(txn, pages)
    }

    /// Tag modified pages with their transaction, re-caching any page that was dropped from
    /// the pool after being fetched
    fn mark_dirty(&self, txn: TransactionID, pages: Vec<PageRef>) -> DbResult<()> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        for page in pages {
            let page_id = page.read().unwrap().id();
            if let Some(frame) = state.frames.get_mut(&page_id) {
                frame.dirtied_by = Some(txn);
                frame.page = page;
                continue;
            }
            if state.frames.len() >= self.capacity {
                self.evict_page(state)?;
            }
            let mut frame = Frame::new(page);
            frame.dirtied_by = Some(txn);
            frame.writer = Some(txn);
            state.frames.insert(page_id, frame);
            state.policy.on_page_cached(&page_id);
            debug!("re-cached modified page {} for txn {}", page_id, txn);
        }
        Ok(())
    }

    /// Finish a transaction: on commit write its dirty pages, on abort drop them so the
    /// next fetch re-reads the committed image. Locks are released afterwards either way.
    pub fn transaction_complete(&self, txn: TransactionID, commit: bool) -> DbResult<()> {
        let result = if commit {
            self.flush_pages(txn)
        } else {
            self.discard_pages(txn);
            Ok(())
        };
        self.lock_table.release_all(txn);
        debug!(
            "txn {} {}",
            txn,
            if commit { "committed" } else { "aborted" }
        );
        result
    }

    fn pages_dirtied_by(state: &PoolState, txn: TransactionID) -> Vec<PageId> {
        let mut pages: Vec<_> = state
            .frames
            .iter()
            .filter(|(_, frame)| frame.is_dirtied_by(txn))
            .map(|(page_id, _)| *page_id)
            .collect();
        pages.sort();
        pages
    }

    fn release_writer(state: &mut PoolState, txn: TransactionID) {
        for frame in state.frames.values_mut() {
            if frame.writer == Some(txn) {
                frame.writer = None;
                frame.write_pins = 0;
            }
        }
    }

    fn flush_pages(&self, txn: TransactionID) -> DbResult<()> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        let pages = Self::pages_dirtied_by(state, txn);
        let mut synced = HashSet::new();
        for (i, page_id) in pages.iter().enumerate() {
            if let Err(e) = self.write_frame(state, page_id) {
                warn!("flush of page {} for txn {} failed: {}", page_id, txn, e);
                for rest in &pages[i..] {
                    Self::remove_frame(state, rest);
                }
                Self::release_writer(state, txn);
                return Err(e);
            }
            synced.insert(page_id.table_id);
        }
        Self::release_writer(state, txn);
        for table_id in synced {
            self.catalog.file(table_id)?.sync()?;
        }
        debug!("flushed {} pages for txn {}", pages.len(), txn);
        Ok(())
    }

    fn discard_pages(&self, txn: TransactionID) {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        let pages = Self::pages_dirtied_by(state, txn);
        for page_id in &pages {
            Self::remove_frame(state, page_id);
        }
        Self::release_writer(state, txn);
        debug!("discarded {} pages for txn {}", pages.len(), txn);
    }

    fn write_frame(&self, state: &mut PoolState, page_id: &PageId) -> DbResult<()> {
        let Some(frame) = state.frames.get_mut(page_id) else {
            return Ok(());
        };
        let file = self.catalog.file(page_id.table_id)?;
        {
            let mut page = frame.page.write().unwrap();
            file.write_page(&page)?;
            page.mark_clean();
        }
        frame.dirtied_by = None;
        trace!("wrote page {}", page_id);
        Ok(())
    }

    fn remove_frame(state: &mut PoolState, page_id: &PageId) {
        if state.frames.remove(page_id).is_some() {
            state.policy.on_page_removed(page_id);
            trace!("dropped page {} from the pool", page_id);
        }
    }

    /// Write a page if it is dirty, whoever modified it. Bypasses transaction boundaries.
    pub fn flush_page(&self, page_id: &PageId) -> DbResult<()> {
        let mut guard = self.state.lock().unwrap();
        let dirty = guard.frames.get(page_id).is_some_and(|frame| {
            frame.dirtied_by.is_some() || frame.page.read().unwrap().is_dirty()
        });
        if dirty {
            self.write_frame(&mut guard, page_id)?;
        }
        Ok(())
    }

    /// Write every dirty page in the pool. Bypasses transaction boundaries.
    pub fn flush_all_pages(&self) -> DbResult<()> {
        let page_ids: Vec<_> = self.state.lock().unwrap().frames.keys().copied().collect();
        for page_id in page_ids {
            self.flush_page(&page_id)?;
        }
        Ok(())
    }

    /// Remove a page from the pool without writing it
    pub fn discard_page(&self, page_id: &PageId) {
        let mut guard = self.state.lock().unwrap();
        Self::remove_frame(&mut guard, page_id);
    }

    pub fn holds_lock(&self, txn: TransactionID, page_id: &PageId) -> bool {
        self.lock_table.holds_lock(txn, page_id)
    }

    pub fn lock_table(&self) -> &LockTable {
        &self.lock_table
    }

    /// Number of cached pages
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> &BufferStats {
        &self.stats
    }

    pub fn is_cached(&self, page_id: &PageId) -> bool {
        self.state.lock().unwrap().frames.contains_key(page_id)
    }
}
