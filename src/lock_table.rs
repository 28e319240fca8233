use std::{
    collections::{HashMap, HashSet},
    sync::{Condvar, Mutex},
};

use log::{debug, trace, warn};

use crate::{
    error::{DbError, DbResult},
    page::PageId,
    wait_for::WaitForGraph,
    TransactionID,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockType {
    Shared,
    Exclusive,
}

#[derive(Debug, Default)]
struct LockState {
    readers: HashSet<TransactionID>, //  transactions holding a shared lock on the page
    writer: Option<TransactionID>,   //  the transaction holding the exclusive lock, if any
}

impl LockState {
    /// Transactions whose locks stop `tx_id` from being granted `lock_type` right now
    fn conflicting_holders(
        &self,
        tx_id: TransactionID,
        lock_type: LockType,
    ) -> HashSet<TransactionID> {
        let mut holders = HashSet::new();
        if let Some(writer) = self.writer {
            if writer != tx_id {
                holders.insert(writer);
            }
        }
        if lock_type == LockType::Exclusive {
            holders.extend(self.readers.iter().copied().filter(|&id| id != tx_id));
        }
        holders
    }

    fn grant(&mut self, tx_id: TransactionID, lock_type: LockType) {
        match lock_type {
            LockType::Shared => {
                if self.writer != Some(tx_id) {
                    self.readers.insert(tx_id);
                }
            }
            LockType::Exclusive => {
                //  an upgrade moves the sole reader over to the writer slot
                self.readers.remove(&tx_id);
                self.writer = Some(tx_id);
            }
        }
    }

    fn release(&mut self, tx_id: TransactionID) {
        self.readers.remove(&tx_id);
        if self.writer == Some(tx_id) {
            self.writer = None;
        }
    }

    fn is_unlocked(&self) -> bool {
        self.readers.is_empty() && self.writer.is_none()
    }

    fn mode_of(&self, tx_id: TransactionID) -> Option<LockType> {
        if self.writer == Some(tx_id) {
            Some(LockType::Exclusive)
        } else if self.readers.contains(&tx_id) {
            Some(LockType::Shared)
        } else {
            None
        }
    }
}

#[derive(Debug, Default)]
struct LockTableState {
    locks: HashMap<PageId, LockState>,
    held: HashMap<TransactionID, HashSet<PageId>>,
    wait_for: WaitForGraph,
}

/// Page level lock table shared by every transaction.
///
/// Locks follow strict two-phase locking: they are only ever released together through
/// [`LockTable::release_all`] when the owning transaction finishes. A request that would
/// have to wait on a transaction which (transitively) waits on the requester fails with
/// [`DbError::Deadlock`] instead of blocking.
#[derive(Debug, Default)]
pub struct LockTable {
    state: Mutex<LockTableState>,
    cond_var: Condvar,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire a shared lock on a [`PageId`] for a transaction
    pub fn acquire_shared_lock(&self, tx_id: TransactionID, page_id: &PageId) -> DbResult<()> {
        self.acquire(tx_id, page_id, LockType::Shared)
    }

    /// Acquire an exclusive lock on a [`PageId`] for a transaction, upgrading a shared lock
    /// if the transaction is the only reader
    pub fn acquire_write_lock(&self, tx_id: TransactionID, page_id: &PageId) -> DbResult<()> {
        self.acquire(tx_id, page_id, LockType::Exclusive)
    }

    /// Block until `lock_type` is granted on `page_id`, or fail if waiting would deadlock
    pub fn acquire(
        &self,
        tx_id: TransactionID,
        page_id: &PageId,
        lock_type: LockType,
    ) -> DbResult<()> {
        let mut guard = self.state.lock().unwrap();
        loop {
            let table = &mut *guard;
            let state = table.locks.entry(*page_id).or_default();
            let holders = state.conflicting_holders(tx_id, lock_type);
            if holders.is_empty() {
                state.grant(tx_id, lock_type);
                table.held.entry(tx_id).or_default().insert(*page_id);
                table.wait_for.clear_wait_edges(tx_id);
                trace!("txn {} granted {:?} lock on page {}", tx_id, lock_type, page_id);
                return Ok(());
            }

            debug!(
                "txn {} waiting for {:?} lock on page {} held by {:?}",
                tx_id, lock_type, page_id, holders
            );
            table.wait_for.set_wait_edges(tx_id, holders);
            if table.wait_for.has_cycle_from(tx_id) {
                table.wait_for.clear_wait_edges(tx_id);
                if state.is_unlocked() {
                    table.locks.remove(page_id);
                }
                warn!(
                    "deadlock detected: txn {} requesting {:?} lock on page {}",
                    tx_id, lock_type, page_id
                );
                return Err(DbError::Deadlock {
                    txn: tx_id,
                    page: *page_id,
                });
            }

            guard = self.cond_var.wait(guard).unwrap();
        }
    }

    /// Release every lock held by a transaction and wake up all waiters
    pub fn release_all(&self, tx_id: TransactionID) {
        let mut guard = self.state.lock().unwrap();
        let table = &mut *guard;
        let pages = table.held.remove(&tx_id).unwrap_or_default();
        for page_id in &pages {
            if let Some(state) = table.locks.get_mut(page_id) {
                state.release(tx_id);
                if state.is_unlocked() {
                    table.locks.remove(page_id);
                }
            }
        }
        table.wait_for.remove_transaction(tx_id);
        debug!("txn {} released {} page locks", tx_id, pages.len());
        self.cond_var.notify_all();
    }

    pub fn holds_lock(&self, tx_id: TransactionID, page_id: &PageId) -> bool {
        self.lock_mode(tx_id, page_id).is_some()
    }

    pub fn lock_mode(&self, tx_id: TransactionID, page_id: &PageId) -> Option<LockType> {
        let guard = self.state.lock().unwrap();
        guard.locks.get(page_id).and_then(|state| state.mode_of(tx_id))
    }

    /// Pages on which the transaction currently holds any lock
    pub fn locked_pages(&self, tx_id: TransactionID) -> Vec<PageId> {
        let guard = self.state.lock().unwrap();
        guard
            .held
            .get(&tx_id)
            .map(|pages| pages.iter().copied().collect())
            .unwrap_or_default()
    }
}
