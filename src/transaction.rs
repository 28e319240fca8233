use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, OnceLock,
};

use log::{debug, warn};

use crate::{buffer_pool::BufferPool, error::DbResult};

pub type TransactionID = u64;

struct TxIdGenerator {
    next_id: AtomicU64,
}

impl TxIdGenerator {
    fn next_id(&self) -> TransactionID {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

static TX_ID_GENERATOR: OnceLock<TxIdGenerator> = OnceLock::new();

/// Allocate a process-wide unique, monotonically increasing transaction id
pub fn next_transaction_id() -> TransactionID {
    TX_ID_GENERATOR
        .get_or_init(|| TxIdGenerator {
            next_id: AtomicU64::new(1),
        })
        .next_id()
}

/// A unit of work against a [`BufferPool`].
///
/// Ending the transaction consumes it. A transaction that is dropped without being
/// committed or aborted is aborted, so its locks never outlive it.
pub struct Transaction {
    tx_id: TransactionID,
    buffer_pool: Arc<BufferPool>,
    finished: bool,
}

impl Transaction {
    pub fn new(buffer_pool: Arc<BufferPool>) -> Self {
        let tx_id = next_transaction_id();
        debug!("txn {} started", tx_id);
        Self {
            tx_id,
            buffer_pool,
            finished: false,
        }
    }

    pub fn id(&self) -> TransactionID {
        self.tx_id
    }

    pub fn commit(self) -> DbResult<()> {
        self.complete(true)
    }

    pub fn abort(self) -> DbResult<()> {
        self.complete(false)
    }

    pub fn complete(mut self, commit: bool) -> DbResult<()> {
        self.finished = true;
        self.buffer_pool.transaction_complete(self.tx_id, commit)
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        warn!("txn {} dropped while active, aborting", self.tx_id);
        if let Err(e) = self.buffer_pool.transaction_complete(self.tx_id, false) {
            warn!("abort of txn {} failed: {}", self.tx_id, e);
        }
    }
}

#[cfg(test)]
mod transaction_tests {
    use std::sync::Arc;

    use super::next_transaction_id;
    use crate::{
        buffer_pool::Permissions,
        page::PageId,
        test_utils::int_tuple,
        tuple::{FieldType, TupleDesc},
        HeapDB,
    };

    #[test]
    fn test_ids_increase() {
        let first = next_transaction_id();
        let second = next_transaction_id();
        assert!(second > first);
    }

    #[test]
    fn test_commit_releases_locks() {
        let (db, _test_dir) = HeapDB::new_for_test(4);
        let file = db
            .open_table("t", TupleDesc::from_types(&[FieldType::Int]), None)
            .unwrap();
        let txn = db.begin();
        db.buffer_pool()
            .insert_tuple(txn.id(), file.id(), &mut int_tuple(file.desc(), 1))
            .unwrap();
        let pid = PageId::new(file.id(), 0);
        let id = txn.id();
        assert!(db.buffer_pool().holds_lock(id, &pid));
        txn.commit().unwrap();
        assert!(!db.buffer_pool().holds_lock(id, &pid));
    }

    #[test]
    fn test_drop_aborts() {
        let (db, _test_dir) = HeapDB::new_for_test(4);
        let file = db
            .open_table("t", TupleDesc::from_types(&[FieldType::Int]), None)
            .unwrap();
        let pid = PageId::new(file.id(), 0);
        let id = {
            let txn = db.begin();
            db.buffer_pool()
                .insert_tuple(txn.id(), file.id(), &mut int_tuple(file.desc(), 1))
                .unwrap();
            txn.id()
        };
        assert!(!db.buffer_pool().holds_lock(id, &pid));
        assert!(!db.buffer_pool().is_cached(&pid));

        let reader = db.begin();
        let page = db
            .buffer_pool()
            .get_page(reader.id(), &pid, Permissions::ReadOnly)
            .unwrap();
        assert_eq!(page.read().unwrap().iter().count(), 0);
        drop(page);
        reader.commit().unwrap();
        assert_eq!(Arc::strong_count(db.buffer_pool()), 1);
    }
}
