use std::io;

use thiserror::Error;

use crate::{page::PageId, RecordId, TableId, TransactionID};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("no free slot on page {0}")]
    NoFreeSlot(PageId),

    #[error("tuple {record_id:?} is not on page {page}")]
    TupleNotOnPage {
        page: PageId,
        record_id: Option<RecordId>,
    },

    #[error("tuple has no record id")]
    MissingRecordId,

    #[error("cannot write page {page_no} into a file of {num_pages} pages")]
    NonContiguousWrite { page_no: usize, num_pages: usize },

    #[error("page image is {actual} bytes, expected {expected}")]
    PageSize { expected: usize, actual: usize },

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("transaction {txn} aborted: deadlock while locking page {page}")]
    Deadlock { txn: TransactionID, page: PageId },

    #[error("buffer pool full: all {capacity} cached pages are dirty or being written")]
    PoolExhausted { capacity: usize },

    #[error("no table with id {0}")]
    UnknownTable(TableId),

    #[error("no table named {0:?}")]
    UnknownTableName(String),

    #[error("operator is not open")]
    NotOpen,

    #[error("no more tuples")]
    NoMoreTuples,

    #[error("invalid value: {0}")]
    InvalidValue(String),
}

impl DbError {
    pub fn is_deadlock(&self) -> bool {
        matches!(self, DbError::Deadlock { .. })
    }

    /// Whether the owning transaction has to be rolled back after this error.
    /// Only a full page is recovered locally (by trying another page).
    pub fn aborts_transaction(&self) -> bool {
        !matches!(self, DbError::NoFreeSlot(_))
    }
}
