use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use log::info;

pub mod buffer_pool;
pub mod catalog;
pub mod error;
pub mod heap_file;
pub mod lock_table;
pub mod operators;
pub mod page;
pub mod replacement;
pub mod test_utils;
pub mod transaction;
pub mod tuple;
mod wait_for;

#[cfg(test)]
use test_utils::TestDir;

pub use buffer_pool::{BufferPool, Permissions};
pub use catalog::Catalog;
pub use error::{DbError, DbResult};
pub use heap_file::HeapFile;
pub use page::{HeapPage, PageId, RecordId, TableId, PAGE_SIZE};
pub use transaction::{Transaction, TransactionID};
pub use tuple::{Field, FieldType, Tuple, TupleDesc};

/// The database struct
///
/// Owns the catalog and the buffer pool every transaction goes through. Tables live in
/// `<db_directory>/<name>.dat`.
pub struct HeapDB {
    db_directory: PathBuf,
    catalog: Arc<Catalog>,
    buffer_pool: Arc<BufferPool>,
}

impl HeapDB {
    const TABLE_EXTENSION: &'static str = "dat";

    pub fn new<P: AsRef<Path>>(path: P, pool_pages: usize) -> Self {
        let catalog = Arc::new(Catalog::new());
        let buffer_pool = Arc::new(BufferPool::new(Arc::clone(&catalog), pool_pages));
        info!(
            "database at {:?}: {} byte pages, {} page pool",
            path.as_ref(),
            PAGE_SIZE,
            pool_pages
        );
        Self {
            db_directory: path.as_ref().to_path_buf(),
            catalog,
            buffer_pool,
        }
    }

    #[cfg(test)]
    pub(crate) fn new_for_test(pool_pages: usize) -> (Self, TestDir) {
        let test_dir = TestDir::unique("test_heapdb");
        let db = Self::new(&test_dir, pool_pages);
        (db, test_dir)
    }

    pub fn db_directory(&self) -> &Path {
        &self.db_directory
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPool> {
        &self.buffer_pool
    }

    /// Open or create the table `name` and register it in the catalog
    pub fn open_table(
        &self,
        name: &str,
        desc: TupleDesc,
        primary_key: Option<&str>,
    ) -> DbResult<Arc<HeapFile>> {
        if let Some(key) = primary_key {
            if desc.index_of(key).is_none() {
                return Err(DbError::SchemaMismatch(format!(
                    "primary key {key:?} is not a field of ({desc})"
                )));
            }
        }
        let path = self
            .db_directory
            .join(name)
            .with_extension(Self::TABLE_EXTENSION);
        let file = Arc::new(HeapFile::open(path, Arc::new(desc))?);
        self.catalog.add_table(Arc::clone(&file), name, primary_key);
        Ok(file)
    }

    pub fn begin(&self) -> Transaction {
        Transaction::new(Arc::clone(&self.buffer_pool))
    }
}
