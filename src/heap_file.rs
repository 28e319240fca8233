use std::{
    collections::hash_map::DefaultHasher,
    fs::{self, File, OpenOptions},
    hash::{Hash, Hasher},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use log::{debug, trace};

use crate::{
    buffer_pool::{BufferPool, Permissions},
    error::{DbError, DbResult},
    page::{HeapPage, PageId, PageRef, TableId, PAGE_SIZE},
    tuple::{Tuple, TupleDesc},
    TransactionID,
};

/// A table stored as a flat sequence of [`PAGE_SIZE`] pages, page `k` at byte `k * PAGE_SIZE`.
///
/// The file carries no header: the page count is always derived from the file length.
/// Every page access made on behalf of a transaction goes through the [`BufferPool`];
/// `read_page`/`write_page` are the raw I/O used by the pool itself.
pub struct HeapFile {
    path: PathBuf,
    table_id: TableId,
    desc: Arc<TupleDesc>,
    file: Mutex<File>,
}

impl HeapFile {
    /// Open (creating if needed) the table file at `path`.
    ///
    /// The table id is a hash of the canonical path, so renaming the file gives the table a
    /// new identity the next time it is opened.
    pub fn open<P: AsRef<Path>>(path: P, desc: Arc<TupleDesc>) -> DbResult<Self> {
        if HeapPage::capacity_for(&desc) == 0 {
            return Err(DbError::SchemaMismatch(format!(
                "tuples of {} bytes do not fit on a {} byte page",
                desc.size(),
                PAGE_SIZE
            )));
        }
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.as_ref())?;
        let path = fs::canonicalize(path.as_ref())?;
        let table_id = Self::table_id_for(&path);
        debug!("opened heap file {:?} as table {}", path, table_id);
        Ok(Self {
            path,
            table_id,
            desc,
            file: Mutex::new(file),
        })
    }

    /// Deterministic table id for a canonical file path
    pub fn table_id_for(path: &Path) -> TableId {
        let mut hasher = DefaultHasher::new();
        path.hash(&mut hasher);
        hasher.finish()
    }

    pub fn id(&self) -> TableId {
        self.table_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    /// Length of the backing file in bytes
    pub fn file_len(&self) -> DbResult<u64> {
        let file = self.file.lock().unwrap();
        Ok(file.metadata()?.len())
    }

    /// Number of pages, `ceil(file_len / PAGE_SIZE)`
    pub fn num_pages(&self) -> DbResult<usize> {
        Ok(Self::pages_in(self.file_len()?))
    }

    fn pages_in(len: u64) -> usize {
        len.div_ceil(PAGE_SIZE as u64) as usize
    }

    /// Read and decode exactly one page. A file too short to hold the page is an I/O error.
    pub fn read_page(&self, page_id: &PageId) -> DbResult<HeapPage> {
        debug_assert_eq!(page_id.table_id, self.table_id);
        let mut data = vec![0; PAGE_SIZE];
        {
            let mut file = self.file.lock().unwrap();
            file.seek(SeekFrom::Start(page_id.offset()))?;
            file.read_exact(&mut data)?;
        }
        trace!("read page {} from {:?}", page_id, self.path);
        HeapPage::from_bytes(*page_id, Arc::clone(&self.desc), &data)
    }

    /// Write one page at its offset. Writing the page right after the last one extends the
    /// file; anything further out would leave a gap and is rejected.
    pub fn write_page(&self, page: &HeapPage) -> DbResult<()> {
        let mut file = self.file.lock().unwrap();
        Self::write_locked(&mut file, page.id(), &page.to_bytes())?;
        trace!("wrote page {} to {:?}", page.id(), self.path);
        Ok(())
    }

    fn write_locked(file: &mut File, page_id: PageId, data: &[u8]) -> DbResult<()> {
        let num_pages = Self::pages_in(file.metadata()?.len());
        if page_id.page_no > num_pages {
            return Err(DbError::NonContiguousWrite {
                page_no: page_id.page_no,
                num_pages,
            });
        }
        file.seek(SeekFrom::Start(page_id.offset()))?;
        file.write_all(data)?;
        Ok(())
    }

    /// Force written pages to stable storage
    pub fn sync(&self) -> DbResult<()> {
        self.file.lock().unwrap().sync_data()?;
        Ok(())
    }

    /// Extend the file by one empty page and return its id. The new page number is the page
    /// count before the append; holding the file latch makes concurrent appends distinct.
    fn append_empty_page(&self) -> DbResult<PageId> {
        let mut file = self.file.lock().unwrap();
        let page_no = Self::pages_in(file.metadata()?.len());
        let page_id = PageId::new(self.table_id, page_no);
        Self::write_locked(&mut file, page_id, &HeapPage::empty_page_data())?;
        debug!("appended page {} to {:?}", page_id, self.path);
        Ok(page_id)
    }

    /// Try to place `tuple` on one page fetched exclusively through the pool.
    fn try_insert(
        &self,
        pool: &BufferPool,
        txn: TransactionID,
        page_id: PageId,
        tuple: &mut Tuple,
    ) -> DbResult<Option<PageRef>> {
        let page = pool.get_page(txn, &page_id, Permissions::ReadWrite)?;
        let inserted = page.write().unwrap().insert_tuple(tuple);
        match inserted {
            Ok(_) => Ok(Some(page)),
            Err(DbError::NoFreeSlot(_)) => {
                pool.unpin_page(txn, &page_id);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Insert a tuple into the first page with room, scanning from page 0, or into a freshly
    /// appended page. Returns the page that was modified.
    pub fn insert_tuple(
        &self,
        pool: &BufferPool,
        txn: TransactionID,
        tuple: &mut Tuple,
    ) -> DbResult<Vec<PageRef>> {
        if !tuple.desc().is_compatible(&self.desc) {
            return Err(DbError::SchemaMismatch(format!(
                "tuple ({}) does not match table schema ({})",
                tuple.desc(),
                self.desc
            )));
        }

        for page_no in 0..self.num_pages()? {
            let page_id = PageId::new(self.table_id, page_no);
            if let Some(page) = self.try_insert(pool, txn, page_id, tuple)? {
                return Ok(vec![page]);
            }
        }

        //  a concurrent transaction can fill a page we just appended, so keep appending
        loop {
            let page_id = self.append_empty_page()?;
            if let Some(page) = self.try_insert(pool, txn, page_id, tuple)? {
                return Ok(vec![page]);
            }
        }
    }

    /// Delete the tuple from the page named by its record id
    pub fn delete_tuple(
        &self,
        pool: &BufferPool,
        txn: TransactionID,
        tuple: &Tuple,
    ) -> DbResult<Vec<PageRef>> {
        let record_id = tuple.record_id().ok_or(DbError::MissingRecordId)?;
        let page_id = record_id.page_id;
        if page_id.table_id != self.table_id || page_id.page_no >= self.num_pages()? {
            return Err(DbError::TupleNotOnPage {
                page: page_id,
                record_id: Some(record_id),
            });
        }
        let page = pool.get_page(txn, &page_id, Permissions::ReadWrite)?;
        page.write().unwrap().delete_tuple(tuple)?;
        Ok(vec![page])
    }

    /// Lazily scan every tuple of the table under shared page locks, page 0 first
    pub fn iter(self: &Arc<Self>, pool: Arc<BufferPool>, txn: TransactionID) -> HeapFileIterator {
        HeapFileIterator {
            file: Arc::clone(self),
            pool,
            txn,
            page_no: 0,
            slot: 0,
            current: None,
        }
    }
}

/// Cursor over all tuples of a [`HeapFile`]. Pages are fetched one at a time as the scan
/// reaches them; locks taken stay with the transaction.
pub struct HeapFileIterator {
    file: Arc<HeapFile>,
    pool: Arc<BufferPool>,
    txn: TransactionID,
    page_no: usize,
    slot: usize,
    current: Option<PageRef>,
}

impl HeapFileIterator {
    /// Restart the scan from the first page
    pub fn rewind(&mut self) {
        self.page_no = 0;
        self.slot = 0;
        self.current = None;
    }

    fn current_page(&mut self) -> DbResult<Option<PageRef>> {
        if let Some(page) = &self.current {
            return Ok(Some(Arc::clone(page)));
        }
        if self.page_no >= self.file.num_pages()? {
            return Ok(None);
        }
        let page_id = PageId::new(self.file.id(), self.page_no);
        let page = self
            .pool
            .get_page(self.txn, &page_id, Permissions::ReadOnly)?;
        self.current = Some(Arc::clone(&page));
        Ok(Some(page))
    }
}

impl Iterator for HeapFileIterator {
    type Item = DbResult<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let page = match self.current_page() {
                Ok(Some(page)) => page,
                Ok(None) => return None,
                Err(e) => return Some(Err(e)),
            };
            let guard = page.read().unwrap();
            while self.slot < guard.capacity() {
                let slot = self.slot;
                self.slot += 1;
                if let Some(tuple) = guard.tuple(slot) {
                    return Some(Ok(tuple.clone()));
                }
            }
            drop(guard);
            self.page_no += 1;
            self.slot = 0;
            self.current = None;
        }
    }
}
