use std::{
    fmt::Display,
    sync::{Arc, RwLock},
};

use crate::{
    error::{DbError, DbResult},
    tuple::{Tuple, TupleDesc},
};

// Compile-time fixed page size, selected via Cargo features.
// Exactly one of `page-4k`, `page-8k`, or `page-1m` should be enabled.
#[cfg(feature = "page-4k")]
pub const PAGE_SIZE: usize = 4096;
#[cfg(feature = "page-8k")]
pub const PAGE_SIZE: usize = 8192;
#[cfg(feature = "page-1m")]
pub const PAGE_SIZE: usize = 1024 * 1024;

#[cfg(not(any(feature = "page-4k", feature = "page-8k", feature = "page-1m")))]
compile_error!(
    "One of `page-4k`, `page-8k`, or `page-1m` features must be enabled to select a page size."
);

#[cfg(any(
    all(feature = "page-4k", feature = "page-8k"),
    all(feature = "page-4k", feature = "page-1m"),
    all(feature = "page-8k", feature = "page-1m"),
))]
compile_error!("Enable only one page size feature (`page-4k`, `page-8k` or `page-1m`)");

pub type TableId = u64;

/// Identity of one page of one table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId {
    pub table_id: TableId,
    pub page_no: usize,
}

impl PageId {
    pub fn new(table_id: TableId, page_no: usize) -> Self {
        Self { table_id, page_no }
    }

    /// Byte offset of this page inside its table file
    pub fn offset(&self) -> u64 {
        (self.page_no * PAGE_SIZE) as u64
    }
}

impl Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.table_id, self.page_no)
    }
}

/// Location of a stored tuple: the page plus the slot within it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId {
    pub page_id: PageId,
    pub slot: usize,
}

impl RecordId {
    pub fn new(page_id: PageId, slot: usize) -> Self {
        Self { page_id, slot }
    }
}

/// Handle to the single cached instance of a page
pub type PageRef = Arc<RwLock<HeapPage>>;

/// The decoded view of a heap page.
///
/// Layout on disk: a bitmap of `ceil(capacity / 8)` bytes where bit `i` (least significant
/// bit first within each byte) marks slot `i` as occupied, followed by `capacity` slots of
/// `desc.size()` bytes each. Whatever follows the last slot is zero padding.
#[derive(Debug, Clone)]
pub struct HeapPage {
    pid: PageId,
    desc: Arc<TupleDesc>,
    header: Vec<u8>,
    slots: Vec<Option<Tuple>>,
    dirty: bool,
}

impl HeapPage {
    /// Number of tuples of this schema that fit on one page, leaving one header bit per slot
    pub fn capacity_for(desc: &TupleDesc) -> usize {
        (PAGE_SIZE * 8) / (desc.size() * 8 + 1)
    }

    fn header_len(capacity: usize) -> usize {
        capacity.div_ceil(8)
    }

    /// The on-disk image of a page with no occupied slots
    pub fn empty_page_data() -> Vec<u8> {
        vec![0; PAGE_SIZE]
    }

    pub fn empty(pid: PageId, desc: Arc<TupleDesc>) -> Self {
        let capacity = Self::capacity_for(&desc);
        Self {
            pid,
            desc,
            header: vec![0; Self::header_len(capacity)],
            slots: vec![None; capacity],
            dirty: false,
        }
    }

    /// Decode a page image. Only slots whose header bit is set are read.
    pub fn from_bytes(pid: PageId, desc: Arc<TupleDesc>, data: &[u8]) -> DbResult<Self> {
        if data.len() != PAGE_SIZE {
            return Err(DbError::PageSize {
                expected: PAGE_SIZE,
                actual: data.len(),
            });
        }
        let capacity = Self::capacity_for(&desc);
        let header_len = Self::header_len(capacity);
        let tuple_size = desc.size();
        let header = data[..header_len].to_vec();

        let mut slots = Vec::with_capacity(capacity);
        for slot in 0..capacity {
            if header[slot / 8] & (1 << (slot % 8)) == 0 {
                slots.push(None);
                continue;
            }
            let start = header_len + slot * tuple_size;
            let mut tuple = Tuple::read_from(&desc, &data[start..start + tuple_size])?;
            tuple.set_record_id(Some(RecordId::new(pid, slot)));
            slots.push(Some(tuple));
        }

        Ok(Self {
            pid,
            desc,
            header,
            slots,
            dirty: false,
        })
    }

    /// Encode this page into exactly [`PAGE_SIZE`] bytes. Free slots are written as zeroes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = Self::empty_page_data();
        let header_len = self.header.len();
        let tuple_size = self.desc.size();
        data[..header_len].copy_from_slice(&self.header);
        for (slot, tuple) in self.slots.iter().enumerate() {
            if let Some(tuple) = tuple {
                let start = header_len + slot * tuple_size;
                tuple.write_to(&mut data[start..start + tuple_size]);
            }
        }
        data
    }

    pub fn id(&self) -> PageId {
        self.pid
    }

    pub fn desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn is_slot_used(&self, slot: usize) -> bool {
        slot < self.capacity() && self.header[slot / 8] & (1 << (slot % 8)) != 0
    }

    fn set_slot_used(&mut self, slot: usize, used: bool) {
        if used {
            self.header[slot / 8] |= 1 << (slot % 8);
        } else {
            self.header[slot / 8] &= !(1 << (slot % 8));
        }
    }

    pub fn num_empty_slots(&self) -> usize {
        (0..self.capacity())
            .filter(|&slot| !self.is_slot_used(slot))
            .count()
    }

    /// Place the tuple in the lowest free slot and stamp its [`RecordId`]
    pub fn insert_tuple(&mut self, tuple: &mut Tuple) -> DbResult<RecordId> {
        if !tuple.desc().is_compatible(&self.desc) {
            return Err(DbError::SchemaMismatch(format!(
                "tuple ({}) does not match page schema ({})",
                tuple.desc(),
                self.desc
            )));
        }
        let slot = (0..self.capacity())
            .find(|&slot| !self.is_slot_used(slot))
            .ok_or(DbError::NoFreeSlot(self.pid))?;

        let record_id = RecordId::new(self.pid, slot);
        tuple.set_record_id(Some(record_id));
        self.slots[slot] = Some(tuple.clone());
        self.set_slot_used(slot, true);
        self.dirty = true;
        Ok(record_id)
    }

    pub fn delete_tuple(&mut self, tuple: &Tuple) -> DbResult<()> {
        let not_on_page = || DbError::TupleNotOnPage {
            page: self.pid,
            record_id: tuple.record_id(),
        };
        let record_id = tuple.record_id().ok_or_else(not_on_page)?;
        if record_id.page_id != self.pid || !self.is_slot_used(record_id.slot) {
            return Err(not_on_page());
        }
        self.set_slot_used(record_id.slot, false);
        self.slots[record_id.slot] = None;
        self.dirty = true;
        Ok(())
    }

    pub fn tuple(&self, slot: usize) -> Option<&Tuple> {
        if !self.is_slot_used(slot) {
            return None;
        }
        self.slots[slot].as_ref()
    }

    /// Occupied tuples in ascending slot order
    pub fn iter(&self) -> HeapPageIter<'_> {
        HeapPageIter {
            page: self,
            current_slot: 0,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }
}

pub struct HeapPageIter<'a> {
    page: &'a HeapPage,
    current_slot: usize,
}

impl<'a> Iterator for HeapPageIter<'a> {
    type Item = &'a Tuple;

    fn next(&mut self) -> Option<Self::Item> {
        while self.current_slot < self.page.capacity() {
            let slot = self.current_slot;
            self.current_slot += 1;
            if let Some(tuple) = self.page.tuple(slot) {
                return Some(tuple);
            }
        }
        None
    }
}

#[cfg(test)]
mod page_tests {
    use super::*;
    use crate::tuple::{Field, FieldType};

    fn int_desc(n: usize) -> Arc<TupleDesc> {
        Arc::new(TupleDesc::from_types(&vec![FieldType::Int; n]))
    }

    fn int_tuple(desc: &Arc<TupleDesc>, value: i32) -> Tuple {
        let fields = (0..desc.num_fields()).map(|_| Field::Int(value)).collect();
        Tuple::new(Arc::clone(desc), fields).unwrap()
    }

    #[test]
    fn capacity_leaves_room_for_the_bitmap() {
        let desc = int_desc(3);
        let capacity = HeapPage::capacity_for(&desc);
        assert_eq!(capacity, (PAGE_SIZE * 8) / (12 * 8 + 1));
        assert!(capacity.div_ceil(8) + capacity * desc.size() <= PAGE_SIZE);
        assert!((capacity + 1).div_ceil(8) + (capacity + 1) * desc.size() > PAGE_SIZE);
    }

    #[test]
    fn insert_uses_lowest_free_slot() {
        let desc = int_desc(2);
        let pid = PageId::new(1, 0);
        let mut page = HeapPage::empty(pid, Arc::clone(&desc));
        assert!(!page.is_dirty());

        let mut a = int_tuple(&desc, 1);
        let mut b = int_tuple(&desc, 2);
        let mut c = int_tuple(&desc, 3);
        assert_eq!(page.insert_tuple(&mut a).unwrap().slot, 0);
        assert_eq!(page.insert_tuple(&mut b).unwrap().slot, 1);
        assert!(page.is_dirty());
        assert_eq!(a.record_id(), Some(RecordId::new(pid, 0)));

        page.delete_tuple(&a).unwrap();
        assert!(!page.is_slot_used(0));
        assert_eq!(page.insert_tuple(&mut c).unwrap().slot, 0, "freed slot is reused first");

        let values: Vec<_> = page.iter().map(|t| t.field(0).clone()).collect();
        assert_eq!(values, vec![Field::Int(3), Field::Int(2)]);
    }

    #[test]
    fn full_page_reports_no_free_slot() {
        let desc = int_desc(3);
        let mut page = HeapPage::empty(PageId::new(1, 4), Arc::clone(&desc));
        for i in 0..page.capacity() {
            page.insert_tuple(&mut int_tuple(&desc, i as i32)).unwrap();
        }
        assert_eq!(page.num_empty_slots(), 0);
        assert!(matches!(
            page.insert_tuple(&mut int_tuple(&desc, -1)),
            Err(DbError::NoFreeSlot(pid)) if pid == PageId::new(1, 4)
        ));
    }

    #[test]
    fn insert_rejects_other_schema() {
        let mut page = HeapPage::empty(PageId::new(1, 0), int_desc(2));
        let mut tuple = int_tuple(&int_desc(3), 1);
        assert!(matches!(
            page.insert_tuple(&mut tuple),
            Err(DbError::SchemaMismatch(_))
        ));
        assert_eq!(page.num_empty_slots(), page.capacity());
    }

    #[test]
    fn delete_requires_tuple_on_this_page() {
        let desc = int_desc(1);
        let mut page = HeapPage::empty(PageId::new(1, 0), Arc::clone(&desc));
        let mut other = HeapPage::empty(PageId::new(1, 1), Arc::clone(&desc));

        let unplaced = int_tuple(&desc, 5);
        assert!(matches!(
            page.delete_tuple(&unplaced),
            Err(DbError::TupleNotOnPage { .. })
        ));

        let mut elsewhere = int_tuple(&desc, 6);
        other.insert_tuple(&mut elsewhere).unwrap();
        assert!(page.delete_tuple(&elsewhere).is_err());

        let mut here = int_tuple(&desc, 7);
        page.insert_tuple(&mut here).unwrap();
        page.delete_tuple(&here).unwrap();
        assert!(
            page.delete_tuple(&here).is_err(),
            "second delete of the same slot fails"
        );
    }

    #[test]
    fn page_image_layout() {
        let desc = int_desc(1);
        let pid = PageId::new(9, 2);
        let mut page = HeapPage::empty(pid, Arc::clone(&desc));
        for value in [10, 11, 12] {
            page.insert_tuple(&mut int_tuple(&desc, value)).unwrap();
        }
        let middle = page.tuple(1).unwrap().clone();
        page.delete_tuple(&middle).unwrap();

        let bytes = page.to_bytes();
        assert_eq!(bytes.len(), PAGE_SIZE);
        assert_eq!(bytes[0], 0b0000_0101);

        let header_len = page.capacity().div_ceil(8);
        assert_eq!(&bytes[header_len..header_len + 4], &10i32.to_be_bytes());
        assert_eq!(&bytes[header_len + 8..header_len + 12], &12i32.to_be_bytes());

        let decoded = HeapPage::from_bytes(pid, desc, &bytes).unwrap();
        assert!(!decoded.is_dirty());
        assert_eq!(decoded.to_bytes(), bytes);
        let slots: Vec<_> = decoded
            .iter()
            .map(|t| t.record_id().unwrap().slot)
            .collect();
        assert_eq!(slots, vec![0, 2]);
    }

    #[test]
    fn empty_image_decodes_to_empty_page() {
        let desc = int_desc(2);
        let page =
            HeapPage::from_bytes(PageId::new(1, 0), desc, &HeapPage::empty_page_data()).unwrap();
        assert_eq!(page.iter().count(), 0);
        assert_eq!(page.num_empty_slots(), page.capacity());
    }

    #[test]
    fn from_bytes_rejects_wrong_length() {
        let result = HeapPage::from_bytes(PageId::new(1, 0), int_desc(1), &[0u8; 16]);
        assert!(matches!(
            result,
            Err(DbError::PageSize { expected: PAGE_SIZE, actual: 16 })
        ));
    }
}
