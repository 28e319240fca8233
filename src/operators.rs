//! Pull-based relational operators over the buffer pool.
//!
//! Every operator implements [`OpIterator`]: `open` before use, then `has_next`/`next`
//! until the sequence ends. Only `fetch_next` and a little lookahead state are operator
//! specific; the peek/consume protocol is shared.

use std::sync::Arc;

use crate::{
    buffer_pool::BufferPool,
    error::{DbError, DbResult},
    heap_file::{HeapFile, HeapFileIterator},
    page::TableId,
    tuple::{CompareOp, Field, FieldType, Tuple, TupleDesc},
    TransactionID,
};

/// Open flag plus one buffered tuple, shared by every operator
#[derive(Debug, Default)]
pub struct Lookahead {
    open: bool,
    peeked: Option<Tuple>,
}

impl Lookahead {
    fn open(&mut self) {
        self.open = true;
        self.peeked = None;
    }

    fn close(&mut self) {
        self.open = false;
        self.peeked = None;
    }

    fn reset(&mut self) -> DbResult<()> {
        if !self.open {
            return Err(DbError::NotOpen);
        }
        self.peeked = None;
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.open
    }
}

pub trait OpIterator {
    fn open(&mut self) -> DbResult<()>;

    fn close(&mut self);

    /// Restart from the first tuple without reconstructing the operator
    fn rewind(&mut self) -> DbResult<()>;

    fn tuple_desc(&self) -> &Arc<TupleDesc>;

    /// Produce the next tuple, or `None` at the end. Only called while open.
    fn fetch_next(&mut self) -> DbResult<Option<Tuple>>;

    fn lookahead(&mut self) -> &mut Lookahead;

    fn has_next(&mut self) -> DbResult<bool> {
        if !self.lookahead().open {
            return Err(DbError::NotOpen);
        }
        if self.lookahead().peeked.is_none() {
            let next = self.fetch_next()?;
            self.lookahead().peeked = next;
        }
        Ok(self.lookahead().peeked.is_some())
    }

    fn next(&mut self) -> DbResult<Tuple> {
        if !self.has_next()? {
            return Err(DbError::NoMoreTuples);
        }
        self.lookahead().peeked.take().ok_or(DbError::NoMoreTuples)
    }
}

/// Pull every remaining tuple out of an open operator
pub fn drain(op: &mut dyn OpIterator) -> DbResult<Vec<Tuple>> {
    let mut tuples = Vec::new();
    while op.has_next()? {
        tuples.push(op.next()?);
    }
    Ok(tuples)
}

fn next_from(child: &mut dyn OpIterator) -> DbResult<Option<Tuple>> {
    if child.has_next()? {
        child.next().map(Some)
    } else {
        Ok(None)
    }
}

/// Scan of every tuple of a table under shared page locks
pub struct SeqScan {
    pool: Arc<BufferPool>,
    txn: TransactionID,
    file: Arc<HeapFile>,
    iter: Option<HeapFileIterator>,
    lookahead: Lookahead,
}

impl SeqScan {
    pub fn new(pool: Arc<BufferPool>, txn: TransactionID, table_id: TableId) -> DbResult<Self> {
        let file = pool.catalog().file(table_id)?;
        Ok(Self {
            pool,
            txn,
            file,
            iter: None,
            lookahead: Lookahead::default(),
        })
    }
}

impl OpIterator for SeqScan {
    fn open(&mut self) -> DbResult<()> {
        self.iter = Some(self.file.iter(Arc::clone(&self.pool), self.txn));
        self.lookahead.open();
        Ok(())
    }

    fn close(&mut self) {
        self.iter = None;
        self.lookahead.close();
    }

    fn rewind(&mut self) -> DbResult<()> {
        self.lookahead.reset()?;
        if let Some(iter) = self.iter.as_mut() {
            iter.rewind();
        }
        Ok(())
    }

    fn tuple_desc(&self) -> &Arc<TupleDesc> {
        self.file.desc()
    }

    fn fetch_next(&mut self) -> DbResult<Option<Tuple>> {
        let iter = self.iter.as_mut().ok_or(DbError::NotOpen)?;
        iter.next().transpose()
    }

    fn lookahead(&mut self) -> &mut Lookahead {
        &mut self.lookahead
    }
}

/// Compares one field of a tuple against a constant
#[derive(Debug, Clone)]
pub struct Predicate {
    pub field: usize,
    pub op: CompareOp,
    pub operand: Field,
}

impl Predicate {
    pub fn new(field: usize, op: CompareOp, operand: Field) -> Self {
        Self { field, op, operand }
    }

    pub fn filter(&self, tuple: &Tuple) -> bool {
        tuple.field(self.field).compare(self.op, &self.operand)
    }
}

pub struct Filter {
    predicate: Predicate,
    child: Box<dyn OpIterator>,
    lookahead: Lookahead,
}

impl Filter {
    pub fn new(predicate: Predicate, child: Box<dyn OpIterator>) -> DbResult<Self> {
        let desc = child.tuple_desc();
        if predicate.field >= desc.num_fields() {
            return Err(DbError::InvalidValue(format!(
                "field {} out of range for ({})",
                predicate.field, desc
            )));
        }
        Ok(Self {
            predicate,
            child,
            lookahead: Lookahead::default(),
        })
    }
}

impl OpIterator for Filter {
    fn open(&mut self) -> DbResult<()> {
        self.child.open()?;
        self.lookahead.open();
        Ok(())
    }

    fn close(&mut self) {
        self.child.close();
        self.lookahead.close();
    }

    fn rewind(&mut self) -> DbResult<()> {
        self.lookahead.reset()?;
        self.child.rewind()
    }

    fn tuple_desc(&self) -> &Arc<TupleDesc> {
        self.child.tuple_desc()
    }

    fn fetch_next(&mut self) -> DbResult<Option<Tuple>> {
        while let Some(tuple) = next_from(self.child.as_mut())? {
            if self.predicate.filter(&tuple) {
                return Ok(Some(tuple));
            }
        }
        Ok(None)
    }

    fn lookahead(&mut self) -> &mut Lookahead {
        &mut self.lookahead
    }
}

/// Progress of a single-result operator between `open`/`rewind` and the end of its output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitState {
    NotStarted,
    Emitted,
    Exhausted,
}

fn count_desc() -> Arc<TupleDesc> {
    Arc::new(TupleDesc::with_names(&[FieldType::Int], &["count"]))
}

fn count_tuple(desc: &Arc<TupleDesc>, count: usize) -> DbResult<Tuple> {
    let count = i32::try_from(count)
        .map_err(|_| DbError::InvalidValue(format!("row count {count} overflows int")))?;
    Tuple::new(Arc::clone(desc), vec![Field::Int(count)])
}

/// Inserts every child tuple into a table, then yields one tuple holding the row count
pub struct Insert {
    pool: Arc<BufferPool>,
    txn: TransactionID,
    table_id: TableId,
    child: Box<dyn OpIterator>,
    desc: Arc<TupleDesc>,
    state: EmitState,
    lookahead: Lookahead,
}

impl Insert {
    pub fn new(
        pool: Arc<BufferPool>,
        txn: TransactionID,
        child: Box<dyn OpIterator>,
        table_id: TableId,
    ) -> DbResult<Self> {
        let table_desc = pool.catalog().tuple_desc(table_id)?;
        if !child.tuple_desc().is_compatible(&table_desc) {
            return Err(DbError::SchemaMismatch(format!(
                "cannot insert ({}) into table with ({})",
                child.tuple_desc(),
                table_desc
            )));
        }
        Ok(Self {
            pool,
            txn,
            table_id,
            child,
            desc: count_desc(),
            state: EmitState::NotStarted,
            lookahead: Lookahead::default(),
        })
    }

    pub fn state(&self) -> EmitState {
        self.state
    }
}

impl OpIterator for Insert {
    fn open(&mut self) -> DbResult<()> {
        self.child.open()?;
        self.state = EmitState::NotStarted;
        self.lookahead.open();
        Ok(())
    }

    fn close(&mut self) {
        self.child.close();
        self.lookahead.close();
    }

    fn rewind(&mut self) -> DbResult<()> {
        self.lookahead.reset()?;
        self.child.rewind()?;
        self.state = EmitState::NotStarted;
        Ok(())
    }

    fn tuple_desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    fn fetch_next(&mut self) -> DbResult<Option<Tuple>> {
        match self.state {
            EmitState::NotStarted => {
                let mut count = 0;
                while let Some(mut tuple) = next_from(self.child.as_mut())? {
                    self.pool.insert_tuple(self.txn, self.table_id, &mut tuple)?;
                    count += 1;
                }
                self.state = EmitState::Emitted;
                count_tuple(&self.desc, count).map(Some)
            }
            EmitState::Emitted | EmitState::Exhausted => {
                self.state = EmitState::Exhausted;
                Ok(None)
            }
        }
    }

    fn lookahead(&mut self) -> &mut Lookahead {
        &mut self.lookahead
    }
}

/// Deletes every child tuple by record id, then yields one tuple holding the row count
pub struct Delete {
    pool: Arc<BufferPool>,
    txn: TransactionID,
    child: Box<dyn OpIterator>,
    desc: Arc<TupleDesc>,
    state: EmitState,
    lookahead: Lookahead,
}

impl Delete {
    pub fn new(pool: Arc<BufferPool>, txn: TransactionID, child: Box<dyn OpIterator>) -> Self {
        Self {
            pool,
            txn,
            child,
            desc: count_desc(),
            state: EmitState::NotStarted,
            lookahead: Lookahead::default(),
        }
    }

    pub fn state(&self) -> EmitState {
        self.state
    }
}

impl OpIterator for Delete {
    fn open(&mut self) -> DbResult<()> {
        self.child.open()?;
        self.state = EmitState::NotStarted;
        self.lookahead.open();
        Ok(())
    }

    fn close(&mut self) {
        self.child.close();
        self.lookahead.close();
    }

    fn rewind(&mut self) -> DbResult<()> {
        self.lookahead.reset()?;
        self.child.rewind()?;
        self.state = EmitState::NotStarted;
        Ok(())
    }

    fn tuple_desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    fn fetch_next(&mut self) -> DbResult<Option<Tuple>> {
        match self.state {
            EmitState::NotStarted => {
                let mut count = 0;
                while let Some(tuple) = next_from(self.child.as_mut())? {
                    self.pool.delete_tuple(self.txn, &tuple)?;
                    count += 1;
                }
                self.state = EmitState::Emitted;
                count_tuple(&self.desc, count).map(Some)
            }
            EmitState::Emitted | EmitState::Exhausted => {
                self.state = EmitState::Exhausted;
                Ok(None)
            }
        }
    }

    fn lookahead(&mut self) -> &mut Lookahead {
        &mut self.lookahead
    }
}

/// In-memory tuple source
pub struct TupleIterator {
    desc: Arc<TupleDesc>,
    tuples: Vec<Tuple>,
    pos: usize,
    lookahead: Lookahead,
}

impl TupleIterator {
    pub fn new(desc: Arc<TupleDesc>, tuples: Vec<Tuple>) -> DbResult<Self> {
        if let Some(bad) = tuples.iter().find(|t| !t.desc().is_compatible(&desc)) {
            return Err(DbError::SchemaMismatch(format!(
                "tuple ({}) does not match ({})",
                bad.desc(),
                desc
            )));
        }
        Ok(Self {
            desc,
            tuples,
            pos: 0,
            lookahead: Lookahead::default(),
        })
    }
}

impl OpIterator for TupleIterator {
    fn open(&mut self) -> DbResult<()> {
        self.pos = 0;
        self.lookahead.open();
        Ok(())
    }

    fn close(&mut self) {
        self.lookahead.close();
    }

    fn rewind(&mut self) -> DbResult<()> {
        self.lookahead.reset()?;
        self.pos = 0;
        Ok(())
    }

    fn tuple_desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    fn fetch_next(&mut self) -> DbResult<Option<Tuple>> {
        let tuple = self.tuples.get(self.pos).cloned();
        if tuple.is_some() {
            self.pos += 1;
        }
        Ok(tuple)
    }

    fn lookahead(&mut self) -> &mut Lookahead {
        &mut self.lookahead
    }
}

#[cfg(test)]
mod operator_tests {
    use std::sync::Arc;

    use super::*;
    use crate::{test_utils::int_tuple, HeapDB};

    fn desc() -> Arc<TupleDesc> {
        Arc::new(TupleDesc::with_names(
            &[FieldType::Int, FieldType::Text],
            &["id", "name"],
        ))
    }

    fn source(values: std::ops::Range<i32>) -> TupleIterator {
        let desc = desc();
        let tuples = values.map(|v| int_tuple(&desc, v)).collect();
        TupleIterator::new(desc, tuples).unwrap()
    }

    fn count_of(tuple: &Tuple) -> i32 {
        match tuple.field(0) {
            Field::Int(n) => *n,
            other => panic!("count should be an int, got {other:?}"),
        }
    }

    #[test]
    fn test_protocol_errors() {
        let mut iter = source(0..2);
        assert!(matches!(iter.has_next(), Err(DbError::NotOpen)));
        assert!(matches!(iter.next(), Err(DbError::NotOpen)));

        iter.open().unwrap();
        assert_eq!(drain(&mut iter).unwrap().len(), 2);
        assert!(!iter.has_next().unwrap());
        assert!(matches!(iter.next(), Err(DbError::NoMoreTuples)));

        iter.rewind().unwrap();
        assert_eq!(count_of(&iter.next().unwrap()), 0);

        iter.close();
        assert!(matches!(iter.next(), Err(DbError::NotOpen)));
        assert!(matches!(iter.rewind(), Err(DbError::NotOpen)));
    }

    #[test]
    fn test_has_next_does_not_consume() {
        let mut iter = source(0..1);
        iter.open().unwrap();
        assert!(iter.has_next().unwrap());
        assert!(iter.has_next().unwrap());
        assert_eq!(count_of(&iter.next().unwrap()), 0);
        assert!(!iter.has_next().unwrap());
    }

    #[test]
    fn test_tuple_iterator_rejects_foreign_tuples() {
        let other = Arc::new(TupleDesc::from_types(&[FieldType::Int]));
        let result = TupleIterator::new(desc(), vec![int_tuple(&other, 1)]);
        assert!(matches!(result, Err(DbError::SchemaMismatch(_))));
    }

    #[test]
    fn test_filter() {
        let predicate = Predicate::new(0, CompareOp::Ge, Field::Int(3));
        let mut filter = Filter::new(predicate, Box::new(source(0..6))).unwrap();
        filter.open().unwrap();
        let ids: Vec<i32> = drain(&mut filter).unwrap().iter().map(count_of).collect();
        assert_eq!(ids, vec![3, 4, 5]);

        filter.rewind().unwrap();
        assert_eq!(drain(&mut filter).unwrap().len(), 3);

        let text = Predicate::new(1, CompareOp::Eq, Field::Text("v4".to_string()));
        let mut filter = Filter::new(text, Box::new(source(0..6))).unwrap();
        filter.open().unwrap();
        assert_eq!(drain(&mut filter).unwrap().len(), 1);
    }

    #[test]
    fn test_filter_rejects_unknown_field() {
        let predicate = Predicate::new(5, CompareOp::Eq, Field::Int(0));
        assert!(matches!(
            Filter::new(predicate, Box::new(source(0..1))),
            Err(DbError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_insert_emits_one_count() {
        let (db, _test_dir) = HeapDB::new_for_test(8);
        let file = db.open_table("insert", (*desc()).clone(), Some("id")).unwrap();
        let txn = db.begin();
        let pool = Arc::clone(db.buffer_pool());

        let mut insert = Insert::new(Arc::clone(&pool), txn.id(), Box::new(source(0..5)), file.id())
            .unwrap();
        assert!(matches!(insert.next(), Err(DbError::NotOpen)));
        insert.open().unwrap();
        assert_eq!(insert.state(), EmitState::NotStarted);
        assert_eq!(count_of(&insert.next().unwrap()), 5);
        assert_eq!(insert.state(), EmitState::Emitted);
        assert!(!insert.has_next().unwrap());
        assert_eq!(insert.state(), EmitState::Exhausted);
        assert!(matches!(insert.next(), Err(DbError::NoMoreTuples)));

        insert.rewind().unwrap();
        assert_eq!(insert.state(), EmitState::NotStarted);
        assert_eq!(count_of(&insert.next().unwrap()), 5);
        assert!(!insert.has_next().unwrap());

        insert.close();
        insert.open().unwrap();
        assert_eq!(count_of(&insert.next().unwrap()), 5);
        insert.close();

        let mut scan = SeqScan::new(Arc::clone(&pool), txn.id(), file.id()).unwrap();
        scan.open().unwrap();
        assert_eq!(drain(&mut scan).unwrap().len(), 15);
        scan.close();
        txn.commit().unwrap();
    }

    #[test]
    fn test_insert_checks_schema() {
        let (db, _test_dir) = HeapDB::new_for_test(8);
        let file = db
            .open_table("ints", TupleDesc::from_types(&[FieldType::Int]), None)
            .unwrap();
        let txn = db.begin();
        let result = Insert::new(
            Arc::clone(db.buffer_pool()),
            txn.id(),
            Box::new(source(0..1)),
            file.id(),
        );
        assert!(matches!(result, Err(DbError::SchemaMismatch(_))));
        txn.abort().unwrap();
    }

    #[test]
    fn test_delete_matching_rows() {
        let (db, _test_dir) = HeapDB::new_for_test(8);
        let file = db.open_table("delete", (*desc()).clone(), None).unwrap();
        let pool = Arc::clone(db.buffer_pool());

        let txn = db.begin();
        let mut insert =
            Insert::new(Arc::clone(&pool), txn.id(), Box::new(source(0..10)), file.id()).unwrap();
        insert.open().unwrap();
        assert_eq!(count_of(&insert.next().unwrap()), 10);
        insert.close();
        txn.commit().unwrap();

        let txn = db.begin();
        let scan = SeqScan::new(Arc::clone(&pool), txn.id(), file.id()).unwrap();
        let predicate = Predicate::new(0, CompareOp::Lt, Field::Int(4));
        let filter = Filter::new(predicate, Box::new(scan)).unwrap();
        let mut delete = Delete::new(Arc::clone(&pool), txn.id(), Box::new(filter));
        delete.open().unwrap();
        assert_eq!(count_of(&delete.next().unwrap()), 4);
        assert!(!delete.has_next().unwrap());
        delete.close();
        txn.commit().unwrap();

        let txn = db.begin();
        let mut scan = SeqScan::new(Arc::clone(&pool), txn.id(), file.id()).unwrap();
        scan.open().unwrap();
        let mut ids: Vec<i32> = drain(&mut scan).unwrap().iter().map(count_of).collect();
        ids.sort();
        assert_eq!(ids, (4..10).collect::<Vec<_>>());
        txn.commit().unwrap();
    }

    #[test]
    fn test_seq_scan_rewind() {
        let (db, _test_dir) = HeapDB::new_for_test(8);
        let file = db.open_table("rewind", (*desc()).clone(), None).unwrap();
        let txn = db.begin();
        let pool = Arc::clone(db.buffer_pool());
        for v in 0..3 {
            pool.insert_tuple(txn.id(), file.id(), &mut int_tuple(file.desc(), v))
                .unwrap();
        }

        let mut scan = SeqScan::new(Arc::clone(&pool), txn.id(), file.id()).unwrap();
        assert!(matches!(scan.has_next(), Err(DbError::NotOpen)));
        scan.open().unwrap();
        assert_eq!(scan.tuple_desc().index_of("name"), Some(1));
        assert_eq!(drain(&mut scan).unwrap().len(), 3);
        scan.rewind().unwrap();
        assert_eq!(drain(&mut scan).unwrap().len(), 3);
        scan.close();
        txn.commit().unwrap();
    }
}
