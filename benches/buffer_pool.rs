use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use heapdb::{
    test_utils::{int_tuple, TestDir},
    FieldType, HeapDB, HeapFile, HeapPage, PageId, Permissions, TupleDesc,
};

fn setup(pool_pages: usize) -> (HeapDB, Arc<HeapFile>, TestDir) {
    let test_dir = TestDir::unique("bench_heapdb");
    let db = HeapDB::new(&test_dir, pool_pages);
    let desc = TupleDesc::from_types(&[FieldType::Int, FieldType::Int, FieldType::Text]);
    let file = db.open_table("bench", desc, None).unwrap();
    (db, file, test_dir)
}

fn load(db: &HeapDB, file: &HeapFile, rows: usize) {
    let txn = db.begin();
    for i in 0..rows {
        db.buffer_pool()
            .insert_tuple(txn.id(), file.id(), &mut int_tuple(file.desc(), i as i32))
            .unwrap();
    }
    txn.commit().unwrap();
}

fn get_page_hit(c: &mut Criterion) {
    let (db, file, _test_dir) = setup(16);
    load(&db, &file, 1);
    let pid = PageId::new(file.id(), 0);
    let txn = db.begin();
    c.bench_function("get_page (hit)", |b| {
        b.iter(|| {
            db.buffer_pool()
                .get_page(txn.id(), black_box(&pid), Permissions::ReadOnly)
                .unwrap()
        })
    });
    txn.commit().unwrap();
}

fn insert_commit(c: &mut Criterion) {
    let (db, file, _test_dir) = setup(64);
    let per_page = HeapPage::capacity_for(file.desc());
    c.bench_function("insert one page and commit", |b| {
        b.iter_batched(
            || (0..per_page as i32).map(|i| int_tuple(file.desc(), i)).collect::<Vec<_>>(),
            |mut tuples| {
                let txn = db.begin();
                for tuple in tuples.iter_mut() {
                    db.buffer_pool()
                        .insert_tuple(txn.id(), file.id(), tuple)
                        .unwrap();
                }
                txn.commit().unwrap();
            },
            BatchSize::SmallInput,
        )
    });
}

fn scan_with_eviction(c: &mut Criterion) {
    let (db, file, _test_dir) = setup(8);
    let per_page = HeapPage::capacity_for(file.desc());
    for _ in 0..32 {
        load(&db, &file, per_page);
    }
    c.bench_function("scan 32 pages through 8 frames", |b| {
        b.iter(|| {
            let txn = db.begin();
            let count = file
                .iter(Arc::clone(db.buffer_pool()), txn.id())
                .map(|t| t.unwrap())
                .count();
            txn.commit().unwrap();
            count
        })
    });
}

criterion_group!(benches, get_page_hit, insert_commit, scan_with_eviction);
criterion_main!(benches);
