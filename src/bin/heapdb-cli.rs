use std::{error::Error, path::PathBuf, sync::Arc};

use clap::{Parser, Subcommand};
use heapdb::{
    operators::{drain, Delete, Filter, OpIterator, Predicate, SeqScan},
    tuple::CompareOp,
    BufferPool, DbResult, HeapDB, HeapFile, Transaction, Tuple, TupleDesc,
};

#[derive(Parser, Debug)]
#[command(name = "heapdb-cli")]
#[command(about = "Insert, scan and delete rows of a heap file table")]
struct Args {
    /// Directory holding the table files
    #[arg(long, default_value = "./heapdb-data")]
    dir: PathBuf,

    /// Table name; the file is <dir>/<table>.dat
    #[arg(long)]
    table: String,

    /// Comma separated field types, optionally named: int,text or id:int,name:text
    #[arg(long)]
    schema: String,

    /// Number of pages the buffer pool may cache
    #[arg(long, default_value_t = BufferPool::DEFAULT_PAGES)]
    pool_pages: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Insert one row; values are given in schema order
    Insert { values: Vec<String> },
    /// Print every row
    Scan,
    /// Delete every row whose field equals a value
    Delete {
        /// Zero based field index
        #[arg(long)]
        field: usize,
        #[arg(long)]
        equals: String,
    },
    /// Print page count and file size
    Pages,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args = Args::parse();

    let desc = TupleDesc::parse(&args.schema)?;
    let db = HeapDB::new(&args.dir, args.pool_pages);
    let file = db.open_table(&args.table, desc, None)?;

    match args.command {
        Command::Insert { values } => {
            let mut tuple = parse_row(file.desc(), &values)?;
            run(db.begin(), |txn| {
                db.buffer_pool()
                    .insert_tuple(txn.id(), file.id(), &mut tuple)?;
                Ok(())
            })?;
            println!("inserted 1 row");
        }
        Command::Scan => {
            let rows = run(db.begin(), |txn| {
                let mut scan = SeqScan::new(Arc::clone(db.buffer_pool()), txn.id(), file.id())?;
                scan.open()?;
                let rows = drain(&mut scan)?;
                scan.close();
                Ok(rows)
            })?;
            println!("{}", file.desc());
            for row in &rows {
                println!("{row}");
            }
            println!("({} rows)", rows.len());
        }
        Command::Delete { field, equals } => {
            let count = run(db.begin(), |txn| delete_where(&db, &file, txn, field, &equals))?;
            println!("deleted {count} rows");
        }
        Command::Pages => {
            println!("pages: {}", file.num_pages()?);
            println!("bytes: {}", file.file_len()?);
            println!("page size: {}", heapdb::PAGE_SIZE);
            println!(
                "tuples per page: {}",
                heapdb::HeapPage::capacity_for(file.desc())
            );
        }
    }

    Ok(())
}

/// Run `body` inside `txn`, committing on success and aborting on error
fn run<T>(txn: Transaction, body: impl FnOnce(&Transaction) -> DbResult<T>) -> DbResult<T> {
    match body(&txn) {
        Ok(value) => {
            txn.commit()?;
            Ok(value)
        }
        Err(e) => {
            txn.abort()?;
            Err(e)
        }
    }
}

fn parse_row(desc: &Arc<TupleDesc>, values: &[String]) -> Result<Tuple, Box<dyn Error>> {
    if values.len() != desc.num_fields() {
        return Err(format!(
            "expected {} values for ({}), got {}",
            desc.num_fields(),
            desc,
            values.len()
        )
        .into());
    }
    let fields = desc
        .types()
        .zip(values)
        .map(|(field_type, value)| field_type.parse(value))
        .collect::<DbResult<Vec<_>>>()?;
    Ok(Tuple::new(Arc::clone(desc), fields)?)
}

fn delete_where(
    db: &HeapDB,
    file: &HeapFile,
    txn: &Transaction,
    field: usize,
    equals: &str,
) -> DbResult<i32> {
    let desc = file.desc();
    if field >= desc.num_fields() {
        return Err(heapdb::DbError::InvalidValue(format!(
            "field {field} out of range for ({desc})"
        )));
    }
    let operand = desc.field_type(field).parse(equals)?;
    let pool = Arc::clone(db.buffer_pool());
    let scan = SeqScan::new(Arc::clone(&pool), txn.id(), file.id())?;
    let filter = Filter::new(
        Predicate::new(field, CompareOp::Eq, operand),
        Box::new(scan),
    )?;
    let mut delete = Delete::new(pool, txn.id(), Box::new(filter));
    delete.open()?;
    let result = delete.next()?;
    delete.close();
    match result.field(0) {
        heapdb::Field::Int(count) => Ok(*count),
        other => Err(heapdb::DbError::InvalidValue(format!(
            "unexpected count {other}"
        ))),
    }
}
