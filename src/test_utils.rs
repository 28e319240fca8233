use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use crate::tuple::{Field, FieldType, Tuple, TupleDesc};

/// A scratch directory that is removed again when dropped
pub struct TestDir {
    path: PathBuf,
}

impl TestDir {
    pub fn new<P>(path: P) -> Self
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&path).unwrap();
        Self { path }
    }

    /// A fresh directory under /tmp named after the current time and thread
    pub fn unique(prefix: &str) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis();
        let thread_id = std::thread::current().id();
        Self::new(format!("/tmp/{}_{}_{:?}", prefix, timestamp, thread_id))
    }
}

impl Drop for TestDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

impl AsRef<Path> for TestDir {
    fn as_ref(&self) -> &Path {
        self.path.as_ref()
    }
}

/// Route `log` output through the test harness. Safe to call from every test.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A tuple of `desc` with every int field set to `value` and every text field to `"v{value}"`
pub fn int_tuple(desc: &Arc<TupleDesc>, value: i32) -> Tuple {
    let fields = desc
        .types()
        .map(|field_type| match field_type {
            FieldType::Int => Field::Int(value),
            FieldType::Text => Field::Text(format!("v{value}")),
        })
        .collect();
    Tuple::new(Arc::clone(desc), fields).unwrap()
}
