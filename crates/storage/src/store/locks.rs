#![forbid(unsafe_code)]

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

/// One reader/writer lock per item history.
///
/// Version creation on an item runs under the shared side, so forks from
/// different callers proceed together. Truncation runs under the exclusive
/// side and never sees a leaf set that is still being extended. Entries are
/// dropped once no caller holds them.
#[derive(Debug, Default)]
pub struct ItemLocks {
    table: Mutex<HashMap<i64, Arc<RwLock<()>>>>,
}

impl ItemLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shared<R>(&self, item_id: i64, f: impl FnOnce() -> R) -> R {
        let entry = self.acquire(item_id);
        let _guard = entry.lock.read();
        f()
    }

    pub fn with_exclusive<R>(&self, item_id: i64, f: impl FnOnce() -> R) -> R {
        let entry = self.acquire(item_id);
        let _guard = entry.lock.write();
        f()
    }

    /// Number of items with a live lock entry.
    pub fn tracked(&self) -> usize {
        self.table.lock().len()
    }

    fn acquire(&self, item_id: i64) -> Entry<'_> {
        let mut table = self.table.lock();
        Entry {
            locks: self,
            item_id,
            lock: Arc::clone(table.entry(item_id).or_default()),
        }
    }
}

/// A held reference to one table entry; dropping it releases the entry,
/// also when the locked section unwinds.
struct Entry<'a> {
    locks: &'a ItemLocks,
    item_id: i64,
    lock: Arc<RwLock<()>>,
}

impl Drop for Entry<'_> {
    fn drop(&mut self) {
        let mut table = self.locks.table.lock();
        // Clones are only taken under `table`, so the count cannot grow here.
        if Arc::strong_count(&self.lock) == 2 {
            table.remove(&self.item_id);
        }
    }
}
