use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use crate::{Column, KeyValueStore, ScanResult, StoreError, WriteBatch, WriteOp};

type MemoryMap = BTreeMap<(Column, Vec<u8>), Vec<u8>>;

/// In-process store used by tests and by `--backend memory`.
///
/// `fail_writes` makes every following batch fail before touching the map,
/// which is how callers exercise their system-error paths.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryMap>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Every entry of `column`, in key order.
    pub fn dump(&self, column: Column) -> Result<ScanResult, StoreError> {
        self.scan_prefix(column, &[])
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, MemoryMap>, StoreError> {
        self.inner
            .read()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.read()?.get(&(column, key.to_vec())).cloned())
    }

    fn scan_prefix(&self, column: Column, prefix: &[u8]) -> Result<ScanResult, StoreError> {
        let guard = self.read()?;
        let start = (column, prefix.to_vec());
        Ok(guard
            .range(start..)
            .take_while(|((entry_column, key), _)| {
                *entry_column == column && key.starts_with(prefix)
            })
            .map(|((_, key), value)| (key.clone(), value.clone()))
            .collect())
    }

    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("injected write failure".to_string()));
        }
        let mut guard = self
            .inner
            .write()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))?;
        for op in batch.iter() {
            match op {
                WriteOp::Put { column, key, value } => {
                    guard.insert((*column, key.to_vec()), value.clone());
                }
                WriteOp::Delete { column, key } => {
                    guard.remove(&(*column, key.to_vec()));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_applies_in_order() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch.put(Column::Coins, b"aa", b"1".to_vec());
        batch.put(Column::Coins, b"ab", b"2".to_vec());
        batch.delete(Column::Coins, b"aa");
        batch.put(Column::Meta, b"aa", b"3".to_vec());
        store.write_batch(&batch).expect("write");

        assert_eq!(store.get(Column::Coins, b"aa").expect("get"), None);
        assert_eq!(
            store.scan_prefix(Column::Coins, b"a").expect("scan"),
            vec![(b"ab".to_vec(), b"2".to_vec())]
        );
        assert!(store.contains(Column::Meta, b"aa").expect("contains"));
    }

    #[test]
    fn injected_failure_leaves_store_untouched() {
        let store = MemoryStore::new();
        store.fail_writes(true);
        let mut batch = WriteBatch::new();
        batch.put(Column::Meta, b"k", b"v".to_vec());
        assert!(store.write_batch(&batch).is_err());
        store.fail_writes(false);
        assert!(store.dump(Column::Meta).expect("dump").is_empty());
    }
}
