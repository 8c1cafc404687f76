#![cfg(feature = "fjall")]

use zend_storage::fjall::{FjallOptions, FjallStore};
use zend_storage::{Column, KeyValueStore, WriteBatch};

#[test]
fn batch_survives_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    {
        let store = FjallStore::open_with_options(
            dir.path(),
            FjallOptions {
                sync_commits: true,
                ..FjallOptions::default()
            },
        )
        .expect("open fjall");
        let mut batch = WriteBatch::new();
        batch.put(Column::Coins, b"tx:1", b"a".to_vec());
        batch.put(Column::Coins, b"tx:2", b"b".to_vec());
        batch.put(Column::Meta, b"best", b"tip".to_vec());
        store.write_batch(&batch).expect("commit");

        let mut batch = WriteBatch::new();
        batch.delete(Column::Coins, b"tx:1");
        store.write_batch(&batch).expect("commit delete");
    }

    let store = FjallStore::open(dir.path()).expect("reopen fjall");
    assert_eq!(
        store.scan_prefix(Column::Coins, b"tx:").expect("scan"),
        vec![(b"tx:2".to_vec(), b"b".to_vec())]
    );
    assert_eq!(
        store.get(Column::Meta, b"best").expect("get"),
        Some(b"tip".to_vec())
    );
    assert!(!store.contains(Column::Sidechains, b"tx:2").expect("contains"));
}
