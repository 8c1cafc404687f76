use std::path::Path;
use std::time::{Duration, Instant};

use fjall::{Batch, Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};

use crate::{Column, KeyValueStore, ScanResult, StoreError, WriteBatch, WriteOp};

const SLOW_COMMIT_THRESHOLD: Duration = Duration::from_millis(500);

#[derive(Clone, Debug, Default)]
pub struct FjallOptions {
    pub cache_bytes: Option<u64>,
    pub write_buffer_bytes: Option<u64>,
    pub memtable_bytes: Option<u32>,
    /// Fsync every committed batch instead of leaving it to the journal.
    pub sync_commits: bool,
}

/// Persistent backend: one fjall partition per [`Column`].
pub struct FjallStore {
    keyspace: Keyspace,
    partitions: Vec<PartitionHandle>,
    persist: PersistMode,
}

impl FjallStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open_with_options(path, FjallOptions::default())
    }

    pub fn open_with_options(
        path: impl AsRef<Path>,
        options: FjallOptions,
    ) -> Result<Self, StoreError> {
        let mut config = Config::new(path);
        if let Some(bytes) = options.cache_bytes {
            config = config.cache_size(bytes);
        }
        if let Some(bytes) = options.write_buffer_bytes {
            config = config.max_write_buffer_size(bytes);
        }
        let keyspace = config.open().map_err(map_err)?;

        let mut partition_options = PartitionCreateOptions::default();
        if let Some(bytes) = options.memtable_bytes {
            partition_options = partition_options.max_memtable_size(bytes);
        }
        let mut partitions = Vec::with_capacity(Column::ALL.len());
        for column in Column::ALL {
            partitions.push(
                keyspace
                    .open_partition(column.as_str(), partition_options.clone())
                    .map_err(map_err)?,
            );
        }
        let persist = if options.sync_commits {
            PersistMode::SyncAll
        } else {
            PersistMode::Buffer
        };
        Ok(Self {
            keyspace,
            partitions,
            persist,
        })
    }

    fn partition(&self, column: Column) -> Result<&PartitionHandle, StoreError> {
        self.partitions
            .get(column.index())
            .ok_or_else(|| StoreError::Backend(format!("missing partition {}", column.as_str())))
    }
}

impl KeyValueStore for FjallStore {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let value = self.partition(column)?.get(key).map_err(map_err)?;
        Ok(value.map(|bytes| bytes.to_vec()))
    }

    fn scan_prefix(&self, column: Column, prefix: &[u8]) -> Result<ScanResult, StoreError> {
        let partition = self.partition(column)?;
        let mut results = Vec::new();
        for entry in partition.prefix(prefix) {
            let (key, value) = entry.map_err(map_err)?;
            results.push((key.to_vec(), value.to_vec()));
        }
        Ok(results)
    }

    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut fjall_batch =
            Batch::with_capacity(self.keyspace.clone(), batch.len()).durability(Some(self.persist));
        for op in batch.iter() {
            let partition = self.partition(op.column())?;
            match op {
                WriteOp::Put { key, value, .. } => {
                    fjall_batch.insert(partition, key.as_slice(), value.as_slice())
                }
                WriteOp::Delete { key, .. } => fjall_batch.remove(partition, key.as_slice()),
            }
        }
        let started = Instant::now();
        fjall_batch.commit().map_err(map_err)?;
        let elapsed = started.elapsed();
        if elapsed >= SLOW_COMMIT_THRESHOLD {
            zend_log::log_warn!(
                "fjall batch commit took {}ms ({} ops, write buffer {}B)",
                elapsed.as_millis(),
                batch.len(),
                self.keyspace.write_buffer_size(),
            );
        }
        Ok(())
    }
}

fn map_err(err: fjall::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}
