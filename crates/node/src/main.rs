pub mod admission;
pub mod config;
pub mod context;
pub mod import;
pub mod mempool;
pub mod proof_queue;

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use fs2::FileExt;
use serde::Serialize;
use tokio::sync::watch;
use zend_chainstate::proof::TrustingVerifier;
use zend_chainstate::{ChainNotifier, ChainOptions, ChainState, RejectReason, RemovalReason};
use zend_consensus::{hash256_to_hex, Hash256, Network};
use zend_log::{log_cat, log_error, log_info, log_warn, Category};
use zend_primitives::{Block, TxBase, TxLike};
use zend_storage::fjall::{FjallOptions, FjallStore};
use zend_storage::memory::MemoryStore;
use zend_storage::{Column, KeyValueStore, ScanResult, StoreError, WriteBatch};

use crate::config::{parse_args, usage, Backend, CliAction, Config};
use crate::context::NodeContext;
use crate::mempool::Mempool;
use crate::proof_queue::{PriorityGate, PrioritizedVerifier, ProofQueue};

const DATA_DIR_LOCK_FILE_NAME: &str = ".lock";
const PROOF_POLL: Duration = Duration::from_millis(500);

pub enum Store {
    Memory(MemoryStore),
    Fjall(FjallStore),
}

impl KeyValueStore for Store {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        match self {
            Store::Memory(store) => store.get(column, key),
            Store::Fjall(store) => store.get(column, key),
        }
    }

    fn scan_prefix(&self, column: Column, prefix: &[u8]) -> Result<ScanResult, StoreError> {
        match self {
            Store::Memory(store) => store.scan_prefix(column, prefix),
            Store::Fjall(store) => store.scan_prefix(column, prefix),
        }
    }

    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        match self {
            Store::Memory(store) => store.write_batch(batch),
            Store::Fjall(store) => store.write_batch(batch),
        }
    }
}

fn open_store(backend: Backend, db_path: &Path) -> Result<Store, String> {
    match backend {
        Backend::Memory => Ok(Store::Memory(MemoryStore::new())),
        Backend::Fjall => {
            let options = FjallOptions {
                sync_commits: true,
                ..FjallOptions::default()
            };
            Ok(Store::Fjall(
                FjallStore::open_with_options(db_path, options).map_err(|err| err.to_string())?,
            ))
        }
    }
}

struct DataDirLock {
    _file: File,
}

fn lock_data_dir(data_dir: &Path) -> Result<DataDirLock, String> {
    let lock_path = data_dir.join(DATA_DIR_LOCK_FILE_NAME);
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(|err| format!("failed to open lock file {}: {err}", lock_path.display()))?;

    match file.try_lock_exclusive() {
        Ok(()) => {
            let pid = std::process::id();
            let _ = file.set_len(0);
            let _ = file.seek(SeekFrom::Start(0));
            let _ = writeln!(file, "pid={pid}");
            let _ = file.flush();
            Ok(DataDirLock { _file: file })
        }
        Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
            let mut holder = String::new();
            let _ =
                File::open(&lock_path).and_then(|mut reader| reader.read_to_string(&mut holder));
            let holder = holder.trim();
            let mut message = format!(
                "data dir {} is already locked (another zend instance may be running); lock file {}",
                data_dir.display(),
                lock_path.display()
            );
            if !holder.is_empty() {
                message.push_str(&format!(" ({holder})"));
            }
            Err(message)
        }
        Err(err) => Err(format!(
            "failed to lock data dir {} (lock file {}): {err}",
            data_dir.display(),
            lock_path.display()
        )),
    }
}

/// Logs chain and pool notifications.
pub struct LogNotifier;

impl ChainNotifier for LogNotifier {
    fn block_connected(&self, block: &Block, height: i32) {
        log_info!(
            "UpdateTip: new best={} height={} tx={} cert={}",
            hash256_to_hex(&block.hash()),
            height,
            block.transactions.len(),
            block.certificates.len()
        );
    }

    fn block_disconnected(&self, block: &Block, height: i32) {
        log_cat!(
            Category::Reorg,
            "disconnected {} at height {}",
            hash256_to_hex(&block.hash()),
            height
        );
    }

    fn certificate_voided(&self, cert_hash: &Hash256, ceased: bool) {
        log_cat!(
            Category::Sc,
            "certificate {} voided ({})",
            hash256_to_hex(cert_hash),
            if ceased { "sidechain ceased" } else { "superseded" }
        );
    }

    fn block_invalid(&self, hash: &Hash256, reason: &RejectReason) {
        log_warn!("InvalidChainFound: {} {}", hash256_to_hex(hash), reason);
    }

    fn entry_accepted(&self, entry: &TxBase) {
        log_cat!(
            Category::Mempool,
            "pool accepted {} ({} bytes)",
            hash256_to_hex(&entry.id()),
            entry.serialized_size()
        );
    }

    fn entry_removed(&self, id: &Hash256, reason: RemovalReason) {
        log_cat!(
            Category::Mempool,
            "pool removed {} ({})",
            hash256_to_hex(id),
            reason.as_str()
        );
    }
}

#[derive(Debug, Serialize)]
struct StatusSnapshot {
    network: &'static str,
    uptime_secs: u64,
    tip_height: i32,
    tip_hash: Option<String>,
    best_header_hash: Option<String>,
    mempool_entries: usize,
    mempool_bytes: usize,
    orphans: usize,
    pending_proofs: usize,
}

fn snapshot_status<S: KeyValueStore>(
    node: &NodeContext<S>,
    network: Network,
    start_time: Instant,
) -> StatusSnapshot {
    let state = node.read();
    StatusSnapshot {
        network: network.as_str(),
        uptime_secs: start_time.elapsed().as_secs(),
        tip_height: state.chain.tip_height(),
        tip_hash: state.chain.tip_hash().map(|hash| hash256_to_hex(&hash)),
        best_header_hash: state
            .chain
            .best_header_hash()
            .map(|hash| hash256_to_hex(&hash)),
        mempool_entries: state.mempool.size(),
        mempool_bytes: state.mempool.bytes(),
        orphans: state.mempool.orphan_count(),
        pending_proofs: state.mempool.pending_count(),
    }
}

fn spawn_status_logger<S: KeyValueStore + 'static>(
    node: Arc<NodeContext<S>>,
    network: Network,
    start_time: Instant,
    interval_secs: u64,
) {
    if interval_secs == 0 {
        return;
    }
    let interval = Duration::from_secs(interval_secs);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let status = snapshot_status(&node, network, start_time);
            match serde_json::to_string(&status) {
                Ok(json) => log_info!("status {json}"),
                Err(err) => log_warn!("failed to encode status: {err}"),
            }
        }
    });
}

pub async fn run_entry() -> Result<(), String> {
    match parse_args()? {
        CliAction::PrintHelp => {
            println!("{}", usage());
            Ok(())
        }
        CliAction::PrintVersion => {
            println!("zend {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        CliAction::Run(config) => run_with_config(Instant::now(), config).await,
    }
}

async fn run_with_config(start_time: Instant, config: Config) -> Result<(), String> {
    zend_log::init(&config.log);
    log_info!(
        "Startup: backend={:?}, network={}, data_dir={}",
        config.backend,
        config.network.as_str(),
        config.data_dir.display()
    );

    let data_dir = &config.data_dir;
    fs::create_dir_all(data_dir).map_err(|err| err.to_string())?;
    let _data_dir_lock = lock_data_dir(data_dir)?;
    let blocks_path = data_dir.join("blocks");
    fs::create_dir_all(&blocks_path).map_err(|err| err.to_string())?;

    let store = Arc::new(open_store(config.backend, &data_dir.join("db"))?);
    let params = config.chain_params();
    let message_start = params.message_start;

    let gate = Arc::new(PriorityGate::default());
    let proof_backend: Arc<dyn zend_chainstate::proof::ProofVerifier> =
        Arc::new(TrustingVerifier::new());
    let mut options = ChainOptions::new(Arc::new(PrioritizedVerifier::new(
        Arc::clone(&proof_backend),
        Arc::clone(&gate),
    )));
    options.script_threads = config.script_threads;
    options.check_queue_depth = config.check_queue_depth;
    options.tx_index = true;

    let mut chain = ChainState::open_in_dir(store, &blocks_path, params, options)
        .map_err(|err| err.to_string())?;
    chain.init_genesis().map_err(|err| err.to_string())?;

    let proofs = config
        .async_proofs
        .then(|| ProofQueue::spawn(proof_backend, gate, config.proof_queue()));
    let notifier: Arc<dyn ChainNotifier> = Arc::new(LogNotifier);
    let node = Arc::new(NodeContext::new(
        chain,
        Mempool::new(config.mempool_max_bytes),
        config.mempool_policy(),
        proofs,
        Some(notifier),
    ));
    // Blocks stored before an unclean shutdown may still need connecting.
    node.activate_best_chain().map_err(|err| err.to_string())?;

    for path in &config.import {
        if let Err(err) = import::import_file(&node, path, message_start) {
            log_error!("{err}");
            return Err(err.to_string());
        }
    }

    let status = snapshot_status(&node, config.network, start_time);
    log_info!(
        "Startup: ready at height {} in {}ms",
        status.tip_height,
        start_time.elapsed().as_millis()
    );
    spawn_status_logger(
        Arc::clone(&node),
        config.network,
        start_time,
        config.status_interval_secs,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let verdict_node = Arc::clone(&node);
    let verdicts = tokio::task::spawn_blocking(move || {
        while !*shutdown_rx.borrow() {
            verdict_node.wait_for_proof_verdicts(PROOF_POLL);
        }
    });

    if let Err(err) = tokio::signal::ctrl_c().await {
        log_warn!("failed to listen for shutdown signal: {err}");
    }
    log_info!("Shutdown: requested");
    let _ = shutdown_tx.send(true);
    let _ = verdicts.await;
    log_info!("Shutdown: done");
    Ok(())
}
