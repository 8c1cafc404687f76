//! Bulk block import from block files.
//!
//! The input is a sequence of `magic | u32 length | block` frames, the layout
//! the node writes its own block files in. Bytes between frames are skipped
//! until the next network magic. Blocks whose parent is not known yet wait in
//! a parent to children map and are released breadth first once the parent
//! is stored.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use zend_chainstate::ChainStateError;
use zend_consensus::constants::MAX_BLOCK_SIZE;
use zend_consensus::{hash256_to_hex, Hash256};
use zend_log::{log_info, log_warn};
use zend_primitives::Block;
use zend_storage::KeyValueStore;

use crate::context::{now_secs, NodeContext};

#[derive(Debug)]
pub enum ImportError {
    Io(io::Error),
    Chain(ChainStateError),
}

impl fmt::Display for ImportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportError::Io(err) => write!(f, "import read failed: {err}"),
            ImportError::Chain(err) => write!(f, "import aborted: {err}"),
        }
    }
}

impl std::error::Error for ImportError {}

impl From<io::Error> for ImportError {
    fn from(err: io::Error) -> Self {
        ImportError::Io(err)
    }
}

impl From<ChainStateError> for ImportError {
    fn from(err: ChainStateError) -> Self {
        ImportError::Chain(err)
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ImportStats {
    pub frames: usize,
    pub accepted: usize,
    pub known: usize,
    pub rejected: usize,
    /// Blocks still waiting for a parent when the input ended.
    pub orphaned: usize,
}

pub fn import_file<S: KeyValueStore>(
    node: &NodeContext<S>,
    path: &Path,
    magic: [u8; 4],
) -> Result<ImportStats, ImportError> {
    log_info!("importing blocks from {}", path.display());
    let file = File::open(path)?;
    let stats = import_blocks(node, BufReader::new(file), magic)?;
    log_info!(
        "imported {} blocks from {} ({} known, {} rejected, {} without parent)",
        stats.accepted,
        path.display(),
        stats.known,
        stats.rejected,
        stats.orphaned
    );
    Ok(stats)
}

pub fn import_blocks<S: KeyValueStore, R: Read>(
    node: &NodeContext<S>,
    mut reader: R,
    magic: [u8; 4],
) -> Result<ImportStats, ImportError> {
    let mut stats = ImportStats::default();
    let mut waiting: HashMap<Hash256, Vec<Block>> = HashMap::new();

    while let Some(payload) = next_frame(&mut reader, magic)? {
        stats.frames += 1;
        let block = match Block::consensus_decode(&payload) {
            Ok(block) => block,
            Err(err) => {
                log_warn!("skipping undecodable block frame: {err}");
                stats.rejected += 1;
                continue;
            }
        };
        let hash = block.hash();
        let (known, parent_known) = {
            let state = node.read();
            let tree = state.chain.tree();
            (
                tree.lookup(&hash).is_some(),
                tree.lookup(&block.header.prev_block).is_some(),
            )
        };
        if known {
            stats.known += 1;
            continue;
        }
        if !parent_known {
            waiting
                .entry(block.header.prev_block)
                .or_default()
                .push(block);
            continue;
        }

        let mut queue = VecDeque::from([block]);
        while let Some(block) = queue.pop_front() {
            let hash = block.hash();
            if submit(node, &block, &mut stats)? {
                if let Some(children) = waiting.remove(&hash) {
                    queue.extend(children);
                }
            }
        }
    }

    stats.orphaned = waiting.values().map(Vec::len).sum();
    Ok(stats)
}

/// Returns whether the block was stored; children of rejected blocks stay
/// waiting.
fn submit<S: KeyValueStore>(
    node: &NodeContext<S>,
    block: &Block,
    stats: &mut ImportStats,
) -> Result<bool, ImportError> {
    let now = i64::try_from(now_secs()).unwrap_or(i64::MAX);
    match node.process_block(block, now) {
        Ok(_) => {
            stats.accepted += 1;
            Ok(true)
        }
        Err(err) if !err.is_system() => {
            log_warn!(
                "import rejected block {}: {}",
                hash256_to_hex(&block.hash()),
                err
            );
            stats.rejected += 1;
            Ok(false)
        }
        Err(err) => Err(err.into()),
    }
}

/// Next frame payload, or `None` at the end of the input. A truncated last
/// frame counts as the end.
fn next_frame<R: Read>(reader: &mut R, magic: [u8; 4]) -> Result<Option<Vec<u8>>, io::Error> {
    loop {
        let mut window = [0u8; 4];
        let mut filled = 0usize;
        while filled < 4 || window != magic {
            let mut byte = [0u8; 1];
            if reader.read(&mut byte)? == 0 {
                return Ok(None);
            }
            window.copy_within(1.., 0);
            window[3] = byte[0];
            filled = (filled + 1).min(4);
        }

        let mut len_bytes = [0u8; 4];
        if !read_exact_or_eof(reader, &mut len_bytes)? {
            return Ok(None);
        }
        let len = u32::from_le_bytes(len_bytes);
        if len < 80 || len > MAX_BLOCK_SIZE {
            continue;
        }
        let mut payload = vec![0u8; len as usize];
        if !read_exact_or_eof(reader, &mut payload)? {
            return Ok(None);
        }
        return Ok(Some(payload));
    }
}

fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<bool, io::Error> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(err) => Err(err),
    }
}
