//! Worker pool for the per-input script checks of a block.

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use zend_consensus::Hash256;
use zend_primitives::TxBase;
use zend_script::interpreter::verify_input;
use zend_script::{ScriptError, ScriptFlags};

/// One deferred input check. The entry is shared so that checks for every
/// input of a transaction borrow the same data.
pub struct ScriptCheck<'a> {
    pub entry: &'a TxBase,
    pub entry_id: Hash256,
    pub input_index: usize,
    pub script_pubkey: Vec<u8>,
    pub flags: ScriptFlags,
}

impl ScriptCheck<'_> {
    pub fn run(&self) -> Result<(), ScriptCheckFailure> {
        verify_input(self.entry, self.input_index, &self.script_pubkey, self.flags).map_err(
            |error| ScriptCheckFailure {
                entry_id: self.entry_id,
                input_index: self.input_index,
                error,
            },
        )
    }
}

#[derive(Debug)]
pub struct ScriptCheckFailure {
    pub entry_id: Hash256,
    pub input_index: usize,
    pub error: ScriptError,
}

/// Runs independent checks, in parallel when threads were configured.
/// Any failure stops the remaining work and is reported.
///
/// Work is handed to the pool at most `depth` items at a time, so a failure
/// in an early batch keeps later batches from ever being scheduled.
pub struct CheckQueue {
    pool: Option<ThreadPool>,
    depth: usize,
}

/// Items handed to the workers per batch when no depth is configured.
pub const DEFAULT_CHECK_QUEUE_DEPTH: usize = 128;

impl CheckQueue {
    /// `threads == 0` checks on the calling thread.
    pub fn new(threads: usize) -> Self {
        Self::with_depth(threads, DEFAULT_CHECK_QUEUE_DEPTH)
    }

    pub fn with_depth(threads: usize, depth: usize) -> Self {
        let pool = if threads == 0 {
            None
        } else {
            match ThreadPoolBuilder::new()
                .num_threads(threads)
                .thread_name(|index| format!("scriptch.{index}"))
                .build()
            {
                Ok(pool) => Some(pool),
                Err(err) => {
                    zend_log::log_warn!(
                        "failed to start script check workers ({err}); checking inline"
                    );
                    None
                }
            }
        };
        Self {
            pool,
            depth: depth.max(1),
        }
    }

    pub fn inline() -> Self {
        Self {
            pool: None,
            depth: DEFAULT_CHECK_QUEUE_DEPTH,
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn threads(&self) -> usize {
        self.pool
            .as_ref()
            .map(ThreadPool::current_num_threads)
            .unwrap_or(0)
    }

    pub fn run<T, E, F>(&self, items: &[T], check: F) -> Result<(), E>
    where
        T: Sync,
        E: Send,
        F: Fn(&T) -> Result<(), E> + Sync + Send,
    {
        match &self.pool {
            Some(pool) if items.len() > 1 => items.chunks(self.depth).try_for_each(|batch| {
                pool.install(|| batch.par_iter().try_for_each(|item| check(item)))
            }),
            _ => items.iter().try_for_each(check),
        }
    }
}

impl Default for CheckQueue {
    fn default() -> Self {
        Self::inline()
    }
}
