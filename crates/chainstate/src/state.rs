//! Chain state: block index, active chain, coin database and the engine
//! that moves the active chain to the best candidate.
//!
//! Every connect or disconnect lands in the store as one [`WriteBatch`]
//! holding the coin changes and the dirty block index nodes. Block and undo
//! bytes are appended to the flat files before the batch that references
//! them, so a crash in between leaves unreferenced bytes and never an index
//! entry pointing at missing data.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use primitive_types::U256;
use zend_consensus::constants::MAX_BLOCKS_PER_ACTIVATION_STEP;
use zend_consensus::{hash256_to_hex, ChainParams, Hash256};
use zend_log::{log_cat, log_error, log_info, log_warn, Category};
use zend_primitives::{Block, BlockHeader};
use zend_storage::{Column, KeyValueStore, WriteBatch};

use crate::blockindex::{Arrival, BlockIndexTree, NodeId, BLOCK_VALID_SCRIPTS};
use crate::chain::ActiveChain;
use crate::checkqueue::{CheckQueue, DEFAULT_CHECK_QUEUE_DEPTH};
use crate::connect::{connect_block, disconnect_block, ConnectContext};
use crate::delay::DelayPolicy;
use crate::error::{ChainStateError, RejectReason};
use crate::flatfiles::{FileLocation, FlatFileStore, MAX_BLOCKFILE_SIZE};
use crate::genesis::genesis_block;
use crate::notify::{ChainEvent, ChainNotifier};
use crate::proof::ProofVerifier;
use crate::txindex::{TxIndex, TxLocation};
use crate::undo::{BlockUndo, VoidedOutput};
use crate::validation::{
    check_block, check_block_header, contextual_check_block, contextual_check_block_header,
    ValidationFlags,
};
use crate::view::{CoinSource, CoinView, CoinsDb};

pub struct ChainOptions {
    pub flags: ValidationFlags,
    pub delay: DelayPolicy,
    /// Script check worker threads; zero checks inline.
    pub script_threads: usize,
    /// Script checks handed to the workers per batch.
    pub check_queue_depth: usize,
    pub tx_index: bool,
    pub verifier: Arc<dyn ProofVerifier>,
}

impl ChainOptions {
    pub fn new(verifier: Arc<dyn ProofVerifier>) -> Self {
        Self {
            flags: ValidationFlags::default(),
            delay: DelayPolicy::default(),
            script_threads: 0,
            check_queue_depth: DEFAULT_CHECK_QUEUE_DEPTH,
            tx_index: false,
            verifier,
        }
    }
}

/// Result of one bounded activation step.
#[derive(Debug, Default)]
pub struct StepOutcome {
    pub events: Vec<ChainEvent>,
    /// The active tip is the best candidate; nothing left to do.
    pub done: bool,
}

pub struct ChainState<S> {
    store: Arc<S>,
    coins: CoinsDb<Arc<S>>,
    tx_index: Option<TxIndex<Arc<S>>>,
    blocks: FlatFileStore,
    undo: FlatFileStore,
    tree: BlockIndexTree,
    chain: ActiveChain,
    params: ChainParams,
    genesis_hash: Hash256,
    flags: ValidationFlags,
    checks: CheckQueue,
    verifier: Arc<dyn ProofVerifier>,
    notifier: Option<Arc<dyn ChainNotifier>>,
}

impl<S: KeyValueStore> ChainState<S> {
    /// Loads the block index and the active chain recorded in `store`.
    pub fn open(
        store: Arc<S>,
        blocks: FlatFileStore,
        undo: FlatFileStore,
        params: ChainParams,
        options: ChainOptions,
    ) -> Result<Self, ChainStateError> {
        let coins = CoinsDb::new(Arc::clone(&store));
        let tip_hash = coins.best_block()?;
        let entries = store.scan_prefix(Column::BlockIndex, &[])?;
        let tree = BlockIndexTree::load(entries, options.delay, tip_hash.as_ref())?;
        let mut chain = ActiveChain::new();
        if let Some(hash) = tip_hash {
            let tip = tree
                .lookup(&hash)
                .ok_or(ChainStateError::Corrupt("best block missing from the block index"))?;
            chain.set_tip(&tree, Some(tip));
        }
        log_info!(
            "loaded {} block index entries, active height {}",
            tree.len(),
            chain.height()
        );

        let tx_index = options
            .tx_index
            .then(|| TxIndex::new(Arc::clone(&store)));
        let genesis_hash = genesis_block(&params.consensus).hash();
        Ok(Self {
            coins,
            tx_index,
            blocks,
            undo,
            tree,
            chain,
            genesis_hash,
            flags: options.flags,
            checks: CheckQueue::with_depth(options.script_threads, options.check_queue_depth),
            verifier: options.verifier,
            notifier: None,
            params,
            store,
        })
    }

    /// Opens block and undo files under `blocks_dir`.
    pub fn open_in_dir(
        store: Arc<S>,
        blocks_dir: &Path,
        params: ChainParams,
        options: ChainOptions,
    ) -> Result<Self, ChainStateError> {
        let blocks =
            FlatFileStore::blocks(blocks_dir, params.message_start, MAX_BLOCKFILE_SIZE)?;
        let undo = FlatFileStore::undo(blocks_dir, params.message_start, MAX_BLOCKFILE_SIZE)?;
        Self::open(store, blocks, undo, params, options)
    }

    /// Stores and activates the genesis block on an empty index.
    pub fn init_genesis(&mut self) -> Result<Vec<ChainEvent>, ChainStateError> {
        if !self.tree.is_empty() {
            return Ok(Vec::new());
        }
        let genesis = genesis_block(&self.params.consensus);
        self.accept_block(&genesis, i64::from(genesis.header.time))?;
        self.activate_best_chain()
    }

    pub fn set_notifier(&mut self, notifier: Arc<dyn ChainNotifier>) {
        self.notifier = Some(notifier);
    }

    pub fn set_delay_policy(&mut self, policy: DelayPolicy) {
        self.tree.set_delay_policy(policy);
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn flags(&self) -> ValidationFlags {
        self.flags
    }

    pub fn tree(&self) -> &BlockIndexTree {
        &self.tree
    }

    pub fn chain(&self) -> &ActiveChain {
        &self.chain
    }

    /// Coin database at the active tip.
    pub fn coins(&self) -> &CoinsDb<Arc<S>> {
        &self.coins
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn check_queue(&self) -> &CheckQueue {
        &self.checks
    }

    pub fn verifier(&self) -> Arc<dyn ProofVerifier> {
        Arc::clone(&self.verifier)
    }

    pub fn tip_height(&self) -> i32 {
        self.chain.height()
    }

    pub fn tip_hash(&self) -> Option<Hash256> {
        self.chain.tip_hash()
    }

    pub fn block_hash(&self, height: i32) -> Option<Hash256> {
        self.chain.hash_at(height)
    }

    pub fn best_header_hash(&self) -> Option<Hash256> {
        self.tree
            .best_header()
            .map(|id| self.tree.node(id).hash)
    }

    /// Median time past of the active tip, zero before genesis.
    pub fn tip_median_time_past(&self) -> i64 {
        self.chain
            .tip()
            .map_or(0, |tip| self.tree.median_time_past(tip))
    }

    /// True until the active chain carries the network's minimum work.
    pub fn is_initial_sync(&self) -> bool {
        let Some(tip) = self.chain.tip() else {
            return true;
        };
        let minimum = U256::from_little_endian(&self.params.consensus.minimum_chain_work);
        self.tree.node(tip).chain_work < minimum
    }

    pub fn read_block(&self, hash: &Hash256) -> Result<Option<Block>, ChainStateError> {
        let Some(id) = self.tree.lookup(hash) else {
            return Ok(None);
        };
        match self.tree.node(id).data_pos {
            Some(location) => self.read_block_at(location).map(Some),
            None => Ok(None),
        }
    }

    pub fn tx_location(&self, id: &Hash256) -> Result<Option<TxLocation>, ChainStateError> {
        match &self.tx_index {
            Some(index) => Ok(index.get(id)?),
            None => Ok(None),
        }
    }

    fn arrival(&self, now: i64) -> Arrival {
        Arrival {
            active_height: self.chain.height(),
            initial_sync: self.is_initial_sync(),
            now,
        }
    }

    /// Genesis is built locally and is never checked for proof of work.
    fn flags_for(&self, hash: &Hash256) -> ValidationFlags {
        if *hash == self.genesis_hash {
            ValidationFlags {
                check_pow: false,
                ..self.flags
            }
        } else {
            self.flags
        }
    }

    /// Runs the header stages and records the header in the index.
    pub fn accept_header(
        &mut self,
        header: &BlockHeader,
        now: i64,
    ) -> Result<NodeId, ChainStateError> {
        let hash = header.hash();
        if self.tree.lookup(&hash).is_some() {
            let id = self.tree.insert_header(header, self.arrival(now))?;
            return Ok(id);
        }

        check_block_header(header, &self.params.consensus, &self.flags_for(&hash))?;
        if self.tree.is_empty() {
            if hash != self.genesis_hash {
                return Err(RejectReason::missing("prev-blk-not-found").into());
            }
        } else {
            let prev = self
                .tree
                .lookup(&header.prev_block)
                .ok_or_else(|| RejectReason::missing("prev-blk-not-found"))?;
            if self.tree.node(prev).is_failed() {
                return Err(RejectReason::invalid(100, "bad-prevblk").into());
            }
            contextual_check_block_header(header, &self.tree, prev, &self.params.consensus, now)?;
        }

        let id = self.tree.insert_header(header, self.arrival(now))?;
        self.flush_index()?;
        Ok(id)
    }

    /// Runs the structural and contextual stages, stores the body and makes
    /// the block a fork-choice candidate. Activation is a separate call.
    pub fn accept_block(&mut self, block: &Block, now: i64) -> Result<NodeId, ChainStateError> {
        let id = self.accept_header(&block.header, now)?;
        let node = self.tree.node(id);
        if node.have_data() {
            return Ok(id);
        }
        let height = node.height;
        let flags = self.flags_for(&node.hash);

        let checked = check_block(block, &self.params.consensus, &flags)
            .and_then(|()| contextual_check_block(block, height, &self.params.consensus));
        if let Err(reason) = checked {
            if reason.is_invalid() && !reason.corruption_possible() {
                self.tree.mark_invalid(id);
                self.flush_index()?;
            }
            return Err(reason.into());
        }

        let location = self.blocks.append(&block.consensus_encode())?;
        let tx_count = (block.transactions.len() + block.certificates.len()) as u32;
        self.tree
            .mark_body_received(id, tx_count, location, self.chain.tip());
        self.flush_index()?;
        Ok(id)
    }

    /// Moves the active chain to the best candidate, one bounded step at a
    /// time, and returns everything that happened in order.
    pub fn activate_best_chain(&mut self) -> Result<Vec<ChainEvent>, ChainStateError> {
        let mut events = Vec::new();
        loop {
            let step = self.activate_step()?;
            events.extend(step.events);
            if step.done {
                return Ok(events);
            }
        }
    }

    /// Disconnects to the fork point of the best candidate and connects at
    /// most [`MAX_BLOCKS_PER_ACTIVATION_STEP`] blocks toward it.
    ///
    /// A block that breaks a consensus rule is marked failed along with its
    /// descendants and the step ends early; the next step picks a fresh
    /// candidate. System errors are returned as is; the caller must stop.
    pub fn activate_step(&mut self) -> Result<StepOutcome, ChainStateError> {
        let mut outcome = StepOutcome::default();
        let Some(target) = self.tree.best_candidate(&self.chain) else {
            outcome.done = true;
            return Ok(outcome);
        };
        if self.chain.tip() == Some(target) {
            self.tree.prune_candidates(target);
            outcome.done = true;
            return Ok(outcome);
        }

        let fork = self
            .chain
            .tip()
            .and_then(|tip| self.tree.last_common_ancestor(tip, target));
        if self.chain.tip() != fork {
            log_cat!(
                Category::Reorg,
                "reorganizing from height {} to candidate {} at height {}, fork at {}",
                self.chain.height(),
                hash256_to_hex(&self.tree.node(target).hash),
                self.tree.node(target).height,
                fork.map_or(-1, |fork| self.tree.node(fork).height)
            );
        }
        while self.chain.tip().is_some() && self.chain.tip() != fork {
            let event = self.disconnect_tip()?;
            outcome.events.push(event);
        }

        let mut path = Vec::new();
        let mut cursor = Some(target);
        while let Some(id) = cursor {
            if Some(id) == fork {
                break;
            }
            path.push(id);
            cursor = self.tree.node(id).parent;
        }
        path.reverse();

        for id in path.into_iter().take(MAX_BLOCKS_PER_ACTIVATION_STEP) {
            match self.connect_tip(id) {
                Ok(events) => outcome.events.extend(events),
                Err(err) if err.is_system() => {
                    log_error!(
                        "failed to connect block {}: {err}",
                        hash256_to_hex(&self.tree.node(id).hash)
                    );
                    return Err(err);
                }
                Err(err) => {
                    let node = self.tree.node(id);
                    let (hash, height) = (node.hash, node.height);
                    log_warn!(
                        "invalid block {} at height {height}: {err}",
                        hash256_to_hex(&hash)
                    );
                    self.tree.mark_invalid(id);
                    self.flush_index()?;
                    let reason = match err {
                        ChainStateError::Rejected(reason) => reason,
                        other => RejectReason::invalid(0, other.to_string()),
                    };
                    let event = ChainEvent::BlockInvalid {
                        hash,
                        height,
                        reason,
                    };
                    self.notify(&event);
                    outcome.events.push(event);
                    return Ok(outcome);
                }
            }
        }
        if self.chain.tip() == Some(target) {
            self.tree.prune_candidates(target);
        }
        Ok(outcome)
    }

    /// Marks `hash` failed, disconnecting it first when it is active.
    pub fn invalidate_block(&mut self, hash: &Hash256) -> Result<Vec<ChainEvent>, ChainStateError> {
        let id = self.tree.lookup(hash).ok_or(ChainStateError::UnknownBlock)?;
        if self.tree.node(id).height == 0 {
            return Err(RejectReason::invalid(0, "cannot-invalidate-genesis").into());
        }
        let mut events = Vec::new();
        while self.chain.contains(&self.tree, id) {
            events.push(self.disconnect_tip()?);
        }
        self.tree.mark_invalid(id);
        self.tree.rebuild_candidates(self.chain.tip());
        self.flush_index()?;
        log_info!("invalidated block {}", hash256_to_hex(hash));
        Ok(events)
    }

    /// Clears failure flags through `hash`; the next activation may pick
    /// the block again.
    pub fn reconsider_block(&mut self, hash: &Hash256) -> Result<(), ChainStateError> {
        let id = self.tree.lookup(hash).ok_or(ChainStateError::UnknownBlock)?;
        self.tree.reconsider(id, self.chain.tip());
        self.flush_index()?;
        log_info!("reconsidering block {}", hash256_to_hex(hash));
        Ok(())
    }

    fn read_block_at(&self, location: FileLocation) -> Result<Block, ChainStateError> {
        let bytes = self.blocks.read(location)?;
        Block::consensus_decode(&bytes).map_err(|_| ChainStateError::Corrupt("stored block"))
    }

    fn flush_index(&mut self) -> Result<(), ChainStateError> {
        let mut batch = WriteBatch::new();
        self.tree.flush_dirty(&mut batch);
        if !batch.is_empty() {
            self.store.write_batch(&batch)?;
        }
        Ok(())
    }

    fn notify(&self, event: &ChainEvent) {
        if let Some(notifier) = &self.notifier {
            notifier.chain_event(event);
        }
    }

    fn connect_tip(&mut self, id: NodeId) -> Result<Vec<ChainEvent>, ChainStateError> {
        let node = self.tree.node(id);
        let (hash, height) = (node.hash, node.height);
        let data_pos = node
            .data_pos
            .ok_or(ChainStateError::Corrupt("block data missing"))?;
        let block = self.read_block_at(data_pos)?;

        let (undo, changes) = {
            let mut view = CoinView::new(&self.coins);
            let ctx = ConnectContext {
                height,
                block_hash: hash,
                chain: &self.chain,
                params: &self.params.consensus,
                flags: self.flags,
                checks: &self.checks,
                verifier: self.verifier.as_ref(),
            };
            let undo = connect_block(&mut view, &block, &ctx)?;
            (undo, view.into_changes())
        };

        let undo_pos = self.undo.append(&undo.encode())?;
        let mut batch = WriteBatch::new();
        changes.write_to(&mut batch)?;
        if let Some(index) = &self.tx_index {
            index.insert_block(&mut batch, &block, data_pos);
        }
        self.tree.set_undo_pos(id, undo_pos);
        self.tree.raise_validity(id, BLOCK_VALID_SCRIPTS);
        self.tree.flush_dirty(&mut batch);
        self.store.write_batch(&batch)?;
        self.chain.push(id, hash);

        let mut events = voided_events(&undo, height);
        events.insert(
            0,
            ChainEvent::BlockConnected {
                hash,
                height,
                block,
            },
        );
        for event in &events {
            self.notify(event);
        }
        Ok(events)
    }

    fn disconnect_tip(&mut self) -> Result<ChainEvent, ChainStateError> {
        let id = self
            .chain
            .tip()
            .ok_or(ChainStateError::Corrupt("no active tip to disconnect"))?;
        let node = self.tree.node(id);
        let (hash, height) = (node.hash, node.height);
        let data_pos = node
            .data_pos
            .ok_or(ChainStateError::Corrupt("block data missing"))?;
        let undo_pos = node
            .undo_pos
            .ok_or(ChainStateError::Corrupt("undo data missing"))?;
        let block = self.read_block_at(data_pos)?;
        let undo = BlockUndo::decode(&self.undo.read(undo_pos)?)
            .map_err(|_| ChainStateError::Corrupt("stored undo record"))?;

        let changes = {
            let mut view = CoinView::new(&self.coins);
            disconnect_block(&mut view, &block, &undo)?;
            view.into_changes()
        };

        let mut batch = WriteBatch::new();
        changes.write_to(&mut batch)?;
        if let Some(index) = &self.tx_index {
            index.remove_block(&mut batch, &block);
        }
        self.tree.flush_dirty(&mut batch);
        self.store.write_batch(&batch)?;
        self.chain.pop();
        log_cat!(
            Category::Reorg,
            "disconnected block {} at height {}",
            hash256_to_hex(&hash),
            height
        );

        let event = ChainEvent::BlockDisconnected {
            hash,
            height,
            block,
        };
        self.notify(&event);
        Ok(event)
    }
}

fn voided_events(undo: &BlockUndo, height: i32) -> Vec<ChainEvent> {
    fn certs(outputs: &[VoidedOutput]) -> BTreeSet<Hash256> {
        outputs.iter().map(|output| output.txid).collect()
    }

    let mut events = Vec::new();
    for cert_undo in &undo.certs {
        for cert_hash in certs(&cert_undo.voided) {
            events.push(ChainEvent::CertificateVoided {
                cert_hash,
                height,
                ceased: false,
            });
        }
    }
    for cert_hash in certs(&undo.ceased) {
        events.push(ChainEvent::CertificateVoided {
            cert_hash,
            height,
            ceased: true,
        });
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proof::TrustingVerifier;
    use zend_consensus::{chain_params, Network};
    use zend_storage::memory::MemoryStore;

    fn open(store: Arc<MemoryStore>, dir: &Path) -> ChainState<MemoryStore> {
        let mut options = ChainOptions::new(Arc::new(TrustingVerifier::new()));
        options.flags = ValidationFlags::without_pow();
        ChainState::open_in_dir(store, dir, chain_params(Network::Regtest), options)
            .expect("open chain state")
    }

    #[test]
    fn genesis_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(MemoryStore::new());
        let genesis_hash = {
            let mut state = open(Arc::clone(&store), dir.path());
            let events = state.init_genesis().expect("genesis");
            assert_eq!(events.len(), 1);
            assert_eq!(state.tip_height(), 0);
            assert!(state.init_genesis().expect("again").is_empty());
            state.tip_hash().expect("tip")
        };

        let state = open(store, dir.path());
        assert_eq!(state.tip_hash(), Some(genesis_hash));
        assert_eq!(state.coins().best_block().expect("best"), Some(genesis_hash));
        let stored = state.read_block(&genesis_hash).expect("read").expect("block");
        assert_eq!(stored.hash(), genesis_hash);
    }

    #[test]
    fn foreign_root_is_not_accepted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut state = open(Arc::new(MemoryStore::new()), dir.path());
        let mut header = genesis_block(&state.params().consensus).header;
        header.time += 1;
        let err = state.accept_header(&header, 0).expect_err("unknown root");
        assert_eq!(
            err.reject_reason().map(|reason| reason.reason.as_str()),
            Some("prev-blk-not-found")
        );
    }
}
