//! The node's chain state and mempool behind one read-write lock.
//!
//! Every mutation takes the write lock for a whole activation step or a
//! whole admission; status readers share the read lock. Mempool upkeep for
//! a step runs before the lock is released, so readers never see a pool
//! that disagrees with the active tip.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use zend_chainstate::proof::ProofContext;
use zend_chainstate::{ChainEvent, ChainNotifier, ChainState, ChainStateError};
use zend_consensus::{hash256_to_hex, Hash256};
use zend_log::{log_cat, log_info, log_warn, Category};
use zend_primitives::{Block, TxBase, TxLike};
use zend_storage::KeyValueStore;

use crate::admission::{
    accept_to_mempool, process_orphans_after_accept, AdmitOutcome, MempoolPolicy,
    ProofVerification,
};
use crate::mempool::{Mempool, MempoolError, MempoolErrorKind};
use crate::proof_queue::{ProofQueue, ProofVerdict};

pub struct NodeState<S: KeyValueStore> {
    pub chain: ChainState<S>,
    pub mempool: Mempool,
}

pub struct NodeContext<S: KeyValueStore> {
    state: RwLock<NodeState<S>>,
    policy: MempoolPolicy,
    proofs: Option<ProofQueue>,
}

/// What a block submission changed.
#[derive(Debug, Default)]
pub struct BlockReport {
    pub events: Vec<ChainEvent>,
    pub removed: Vec<Hash256>,
    pub resurrected: Vec<Hash256>,
}

impl<S: KeyValueStore> NodeContext<S> {
    /// With `proofs` set, mempool proofs go to the batch verifier; without
    /// it they are verified during admission.
    pub fn new(
        chain: ChainState<S>,
        mut mempool: Mempool,
        policy: MempoolPolicy,
        proofs: Option<ProofQueue>,
        notifier: Option<Arc<dyn ChainNotifier>>,
    ) -> Self {
        let mut chain = chain;
        if let Some(notifier) = notifier {
            chain.set_notifier(Arc::clone(&notifier));
            mempool.set_notifier(notifier);
        }
        Self {
            state: RwLock::new(NodeState { chain, mempool }),
            policy,
            proofs,
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, NodeState<S>> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, NodeState<S>> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn policy(&self) -> &MempoolPolicy {
        &self.policy
    }

    fn proof_mode(&self) -> ProofVerification {
        if self.proofs.is_some() {
            ProofVerification::Async
        } else {
            ProofVerification::Sync
        }
    }

    /// Stores `block` and activates the best chain, one bounded step per
    /// lock acquisition.
    pub fn process_block(&self, block: &Block, now: i64) -> Result<BlockReport, ChainStateError> {
        {
            let mut state = self.write();
            state.chain.accept_block(block, now)?;
        }
        self.activate_best_chain()
    }

    pub fn activate_best_chain(&self) -> Result<BlockReport, ChainStateError> {
        let mut report = BlockReport::default();
        loop {
            let mut state = self.write();
            let step = state.chain.activate_step()?;
            let done = step.done;
            self.apply_events(&mut state, step.events, &mut report)?;
            if done {
                return Ok(report);
            }
        }
    }

    /// Marks `hash` failed, disconnects it if active and moves to the next
    /// best chain.
    pub fn invalidate_block(&self, hash: &Hash256) -> Result<BlockReport, ChainStateError> {
        let mut report = BlockReport::default();
        {
            let mut state = self.write();
            let events = state.chain.invalidate_block(hash)?;
            self.apply_events(&mut state, events, &mut report)?;
        }
        let more = self.activate_best_chain()?;
        report.events.extend(more.events);
        report.removed.extend(more.removed);
        report.resurrected.extend(more.resurrected);
        Ok(report)
    }

    pub fn reconsider_block(&self, hash: &Hash256) -> Result<BlockReport, ChainStateError> {
        self.write().chain.reconsider_block(hash)?;
        self.activate_best_chain()
    }

    /// Mempool upkeep after one activation step: mined and conflicting
    /// entries leave, disconnected entries are re-admitted against the new
    /// tip, then anything the reorg made unspendable is dropped.
    fn apply_events(
        &self,
        state: &mut NodeState<S>,
        events: Vec<ChainEvent>,
        report: &mut BlockReport,
    ) -> Result<(), ChainStateError> {
        let NodeState { chain, mempool } = state;
        let mut disconnected: Vec<&Block> = Vec::new();
        for event in &events {
            match event {
                ChainEvent::BlockConnected { block, .. } => {
                    report.removed.extend(mempool.remove_for_block(block));
                }
                ChainEvent::BlockDisconnected { hash, block, .. } => {
                    report
                        .removed
                        .extend(mempool.remove_out_of_epoch_certificates(hash));
                    disconnected.push(block);
                }
                ChainEvent::BlockInvalid { hash, reason, .. } => {
                    log_warn!(
                        "block {} is invalid: {}",
                        hash256_to_hex(hash),
                        reason.reason
                    );
                }
                ChainEvent::CertificateVoided { .. } => {}
            }
        }

        if !disconnected.is_empty() {
            // Lowest block first so parents return before their spenders.
            for block in disconnected.iter().rev() {
                let entries = block
                    .transactions
                    .iter()
                    .filter(|tx| !tx.is_coinbase())
                    .cloned()
                    .map(TxBase::from)
                    .chain(block.certificates.iter().cloned().map(TxBase::from));
                for entry in entries {
                    let id = entry.id();
                    match accept_to_mempool(
                        chain,
                        mempool,
                        &self.policy,
                        entry,
                        false,
                        ProofVerification::Disabled,
                        now_secs(),
                    ) {
                        Ok(_) => report.resurrected.push(id),
                        Err(err) => {
                            log_cat!(
                                Category::Reorg,
                                "{} not returned to the pool: {}",
                                hash256_to_hex(&id),
                                err
                            );
                        }
                    }
                }
            }
            let next_height = chain.tip_height() + 1;
            report
                .removed
                .extend(mempool.remove_immature_expenditures(chain.coins(), next_height)?);
            report
                .removed
                .extend(mempool.remove_with_unknown_anchor(chain.coins())?);
        }

        let next_height = chain.tip_height() + 1;
        report
            .removed
            .extend(mempool.remove_stale_sidechain_entries(chain.coins(), next_height)?);
        report.events.extend(events);
        Ok(())
    }

    /// Runs admission for a loose transaction or certificate. Orphans it
    /// unlocks are retried before the lock is released.
    pub fn admit(&self, entry: TxBase, limit_free: bool) -> Result<AdmitOutcome, MempoolError> {
        let now = now_secs();
        let mode = self.proof_mode();
        let mut state = self.write();
        let NodeState { chain, mempool } = &mut *state;
        let id = entry.id();
        let retry = entry.clone();
        let outcome = match accept_to_mempool(
            chain,
            mempool,
            &self.policy,
            entry,
            limit_free,
            mode,
            now,
        ) {
            Ok(outcome) => outcome,
            Err(err) if err.kind == MempoolErrorKind::MissingInput => {
                if mempool.store_orphan(retry, &err.missing_inputs, limit_free, now) {
                    log_cat!(
                        Category::Mempool,
                        "stored orphan {} ({} orphans)",
                        hash256_to_hex(&id),
                        mempool.orphan_count()
                    );
                }
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        match &outcome {
            AdmitOutcome::Accepted { id, .. } => {
                let orphans =
                    process_orphans_after_accept(chain, mempool, &self.policy, *id, mode, now);
                for (pending, proofs) in orphans.pending {
                    self.queue_proofs(chain, mempool, pending, proofs);
                }
            }
            AdmitOutcome::PartiallyValidated { id, proofs } => {
                self.queue_proofs(chain, mempool, *id, proofs.clone());
            }
        }
        Ok(outcome)
    }

    /// Hands proofs to the batch verifier. If the worker is gone the entry
    /// is verified inline instead.
    fn queue_proofs(
        &self,
        chain: &ChainState<S>,
        mempool: &mut Mempool,
        id: Hash256,
        proofs: Vec<ProofContext>,
    ) {
        if self
            .proofs
            .as_ref()
            .is_some_and(|queue| queue.submit(id, proofs))
        {
            return;
        }
        let Some(pending) = mempool.take_pending(&id) else {
            return;
        };
        if let Err(err) = accept_to_mempool(
            chain,
            mempool,
            &self.policy,
            pending.entry,
            false,
            ProofVerification::Sync,
            pending.received,
        ) {
            log_warn!(
                "dropping {} after inline proof check: {}",
                hash256_to_hex(&id),
                err
            );
        }
    }

    /// Applies verdicts the batch verifier has already produced. Returns
    /// the entries that made it into the pool.
    pub fn apply_proof_verdicts(&self) -> Vec<Hash256> {
        let Some(queue) = &self.proofs else {
            return Vec::new();
        };
        let verdicts = queue.try_verdicts();
        self.apply_verdicts(verdicts)
    }

    /// Waits up to `timeout` for one verdict, then applies everything ready.
    pub fn wait_for_proof_verdicts(&self, timeout: Duration) -> Vec<Hash256> {
        let Some(queue) = &self.proofs else {
            return Vec::new();
        };
        let mut verdicts: Vec<ProofVerdict> = queue.recv_verdict(timeout).into_iter().collect();
        verdicts.extend(queue.try_verdicts());
        self.apply_verdicts(verdicts)
    }

    fn apply_verdicts(&self, verdicts: Vec<ProofVerdict>) -> Vec<Hash256> {
        if verdicts.is_empty() {
            return Vec::new();
        }
        let mut accepted = Vec::new();
        let mut state = self.write();
        let NodeState { chain, mempool } = &mut *state;
        for verdict in verdicts {
            let Some(pending) = mempool.take_pending(&verdict.id) else {
                continue;
            };
            if !verdict.valid {
                log_info!(
                    "dropping {}: proof verification failed",
                    hash256_to_hex(&verdict.id)
                );
                continue;
            }
            // The free relay budget was charged on first admission.
            match accept_to_mempool(
                chain,
                mempool,
                &self.policy,
                pending.entry,
                false,
                ProofVerification::Disabled,
                pending.received,
            ) {
                Ok(AdmitOutcome::Accepted { id, .. }) => {
                    accepted.push(id);
                    let orphans = process_orphans_after_accept(
                        chain,
                        mempool,
                        &self.policy,
                        id,
                        self.proof_mode(),
                        now_secs(),
                    );
                    accepted.extend(orphans.accepted);
                    for (pending, proofs) in orphans.pending {
                        self.queue_proofs(chain, mempool, pending, proofs);
                    }
                }
                Ok(AdmitOutcome::PartiallyValidated { .. }) => {}
                Err(err) => {
                    log_cat!(
                        Category::Mempool,
                        "verified entry {} no longer fits the pool: {}",
                        hash256_to_hex(&verdict.id),
                        err
                    );
                }
            }
        }
        accepted
    }
}

pub fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}
