//! Mempool admission: decides whether a loose transaction or certificate may
//! enter the pool.
//!
//! Every contextual rule is checked against a [`CoinView`] stacked on a
//! [`PoolView`], which serves pool outputs at [`MEMPOOL_HEIGHT`] on top of
//! the coin database at the active tip. Nothing is written to the ledger.

use std::collections::BTreeSet;

use zend_chainstate::checkqueue::ScriptCheck;
use zend_chainstate::coins::{CoinRecord, OutputMaturity, MEMPOOL_HEIGHT};
use zend_chainstate::error::{REJECT_DUPLICATE, REJECT_INSUFFICIENTFEE, REJECT_NONSTANDARD};
use zend_chainstate::ledger::{self, CertificatePlan};
use zend_chainstate::proof::ProofContext;
use zend_chainstate::sidechain::{ScEvents, SidechainRecord};
use zend_chainstate::tree::{empty_root, NoteTree};
use zend_chainstate::validation::{check_certificate, check_transaction, is_final_tx, legacy_sigops};
use zend_chainstate::view::{CoinSource, CoinView};
use zend_chainstate::{ChainState, RejectReason, RemovalReason};
use zend_consensus::constants::{MAX_BLOCK_SIGOPS, MAX_BLOCK_SIZE};
use zend_consensus::money::{checked_money_add, money_range, Amount, COIN};
use zend_consensus::{hash256_to_hex, Hash256};
use zend_log::{log_cat, log_debug, Category};
use zend_primitives::{OutPoint, ScCertificate, TxBase, TxLike, TxOut};
use zend_script::interpreter::{BLOCK_SCRIPT_VERIFY_FLAGS, STANDARD_SCRIPT_VERIFY_FLAGS};
use zend_script::sigops::p2sh_sigops;
use zend_script::standard::{
    classify_script_pubkey, is_standard_script_sig, ScriptType, MAX_OP_RETURN_RELAY,
    MAX_STANDARD_SCRIPT_SIG_SIZE,
};
use zend_storage::{KeyValueStore, StoreError};

use crate::mempool::{Mempool, MempoolEntry, MempoolError, MempoolErrorKind, MAX_PRIORITY};

pub const DEFAULT_MIN_RELAY_FEE_PER_KB: i64 = 100;
pub const DEFAULT_LIMIT_FREE_RELAY_KB_PER_MINUTE: u64 = 15;
const DEFAULT_BLOCK_PRIORITY_SIZE: usize = (MAX_BLOCK_SIZE as usize) / 2;
const FREE_TX_SIZE_LIMIT: usize = DEFAULT_BLOCK_PRIORITY_SIZE - 1000;
/// Priority above which an entry may be relayed without a fee: one coin
/// one day old in a 250 byte transaction.
pub const FREE_PRIORITY_THRESHOLD: f64 = (COIN as f64) * 144.0 / 250.0;

pub fn allow_free(priority: f64) -> bool {
    priority > FREE_PRIORITY_THRESHOLD
}

#[derive(Clone, Debug)]
pub struct MempoolPolicy {
    pub require_standard: bool,
    /// Fee rate in zatoshis/KB.
    pub min_relay_fee_per_kb: i64,
    /// Thousands of bytes per minute.
    pub limit_free_relay_kb_per_minute: u64,
    pub max_scriptsig_size: usize,
    pub max_op_return_bytes: usize,
    pub max_p2sh_sigops: u32,
    pub max_standard_tx_sigops: u32,
}

impl MempoolPolicy {
    pub fn standard(min_relay_fee_per_kb: i64, require_standard: bool) -> Self {
        let min_relay_fee_per_kb = min_relay_fee_per_kb.max(0);
        Self {
            require_standard,
            min_relay_fee_per_kb,
            limit_free_relay_kb_per_minute: DEFAULT_LIMIT_FREE_RELAY_KB_PER_MINUTE,
            max_scriptsig_size: MAX_STANDARD_SCRIPT_SIG_SIZE,
            max_op_return_bytes: MAX_OP_RETURN_RELAY,
            max_p2sh_sigops: 15,
            max_standard_tx_sigops: MAX_BLOCK_SIGOPS / 5,
        }
    }

    pub fn min_relay_fee_for_size(&self, size: usize) -> i64 {
        min_relay_fee_for_size(self.min_relay_fee_per_kb, size)
    }
}

/// How zero-knowledge proofs of an entry are checked.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProofVerification {
    /// Already verified, by a block that carried the entry or the batch
    /// verifier.
    Disabled,
    /// Verified inline while the admission holds the chain-state lock.
    Sync,
    /// Handed to the batch verifier; the entry waits outside the pool.
    Async,
}

#[derive(Clone, Debug, PartialEq)]
pub enum AdmitOutcome {
    Accepted {
        id: Hash256,
        evicted: Vec<Hash256>,
        /// Pool certificate (and its spenders) the entry superseded.
        replaced: Vec<Hash256>,
    },
    /// Every check but the proofs passed; `proofs` are queued.
    PartiallyValidated { id: Hash256, proofs: Vec<ProofContext> },
}

impl AdmitOutcome {
    pub fn id(&self) -> Hash256 {
        match self {
            AdmitOutcome::Accepted { id, .. } | AdmitOutcome::PartiallyValidated { id, .. } => *id,
        }
    }
}

/// Ledger as seen by admission: the tip ledger plus pool entries.
///
/// Pool outputs are served at [`MEMPOOL_HEIGHT`]. Sidechains created in the
/// pool are reported unconfirmed, pool forward transfers show up as
/// immature amounts and a pool certificate's backward transfers are taken
/// out of the balance.
pub struct PoolView<'a> {
    base: &'a dyn CoinSource,
    pool: &'a Mempool,
}

impl<'a> PoolView<'a> {
    pub fn new(base: &'a dyn CoinSource, pool: &'a Mempool) -> Self {
        Self { base, pool }
    }

    fn pool_creation(&self, sc_id: &Hash256, creation: &Hash256) -> Option<SidechainRecord> {
        let tx = self.pool.get(creation)?.entry.as_tx()?;
        let index = (0..tx.vsc_ccout.len())
            .find(|index| tx.sc_id_for_creation(creation, *index) == *sc_id)?;
        let output = &tx.vsc_ccout[index];
        let mut record = SidechainRecord::new(
            -1,
            *creation,
            output.withdrawal_epoch_length,
            output.custom_data.clone(),
            output.wcert_vk.clone(),
        );
        record.immature_amounts.insert(MEMPOOL_HEIGHT, output.value);
        Some(record)
    }
}

impl CoinSource for PoolView<'_> {
    fn coins(&self, txid: &Hash256) -> Result<Option<CoinRecord>, StoreError> {
        if let Some(entry) = self.pool.get(txid) {
            let record = match &entry.entry {
                TxBase::Tx(tx) => CoinRecord::from_tx(tx, MEMPOOL_HEIGHT),
                TxBase::Cert(cert) => CoinRecord::from_cert(cert, MEMPOOL_HEIGHT, MEMPOOL_HEIGHT),
            };
            return Ok(Some(record));
        }
        self.base.coins(txid)
    }

    fn sidechain(&self, sc_id: &Hash256) -> Result<Option<SidechainRecord>, StoreError> {
        let base = self.base.sidechain(sc_id)?;
        let Some(pooled) = self.pool.sidechain(sc_id) else {
            return Ok(base);
        };
        let record = match base {
            Some(record) => Some(record),
            None => pooled
                .creation
                .and_then(|creation| self.pool_creation(sc_id, &creation)),
        };
        let Some(mut record) = record else {
            return Ok(None);
        };
        for ft_id in &pooled.forward_transfers {
            let Some(tx) = self.pool.get(ft_id).and_then(|entry| entry.entry.as_tx()) else {
                continue;
            };
            for ft in tx.vft_ccout.iter().filter(|ft| ft.sc_id == *sc_id) {
                *record.immature_amounts.entry(MEMPOOL_HEIGHT).or_insert(0) += ft.value;
            }
        }
        if let Some(cert) = pooled
            .certificate
            .and_then(|id| self.pool.get(&id))
            .and_then(|entry| entry.entry.as_cert())
        {
            record.balance -= cert.bwt_total().unwrap_or(0);
        }
        Ok(Some(record))
    }

    fn sc_events(&self, height: i32) -> Result<Option<ScEvents>, StoreError> {
        self.base.sc_events(height)
    }

    fn nullifier_spent(&self, nullifier: &Hash256) -> Result<bool, StoreError> {
        if self.pool.nullifier_spender(nullifier).is_some() {
            return Ok(true);
        }
        self.base.nullifier_spent(nullifier)
    }

    fn csw_nullifier_spent(
        &self,
        sc_id: &Hash256,
        nullifier: &Hash256,
    ) -> Result<bool, StoreError> {
        if self.pool.csw_nullifier_spender(sc_id, nullifier).is_some() {
            return Ok(true);
        }
        self.base.csw_nullifier_spent(sc_id, nullifier)
    }

    fn anchor(&self, root: &Hash256) -> Result<Option<NoteTree>, StoreError> {
        self.base.anchor(root)
    }

    fn best_anchor(&self) -> Result<Hash256, StoreError> {
        self.base.best_anchor()
    }

    fn best_block(&self) -> Result<Option<Hash256>, StoreError> {
        self.base.best_block()
    }

    fn commitment_height(&self, root: &Hash256) -> Result<Option<i32>, StoreError> {
        self.base.commitment_height(root)
    }
}

struct PrevInfo {
    value: Amount,
    script_pubkey: Vec<u8>,
    height: i32,
}

/// Everything the contextual checks learned about an entry; owns its data so
/// the pool can be mutated afterwards.
struct Candidate {
    prevs: Vec<PrevInfo>,
    parents: Vec<Hash256>,
    value_in: Amount,
    fee: Amount,
    proofs: Vec<ProofContext>,
    replaces: Option<Hash256>,
}

fn nonstandard(reason: &str) -> MempoolError {
    MempoolError::rejected(RejectReason::nonstandard(REJECT_NONSTANDARD, reason), false)
}

fn insufficient_fee(reason: &str) -> MempoolError {
    MempoolError::new(MempoolErrorKind::InsufficientFee, reason)
}

/// Runs every admission rule for `entry` and inserts it into `pool`.
///
/// With [`ProofVerification::Async`] an entry carrying proofs is parked
/// in the pool's pending set and [`AdmitOutcome::PartiallyValidated`] is
/// returned; the batch verifier later re-runs admission with
/// [`ProofVerification::Disabled`] or drops the entry.
pub fn accept_to_mempool<S: KeyValueStore>(
    chain: &ChainState<S>,
    pool: &mut Mempool,
    policy: &MempoolPolicy,
    entry: TxBase,
    limit_free: bool,
    proof_verification: ProofVerification,
    now: u64,
) -> Result<AdmitOutcome, MempoolError> {
    let id = entry.id();
    let is_cert = entry.is_certificate();
    let reject = |reason: RejectReason| MempoolError::rejected(reason, is_cert);

    match &entry {
        TxBase::Tx(tx) => {
            if tx.is_coinbase() {
                return Err(reject(RejectReason::invalid(100, "coinbase")));
            }
            check_transaction(tx).map_err(reject)?;
        }
        TxBase::Cert(cert) => check_certificate(cert).map_err(reject)?,
    }

    if policy.require_standard {
        enforce_standard_outputs(&entry, policy)?;
    }

    let tip_height = chain.tip_height();
    let next_height = tip_height + 1;
    if let TxBase::Tx(tx) = &entry {
        if !is_final_tx(tx, next_height, chain.tip_median_time_past()) {
            return Err(nonstandard("non-final"));
        }
    }

    if pool.contains(&id) || pool.is_pending(&id) {
        return Err(MempoolError::new(
            MempoolErrorKind::AlreadyInMempool,
            "txn-already-in-mempool",
        ));
    }

    let candidate = check_against_ledger(chain, pool, policy, &entry, next_height)?;

    let size = entry.serialized_size();
    let modified_size = calculate_modified_size(&entry, size);
    let prioritisation = pool.prioritisation(&id);
    let modified_fee = candidate.fee.saturating_add(prioritisation.fee_delta);
    let priority = entry_priority(&entry, &candidate.prevs, tip_height, modified_size)
        + prioritisation.priority_delta;

    if let Some(replaced) = candidate.replaces.and_then(|old| pool.get(&old)) {
        let same_quality = match (entry.as_cert(), replaced.entry.as_cert()) {
            (Some(new), Some(old)) => new.quality == old.quality,
            _ => false,
        };
        if same_quality && modified_fee <= replaced.modified_fee() {
            return Err(insufficient_fee("sc-cert-fee-too-low"));
        }
    }

    let min_relay_fee = policy.min_relay_fee_for_size(size);
    if limit_free && modified_fee < min_relay_fee {
        if size >= FREE_TX_SIZE_LIMIT {
            return Err(insufficient_fee("insufficient fee"));
        }
        if !allow_free(priority) {
            return Err(insufficient_fee("insufficient priority"));
        }
        if !pool
            .free_relay
            .admit(policy.limit_free_relay_kb_per_minute, size, now)
        {
            return Err(insufficient_fee("rate limited free transaction"));
        }
    }

    verify_scripts(chain, &entry, id, &candidate.prevs, policy)?;

    if !candidate.proofs.is_empty() && chain.flags().check_proofs {
        match proof_verification {
            ProofVerification::Disabled => {}
            ProofVerification::Sync => {
                if let Err(owner) = chain.verifier().batch_verify(&candidate.proofs) {
                    log_cat!(
                        Category::Cert,
                        "proof verification failed for {}",
                        hash256_to_hex(&owner)
                    );
                    return Err(MempoolError::new(MempoolErrorKind::InvalidProof, "bad-sc-proof")
                        .with_ban_score(100));
                }
            }
            ProofVerification::Async => {
                pool.add_pending(
                    id,
                    crate::mempool::PendingEntry {
                        entry,
                        limit_free,
                        received: now,
                    },
                );
                log_cat!(
                    Category::Mempool,
                    "{} waits for {} proofs",
                    hash256_to_hex(&id),
                    candidate.proofs.len()
                );
                return Ok(AdmitOutcome::PartiallyValidated {
                    id,
                    proofs: candidate.proofs,
                });
            }
        }
    }

    let mut replaced = Vec::new();
    if let Some(old) = candidate.replaces {
        replaced.extend(
            pool.remove_recursive(&old, RemovalReason::Replaced)
                .into_iter()
                .map(|removed| removed.id),
        );
    }

    let spent_outpoints = entry
        .inputs()
        .iter()
        .map(|input| input.prevout.clone())
        .collect();
    let inserted = pool.insert(MempoolEntry {
        id,
        entry,
        size,
        time: now,
        height: tip_height,
        fee: candidate.fee,
        value_in: candidate.value_in,
        modified_size,
        priority,
        fee_delta: 0,
        priority_delta: 0.0,
        spent_outpoints,
        parents: candidate.parents,
    })?;
    log_cat!(
        Category::Mempool,
        "accepted {} (fee {}, {} bytes, pool {} entries)",
        hash256_to_hex(&id),
        candidate.fee,
        size,
        pool.size()
    );
    Ok(AdmitOutcome::Accepted {
        id,
        evicted: inserted.evicted_ids,
        replaced,
    })
}

/// Checks that need the ledger: conflicts, inputs, values, sidechain rules
/// and joinsplits. Collects the proofs the entry carries.
fn check_against_ledger<S: KeyValueStore>(
    chain: &ChainState<S>,
    pool: &Mempool,
    policy: &MempoolPolicy,
    entry: &TxBase,
    next_height: i32,
) -> Result<Candidate, MempoolError> {
    let id = entry.id();
    let is_cert = entry.is_certificate();
    let reject = |reason: RejectReason| MempoolError::rejected(reason, is_cert);

    let replaces = match entry {
        TxBase::Cert(cert) => certificate_to_replace(pool, cert)?,
        TxBase::Tx(_) => None,
    };

    for input in entry.inputs() {
        if let Some(spender) = pool.spender(&input.prevout) {
            if Some(spender) != replaces {
                return Err(MempoolError::new(
                    MempoolErrorKind::ConflictingInput,
                    "txn-mempool-conflict",
                ));
            }
        }
    }
    if let TxBase::Tx(tx) = entry {
        if tx.nullifiers().any(|nf| pool.nullifier_spender(nf).is_some())
            || tx
                .vcsw_ccin
                .iter()
                .any(|csw| pool.csw_nullifier_spender(&csw.sc_id, &csw.nullifier).is_some())
        {
            return Err(MempoolError::new(
                MempoolErrorKind::ConflictingInput,
                "txn-mempool-conflict",
            ));
        }
    }

    let base = chain.coins();
    if base.coins(&id)?.is_some() {
        return Err(MempoolError::new(
            MempoolErrorKind::AlreadyKnown,
            "txn-already-known",
        ));
    }

    let pool_view = PoolView::new(base, pool);
    let mut view = CoinView::new(&pool_view);

    let missing: BTreeSet<OutPoint> = {
        let mut missing = BTreeSet::new();
        for input in entry.inputs() {
            if !view.have_coins(&input.prevout.hash)? {
                missing.insert(input.prevout.clone());
            }
        }
        missing
    };
    if !missing.is_empty() {
        return Err(MempoolError::missing_inputs(missing.into_iter().collect()));
    }

    let mut prevs = Vec::with_capacity(entry.inputs().len());
    let mut parents: BTreeSet<Hash256> = BTreeSet::new();
    let mut value_in: Amount = 0;
    let mut p2sh_ops: usize = 0;
    for input in entry.inputs() {
        let prevout = &input.prevout;
        if let Some(parent) = pool.get(&prevout.hash) {
            if parent.is_certificate() {
                return Err(nonstandard("spends-unconfirmed-certificate"));
            }
            parents.insert(prevout.hash);
        }
        let Some(record) = view.access_coins(&prevout.hash)? else {
            return Err(MempoolError::missing_inputs(vec![prevout.clone()]));
        };
        match record.output_maturity(prevout.index, next_height) {
            OutputMaturity::Unavailable => {
                return Err(reject(
                    RejectReason::invalid(0, "bad-txns-inputs-spent").with_code(REJECT_DUPLICATE),
                ));
            }
            OutputMaturity::Immature if record.meta.is_coinbase => {
                return Err(reject(RejectReason::invalid(0, "premature-spend-of-coinbase")));
            }
            OutputMaturity::Immature => {
                return Err(reject(RejectReason::invalid(0, "premature-spend-of-certificate")));
            }
            OutputMaturity::Mature => {}
        }
        let height = record.meta.height;
        let out = record
            .output(prevout.index)
            .cloned()
            .ok_or_else(|| MempoolError::new(MempoolErrorKind::Internal, "missing prevout"))?;
        value_in = checked_money_add(value_in, out.value)
            .ok_or_else(|| reject(RejectReason::invalid(100, "bad-txns-inputvalues-outofrange")))?;
        p2sh_ops = p2sh_ops.saturating_add(p2sh_sigops(&out.script_pubkey, &input.script_sig));
        prevs.push(PrevInfo {
            value: out.value,
            script_pubkey: out.script_pubkey,
            height,
        });
    }

    if policy.require_standard {
        enforce_standard_inputs(entry, &prevs, policy)?;
    }

    let (inputs_total, fee) = match entry {
        TxBase::Tx(tx) => {
            let total = tx
                .value_in_without_inputs()
                .and_then(|extra| checked_money_add(value_in, extra))
                .ok_or_else(|| reject(RejectReason::invalid(100, "bad-txns-inputvalues-outofrange")))?;
            let out = tx
                .value_out()
                .ok_or_else(|| reject(RejectReason::invalid(100, "bad-txns-txouttotal-toolarge")))?;
            if total < out {
                return Err(reject(RejectReason::invalid(100, "bad-txns-in-belowout")));
            }
            (total, total - out)
        }
        TxBase::Cert(cert) => {
            let change = cert
                .change_total()
                .ok_or_else(|| reject(RejectReason::invalid(100, "bad-cert-txouttotal-toolarge")))?;
            if value_in < change {
                return Err(reject(RejectReason::invalid(100, "bad-cert-in-belowout")));
            }
            (value_in, value_in - change)
        }
    };
    if !money_range(fee) {
        return Err(reject(RejectReason::invalid(100, "bad-txns-fee-outofrange")));
    }

    let (inputs, outputs) = match entry {
        TxBase::Tx(tx) => (&tx.vin, &tx.vout),
        TxBase::Cert(cert) => (&cert.vin, &cert.vout),
    };
    let sigops = legacy_sigops(inputs, outputs).saturating_add(p2sh_ops as u32);
    if sigops > policy.max_standard_tx_sigops {
        return Err(nonstandard("bad-txns-too-many-sigops"));
    }

    let mut proofs = Vec::new();
    match entry {
        TxBase::Tx(tx) => {
            for index in 0..tx.vsc_ccout.len() {
                let sc_id = tx.sc_id_for_creation(&id, index);
                if view.have_sidechain(&sc_id)? {
                    return Err(reject(RejectReason::invalid(
                        100,
                        "sidechain-creation-id-already-in-use",
                    )));
                }
            }
            for ft in &tx.vft_ccout {
                let sc = view.sidechain(&ft.sc_id)?;
                ledger::check_forward_transfer(sc.as_ref(), ft, next_height).map_err(reject)?;
            }
            let mut claimed: Vec<(Hash256, Amount)> = Vec::new();
            for csw in &tx.vcsw_ccin {
                let sc = view.sidechain(&csw.sc_id)?;
                let earlier: Amount = claimed
                    .iter()
                    .filter(|(sc_id, _)| *sc_id == csw.sc_id)
                    .map(|(_, value)| *value)
                    .sum();
                let already = pool_withdrawals(pool, &csw.sc_id).saturating_add(earlier);
                ledger::check_csw(sc.as_ref(), csw, next_height, already).map_err(reject)?;
                if view.csw_nullifier_spent(&csw.sc_id, &csw.nullifier)? {
                    return Err(reject(RejectReason::invalid(100, "bad-sc-csw-nullifier-spent")));
                }
                claimed.push((csw.sc_id, csw.value));
                proofs.push(ProofContext::Csw {
                    txid: id,
                    sc_id: csw.sc_id,
                    value: csw.value,
                    nullifier: csw.nullifier,
                    pub_key_hash: csw.pub_key_hash,
                    proof: csw.proof.clone(),
                });
            }

            let best_anchor = view.best_anchor()?;
            for (index, js) in tx.join_splits.iter().enumerate() {
                let known = js.anchor == best_anchor
                    || js.anchor == empty_root()
                    || view.anchor(&js.anchor)?.is_some();
                if !known {
                    return Err(reject(RejectReason::invalid(0, "bad-txns-joinsplit-anchor")));
                }
                for nullifier in &js.nullifiers {
                    if view.nullifier_spent(nullifier)? {
                        return Err(reject(RejectReason::invalid(
                            0,
                            "bad-txns-joinsplit-nullifier-spent",
                        )));
                    }
                }
                proofs.push(ProofContext::JoinSplit {
                    txid: id,
                    index,
                    anchor: js.anchor,
                    proof: js.proof.clone(),
                });
            }
        }
        TxBase::Cert(cert) => {
            let Some(sc) = base.sidechain(&cert.sc_id)? else {
                return Err(reject(RejectReason::invalid(10, "bad-sc-cert-unknown-sidechain")));
            };
            let plan: CertificatePlan =
                ledger::check_certificate(&sc, cert, next_height, chain.chain()).map_err(reject)?;
            proofs.push(ledger::certificate_proof(&sc, cert, &plan));
        }
    }

    Ok(Candidate {
        prevs,
        parents: parents.into_iter().collect(),
        value_in: inputs_total,
        fee,
        proofs,
        replaces,
    })
}

/// The pool certificate `cert` would supersede. A certificate for the same
/// sidechain and epoch gives way to a higher quality one, or to an equal
/// quality one paying a higher fee; anything else conflicts.
fn certificate_to_replace(
    pool: &Mempool,
    cert: &ScCertificate,
) -> Result<Option<Hash256>, MempoolError> {
    let Some(existing) = pool.certificate_for(&cert.sc_id) else {
        return Ok(None);
    };
    let Some(pooled) = existing.entry.as_cert() else {
        return Ok(None);
    };
    if pooled.epoch_number != cert.epoch_number {
        return Err(MempoolError::new(
            MempoolErrorKind::ConflictingInput,
            "sc-cert-conflict",
        ));
    }
    if cert.quality < pooled.quality {
        return Err(MempoolError::new(
            MempoolErrorKind::ConflictingInput,
            "sc-cert-quality-below-mempool",
        ));
    }
    Ok(Some(existing.id))
}

fn pool_withdrawals(pool: &Mempool, sc_id: &Hash256) -> Amount {
    pool.entries()
        .filter_map(|entry| entry.entry.as_tx())
        .flat_map(|tx| tx.vcsw_ccin.iter())
        .filter(|csw| csw.sc_id == *sc_id)
        .map(|csw| csw.value)
        .sum()
}

fn entry_priority(entry: &TxBase, prevs: &[PrevInfo], tip_height: i32, modified_size: usize) -> f64 {
    let carries_proofs = match entry {
        TxBase::Cert(_) => true,
        TxBase::Tx(tx) => !tx.join_splits.is_empty(),
    };
    if carries_proofs {
        return MAX_PRIORITY;
    }
    if modified_size == 0 {
        return 0.0;
    }
    let mut inputs_priority = 0.0;
    for prev in prevs {
        if prev.height >= tip_height {
            continue;
        }
        let age = tip_height - prev.height;
        inputs_priority += (prev.value.max(0) as f64) * (age as f64);
    }
    (inputs_priority / (modified_size as f64)).min(MAX_PRIORITY)
}

fn verify_scripts<S: KeyValueStore>(
    chain: &ChainState<S>,
    entry: &TxBase,
    id: Hash256,
    prevs: &[PrevInfo],
    policy: &MempoolPolicy,
) -> Result<(), MempoolError> {
    if !chain.flags().check_scripts || prevs.is_empty() {
        return Ok(());
    }
    let flags = if policy.require_standard {
        STANDARD_SCRIPT_VERIFY_FLAGS
    } else {
        BLOCK_SCRIPT_VERIFY_FLAGS
    };
    let checks: Vec<ScriptCheck<'_>> = prevs
        .iter()
        .enumerate()
        .map(|(input_index, prev)| ScriptCheck {
            entry,
            entry_id: id,
            input_index,
            script_pubkey: prev.script_pubkey.clone(),
            flags,
        })
        .collect();
    let Err(failure) = chain.check_queue().run(&checks, |check| check.run()) else {
        return Ok(());
    };
    log_debug!(
        "script check failed for {} input {}: {}",
        hash256_to_hex(&failure.entry_id),
        failure.input_index,
        failure.error
    );
    if flags != BLOCK_SCRIPT_VERIFY_FLAGS {
        let mandatory = checks.get(failure.input_index).map(|check| ScriptCheck {
            entry,
            entry_id: id,
            input_index: check.input_index,
            script_pubkey: check.script_pubkey.clone(),
            flags: BLOCK_SCRIPT_VERIFY_FLAGS,
        });
        if mandatory.is_some_and(|check| check.run().is_ok()) {
            return Err(nonstandard("non-mandatory-script-verify-flag"));
        }
    }
    Err(
        MempoolError::new(MempoolErrorKind::InvalidScript, "mandatory-script-verify-flag-failed")
            .with_ban_score(100),
    )
}

fn enforce_standard_outputs(entry: &TxBase, policy: &MempoolPolicy) -> Result<(), MempoolError> {
    let (inputs, outputs) = match entry {
        TxBase::Tx(tx) => (&tx.vin, &tx.vout),
        TxBase::Cert(cert) => (&cert.vin, &cert.vout),
    };
    for input in inputs {
        if input.script_sig.len() > policy.max_scriptsig_size {
            return Err(nonstandard("scriptsig-size"));
        }
        if !is_standard_script_sig(&input.script_sig) {
            return Err(nonstandard("scriptsig-not-pushonly"));
        }
    }

    let mut op_return_count = 0usize;
    for output in outputs {
        match classify_script_pubkey(&output.script_pubkey) {
            ScriptType::NullData => {
                if output.script_pubkey.len() > policy.max_op_return_bytes {
                    return Err(nonstandard("scriptpubkey"));
                }
                op_return_count += 1;
                continue;
            }
            ScriptType::P2Pk | ScriptType::P2Pkh | ScriptType::P2Sh | ScriptType::MultiSig => {}
            ScriptType::Unknown => return Err(nonstandard("scriptpubkey")),
        }
        if is_dust(output, policy.min_relay_fee_per_kb) {
            return Err(nonstandard("dust"));
        }
    }
    if op_return_count > 1 {
        return Err(nonstandard("multi-op-return"));
    }
    Ok(())
}

fn enforce_standard_inputs(
    entry: &TxBase,
    prevs: &[PrevInfo],
    policy: &MempoolPolicy,
) -> Result<(), MempoolError> {
    for (input, prev) in entry.inputs().iter().zip(prevs) {
        match classify_script_pubkey(&prev.script_pubkey) {
            ScriptType::P2Pk | ScriptType::P2Pkh | ScriptType::MultiSig => {}
            ScriptType::P2Sh => {
                let ops = p2sh_sigops(&prev.script_pubkey, &input.script_sig);
                if ops > policy.max_p2sh_sigops as usize {
                    return Err(nonstandard("p2sh-sigops"));
                }
            }
            ScriptType::NullData | ScriptType::Unknown => {
                return Err(nonstandard("nonstandard-input"));
            }
        }
    }
    Ok(())
}

fn calculate_modified_size(entry: &TxBase, size: usize) -> usize {
    let mut size = size;
    for input in entry.inputs() {
        let offset = 41usize.saturating_add(110usize.min(input.script_sig.len()));
        if size > offset {
            size = size.saturating_sub(offset);
        }
    }
    size
}

pub fn min_relay_fee_for_size(min_fee_per_kb: i64, size: usize) -> i64 {
    if min_fee_per_kb <= 0 {
        return 0;
    }
    let size = i64::try_from(size).unwrap_or(i64::MAX);
    let mut fee = min_fee_per_kb.saturating_mul(size).saturating_div(1000);
    if fee == 0 {
        fee = min_fee_per_kb;
    }
    fee
}

/// An output is dust when spending it would cost more than a third of its
/// value at the relay fee rate.
fn is_dust(output: &TxOut, min_fee_per_kb: i64) -> bool {
    if min_fee_per_kb <= 0 {
        return false;
    }
    if output.value < 0 {
        return true;
    }
    let script_len = output.script_pubkey.len();
    let out_size = 8usize
        .saturating_add(compact_size_len(script_len))
        .saturating_add(script_len);
    let spend_size = out_size.saturating_add(148);
    let fee = min_relay_fee_for_size(min_fee_per_kb, spend_size);
    output.value < fee.saturating_mul(3)
}

fn compact_size_len(value: usize) -> usize {
    if value < 0xfd {
        1
    } else if value <= 0xffff {
        3
    } else if value <= 0xffff_ffff {
        5
    } else {
        9
    }
}

/// Outcome of retrying orphans after a parent was accepted.
#[derive(Debug, Default)]
pub struct OrphanProcessOutcome {
    pub accepted: Vec<Hash256>,
    pub pending: Vec<(Hash256, Vec<ProofContext>)>,
    pub evicted: Vec<Hash256>,
}

/// Retries, breadth first, every orphan unlocked by `parent` and by the
/// orphans accepted along the way.
pub fn process_orphans_after_accept<S: KeyValueStore>(
    chain: &ChainState<S>,
    pool: &mut Mempool,
    policy: &MempoolPolicy,
    parent: Hash256,
    proof_verification: ProofVerification,
    now: u64,
) -> OrphanProcessOutcome {
    let mut queue = std::collections::VecDeque::from([parent]);
    let mut visited = std::collections::HashSet::new();
    let mut outcome = OrphanProcessOutcome::default();

    while let Some(parent) = queue.pop_front() {
        if !visited.insert(parent) {
            continue;
        }
        for orphan in pool.take_orphans_for_parent(&parent) {
            let retry = orphan.entry.clone();
            match accept_to_mempool(
                chain,
                pool,
                policy,
                orphan.entry,
                orphan.limit_free,
                proof_verification,
                now,
            ) {
                Ok(AdmitOutcome::Accepted { id, evicted, .. }) => {
                    outcome.accepted.push(id);
                    outcome.evicted.extend(evicted);
                    queue.push_back(id);
                }
                Ok(AdmitOutcome::PartiallyValidated { id, proofs }) => {
                    outcome.pending.push((id, proofs));
                }
                Err(err) if err.kind == MempoolErrorKind::MissingInput => {
                    pool.store_orphan(retry, &err.missing_inputs, orphan.limit_free, now);
                }
                Err(err) if err.kind == MempoolErrorKind::AlreadyInMempool => {
                    queue.push_back(orphan.id);
                }
                Err(err) => {
                    log_cat!(
                        Category::Mempool,
                        "orphan {} rejected: {}",
                        hash256_to_hex(&orphan.id),
                        err
                    );
                }
            }
        }
    }
    outcome
}
