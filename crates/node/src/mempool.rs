//! Pool of unconfirmed transactions and certificates.
//!
//! The pool only holds entries that passed admission (see
//! [`crate::admission`]). Besides the entries it indexes every spent
//! outpoint, joinsplit nullifier and withdrawal nullifier so conflicts are
//! found without scanning, and keeps per sidechain the pool creation, the
//! forward transfers and the single certificate that reference it.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use zend_chainstate::coins::OutputMaturity;
use zend_chainstate::error::RejectKind;
use zend_chainstate::sidechain::ScState;
use zend_chainstate::tree::empty_root;
use zend_chainstate::view::CoinSource;
use zend_chainstate::{ChainNotifier, ChainStateError, RejectReason, RemovalReason};
use zend_consensus::{hash256_to_hex, Hash256};
use zend_log::{log_cat, Category};
use zend_primitives::{Block, OutPoint, TxBase, TxLike};
use zend_storage::StoreError;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MempoolErrorKind {
    AlreadyInMempool,
    /// The entry is already confirmed.
    AlreadyKnown,
    ConflictingInput,
    InsufficientFee,
    MissingInput,
    MempoolFull,
    NonStandard,
    InvalidTransaction,
    InvalidCertificate,
    InvalidScript,
    InvalidProof,
    Internal,
}

#[derive(Clone, Debug)]
pub struct MempoolError {
    pub kind: MempoolErrorKind,
    pub message: String,
    pub missing_inputs: Vec<OutPoint>,
    /// Points the relaying peer should be penalized with.
    pub ban_score: u32,
}

impl MempoolError {
    pub fn new(kind: MempoolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            missing_inputs: Vec::new(),
            ban_score: 0,
        }
    }

    pub fn missing_inputs(missing_inputs: Vec<OutPoint>) -> Self {
        Self {
            kind: MempoolErrorKind::MissingInput,
            message: "missing inputs".to_string(),
            missing_inputs,
            ban_score: 0,
        }
    }

    /// Maps a validation rejection of a transaction (`certificate == false`)
    /// or certificate.
    pub fn rejected(reason: RejectReason, certificate: bool) -> Self {
        let kind = match reason.kind {
            RejectKind::NonStandard => MempoolErrorKind::NonStandard,
            RejectKind::MissingInput => MempoolErrorKind::MissingInput,
            RejectKind::System => MempoolErrorKind::Internal,
            RejectKind::Malformed | RejectKind::Invalid if certificate => {
                MempoolErrorKind::InvalidCertificate
            }
            RejectKind::Malformed | RejectKind::Invalid => MempoolErrorKind::InvalidTransaction,
        };
        Self {
            kind,
            message: reason.reason,
            missing_inputs: Vec::new(),
            ban_score: reason.ban_score,
        }
    }

    pub fn with_ban_score(mut self, ban_score: u32) -> Self {
        self.ban_score = ban_score.min(100);
        self
    }

    pub fn is_invalid(&self) -> bool {
        matches!(
            self.kind,
            MempoolErrorKind::InvalidTransaction
                | MempoolErrorKind::InvalidCertificate
                | MempoolErrorKind::InvalidScript
                | MempoolErrorKind::InvalidProof
        )
    }
}

impl From<StoreError> for MempoolError {
    fn from(err: StoreError) -> Self {
        MempoolError::new(MempoolErrorKind::Internal, err.to_string())
    }
}

impl From<ChainStateError> for MempoolError {
    fn from(err: ChainStateError) -> Self {
        match err {
            ChainStateError::Rejected(reason) => MempoolError::rejected(reason, false),
            other => MempoolError::new(MempoolErrorKind::Internal, other.to_string()),
        }
    }
}

impl std::fmt::Display for MempoolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for MempoolError {}

pub const MAX_PRIORITY: f64 = 1e16;

pub struct MempoolEntry {
    pub id: Hash256,
    pub entry: TxBase,
    pub size: usize,
    pub time: u64,
    /// Tip height when the entry was admitted.
    pub height: i32,
    pub fee: i64,
    pub value_in: i64,
    pub modified_size: usize,
    pub priority: f64,
    pub fee_delta: i64,
    pub priority_delta: f64,
    pub spent_outpoints: Vec<OutPoint>,
    pub parents: Vec<Hash256>,
}

impl MempoolEntry {
    pub fn is_certificate(&self) -> bool {
        self.entry.is_certificate()
    }

    pub fn modified_fee(&self) -> i64 {
        self.fee.saturating_add(self.fee_delta)
    }

    pub fn modified_starting_priority(&self) -> f64 {
        self.priority + self.priority_delta
    }

    pub fn current_priority(&self, current_height: i32) -> f64 {
        if self.modified_size == 0 {
            return self.priority;
        }
        let delta = current_height.saturating_sub(self.height).max(0) as f64;
        let value_in = self.value_in.max(0) as f64;
        let increased = delta * value_in / (self.modified_size as f64);
        (self.priority + increased).min(MAX_PRIORITY)
    }

    fn nullifiers(&self) -> Vec<Hash256> {
        match &self.entry {
            TxBase::Tx(tx) => tx.nullifiers().copied().collect(),
            TxBase::Cert(_) => Vec::new(),
        }
    }

    fn csw_nullifiers(&self) -> Vec<(Hash256, Hash256)> {
        match &self.entry {
            TxBase::Tx(tx) => tx
                .vcsw_ccin
                .iter()
                .map(|csw| (csw.sc_id, csw.nullifier))
                .collect(),
            TxBase::Cert(_) => Vec::new(),
        }
    }

    /// Sidechains created by the entry.
    pub fn created_sidechains(&self) -> Vec<Hash256> {
        match &self.entry {
            TxBase::Tx(tx) => (0..tx.vsc_ccout.len())
                .map(|index| tx.sc_id_for_creation(&self.id, index))
                .collect(),
            TxBase::Cert(_) => Vec::new(),
        }
    }

    fn forward_transfer_targets(&self) -> BTreeSet<Hash256> {
        match &self.entry {
            TxBase::Tx(tx) => tx.vft_ccout.iter().map(|ft| ft.sc_id).collect(),
            TxBase::Cert(_) => BTreeSet::new(),
        }
    }
}

/// Pool entries that reference one sidechain.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PoolSidechain {
    pub creation: Option<Hash256>,
    pub forward_transfers: BTreeSet<Hash256>,
    pub certificate: Option<Hash256>,
}

impl PoolSidechain {
    fn is_empty(&self) -> bool {
        self.creation.is_none() && self.forward_transfers.is_empty() && self.certificate.is_none()
    }
}

#[derive(Clone, Debug)]
struct OrphanEntry {
    id: Hash256,
    entry: TxBase,
    size: usize,
    received: u64,
    missing_parents: Vec<Hash256>,
    limit_free: bool,
}

/// An orphan whose parent just arrived, handed back for another admission.
#[derive(Clone, Debug)]
pub struct OrphanRetry {
    pub id: Hash256,
    pub entry: TxBase,
    pub limit_free: bool,
}

/// Entry whose proofs are being verified by the batch verifier.
#[derive(Clone, Debug)]
pub struct PendingEntry {
    pub entry: TxBase,
    pub limit_free: bool,
    pub received: u64,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Prioritisation {
    pub priority_delta: f64,
    pub fee_delta: i64,
}

#[derive(Clone, Debug, Default)]
pub struct MempoolInsertOutcome {
    pub evicted: u64,
    pub evicted_bytes: u64,
    pub evicted_ids: Vec<Hash256>,
}

/// Exponentially decaying count of free bytes relayed, shared by every
/// admission. Decays by a factor of `1 - 1/600` per second.
#[derive(Debug, Default)]
pub struct FreeRelayLimiter {
    count: f64,
    last_time: u64,
}

impl FreeRelayLimiter {
    /// Admits `size` free bytes unless the budget of `limit_kb_per_minute`
    /// (averaged over ten minutes) is used up.
    pub fn admit(&mut self, limit_kb_per_minute: u64, size: usize, now: u64) -> bool {
        let threshold = (limit_kb_per_minute as f64) * 10.0 * 1000.0;
        let delta = now.saturating_sub(self.last_time);
        self.count *= (1.0_f64 - 1.0_f64 / 600.0_f64).powf(delta as f64);
        self.last_time = now;
        if self.count >= threshold {
            return false;
        }
        self.count += size as f64;
        true
    }
}

pub const DEFAULT_MAX_ORPHANS: usize = 100;
pub const DEFAULT_MAX_ORPHAN_BYTES: usize = 5 * 1024 * 1024;
/// Larger orphans are dropped instead of stored.
pub const MAX_ORPHAN_TX_SIZE: usize = 5_000;
const DEFAULT_ORPHAN_TTL_SECS: u64 = 20 * 60;

pub struct Mempool {
    entries: HashMap<Hash256, MempoolEntry>,
    spent: HashMap<OutPoint, Hash256>,
    nullifiers: HashMap<Hash256, Hash256>,
    csw_nullifiers: HashMap<(Hash256, Hash256), Hash256>,
    children: HashMap<Hash256, Vec<Hash256>>,
    sidechains: HashMap<Hash256, PoolSidechain>,
    prioritisations: HashMap<Hash256, Prioritisation>,
    orphans: HashMap<Hash256, OrphanEntry>,
    orphans_by_parent: HashMap<Hash256, Vec<Hash256>>,
    orphan_bytes: usize,
    pending: HashMap<Hash256, PendingEntry>,
    pub(crate) free_relay: FreeRelayLimiter,
    total_bytes: usize,
    max_bytes: usize,
    revision: u64,
    notifier: Option<Arc<dyn ChainNotifier>>,
}

impl Default for Mempool {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Mempool {
    /// `max_bytes == 0` disables the size cap.
    pub fn new(max_bytes: usize) -> Self {
        Self {
            entries: HashMap::new(),
            spent: HashMap::new(),
            nullifiers: HashMap::new(),
            csw_nullifiers: HashMap::new(),
            children: HashMap::new(),
            sidechains: HashMap::new(),
            prioritisations: HashMap::new(),
            orphans: HashMap::new(),
            orphans_by_parent: HashMap::new(),
            orphan_bytes: 0,
            pending: HashMap::new(),
            free_relay: FreeRelayLimiter::default(),
            total_bytes: 0,
            max_bytes,
            revision: 0,
            notifier: None,
        }
    }

    pub fn set_notifier(&mut self, notifier: Arc<dyn ChainNotifier>) {
        self.notifier = Some(notifier);
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn contains(&self, id: &Hash256) -> bool {
        self.entries.contains_key(id)
    }

    pub fn spender(&self, outpoint: &OutPoint) -> Option<Hash256> {
        self.spent.get(outpoint).copied()
    }

    pub fn nullifier_spender(&self, nullifier: &Hash256) -> Option<Hash256> {
        self.nullifiers.get(nullifier).copied()
    }

    pub fn csw_nullifier_spender(&self, sc_id: &Hash256, nullifier: &Hash256) -> Option<Hash256> {
        self.csw_nullifiers.get(&(*sc_id, *nullifier)).copied()
    }

    pub fn sidechain(&self, sc_id: &Hash256) -> Option<&PoolSidechain> {
        self.sidechains.get(sc_id)
    }

    /// The certificate currently in the pool for `sc_id`.
    pub fn certificate_for(&self, sc_id: &Hash256) -> Option<&MempoolEntry> {
        let id = self.sidechains.get(sc_id)?.certificate?;
        self.entries.get(&id)
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn ids(&self) -> Vec<Hash256> {
        let mut out: Vec<_> = self.entries.keys().copied().collect();
        out.sort();
        out
    }

    pub fn get(&self, id: &Hash256) -> Option<&MempoolEntry> {
        self.entries.get(id)
    }

    pub fn entries(&self) -> impl Iterator<Item = &MempoolEntry> {
        self.entries.values()
    }

    pub fn prioritise(&mut self, id: Hash256, priority_delta: f64, fee_delta: i64) {
        let entry = self.prioritisations.entry(id).or_default();
        entry.priority_delta += priority_delta;
        entry.fee_delta = entry.fee_delta.saturating_add(fee_delta);

        if let Some(pooled) = self.entries.get_mut(&id) {
            pooled.priority_delta += priority_delta;
            pooled.fee_delta = pooled.fee_delta.saturating_add(fee_delta);
        }
        self.revision = self.revision.saturating_add(1);
    }

    pub fn prioritisation(&self, id: &Hash256) -> Prioritisation {
        self.prioritisations.get(id).copied().unwrap_or_default()
    }

    pub fn insert(&mut self, entry: MempoolEntry) -> Result<MempoolInsertOutcome, MempoolError> {
        let mut entry = entry;
        if let Some(priority) = self.prioritisations.get(&entry.id) {
            entry.priority_delta += priority.priority_delta;
            entry.fee_delta = entry.fee_delta.saturating_add(priority.fee_delta);
        }

        let inserted_id = entry.id;
        if self.max_bytes > 0 && entry.size > self.max_bytes {
            return Err(MempoolError::new(
                MempoolErrorKind::MempoolFull,
                "entry too large for mempool",
            ));
        }
        if self.entries.contains_key(&entry.id) {
            return Err(MempoolError::new(
                MempoolErrorKind::AlreadyInMempool,
                "txn-already-in-mempool",
            ));
        }
        for outpoint in &entry.spent_outpoints {
            if let Some(conflict) = self.spent.get(outpoint) {
                return Err(MempoolError::new(
                    MempoolErrorKind::ConflictingInput,
                    format!(
                        "input {}:{} already spent by {}",
                        hash256_to_hex(&outpoint.hash),
                        outpoint.index,
                        hash256_to_hex(conflict)
                    ),
                ));
            }
        }
        let nullifiers = entry.nullifiers();
        for nullifier in &nullifiers {
            if let Some(conflict) = self.nullifiers.get(nullifier) {
                return Err(MempoolError::new(
                    MempoolErrorKind::ConflictingInput,
                    format!(
                        "nullifier {} already spent by {}",
                        hash256_to_hex(nullifier),
                        hash256_to_hex(conflict)
                    ),
                ));
            }
        }
        let csw_nullifiers = entry.csw_nullifiers();
        for key in &csw_nullifiers {
            if let Some(conflict) = self.csw_nullifiers.get(key) {
                return Err(MempoolError::new(
                    MempoolErrorKind::ConflictingInput,
                    format!(
                        "withdrawal nullifier {} already spent by {}",
                        hash256_to_hex(&key.1),
                        hash256_to_hex(conflict)
                    ),
                ));
            }
        }
        if let TxBase::Cert(cert) = &entry.entry {
            if let Some(existing) = self.sidechains.get(&cert.sc_id).and_then(|sc| sc.certificate) {
                return Err(MempoolError::new(
                    MempoolErrorKind::ConflictingInput,
                    format!(
                        "sidechain {} already has certificate {} in the pool",
                        hash256_to_hex(&cert.sc_id),
                        hash256_to_hex(&existing)
                    ),
                ));
            }
        }

        for outpoint in &entry.spent_outpoints {
            self.spent.insert(outpoint.clone(), entry.id);
        }
        for nullifier in nullifiers {
            self.nullifiers.insert(nullifier, entry.id);
        }
        for key in csw_nullifiers {
            self.csw_nullifiers.insert(key, entry.id);
        }
        for sc_id in entry.created_sidechains() {
            self.sidechains.entry(sc_id).or_default().creation = Some(entry.id);
        }
        for sc_id in entry.forward_transfer_targets() {
            self.sidechains
                .entry(sc_id)
                .or_default()
                .forward_transfers
                .insert(entry.id);
        }
        if let TxBase::Cert(cert) = &entry.entry {
            self.sidechains.entry(cert.sc_id).or_default().certificate = Some(entry.id);
        }
        for parent in &entry.parents {
            let children = self.children.entry(*parent).or_default();
            if !children.contains(&inserted_id) {
                children.push(inserted_id);
            }
        }
        self.total_bytes = self.total_bytes.saturating_add(entry.size);
        let accepted = entry.entry.clone();
        self.entries.insert(entry.id, entry);
        self.revision = self.revision.saturating_add(1);

        let mut outcome = MempoolInsertOutcome::default();
        if self.max_bytes > 0 && self.total_bytes > self.max_bytes {
            outcome = self.evict_to_fit();
        }

        if self.max_bytes > 0 && !self.entries.contains_key(&inserted_id) {
            return Err(MempoolError::new(
                MempoolErrorKind::MempoolFull,
                "mempool full",
            ));
        }
        if let Some(notifier) = &self.notifier {
            notifier.entry_accepted(&accepted);
        }
        Ok(outcome)
    }

    /// Unlinks one entry from every index. Children stay in the pool with
    /// the parent link dropped.
    fn detach(&mut self, id: &Hash256) -> Option<MempoolEntry> {
        let entry = self.entries.remove(id)?;
        self.total_bytes = self.total_bytes.saturating_sub(entry.size);
        for outpoint in &entry.spent_outpoints {
            if self.spent.get(outpoint) == Some(id) {
                self.spent.remove(outpoint);
            }
        }
        for nullifier in entry.nullifiers() {
            if self.nullifiers.get(&nullifier) == Some(id) {
                self.nullifiers.remove(&nullifier);
            }
        }
        for key in entry.csw_nullifiers() {
            if self.csw_nullifiers.get(&key) == Some(id) {
                self.csw_nullifiers.remove(&key);
            }
        }

        let mut touched: Vec<Hash256> = entry.created_sidechains();
        touched.extend(entry.forward_transfer_targets());
        if let TxBase::Cert(cert) = &entry.entry {
            touched.push(cert.sc_id);
        }
        for sc_id in touched {
            let empty = match self.sidechains.get_mut(&sc_id) {
                Some(sc) => {
                    if sc.creation == Some(*id) {
                        sc.creation = None;
                    }
                    if sc.certificate == Some(*id) {
                        sc.certificate = None;
                    }
                    sc.forward_transfers.remove(id);
                    sc.is_empty()
                }
                None => false,
            };
            if empty {
                self.sidechains.remove(&sc_id);
            }
        }

        for parent in &entry.parents {
            let should_remove_parent = match self.children.get_mut(parent) {
                Some(children) => {
                    children.retain(|child| child != id);
                    children.is_empty()
                }
                None => false,
            };
            if should_remove_parent {
                self.children.remove(parent);
            }
        }
        if let Some(children) = self.children.remove(id) {
            for child in children {
                if let Some(child_entry) = self.entries.get_mut(&child) {
                    child_entry.parents.retain(|parent| parent != id);
                }
            }
        }
        self.revision = self.revision.saturating_add(1);
        Some(entry)
    }

    /// Removes one entry without its descendants.
    pub fn remove(&mut self, id: &Hash256, reason: RemovalReason) -> Option<MempoolEntry> {
        let entry = self.detach(id)?;
        self.notify_removed(&entry.id, reason);
        Some(entry)
    }

    fn notify_removed(&self, id: &Hash256, reason: RemovalReason) {
        log_cat!(
            Category::Mempool,
            "removed {} ({})",
            hash256_to_hex(id),
            reason.as_str()
        );
        if let Some(notifier) = &self.notifier {
            notifier.entry_removed(id, reason);
        }
    }

    /// Entries that can not stay once `id` leaves: spenders of its
    /// outputs and, for sidechain creations, everything that refers to
    /// the sidechain it would have created.
    fn dependants(&self, id: &Hash256) -> Vec<Hash256> {
        let mut out = self.children.get(id).cloned().unwrap_or_default();
        if let Some(entry) = self.entries.get(id) {
            for sc_id in entry.created_sidechains() {
                if let Some(sc) = self.sidechains.get(&sc_id) {
                    out.extend(sc.forward_transfers.iter().copied());
                    out.extend(sc.certificate);
                }
            }
        }
        out
    }

    /// Removes `id` and everything depending on it, deepest dependants first.
    pub fn remove_recursive(&mut self, id: &Hash256, reason: RemovalReason) -> Vec<MempoolEntry> {
        let mut visited: HashSet<Hash256> = HashSet::new();
        let mut order: Vec<Hash256> = Vec::new();

        fn visit(
            mempool: &Mempool,
            id: Hash256,
            visited: &mut HashSet<Hash256>,
            order: &mut Vec<Hash256>,
        ) {
            if !visited.insert(id) {
                return;
            }
            for child in mempool.dependants(&id) {
                visit(mempool, child, visited, order);
            }
            order.push(id);
        }

        visit(self, *id, &mut visited, &mut order);

        let mut removed = Vec::new();
        for id in order {
            if let Some(entry) = self.remove(&id, reason) {
                removed.push(entry);
            }
        }
        removed
    }

    fn evict_to_fit(&mut self) -> MempoolInsertOutcome {
        let max_bytes = self.max_bytes;

        let mut candidates: Vec<EvictCandidate> = self
            .entries
            .values()
            .map(|entry| EvictCandidate {
                id: entry.id,
                fee: entry.modified_fee(),
                size: entry.size.max(1),
                time: entry.time,
            })
            .collect();

        candidates.sort_by(|a, b| {
            let fee_a = i128::from(a.fee);
            let fee_b = i128::from(b.fee);
            let size_a = a.size as i128;
            let size_b = b.size as i128;
            let left = fee_a.saturating_mul(size_b);
            let right = fee_b.saturating_mul(size_a);
            match left.cmp(&right) {
                std::cmp::Ordering::Equal => match a.time.cmp(&b.time) {
                    std::cmp::Ordering::Equal => a.id.cmp(&b.id),
                    other => other,
                },
                other => other,
            }
        });

        let mut outcome = MempoolInsertOutcome::default();
        for candidate in candidates {
            if self.total_bytes <= max_bytes {
                break;
            }
            let removed = self.remove_recursive(&candidate.id, RemovalReason::SizeLimit);
            if removed.is_empty() {
                continue;
            }
            outcome.evicted = outcome.evicted.saturating_add(removed.len() as u64);
            outcome.evicted_bytes = outcome
                .evicted_bytes
                .saturating_add(removed.iter().map(|entry| entry.size as u64).sum::<u64>());
            outcome
                .evicted_ids
                .extend(removed.iter().map(|entry| entry.id));
        }
        outcome
    }

    /// Drops the entries mined in `block` and everything they conflict with.
    pub fn remove_for_block(&mut self, block: &Block) -> Vec<Hash256> {
        let mut removed = Vec::new();
        for tx in block.transactions.iter().filter(|tx| !tx.is_coinbase()) {
            let txid = tx.txid();
            if let Some(entry) = self.remove(&txid, RemovalReason::Block) {
                removed.push(entry.id);
            }
            for input in &tx.vin {
                self.remove_conflicting_spender(&input.prevout, &txid, &mut removed);
            }
            for nullifier in tx.nullifiers() {
                if let Some(conflict) = self.nullifier_spender(nullifier) {
                    self.remove_all(&conflict, RemovalReason::Conflict, &mut removed);
                }
            }
            for csw in &tx.vcsw_ccin {
                if let Some(conflict) = self.csw_nullifier_spender(&csw.sc_id, &csw.nullifier) {
                    self.remove_all(&conflict, RemovalReason::Conflict, &mut removed);
                }
            }
            for index in 0..tx.vsc_ccout.len() {
                let sc_id = tx.sc_id_for_creation(&txid, index);
                let redeclared = self
                    .sidechains
                    .get(&sc_id)
                    .and_then(|sc| sc.creation)
                    .filter(|creation| *creation != txid);
                if let Some(conflict) = redeclared {
                    self.remove_all(&conflict, RemovalReason::Conflict, &mut removed);
                }
            }
            self.prioritisations.remove(&txid);
        }

        for cert in &block.certificates {
            let cert_id = cert.hash();
            if let Some(entry) = self.remove(&cert_id, RemovalReason::Block) {
                removed.push(entry.id);
            }
            for input in &cert.vin {
                self.remove_conflicting_spender(&input.prevout, &cert_id, &mut removed);
            }
            // A confirmed certificate settles the epoch; any other pool
            // certificate for the sidechain has to be revalidated from scratch.
            if let Some(other) = self.sidechains.get(&cert.sc_id).and_then(|sc| sc.certificate) {
                self.remove_all(&other, RemovalReason::Conflict, &mut removed);
            }
            self.prioritisations.remove(&cert_id);
        }

        if !removed.is_empty() {
            log_cat!(
                Category::Mempool,
                "block {} removed {} pool entries",
                hash256_to_hex(&block.hash()),
                removed.len()
            );
        }
        removed
    }

    fn remove_conflicting_spender(
        &mut self,
        outpoint: &OutPoint,
        mined: &Hash256,
        removed: &mut Vec<Hash256>,
    ) {
        if let Some(conflict) = self.spender(outpoint) {
            if conflict != *mined {
                self.remove_all(&conflict, RemovalReason::Conflict, removed);
            }
        }
    }

    fn remove_all(&mut self, id: &Hash256, reason: RemovalReason, removed: &mut Vec<Hash256>) {
        removed.extend(
            self.remove_recursive(id, reason)
                .into_iter()
                .map(|entry| entry.id),
        );
    }

    /// Drops certificates that point at `disconnected` as their end-epoch
    /// block, along with their spenders.
    pub fn remove_out_of_epoch_certificates(&mut self, disconnected: &Hash256) -> Vec<Hash256> {
        let stale: Vec<Hash256> = self
            .entries
            .values()
            .filter_map(|entry| match &entry.entry {
                TxBase::Cert(cert) if cert.end_epoch_block_hash == *disconnected => Some(entry.id),
                _ => None,
            })
            .collect();
        let mut removed = Vec::new();
        for id in stale {
            self.remove_all(&id, RemovalReason::Reorg, &mut removed);
        }
        removed
    }

    /// After the tip moved back, drops entries whose inputs are no longer
    /// spendable at `next_height`: confirmed inputs that vanished or are
    /// immature again, and any spend of certificate change still in the
    /// pool.
    pub fn remove_immature_expenditures(
        &mut self,
        coins: &dyn CoinSource,
        next_height: i32,
    ) -> Result<Vec<Hash256>, StoreError> {
        let mut doomed = Vec::new();
        for entry in self.entries.values() {
            for outpoint in &entry.spent_outpoints {
                if let Some(parent) = self.entries.get(&outpoint.hash) {
                    if parent.is_certificate() {
                        doomed.push(entry.id);
                        break;
                    }
                    continue;
                }
                let spendable = match coins.coins(&outpoint.hash)? {
                    Some(record) => {
                        record.output_maturity(outpoint.index, next_height)
                            == OutputMaturity::Mature
                    }
                    None => false,
                };
                if !spendable {
                    doomed.push(entry.id);
                    break;
                }
            }
        }
        let mut removed = Vec::new();
        for id in doomed {
            self.remove_all(&id, RemovalReason::Reorg, &mut removed);
        }
        Ok(removed)
    }

    /// Drops joinsplits whose anchor is no longer a known note tree root.
    pub fn remove_with_unknown_anchor(
        &mut self,
        coins: &dyn CoinSource,
    ) -> Result<Vec<Hash256>, StoreError> {
        let best = coins.best_anchor()?;
        let mut doomed = Vec::new();
        for entry in self.entries.values() {
            let TxBase::Tx(tx) = &entry.entry else {
                continue;
            };
            for js in &tx.join_splits {
                let known = js.anchor == best
                    || js.anchor == empty_root()
                    || coins.anchor(&js.anchor)?.is_some();
                if !known {
                    doomed.push(entry.id);
                    break;
                }
            }
        }
        let mut removed = Vec::new();
        for id in doomed {
            self.remove_all(&id, RemovalReason::Reorg, &mut removed);
        }
        Ok(removed)
    }

    /// Drops forward transfers to sidechains that ceased and certificates
    /// whose submission window closed before `next_height`.
    pub fn remove_stale_sidechain_entries(
        &mut self,
        coins: &dyn CoinSource,
        next_height: i32,
    ) -> Result<Vec<Hash256>, StoreError> {
        let mut doomed = Vec::new();
        for (sc_id, pooled) in &self.sidechains {
            let Some(record) = coins.sidechain(sc_id)? else {
                continue;
            };
            if record.state_at(next_height) == ScState::Ceased {
                doomed.extend(pooled.forward_transfers.iter().copied());
                doomed.extend(pooled.certificate);
                continue;
            }
            if let Some(cert_id) = pooled.certificate {
                let closed = self
                    .entries
                    .get(&cert_id)
                    .and_then(|entry| entry.entry.as_cert())
                    .is_some_and(|cert| next_height > record.cert_window_end(cert.epoch_number));
                if closed {
                    doomed.push(cert_id);
                }
            }
        }
        let mut removed = Vec::new();
        for id in doomed {
            self.remove_all(&id, RemovalReason::Conflict, &mut removed);
        }
        Ok(removed)
    }

    pub fn is_pending(&self, id: &Hash256) -> bool {
        self.pending.contains_key(id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn add_pending(&mut self, id: Hash256, pending: PendingEntry) {
        self.pending.insert(id, pending);
    }

    pub fn take_pending(&mut self, id: &Hash256) -> Option<PendingEntry> {
        self.pending.remove(id)
    }

    pub fn orphan_count(&self) -> usize {
        self.orphans.len()
    }

    pub fn orphan_bytes(&self) -> usize {
        self.orphan_bytes
    }

    pub fn has_orphan(&self, id: &Hash256) -> bool {
        self.orphans.contains_key(id)
    }

    /// Keeps an entry whose inputs are unknown until a parent arrives.
    /// Returns whether it was stored; oversized entries and joinsplits are
    /// never kept.
    pub fn store_orphan(
        &mut self,
        entry: TxBase,
        missing_inputs: &[OutPoint],
        limit_free: bool,
        now: u64,
    ) -> bool {
        let size = entry.serialized_size();
        if size > MAX_ORPHAN_TX_SIZE {
            log_cat!(
                Category::Mempool,
                "ignoring large orphan {} ({} bytes)",
                hash256_to_hex(&entry.id()),
                size
            );
            return false;
        }
        if entry.as_tx().is_some_and(|tx| !tx.join_splits.is_empty()) {
            return false;
        }
        let missing_parents = orphan_parent_ids(missing_inputs);
        if missing_parents.is_empty() {
            return false;
        }
        self.insert_orphan(
            OrphanEntry {
                id: entry.id(),
                entry,
                size,
                received: now,
                missing_parents,
                limit_free,
            },
            now,
        );
        true
    }

    pub fn take_orphans_for_parent(&mut self, parent: &Hash256) -> Vec<OrphanRetry> {
        let Some(ids) = self.orphans_by_parent.remove(parent) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for id in ids {
            if let Some(orphan) = self.remove_orphan(&id) {
                out.push(OrphanRetry {
                    id: orphan.id,
                    entry: orphan.entry,
                    limit_free: orphan.limit_free,
                });
            }
        }
        out
    }

    fn insert_orphan(&mut self, orphan: OrphanEntry, now: u64) {
        self.prune_orphans(now);

        if self.orphans.contains_key(&orphan.id) {
            self.remove_orphan(&orphan.id);
        }

        while self.orphans.len() >= DEFAULT_MAX_ORPHANS
            || self.orphan_bytes.saturating_add(orphan.size) > DEFAULT_MAX_ORPHAN_BYTES
        {
            if !self.evict_oldest_orphan() {
                break;
            }
        }

        self.orphan_bytes = self.orphan_bytes.saturating_add(orphan.size);
        for parent in &orphan.missing_parents {
            let children = self.orphans_by_parent.entry(*parent).or_default();
            if !children.contains(&orphan.id) {
                children.push(orphan.id);
            }
        }
        self.orphans.insert(orphan.id, orphan);
    }

    fn evict_oldest_orphan(&mut self) -> bool {
        let Some(oldest) = self
            .orphans
            .values()
            .min_by_key(|orphan| (orphan.received, orphan.id))
            .map(|orphan| orphan.id)
        else {
            return false;
        };
        self.remove_orphan(&oldest);
        true
    }

    fn prune_orphans(&mut self, now: u64) {
        let cutoff = now.saturating_sub(DEFAULT_ORPHAN_TTL_SECS);
        let stale: Vec<Hash256> = self
            .orphans
            .values()
            .filter(|orphan| orphan.received < cutoff)
            .map(|orphan| orphan.id)
            .collect();
        for id in stale {
            self.remove_orphan(&id);
        }
    }

    fn remove_orphan(&mut self, id: &Hash256) -> Option<OrphanEntry> {
        let orphan = self.orphans.remove(id)?;
        self.orphan_bytes = self.orphan_bytes.saturating_sub(orphan.size);

        let mut empty_parents = Vec::new();
        for parent in &orphan.missing_parents {
            if let Some(children) = self.orphans_by_parent.get_mut(parent) {
                children.retain(|child| child != id);
                if children.is_empty() {
                    empty_parents.push(*parent);
                }
            }
        }
        for parent in empty_parents {
            self.orphans_by_parent.remove(&parent);
        }
        Some(orphan)
    }

    /// Breadth-first queue of orphans unlocked by `accepted`, for callers
    /// that retry them one at a time.
    pub fn orphan_queue(&mut self, accepted: Hash256) -> VecDeque<OrphanRetry> {
        self.take_orphans_for_parent(&accepted).into()
    }
}

#[derive(Clone, Debug)]
struct EvictCandidate {
    id: Hash256,
    fee: i64,
    size: usize,
    time: u64,
}

fn orphan_parent_ids(missing_inputs: &[OutPoint]) -> Vec<Hash256> {
    let parents: BTreeSet<Hash256> = missing_inputs
        .iter()
        .filter(|outpoint| !outpoint.is_null())
        .map(|outpoint| outpoint.hash)
        .collect();
    parents.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use zend_consensus::constants::SC_CERT_VERSION;
    use zend_primitives::transaction::SEQUENCE_FINAL;
    use zend_primitives::{ScCertificate, Transaction, TxIn, TxOut};

    fn dummy_tx(vin: Vec<OutPoint>, values: &[i64]) -> Transaction {
        Transaction {
            version: 1,
            vin: vin
                .into_iter()
                .map(|prevout| TxIn {
                    prevout,
                    script_sig: Vec::new(),
                    sequence: SEQUENCE_FINAL,
                })
                .collect(),
            vout: values
                .iter()
                .map(|value| TxOut {
                    value: *value,
                    script_pubkey: vec![0x51],
                })
                .collect(),
            vcsw_ccin: Vec::new(),
            vsc_ccout: Vec::new(),
            vft_ccout: Vec::new(),
            lock_time: 0,
            join_splits: Vec::new(),
        }
    }

    fn entry(base: TxBase, fee: i64, parents: Vec<Hash256>) -> MempoolEntry {
        let spent_outpoints = base.inputs().iter().map(|input| input.prevout.clone()).collect();
        MempoolEntry {
            id: base.id(),
            size: base.serialized_size(),
            entry: base,
            time: 0,
            height: 0,
            fee,
            value_in: 0,
            modified_size: 0,
            priority: 0.0,
            fee_delta: 0,
            priority_delta: 0.0,
            spent_outpoints,
            parents,
        }
    }

    fn parent_and_child() -> (Transaction, Transaction) {
        let parent = dummy_tx(vec![OutPoint::new([9u8; 32], 0)], &[50]);
        let child = dummy_tx(vec![OutPoint::new(parent.txid(), 0)], &[25]);
        (parent, child)
    }

    #[test]
    fn remove_mined_parent_detaches_children() {
        let (parent, child) = parent_and_child();
        let parent_id = parent.txid();
        let child_id = child.txid();

        let mut mempool = Mempool::new(0);
        mempool
            .insert(entry(parent.into(), 0, Vec::new()))
            .expect("insert parent");
        mempool
            .insert(entry(child.into(), 0, vec![parent_id]))
            .expect("insert child");

        assert!(mempool
            .children
            .get(&parent_id)
            .is_some_and(|children| children.contains(&child_id)));

        let removed = mempool
            .remove(&parent_id, RemovalReason::Block)
            .expect("remove parent");
        assert_eq!(removed.id, parent_id);

        let child = mempool.entries.get(&child_id).expect("child remains");
        assert!(child.parents.is_empty());
        assert!(mempool.children.get(&parent_id).is_none());
    }

    #[test]
    fn remove_recursive_removes_entire_subtree() {
        let (parent, child) = parent_and_child();
        let parent_id = parent.txid();
        let child_id = child.txid();

        let mut mempool = Mempool::new(0);
        mempool
            .insert(entry(parent.into(), 0, Vec::new()))
            .expect("insert parent");
        mempool
            .insert(entry(child.into(), 0, vec![parent_id]))
            .expect("insert child");

        let removed = mempool.remove_recursive(&parent_id, RemovalReason::Conflict);
        let removed_ids: Vec<Hash256> = removed.into_iter().map(|entry| entry.id).collect();
        assert_eq!(removed_ids, vec![child_id, parent_id]);
        assert!(mempool.entries.is_empty());
        assert!(mempool.children.is_empty());
        assert!(mempool.spent.is_empty());
    }

    #[test]
    fn double_spend_is_refused_by_the_index() {
        let first = dummy_tx(vec![OutPoint::new([9u8; 32], 0)], &[50]);
        let second = dummy_tx(vec![OutPoint::new([9u8; 32], 0)], &[40]);
        let mut mempool = Mempool::new(0);
        mempool
            .insert(entry(first.into(), 0, Vec::new()))
            .expect("insert");
        let err = mempool
            .insert(entry(second.into(), 0, Vec::new()))
            .expect_err("conflict");
        assert_eq!(err.kind, MempoolErrorKind::ConflictingInput);
    }

    #[test]
    fn one_certificate_per_sidechain() {
        let cert = |quality| ScCertificate {
            version: SC_CERT_VERSION,
            sc_id: [7u8; 32],
            epoch_number: 0,
            quality,
            end_epoch_block_hash: [1u8; 32],
            sc_proof: Vec::new(),
            vin: Vec::new(),
            vout: Vec::new(),
            backward_transfers: Vec::new(),
        };
        let mut mempool = Mempool::new(0);
        mempool
            .insert(entry(cert(1).into(), 0, Vec::new()))
            .expect("first");
        let err = mempool
            .insert(entry(cert(2).into(), 0, Vec::new()))
            .expect_err("second");
        assert_eq!(err.kind, MempoolErrorKind::ConflictingInput);
        assert_eq!(
            mempool.certificate_for(&[7u8; 32]).map(|entry| entry.id),
            Some(cert(1).hash())
        );

        let removed = mempool.remove_out_of_epoch_certificates(&[1u8; 32]);
        assert_eq!(removed, vec![cert(1).hash()]);
        assert!(mempool.sidechain(&[7u8; 32]).is_none());
    }

    #[test]
    fn eviction_drops_lowest_fee_rate_first() {
        let cheap = dummy_tx(vec![OutPoint::new([1u8; 32], 0)], &[50]);
        let rich = dummy_tx(vec![OutPoint::new([2u8; 32], 0)], &[50]);
        let size = cheap.serialized_size();
        let mut mempool = Mempool::new(size * 2);
        mempool
            .insert(entry(cheap.clone().into(), 10, Vec::new()))
            .expect("cheap");
        mempool
            .insert(entry(rich.clone().into(), 10_000, Vec::new()))
            .expect("rich");

        let third = dummy_tx(vec![OutPoint::new([3u8; 32], 0)], &[50]);
        let outcome = mempool
            .insert(entry(third.clone().into(), 5_000, Vec::new()))
            .expect("third");
        assert_eq!(outcome.evicted_ids, vec![cheap.txid()]);
        assert!(mempool.contains(&rich.txid()));
        assert!(mempool.contains(&third.txid()));
        assert!(mempool.bytes() <= mempool.max_bytes());
    }

    #[test]
    fn orphans_are_bounded_and_released_by_parent() {
        let (parent, child) = parent_and_child();
        let mut mempool = Mempool::new(0);
        let missing = [OutPoint::new(parent.txid(), 0)];
        assert!(mempool.store_orphan(child.clone().into(), &missing, true, 1_000));
        assert!(mempool.has_orphan(&child.txid()));

        let mut large = dummy_tx(vec![OutPoint::new(parent.txid(), 1)], &[1]);
        large.vout[0].script_pubkey = vec![0x51; MAX_ORPHAN_TX_SIZE];
        assert!(!mempool.store_orphan(large.into(), &missing, true, 1_000));

        let released = mempool.take_orphans_for_parent(&parent.txid());
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].id, child.txid());
        assert_eq!(mempool.orphan_count(), 0);
        assert_eq!(mempool.orphan_bytes(), 0);
    }

    #[test]
    fn stale_orphans_expire() {
        let (parent, child) = parent_and_child();
        let mut mempool = Mempool::new(0);
        let missing = [OutPoint::new(parent.txid(), 0)];
        mempool.store_orphan(child.into(), &missing, true, 10);

        let other = dummy_tx(vec![OutPoint::new([5u8; 32], 0)], &[5]);
        mempool.store_orphan(
            other.clone().into(),
            &[OutPoint::new([5u8; 32], 0)],
            true,
            10 + DEFAULT_ORPHAN_TTL_SECS + 1,
        );
        assert_eq!(mempool.orphan_count(), 1);
        assert!(mempool.has_orphan(&other.txid()));
    }

    #[test]
    fn free_relay_budget_decays() {
        let mut limiter = FreeRelayLimiter::default();
        // 1 kB/min allows 10_000 bytes over the ten minute window.
        assert!(limiter.admit(1, 9_000, 100));
        assert!(limiter.admit(1, 2_000, 100));
        assert!(!limiter.admit(1, 10, 100));
        assert!(limiter.admit(1, 10, 100 + 600));
    }
}
