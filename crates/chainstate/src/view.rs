//! Layered copy-on-write view over the persisted ledger.
//!
//! [`CoinsDb`] reads the store directly. A [`CoinView`] caches reads from
//! any [`CoinSource`] and records writes as dirty entries; nothing reaches
//! the base until the view is flushed, so a failed connect simply drops its
//! view. Views stack: the mempool validates against a view whose base is a
//! pool overlay sitting on the tip view.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use zend_consensus::Hash256;
use zend_primitives::encoding::DecodeError;
use zend_storage::{Column, KeyValueStore, StoreError, WriteBatch};

use crate::coins::CoinRecord;
use crate::sidechain::{events_key, ScEvents, SidechainRecord};
use crate::tree::{empty_root, empty_tree, tree_from_bytes, tree_to_bytes, NoteTree};

const META_BEST_BLOCK: &[u8] = b"best_block";
const META_BEST_ANCHOR: &[u8] = b"best_anchor";

/// Read side of the ledger.
pub trait CoinSource {
    fn coins(&self, txid: &Hash256) -> Result<Option<CoinRecord>, StoreError>;
    fn sidechain(&self, sc_id: &Hash256) -> Result<Option<SidechainRecord>, StoreError>;
    fn sc_events(&self, height: i32) -> Result<Option<ScEvents>, StoreError>;
    fn nullifier_spent(&self, nullifier: &Hash256) -> Result<bool, StoreError>;
    fn csw_nullifier_spent(&self, sc_id: &Hash256, nullifier: &Hash256)
        -> Result<bool, StoreError>;
    fn anchor(&self, root: &Hash256) -> Result<Option<NoteTree>, StoreError>;
    fn best_anchor(&self) -> Result<Hash256, StoreError>;
    fn best_block(&self) -> Result<Option<Hash256>, StoreError>;
    fn commitment_height(&self, root: &Hash256) -> Result<Option<i32>, StoreError>;
}

pub struct CoinsDb<S> {
    store: S,
}

impl<S: KeyValueStore> CoinsDb<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

fn corrupt(what: &'static str) -> impl Fn(DecodeError) -> StoreError {
    move |_| StoreError::Corrupt(what)
}

fn hash_from_bytes(bytes: &[u8]) -> Result<Hash256, StoreError> {
    bytes
        .try_into()
        .map_err(|_| StoreError::Corrupt("hash length"))
}

fn csw_key(sc_id: &Hash256, nullifier: &Hash256) -> [u8; 64] {
    let mut key = [0u8; 64];
    key[..32].copy_from_slice(sc_id);
    key[32..].copy_from_slice(nullifier);
    key
}

impl<S: KeyValueStore> CoinSource for CoinsDb<S> {
    fn coins(&self, txid: &Hash256) -> Result<Option<CoinRecord>, StoreError> {
        match self.store.get(Column::Coins, txid)? {
            Some(bytes) => CoinRecord::decode(&bytes)
                .map(Some)
                .map_err(corrupt("coin record")),
            None => Ok(None),
        }
    }

    fn sidechain(&self, sc_id: &Hash256) -> Result<Option<SidechainRecord>, StoreError> {
        match self.store.get(Column::Sidechains, sc_id)? {
            Some(bytes) => SidechainRecord::decode(&bytes)
                .map(Some)
                .map_err(corrupt("sidechain record")),
            None => Ok(None),
        }
    }

    fn sc_events(&self, height: i32) -> Result<Option<ScEvents>, StoreError> {
        match self.store.get(Column::ScEvents, &events_key(height))? {
            Some(bytes) => ScEvents::decode(&bytes)
                .map(Some)
                .map_err(corrupt("sidechain events")),
            None => Ok(None),
        }
    }

    fn nullifier_spent(&self, nullifier: &Hash256) -> Result<bool, StoreError> {
        self.store.contains(Column::Nullifiers, nullifier)
    }

    fn csw_nullifier_spent(
        &self,
        sc_id: &Hash256,
        nullifier: &Hash256,
    ) -> Result<bool, StoreError> {
        self.store
            .contains(Column::CswNullifiers, &csw_key(sc_id, nullifier))
    }

    fn anchor(&self, root: &Hash256) -> Result<Option<NoteTree>, StoreError> {
        if *root == empty_root() {
            return Ok(Some(empty_tree()));
        }
        match self.store.get(Column::Anchors, root)? {
            Some(bytes) => tree_from_bytes(&bytes)
                .map(Some)
                .map_err(|_| StoreError::Corrupt("anchor tree")),
            None => Ok(None),
        }
    }

    fn best_anchor(&self) -> Result<Hash256, StoreError> {
        match self.store.get(Column::Meta, META_BEST_ANCHOR)? {
            Some(bytes) => hash_from_bytes(&bytes),
            None => Ok(empty_root()),
        }
    }

    fn best_block(&self) -> Result<Option<Hash256>, StoreError> {
        self.store
            .get(Column::Meta, META_BEST_BLOCK)?
            .map(|bytes| hash_from_bytes(&bytes))
            .transpose()
    }

    fn commitment_height(&self, root: &Hash256) -> Result<Option<i32>, StoreError> {
        match self.store.get(Column::ScCommitmentHeight, root)? {
            Some(bytes) => {
                let raw: [u8; 4] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| StoreError::Corrupt("commitment height"))?;
                Ok(Some(i32::from_le_bytes(raw)))
            }
            None => Ok(None),
        }
    }
}

/// Cached value plus whether the base still needs to learn about it.
/// `value == None` with `dirty` set is an erase.
#[derive(Clone, Debug)]
struct Cached<T> {
    value: Option<T>,
    dirty: bool,
    /// The base has no entry, so erasing needs no write at all.
    fresh: bool,
}

impl<T> Cached<T> {
    fn clean(value: Option<T>) -> Self {
        let fresh = value.is_none();
        Self {
            value,
            dirty: false,
            fresh,
        }
    }
}

/// Everything a view changed, ready to be written to the store or merged
/// into a parent view.
#[derive(Debug, Default)]
pub struct CoinChanges {
    pub coins: Vec<(Hash256, Option<CoinRecord>)>,
    pub sidechains: Vec<(Hash256, Option<SidechainRecord>)>,
    pub events: Vec<(i32, Option<ScEvents>)>,
    pub nullifiers: Vec<(Hash256, bool)>,
    pub csw_nullifiers: Vec<((Hash256, Hash256), bool)>,
    pub anchors: Vec<(Hash256, Option<NoteTree>)>,
    pub commitment_heights: Vec<(Hash256, Option<i32>)>,
    pub best_anchor: Option<Hash256>,
    pub best_block: Option<Hash256>,
}

impl CoinChanges {
    pub fn is_empty(&self) -> bool {
        self.coins.is_empty()
            && self.sidechains.is_empty()
            && self.events.is_empty()
            && self.nullifiers.is_empty()
            && self.csw_nullifiers.is_empty()
            && self.anchors.is_empty()
            && self.commitment_heights.is_empty()
            && self.best_anchor.is_none()
            && self.best_block.is_none()
    }

    /// Appends the store operations; the caller commits `batch` in one write.
    pub fn write_to(&self, batch: &mut WriteBatch) -> Result<(), StoreError> {
        for (txid, record) in &self.coins {
            match record {
                Some(record) if !record.is_pruned() => {
                    batch.put(Column::Coins, txid, record.encode())
                }
                _ => batch.delete(Column::Coins, txid),
            }
        }
        for (sc_id, record) in &self.sidechains {
            match record {
                Some(record) => batch.put(Column::Sidechains, sc_id, record.encode()),
                None => batch.delete(Column::Sidechains, sc_id),
            }
        }
        for (height, events) in &self.events {
            let key = events_key(*height);
            match events {
                Some(events) if !events.is_empty() => {
                    batch.put(Column::ScEvents, key, events.encode())
                }
                _ => batch.delete(Column::ScEvents, key),
            }
        }
        for (nullifier, spent) in &self.nullifiers {
            if *spent {
                batch.put(Column::Nullifiers, nullifier, Vec::new());
            } else {
                batch.delete(Column::Nullifiers, nullifier);
            }
        }
        for ((sc_id, nullifier), spent) in &self.csw_nullifiers {
            let key = csw_key(sc_id, nullifier);
            if *spent {
                batch.put(Column::CswNullifiers, key, Vec::new());
            } else {
                batch.delete(Column::CswNullifiers, key);
            }
        }
        for (root, tree) in &self.anchors {
            match tree {
                Some(tree) => {
                    let bytes = tree_to_bytes(tree)
                        .map_err(|err| StoreError::Backend(err.to_string()))?;
                    batch.put(Column::Anchors, root, bytes);
                }
                None => batch.delete(Column::Anchors, root),
            }
        }
        for (root, height) in &self.commitment_heights {
            match height {
                Some(height) => batch.put(Column::ScCommitmentHeight, root, height.to_le_bytes()),
                None => batch.delete(Column::ScCommitmentHeight, root),
            }
        }
        if let Some(anchor) = &self.best_anchor {
            batch.put(Column::Meta, META_BEST_ANCHOR, *anchor);
        }
        if let Some(hash) = &self.best_block {
            batch.put(Column::Meta, META_BEST_BLOCK, *hash);
        }
        Ok(())
    }
}

pub struct CoinView<'a> {
    base: &'a dyn CoinSource,
    coins: HashMap<Hash256, Cached<CoinRecord>>,
    sidechains: HashMap<Hash256, Cached<SidechainRecord>>,
    events: HashMap<i32, Cached<ScEvents>>,
    nullifiers: HashMap<Hash256, Cached<()>>,
    csw_nullifiers: HashMap<(Hash256, Hash256), Cached<()>>,
    anchors: HashMap<Hash256, Cached<NoteTree>>,
    commitment_heights: HashMap<Hash256, Cached<i32>>,
    best_anchor: Option<Hash256>,
    best_block: Option<Hash256>,
}

macro_rules! fetch {
    ($map:expr, $key:expr, $load:expr) => {{
        match $map.entry($key) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(Cached::clean($load)),
        }
    }};
}

impl<'a> CoinView<'a> {
    pub fn new(base: &'a dyn CoinSource) -> Self {
        Self {
            base,
            coins: HashMap::new(),
            sidechains: HashMap::new(),
            events: HashMap::new(),
            nullifiers: HashMap::new(),
            csw_nullifiers: HashMap::new(),
            anchors: HashMap::new(),
            commitment_heights: HashMap::new(),
            best_anchor: None,
            best_block: None,
        }
    }

    /// True when `txid` has at least one unspent output.
    pub fn have_coins(&mut self, txid: &Hash256) -> Result<bool, StoreError> {
        Ok(self
            .access_coins(txid)?
            .is_some_and(|record| !record.is_pruned()))
    }

    pub fn access_coins(&mut self, txid: &Hash256) -> Result<Option<&CoinRecord>, StoreError> {
        let base = self.base;
        let cached = fetch!(self.coins, *txid, base.coins(txid)?);
        Ok(cached.value.as_ref())
    }

    /// Mutable record for `txid`, created from `init` if absent or pruned.
    pub fn modify_coins(
        &mut self,
        txid: &Hash256,
        init: impl FnOnce() -> CoinRecord,
    ) -> Result<&mut CoinRecord, StoreError> {
        let base = self.base;
        let cached = fetch!(self.coins, *txid, base.coins(txid)?);
        cached.dirty = true;
        let needs_init = cached.value.as_ref().map_or(true, CoinRecord::is_pruned);
        if needs_init {
            cached.value = Some(init());
        }
        match cached.value.as_mut() {
            Some(record) => Ok(record),
            None => Err(StoreError::Corrupt("coin record vanished")),
        }
    }

    /// Marks one output spent, returning it together with its record's
    /// metadata, or `None` if it was not available.
    pub fn spend_coin(
        &mut self,
        txid: &Hash256,
        pos: u32,
    ) -> Result<Option<(crate::coins::CoinMeta, zend_primitives::TxOut)>, StoreError> {
        let base = self.base;
        let cached = fetch!(self.coins, *txid, base.coins(txid)?);
        let Some(record) = cached.value.as_mut() else {
            return Ok(None);
        };
        let meta = record.meta;
        let Some(out) = record.spend(pos) else {
            return Ok(None);
        };
        cached.dirty = true;
        Ok(Some((meta, out)))
    }

    pub fn erase_coins(&mut self, txid: &Hash256) -> Result<(), StoreError> {
        let base = self.base;
        let cached = fetch!(self.coins, *txid, base.coins(txid)?);
        cached.value = None;
        cached.dirty = true;
        Ok(())
    }

    pub fn set_best_block(&mut self, hash: Hash256) {
        self.best_block = Some(hash);
    }

    pub fn sidechain(&mut self, sc_id: &Hash256) -> Result<Option<&SidechainRecord>, StoreError> {
        let base = self.base;
        let cached = fetch!(self.sidechains, *sc_id, base.sidechain(sc_id)?);
        Ok(cached.value.as_ref())
    }

    pub fn have_sidechain(&mut self, sc_id: &Hash256) -> Result<bool, StoreError> {
        Ok(self.sidechain(sc_id)?.is_some())
    }

    /// Replaces (or erases, with `None`) the record for `sc_id`.
    pub fn update_sidechain(
        &mut self,
        sc_id: &Hash256,
        record: Option<SidechainRecord>,
    ) -> Result<(), StoreError> {
        let base = self.base;
        let cached = fetch!(self.sidechains, *sc_id, base.sidechain(sc_id)?);
        cached.value = record;
        cached.dirty = true;
        Ok(())
    }

    pub fn sc_events(&mut self, height: i32) -> Result<ScEvents, StoreError> {
        let base = self.base;
        let cached = fetch!(self.events, height, base.sc_events(height)?);
        Ok(cached.value.clone().unwrap_or_default())
    }

    pub fn set_sc_events(&mut self, height: i32, events: ScEvents) -> Result<(), StoreError> {
        let base = self.base;
        let cached = fetch!(self.events, height, base.sc_events(height)?);
        cached.value = (!events.is_empty()).then_some(events);
        cached.dirty = true;
        Ok(())
    }

    pub fn nullifier_spent(&mut self, nullifier: &Hash256) -> Result<bool, StoreError> {
        let base = self.base;
        let cached = fetch!(
            self.nullifiers,
            *nullifier,
            base.nullifier_spent(nullifier)?.then_some(())
        );
        Ok(cached.value.is_some())
    }

    pub fn set_nullifier(&mut self, nullifier: &Hash256, spent: bool) -> Result<(), StoreError> {
        let base = self.base;
        let cached = fetch!(
            self.nullifiers,
            *nullifier,
            base.nullifier_spent(nullifier)?.then_some(())
        );
        cached.value = spent.then_some(());
        cached.dirty = true;
        Ok(())
    }

    pub fn csw_nullifier_spent(
        &mut self,
        sc_id: &Hash256,
        nullifier: &Hash256,
    ) -> Result<bool, StoreError> {
        let base = self.base;
        let cached = fetch!(
            self.csw_nullifiers,
            (*sc_id, *nullifier),
            base.csw_nullifier_spent(sc_id, nullifier)?.then_some(())
        );
        Ok(cached.value.is_some())
    }

    pub fn set_csw_nullifier(
        &mut self,
        sc_id: &Hash256,
        nullifier: &Hash256,
        spent: bool,
    ) -> Result<(), StoreError> {
        let base = self.base;
        let cached = fetch!(
            self.csw_nullifiers,
            (*sc_id, *nullifier),
            base.csw_nullifier_spent(sc_id, nullifier)?.then_some(())
        );
        cached.value = spent.then_some(());
        cached.dirty = true;
        Ok(())
    }

    pub fn best_anchor(&mut self) -> Result<Hash256, StoreError> {
        match self.best_anchor {
            Some(anchor) => Ok(anchor),
            None => {
                let anchor = self.base.best_anchor()?;
                self.best_anchor = Some(anchor);
                Ok(anchor)
            }
        }
    }

    pub fn anchor(&mut self, root: &Hash256) -> Result<Option<NoteTree>, StoreError> {
        let base = self.base;
        let cached = fetch!(self.anchors, *root, base.anchor(root)?);
        Ok(cached.value.clone())
    }

    /// Records `tree` under its root and makes it the current anchor.
    pub fn push_anchor(&mut self, tree: NoteTree) -> Result<(), StoreError> {
        let root = crate::tree::tree_root(&tree);
        if self.best_anchor()? == root {
            return Ok(());
        }
        if root != empty_root() {
            let base = self.base;
            let cached = fetch!(self.anchors, root, base.anchor(&root)?);
            cached.value = Some(tree);
            cached.dirty = true;
        }
        self.best_anchor = Some(root);
        Ok(())
    }

    /// Drops the current anchor and falls back to `previous`.
    pub fn pop_anchor(&mut self, previous: Hash256) -> Result<(), StoreError> {
        let current = self.best_anchor()?;
        if current == previous {
            return Ok(());
        }
        if current != empty_root() {
            let base = self.base;
            let cached = fetch!(self.anchors, current, base.anchor(&current)?);
            cached.value = None;
            cached.dirty = true;
        }
        self.best_anchor = Some(previous);
        Ok(())
    }

    pub fn commitment_height(&mut self, root: &Hash256) -> Result<Option<i32>, StoreError> {
        let base = self.base;
        let cached = fetch!(self.commitment_heights, *root, base.commitment_height(root)?);
        Ok(cached.value)
    }

    pub fn set_commitment_height(
        &mut self,
        root: &Hash256,
        height: Option<i32>,
    ) -> Result<(), StoreError> {
        let base = self.base;
        let cached = fetch!(self.commitment_heights, *root, base.commitment_height(root)?);
        cached.value = height;
        cached.dirty = true;
        Ok(())
    }

    /// Consumes the view, returning only the dirty entries. Entries created
    /// and erased inside this view never reach the base.
    pub fn into_changes(self) -> CoinChanges {
        fn drain<K, T>(map: HashMap<K, Cached<T>>) -> Vec<(K, Option<T>)> {
            map.into_iter()
                .filter(|(_, cached)| cached.dirty && !(cached.fresh && cached.value.is_none()))
                .map(|(key, cached)| (key, cached.value))
                .collect()
        }

        let coins = self
            .coins
            .into_iter()
            .filter(|(_, cached)| cached.dirty)
            .map(|(txid, cached)| {
                let value = cached.value.filter(|record| !record.is_pruned());
                (txid, value, cached.fresh)
            })
            .filter(|(_, value, fresh)| !(*fresh && value.is_none()))
            .map(|(txid, value, _)| (txid, value))
            .collect();

        CoinChanges {
            coins,
            sidechains: drain(self.sidechains),
            events: drain(self.events),
            nullifiers: drain(self.nullifiers)
                .into_iter()
                .map(|(key, value)| (key, value.is_some()))
                .collect(),
            csw_nullifiers: drain(self.csw_nullifiers)
                .into_iter()
                .map(|(key, value)| (key, value.is_some()))
                .collect(),
            anchors: drain(self.anchors),
            commitment_heights: drain(self.commitment_heights),
            best_anchor: self.best_anchor,
            best_block: self.best_block,
        }
    }

    /// Merges a child view's changes as dirty entries of this view.
    pub fn apply_changes(&mut self, changes: CoinChanges) -> Result<(), StoreError> {
        for (txid, record) in changes.coins {
            let base = self.base;
            let cached = fetch!(self.coins, txid, base.coins(&txid)?);
            cached.value = record;
            cached.dirty = true;
        }
        for (sc_id, record) in changes.sidechains {
            self.update_sidechain(&sc_id, record)?;
        }
        for (height, events) in changes.events {
            self.set_sc_events(height, events.unwrap_or_default())?;
        }
        for (nullifier, spent) in changes.nullifiers {
            self.set_nullifier(&nullifier, spent)?;
        }
        for ((sc_id, nullifier), spent) in changes.csw_nullifiers {
            self.set_csw_nullifier(&sc_id, &nullifier, spent)?;
        }
        for (root, tree) in changes.anchors {
            let base = self.base;
            let cached = fetch!(self.anchors, root, base.anchor(&root)?);
            cached.value = tree;
            cached.dirty = true;
        }
        for (root, height) in changes.commitment_heights {
            self.set_commitment_height(&root, height)?;
        }
        if let Some(anchor) = changes.best_anchor {
            self.best_anchor = Some(anchor);
        }
        if let Some(hash) = changes.best_block {
            self.best_block = Some(hash);
        }
        Ok(())
    }
}

impl CoinSource for CoinView<'_> {
    fn coins(&self, txid: &Hash256) -> Result<Option<CoinRecord>, StoreError> {
        match self.coins.get(txid) {
            Some(cached) => Ok(cached.value.clone()),
            None => self.base.coins(txid),
        }
    }

    fn sidechain(&self, sc_id: &Hash256) -> Result<Option<SidechainRecord>, StoreError> {
        match self.sidechains.get(sc_id) {
            Some(cached) => Ok(cached.value.clone()),
            None => self.base.sidechain(sc_id),
        }
    }

    fn sc_events(&self, height: i32) -> Result<Option<ScEvents>, StoreError> {
        match self.events.get(&height) {
            Some(cached) => Ok(cached.value.clone()),
            None => self.base.sc_events(height),
        }
    }

    fn nullifier_spent(&self, nullifier: &Hash256) -> Result<bool, StoreError> {
        match self.nullifiers.get(nullifier) {
            Some(cached) => Ok(cached.value.is_some()),
            None => self.base.nullifier_spent(nullifier),
        }
    }

    fn csw_nullifier_spent(
        &self,
        sc_id: &Hash256,
        nullifier: &Hash256,
    ) -> Result<bool, StoreError> {
        match self.csw_nullifiers.get(&(*sc_id, *nullifier)) {
            Some(cached) => Ok(cached.value.is_some()),
            None => self.base.csw_nullifier_spent(sc_id, nullifier),
        }
    }

    fn anchor(&self, root: &Hash256) -> Result<Option<NoteTree>, StoreError> {
        match self.anchors.get(root) {
            Some(cached) => Ok(cached.value.clone()),
            None => self.base.anchor(root),
        }
    }

    fn best_anchor(&self) -> Result<Hash256, StoreError> {
        match self.best_anchor {
            Some(anchor) => Ok(anchor),
            None => self.base.best_anchor(),
        }
    }

    fn best_block(&self) -> Result<Option<Hash256>, StoreError> {
        match self.best_block {
            Some(hash) => Ok(Some(hash)),
            None => self.base.best_block(),
        }
    }

    fn commitment_height(&self, root: &Hash256) -> Result<Option<i32>, StoreError> {
        match self.commitment_heights.get(root) {
            Some(cached) => Ok(cached.value),
            None => self.base.commitment_height(root),
        }
    }
}
