//! In-memory block index tree and fork-choice candidates.
//!
//! Nodes live in an arena addressed by [`NodeId`]; parent and skip links
//! are ids, so the tree has no ownership cycles and serializes trivially.
//! Nodes are never removed while the process runs.

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use primitive_types::U256;
use zend_consensus::Hash256;
use zend_log::{log_cat, log_debug, Category};
use zend_pow::difficulty::block_proof;
use zend_pow::HeaderInfo;
use zend_primitives::block::BlockHeader;
use zend_primitives::encoding::{DecodeError, Decoder, Encoder};
use zend_storage::{Column, StoreError, WriteBatch};

use crate::chain::ActiveChain;
use crate::delay::DelayPolicy;
use crate::error::RejectReason;
use crate::flatfiles::FileLocation;

pub type NodeId = usize;

pub const BLOCK_VALID_UNKNOWN: u32 = 0;
/// Header parsed, parent known, proof of work and timestamps checked.
pub const BLOCK_VALID_TREE: u32 = 1;
/// Body received and structurally valid.
pub const BLOCK_VALID_TRANSACTIONS: u32 = 2;
/// Connected once: inputs, sidechain rules and amounts checked.
pub const BLOCK_VALID_CHAIN: u32 = 3;
pub const BLOCK_VALID_SCRIPTS: u32 = 4;
pub const BLOCK_VALID_MASK: u32 = 7;

pub const BLOCK_HAVE_DATA: u32 = 8;
pub const BLOCK_HAVE_UNDO: u32 = 16;
pub const BLOCK_FAILED_VALID: u32 = 32;
pub const BLOCK_FAILED_CHILD: u32 = 64;
pub const BLOCK_FAILED_MASK: u32 = BLOCK_FAILED_VALID | BLOCK_FAILED_CHILD;

#[derive(Clone, Debug)]
pub struct BlockIndexNode {
    pub hash: Hash256,
    pub header: BlockHeader,
    pub height: i32,
    pub chain_work: U256,
    pub tx_count: u32,
    /// Transactions in this block and all ancestors; zero until every
    /// ancestor's body is available.
    pub chain_tx: u64,
    pub status: u32,
    pub parent: Option<NodeId>,
    pub skip: Option<NodeId>,
    /// Arrival order among bodies, for tie-breaking equal-work candidates.
    pub sequence_id: i64,
    pub chain_delay: i32,
    pub data_pos: Option<FileLocation>,
    pub undo_pos: Option<FileLocation>,
    pub last_seen: i64,
}

impl BlockIndexNode {
    pub fn is_valid(&self, level: u32) -> bool {
        self.status & BLOCK_FAILED_MASK == 0 && self.status & BLOCK_VALID_MASK >= level
    }

    /// Raises the validity stage; returns whether it changed.
    pub fn raise_validity(&mut self, level: u32) -> bool {
        if self.status & BLOCK_FAILED_MASK != 0 {
            return false;
        }
        if self.status & BLOCK_VALID_MASK < level {
            self.status = (self.status & !BLOCK_VALID_MASK) | level;
            return true;
        }
        false
    }

    pub fn is_failed(&self) -> bool {
        self.status & BLOCK_FAILED_MASK != 0
    }

    pub fn have_data(&self) -> bool {
        self.status & BLOCK_HAVE_DATA != 0
    }

    pub fn have_undo(&self) -> bool {
        self.status & BLOCK_HAVE_UNDO != 0
    }

    pub fn header_info(&self) -> HeaderInfo {
        HeaderInfo {
            height: i64::from(self.height),
            time: i64::from(self.header.time),
            bits: self.header.bits,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_var_bytes(&self.header.consensus_encode());
        encoder.write_i32_le(self.height);
        encoder.write_bytes(&self.chain_work.to_little_endian());
        encoder.write_u32_le(self.tx_count);
        encoder.write_u32_le(self.status);
        encoder.write_i32_le(self.chain_delay);
        for location in [&self.data_pos, &self.undo_pos] {
            match location {
                Some(location) => {
                    encoder.write_u8(1);
                    location.encode_into(&mut encoder);
                }
                None => encoder.write_u8(0),
            }
        }
        encoder.into_inner()
    }

    fn decode(hash: Hash256, bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let header = BlockHeader::consensus_decode(&decoder.read_var_bytes()?)?;
        let height = decoder.read_i32_le()?;
        let chain_work = U256::from_little_endian(&decoder.read_fixed::<32>()?);
        let tx_count = decoder.read_u32_le()?;
        let status = decoder.read_u32_le()?;
        let chain_delay = decoder.read_i32_le()?;
        let mut locations = [None, None];
        for slot in &mut locations {
            *slot = match decoder.read_u8()? {
                0 => None,
                1 => Some(FileLocation::decode_from(&mut decoder)?),
                _ => return Err(DecodeError::InvalidData("invalid location marker")),
            };
        }
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        let [data_pos, undo_pos] = locations;
        Ok(Self {
            hash,
            header,
            height,
            chain_work,
            tx_count,
            chain_tx: 0,
            status,
            parent: None,
            skip: None,
            sequence_id: 0,
            chain_delay,
            data_pos,
            undo_pos,
            last_seen: 0,
        })
    }
}

/// Fork-choice ordering: lowest delay, then most work, then earliest
/// arrival. The first element of the set is the best candidate.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
struct CandidateKey {
    delay: i32,
    work: Reverse<U256>,
    sequence_id: i64,
    id: NodeId,
}

/// What the tree needs to know about the rest of the node when a header
/// arrives.
#[derive(Clone, Copy, Debug)]
pub struct Arrival {
    pub active_height: i32,
    pub initial_sync: bool,
    pub now: i64,
}

fn invert_lowest_one(value: i32) -> i32 {
    value & (value - 1)
}

fn get_skip_height(height: i32) -> i32 {
    if height < 2 {
        0
    } else if (height & 1) != 0 {
        invert_lowest_one(invert_lowest_one(height - 1)) + 1
    } else {
        invert_lowest_one(height)
    }
}

#[derive(Default)]
pub struct BlockIndexTree {
    nodes: Vec<BlockIndexNode>,
    by_hash: HashMap<Hash256, NodeId>,
    candidates: BTreeSet<CandidateKey>,
    /// Parent without body data to children waiting on it.
    unlinked: HashMap<NodeId, Vec<NodeId>>,
    next_sequence_id: i64,
    best_header: Option<NodeId>,
    dirty: HashSet<NodeId>,
    delay_policy: DelayPolicy,
}

impl BlockIndexTree {
    pub fn new(delay_policy: DelayPolicy) -> Self {
        Self {
            delay_policy,
            next_sequence_id: 1,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &BlockIndexNode {
        &self.nodes[id]
    }

    pub fn lookup(&self, hash: &Hash256) -> Option<NodeId> {
        self.by_hash.get(hash).copied()
    }

    pub fn best_header(&self) -> Option<NodeId> {
        self.best_header
    }

    pub fn delay_policy(&self) -> DelayPolicy {
        self.delay_policy
    }

    pub fn set_delay_policy(&mut self, policy: DelayPolicy) {
        self.delay_policy = policy;
    }

    /// Adds a header whose structural checks already passed. Known headers
    /// return the existing node.
    pub fn insert_header(
        &mut self,
        header: &BlockHeader,
        arrival: Arrival,
    ) -> Result<NodeId, RejectReason> {
        let hash = header.hash();
        if let Some(id) = self.lookup(&hash) {
            if self.nodes[id].is_failed() {
                return Err(RejectReason::invalid(0, "duplicate"));
            }
            if self.candidates.contains(&self.candidate_key(id)) {
                self.nodes[id].last_seen = arrival.now;
            }
            return Ok(id);
        }

        let proof = block_proof(header.bits).map_err(|_| RejectReason::invalid(100, "bad-diffbits"))?;
        let (parent, height, parent_work, parent_delay) = if self.nodes.is_empty() {
            (None, 0, U256::zero(), 0)
        } else {
            let parent = self
                .lookup(&header.prev_block)
                .ok_or_else(|| RejectReason::missing("prev-blk-not-found"))?;
            let node = &self.nodes[parent];
            if node.is_failed() {
                return Err(RejectReason::invalid(100, "bad-prevblk"));
            }
            (Some(parent), node.height + 1, node.chain_work, node.chain_delay)
        };

        let chain_delay = self.delay_policy.chain_delay(
            height,
            parent_delay,
            arrival.active_height,
            arrival.initial_sync,
        );
        if chain_delay > 0 {
            log_cat!(
                Category::Reorg,
                "block {} at height {} carries chain delay {}",
                zend_consensus::hash256_to_hex(&hash),
                height,
                chain_delay
            );
        }
        let skip = parent.and_then(|parent| self.get_ancestor(parent, get_skip_height(height)));
        let id = self.nodes.len();
        self.nodes.push(BlockIndexNode {
            hash,
            header: header.clone(),
            height,
            chain_work: parent_work.saturating_add(proof),
            tx_count: 0,
            chain_tx: 0,
            status: BLOCK_VALID_TREE,
            parent,
            skip,
            sequence_id: 0,
            chain_delay,
            data_pos: None,
            undo_pos: None,
            last_seen: arrival.now,
        });
        self.by_hash.insert(hash, id);
        self.dirty.insert(id);

        let better = match self.best_header {
            Some(best) => self.nodes[id].chain_work > self.nodes[best].chain_work,
            None => true,
        };
        if better {
            self.best_header = Some(id);
        }
        Ok(id)
    }

    /// Records that the body of `id` is stored at `data_pos` and links it,
    /// and any descendants that were waiting on it, into the candidate set.
    pub fn mark_body_received(
        &mut self,
        id: NodeId,
        tx_count: u32,
        data_pos: FileLocation,
        active_tip: Option<NodeId>,
    ) {
        let node = &mut self.nodes[id];
        node.tx_count = tx_count;
        node.data_pos = Some(data_pos);
        node.status |= BLOCK_HAVE_DATA;
        node.raise_validity(BLOCK_VALID_TRANSACTIONS);
        self.dirty.insert(id);

        let parent = node.parent;
        if let Some(parent) = parent {
            if self.nodes[parent].chain_tx == 0 {
                self.unlinked.entry(parent).or_default().push(id);
                return;
            }
        }

        let mut queue = VecDeque::from([id]);
        while let Some(current) = queue.pop_front() {
            let parent_chain_tx = self.nodes[current]
                .parent
                .map_or(0, |parent| self.nodes[parent].chain_tx);
            let node = &mut self.nodes[current];
            node.chain_tx = parent_chain_tx + u64::from(node.tx_count);
            node.sequence_id = self.next_sequence_id;
            self.next_sequence_id += 1;
            if !node.is_failed() && self.not_worse_than(current, active_tip) {
                self.candidates.insert(self.candidate_key(current));
            }
            if let Some(children) = self.unlinked.remove(&current) {
                queue.extend(children);
            }
        }
    }

    pub fn set_undo_pos(&mut self, id: NodeId, undo_pos: FileLocation) {
        let node = &mut self.nodes[id];
        node.undo_pos = Some(undo_pos);
        node.status |= BLOCK_HAVE_UNDO;
        self.dirty.insert(id);
    }

    pub fn raise_validity(&mut self, id: NodeId, level: u32) {
        if self.nodes[id].raise_validity(level) {
            self.dirty.insert(id);
        }
    }

    /// Best linked, not-failed candidate. Candidates whose path back to the
    /// active chain crosses a failed node are marked failed; those crossing
    /// a node without data are parked in the unlinked table.
    pub fn best_candidate(&mut self, chain: &ActiveChain) -> Option<NodeId> {
        loop {
            let key = *self.candidates.iter().next()?;
            let candidate = key.id;
            let mut cursor = candidate;
            let mut broken = None;
            while !chain.contains(self, cursor) {
                let node = &self.nodes[cursor];
                if node.is_failed() || !node.have_data() {
                    broken = Some(cursor);
                    break;
                }
                match node.parent {
                    Some(parent) => cursor = parent,
                    None => break,
                }
            }
            let Some(broken) = broken else {
                return Some(candidate);
            };

            let failed = self.nodes[broken].is_failed();
            let mut walk = candidate;
            while walk != broken {
                let parent = self.nodes[walk].parent;
                if failed {
                    self.nodes[walk].status |= BLOCK_FAILED_CHILD;
                    self.dirty.insert(walk);
                } else if let Some(parent) = parent {
                    let waiting = self.unlinked.entry(parent).or_default();
                    if !waiting.contains(&walk) {
                        waiting.push(walk);
                    }
                    self.nodes[walk].chain_tx = 0;
                }
                self.remove_candidate(walk);
                match parent {
                    Some(parent) => walk = parent,
                    None => break,
                }
            }
            self.remove_candidate(broken);
            if !failed {
                self.nodes[broken].chain_tx = 0;
            }
        }
    }

    /// Drops candidates strictly worse than the active tip.
    pub fn prune_candidates(&mut self, tip: NodeId) {
        let tip_key = self.candidate_key(tip);
        self.candidates.retain(|key| *key <= tip_key);
        self.candidates.insert(tip_key);
    }

    /// Marks `id` failed and every known descendant as failed-child.
    pub fn mark_invalid(&mut self, id: NodeId) {
        self.nodes[id].status |= BLOCK_FAILED_VALID;
        self.dirty.insert(id);
        self.remove_candidate(id);
        for other in self.descendants_of(id) {
            self.nodes[other].status |= BLOCK_FAILED_CHILD;
            self.dirty.insert(other);
            self.remove_candidate(other);
        }
        log_debug!(
            "marked block {} invalid",
            zend_consensus::hash256_to_hex(&self.nodes[id].hash)
        );
    }

    /// Clears failure flags from `id`, its descendants and its ancestors.
    pub fn reconsider(&mut self, id: NodeId, active_tip: Option<NodeId>) {
        let mut touched = self.descendants_of(id);
        touched.push(id);
        let mut cursor = self.nodes[id].parent;
        while let Some(ancestor) = cursor {
            touched.push(ancestor);
            cursor = self.nodes[ancestor].parent;
        }
        for other in touched {
            if self.nodes[other].is_failed() {
                self.nodes[other].status &= !BLOCK_FAILED_MASK;
                self.dirty.insert(other);
            }
        }
        self.rebuild_candidates(active_tip);
    }

    /// Re-seeds the candidate set from every linked, healthy node that is
    /// not worse than `active_tip`.
    pub fn rebuild_candidates(&mut self, active_tip: Option<NodeId>) {
        self.candidates.clear();
        for id in 0..self.nodes.len() {
            let node = &self.nodes[id];
            if node.is_valid(BLOCK_VALID_TRANSACTIONS)
                && node.chain_tx != 0
                && self.not_worse_than(id, active_tip)
            {
                self.candidates.insert(self.candidate_key(id));
            }
        }
        if let Some(tip) = active_tip {
            self.candidates.insert(self.candidate_key(tip));
        }
    }

    pub fn candidate_count(&self) -> usize {
        self.candidates.len()
    }

    pub fn get_ancestor(&self, id: NodeId, height: i32) -> Option<NodeId> {
        let mut walk = id;
        let mut walk_height = self.nodes[id].height;
        if height > walk_height || height < 0 {
            return None;
        }
        while walk_height > height {
            let node = &self.nodes[walk];
            let skip_height = get_skip_height(walk_height);
            let skip_height_prev = get_skip_height(walk_height - 1);
            let take_skip = node.skip.is_some()
                && (skip_height == height
                    || (skip_height > height
                        && !(skip_height_prev < skip_height - 2 && skip_height_prev >= height)));
            match (take_skip, node.skip, node.parent) {
                (true, Some(skip), _) => {
                    walk = skip;
                    walk_height = skip_height;
                }
                (_, _, Some(parent)) => {
                    walk = parent;
                    walk_height -= 1;
                }
                _ => return None,
            }
        }
        Some(walk)
    }

    pub fn last_common_ancestor(&self, a: NodeId, b: NodeId) -> Option<NodeId> {
        let height = self.nodes[a].height.min(self.nodes[b].height);
        let mut a = self.get_ancestor(a, height)?;
        let mut b = self.get_ancestor(b, height)?;
        while a != b {
            a = self.nodes[a].parent?;
            b = self.nodes[b].parent?;
        }
        Some(a)
    }

    /// Headers ending at `id`, oldest first, at most `count` of them.
    pub fn header_window(&self, id: NodeId, count: usize) -> Vec<HeaderInfo> {
        let mut out = Vec::with_capacity(count);
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if out.len() == count {
                break;
            }
            let node = &self.nodes[current];
            out.push(node.header_info());
            cursor = node.parent;
        }
        out.reverse();
        out
    }

    pub fn median_time_past(&self, id: NodeId) -> i64 {
        let mut times: Vec<i64> = self
            .header_window(id, zend_consensus::constants::MEDIAN_TIME_SPAN)
            .iter()
            .map(|info| info.time)
            .collect();
        times.sort_unstable();
        times[times.len() / 2]
    }

    /// Writes every node changed since the last flush.
    pub fn flush_dirty(&mut self, batch: &mut WriteBatch) {
        let mut dirty: Vec<NodeId> = self.dirty.drain().collect();
        dirty.sort_unstable();
        for id in dirty {
            let node = &self.nodes[id];
            batch.put(Column::BlockIndex, node.hash, node.encode());
        }
    }

    /// Rebuilds the tree from stored nodes. `active_tip` is the best block
    /// recorded by the coin view, used to seed the candidate set.
    pub fn load(
        entries: Vec<(Vec<u8>, Vec<u8>)>,
        delay_policy: DelayPolicy,
        active_tip: Option<&Hash256>,
    ) -> Result<Self, StoreError> {
        let mut nodes = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let hash: Hash256 = key
                .as_slice()
                .try_into()
                .map_err(|_| StoreError::Corrupt("block index key"))?;
            let node = BlockIndexNode::decode(hash, &value)
                .map_err(|_| StoreError::Corrupt("block index node"))?;
            nodes.push(node);
        }
        nodes.sort_by_key(|node| (node.height, node.hash));

        let mut tree = Self::new(delay_policy);
        for mut node in nodes {
            let id = tree.nodes.len();
            if node.height > 0 {
                let parent = tree
                    .lookup(&node.header.prev_block)
                    .ok_or(StoreError::Corrupt("block index parent missing"))?;
                node.parent = Some(parent);
                node.skip = tree.get_ancestor(parent, get_skip_height(node.height));
                let parent_chain_tx = tree.nodes[parent].chain_tx;
                if parent_chain_tx != 0 && node.have_data() {
                    node.chain_tx = parent_chain_tx + u64::from(node.tx_count);
                }
            } else if node.have_data() {
                node.chain_tx = u64::from(node.tx_count);
            }
            if node.chain_tx != 0 {
                node.sequence_id = tree.next_sequence_id;
                tree.next_sequence_id += 1;
            } else if let (Some(parent), true) = (node.parent, node.have_data()) {
                tree.unlinked.entry(parent).or_default().push(id);
            }
            tree.by_hash.insert(node.hash, id);
            tree.nodes.push(node);
            let better = match tree.best_header {
                Some(best) => {
                    !tree.nodes[id].is_failed()
                        && tree.nodes[id].chain_work > tree.nodes[best].chain_work
                }
                None => true,
            };
            if better {
                tree.best_header = Some(id);
            }
        }
        let tip = active_tip.and_then(|hash| tree.lookup(hash));
        tree.rebuild_candidates(tip);
        Ok(tree)
    }

    fn candidate_key(&self, id: NodeId) -> CandidateKey {
        let node = &self.nodes[id];
        CandidateKey {
            delay: node.chain_delay,
            work: Reverse(node.chain_work),
            sequence_id: node.sequence_id,
            id,
        }
    }

    fn remove_candidate(&mut self, id: NodeId) {
        let key = self.candidate_key(id);
        self.candidates.remove(&key);
    }

    fn not_worse_than(&self, id: NodeId, tip: Option<NodeId>) -> bool {
        match tip {
            Some(tip) => self.candidate_key(id) <= self.candidate_key(tip),
            None => true,
        }
    }

    fn descendants_of(&self, id: NodeId) -> Vec<NodeId> {
        let height = self.nodes[id].height;
        (0..self.nodes.len())
            .filter(|other| {
                *other != id
                    && self.nodes[*other].height > height
                    && self.get_ancestor(*other, height) == Some(id)
            })
            .collect()
    }
}
