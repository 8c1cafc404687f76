//! Height-indexed view of the active chain.

use zend_consensus::Hash256;

use crate::blockindex::{BlockIndexTree, NodeId};

#[derive(Clone, Debug, Default)]
pub struct ActiveChain {
    ids: Vec<NodeId>,
    hashes: Vec<Hash256>,
}

impl ActiveChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tip(&self) -> Option<NodeId> {
        self.ids.last().copied()
    }

    pub fn tip_hash(&self) -> Option<Hash256> {
        self.hashes.last().copied()
    }

    /// Height of the tip, `-1` when empty.
    pub fn height(&self) -> i32 {
        self.ids.len() as i32 - 1
    }

    pub fn at(&self, height: i32) -> Option<NodeId> {
        usize::try_from(height)
            .ok()
            .and_then(|height| self.ids.get(height).copied())
    }

    pub fn hash_at(&self, height: i32) -> Option<Hash256> {
        usize::try_from(height)
            .ok()
            .and_then(|height| self.hashes.get(height).copied())
    }

    pub fn contains(&self, tree: &BlockIndexTree, id: NodeId) -> bool {
        let height = tree.node(id).height;
        self.at(height) == Some(id)
    }

    pub fn push(&mut self, id: NodeId, hash: Hash256) {
        self.ids.push(id);
        self.hashes.push(hash);
    }

    pub fn pop(&mut self) -> Option<NodeId> {
        self.hashes.pop();
        self.ids.pop()
    }

    /// Rebuilds the view so that `tip` is its last entry, reusing the
    /// common prefix.
    pub fn set_tip(&mut self, tree: &BlockIndexTree, tip: Option<NodeId>) {
        let Some(tip) = tip else {
            self.ids.clear();
            self.hashes.clear();
            return;
        };
        let height = tree.node(tip).height;
        let len = (height + 1) as usize;
        self.ids.resize(len, tip);
        self.hashes.resize(len, [0u8; 32]);
        let mut cursor = Some(tip);
        while let Some(id) = cursor {
            let node = tree.node(id);
            let slot = node.height as usize;
            if self.ids[slot] == id && slot != height as usize {
                break;
            }
            self.ids[slot] = id;
            self.hashes[slot] = node.hash;
            cursor = node.parent;
        }
    }
}
