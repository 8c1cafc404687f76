//! Incremental note commitment tree fed by joinsplit outputs.

use core2::io;
use std::io::Cursor;

use incrementalmerkletree::{frontier::CommitmentTree, Hashable, Level};
use sha2::compress256;
use sha2::digest::generic_array::GenericArray;
use zcash_primitives::merkle_tree::{read_commitment_tree, write_commitment_tree, HashSer};
use zend_consensus::Hash256;

pub const NOTE_TREE_DEPTH: u8 = 29;

const SHA256_IV: [u32; 8] = [
    0x6a09e667, 0xbb67ae85, 0x3c6ef372, 0xa54ff53a, 0x510e527f, 0x9b05688c, 0x1f83d9ab, 0x5be0cd19,
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NoteNode(Hash256);

impl NoteNode {
    pub fn from_commitment(commitment: &Hash256) -> Self {
        Self(*commitment)
    }

    pub fn hash(self) -> Hash256 {
        self.0
    }
}

impl Hashable for NoteNode {
    fn empty_leaf() -> Self {
        NoteNode([0u8; 32])
    }

    /// Interior nodes use the bare SHA-256 compression function, no padding.
    fn combine(_level: Level, lhs: &Self, rhs: &Self) -> Self {
        let mut block = [0u8; 64];
        block[..32].copy_from_slice(&lhs.0);
        block[32..].copy_from_slice(&rhs.0);
        let mut state = SHA256_IV;
        compress256(&mut state, &[GenericArray::clone_from_slice(&block)]);
        let mut out = [0u8; 32];
        for (chunk, word) in out.chunks_exact_mut(4).zip(state.iter()) {
            chunk.copy_from_slice(&word.to_be_bytes());
        }
        NoteNode(out)
    }
}

impl HashSer for NoteNode {
    fn read<R: core2::io::Read>(mut reader: R) -> io::Result<Self> {
        let mut bytes = [0u8; 32];
        reader.read_exact(&mut bytes)?;
        Ok(NoteNode(bytes))
    }

    fn write<W: core2::io::Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(&self.0)
    }
}

pub type NoteTree = CommitmentTree<NoteNode, NOTE_TREE_DEPTH>;

pub fn empty_tree() -> NoteTree {
    NoteTree::empty()
}

pub fn tree_root(tree: &NoteTree) -> Hash256 {
    tree.root().hash()
}

pub fn empty_root() -> Hash256 {
    NoteNode::empty_root(Level::from(NOTE_TREE_DEPTH)).hash()
}

/// Appends one commitment; fails once the tree is full.
pub fn append_commitment(tree: &mut NoteTree, commitment: &Hash256) -> bool {
    tree.append(NoteNode::from_commitment(commitment)).is_ok()
}

pub fn tree_from_bytes(bytes: &[u8]) -> io::Result<NoteTree> {
    read_commitment_tree(Cursor::new(bytes))
}

pub fn tree_to_bytes(tree: &NoteTree) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    write_commitment_tree(tree, &mut out)?;
    Ok(out)
}
