use ripemd::{Digest as RipemdDigest, Ripemd160};
use sha2::Sha256;
use zend_consensus::Hash256;

pub fn sha256(data: &[u8]) -> Hash256 {
    let digest = Sha256::digest(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

pub fn sha256d(data: &[u8]) -> Hash256 {
    sha256(&sha256(data))
}

pub fn hash160(data: &[u8]) -> [u8; 20] {
    let digest = Ripemd160::digest(sha256(data));
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest);
    out
}

/// Interior merkle node: double SHA-256 over the two children.
pub fn hash_pair(left: &Hash256, right: &Hash256) -> Hash256 {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(left);
    buf[32..].copy_from_slice(right);
    sha256d(&buf)
}

/// Merkle root over `leaves`, duplicating the last node of odd levels.
///
/// The second value reports whether two identical siblings were hashed
/// together, which lets a different leaf list produce the same root.
pub fn merkle_root(leaves: &[Hash256]) -> (Hash256, bool) {
    if leaves.is_empty() {
        return ([0u8; 32], false);
    }
    let mut level = leaves.to_vec();
    let mut mutated = false;
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let left = &pair[0];
            let right = pair.get(1).unwrap_or(left);
            if pair.len() == 2 && left == right {
                mutated = true;
            }
            next.push(hash_pair(left, right));
        }
        level = next;
    }
    (level[0], mutated)
}
