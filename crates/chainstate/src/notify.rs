//! Chain and pool notifications.

use zend_consensus::Hash256;
use zend_primitives::{Block, TxBase};

use crate::error::RejectReason;

/// What changed the active chain during one activation step, in order.
#[derive(Clone, Debug)]
pub enum ChainEvent {
    BlockConnected {
        hash: Hash256,
        height: i32,
        block: Block,
    },
    /// The block left the active chain; its entries may go back to the pool.
    BlockDisconnected {
        hash: Hash256,
        height: i32,
        block: Block,
    },
    /// Backward transfers of `cert_hash` stopped being spendable, either
    /// because a higher quality certificate replaced it or because its
    /// sidechain ceased.
    CertificateVoided {
        cert_hash: Hash256,
        height: i32,
        ceased: bool,
    },
    /// Connecting the block broke a consensus rule; it and its descendants
    /// are marked failed.
    BlockInvalid {
        hash: Hash256,
        height: i32,
        reason: RejectReason,
    },
}

impl ChainEvent {
    pub fn height(&self) -> i32 {
        match self {
            ChainEvent::BlockConnected { height, .. }
            | ChainEvent::BlockDisconnected { height, .. }
            | ChainEvent::CertificateVoided { height, .. }
            | ChainEvent::BlockInvalid { height, .. } => *height,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RemovalReason {
    Block,
    Conflict,
    Reorg,
    SizeLimit,
    Replaced,
}

impl RemovalReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RemovalReason::Block => "block",
            RemovalReason::Conflict => "conflict",
            RemovalReason::Reorg => "reorg",
            RemovalReason::SizeLimit => "sizelimit",
            RemovalReason::Replaced => "replaced",
        }
    }
}

/// Receives chain and pool updates synchronously, under the chain-state
/// lock. Implementations must return quickly and never call back into the
/// chain state.
pub trait ChainNotifier: Send + Sync {
    fn block_connected(&self, _block: &Block, _height: i32) {}
    fn block_disconnected(&self, _block: &Block, _height: i32) {}
    fn certificate_voided(&self, _cert_hash: &Hash256, _ceased: bool) {}
    fn block_invalid(&self, _hash: &Hash256, _reason: &RejectReason) {}
    fn entry_accepted(&self, _entry: &TxBase) {}
    fn entry_removed(&self, _id: &Hash256, _reason: RemovalReason) {}

    fn chain_event(&self, event: &ChainEvent) {
        match event {
            ChainEvent::BlockConnected { block, height, .. } => {
                self.block_connected(block, *height)
            }
            ChainEvent::BlockDisconnected { block, height, .. } => {
                self.block_disconnected(block, *height)
            }
            ChainEvent::CertificateVoided {
                cert_hash, ceased, ..
            } => self.certificate_voided(cert_hash, *ceased),
            ChainEvent::BlockInvalid { hash, reason, .. } => self.block_invalid(hash, reason),
        }
    }
}
