//! Core block/transaction types and consensus serialization.

pub mod block;
pub mod certificate;
pub mod encoding;
pub mod hash;
pub mod outpoint;
pub mod transaction;
pub mod txbase;

pub use block::{Block, BlockHeader};
pub use certificate::{BackwardTransfer, ScCertificate};
pub use encoding::DecodeError;
pub use hash::{hash160, sha256, sha256d};
pub use outpoint::OutPoint;
pub use transaction::{
    CswInput, ForwardTransferOutput, JoinSplit, ScCreationOutput, Transaction, TxIn, TxOut,
};
pub use txbase::{TxBase, TxLike};
