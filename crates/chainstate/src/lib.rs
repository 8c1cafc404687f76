//! Block index, coin ledger, block validation and chain activation.

pub mod blockindex;
pub mod chain;
pub mod checkqueue;
pub mod coins;
pub mod commitment;
pub mod connect;
pub mod delay;
pub mod error;
pub mod flatfiles;
pub mod genesis;
pub mod ledger;
pub mod notify;
pub mod proof;
pub mod sidechain;
pub mod state;
pub mod tree;
pub mod txindex;
pub mod undo;
pub mod validation;
pub mod view;

pub use error::{ChainStateError, RejectKind, RejectReason};
pub use notify::{ChainEvent, ChainNotifier, RemovalReason};
pub use state::{ChainOptions, ChainState, StepOutcome};
