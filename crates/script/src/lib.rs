//! Script verification and sighash.

pub mod interpreter;
pub mod sighash;
pub mod sigops;
pub mod standard;

pub use interpreter::{
    verify_script, ScriptError, ScriptFlags, SignatureChecker, TxSignatureChecker,
    BLOCK_SCRIPT_VERIFY_FLAGS, STANDARD_SCRIPT_VERIFY_FLAGS,
};
pub use sighash::{signature_hash, SighashError, SighashType, SIGHASH_ALL};
