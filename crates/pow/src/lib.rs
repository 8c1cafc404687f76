//! Proof-of-work and Equihash verification.

pub mod difficulty;
pub mod equihash;
pub mod validation;

pub use difficulty::{block_proof, compact_to_u256, get_next_work_required, HeaderInfo};
pub use validation::{validate_pow_header, PowError};
