//! Equihash check predicate. Solving is left to miners.

use zend_consensus::ConsensusParams;
use zend_primitives::block::BlockHeader;

#[derive(Debug)]
pub enum EquihashError {
    MissingSolution,
    UnsupportedSolutionSize { expected: usize, actual: usize },
    InvalidSolution(String),
}

impl std::fmt::Display for EquihashError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EquihashError::MissingSolution => write!(f, "missing equihash solution"),
            EquihashError::UnsupportedSolutionSize { expected, actual } => write!(
                f,
                "equihash solution size {actual} does not match expected {expected}"
            ),
            EquihashError::InvalidSolution(message) => {
                write!(f, "invalid equihash solution: {message}")
            }
        }
    }
}

impl std::error::Error for EquihashError {}

pub fn validate_equihash_solution(
    header: &BlockHeader,
    params: &ConsensusParams,
) -> Result<(), EquihashError> {
    if header.solution.is_empty() {
        return Err(EquihashError::MissingSolution);
    }
    let eh = params.equihash;
    let expected = usize::from(eh.solution_size);
    if header.solution.len() != expected {
        return Err(EquihashError::UnsupportedSolutionSize {
            expected,
            actual: header.solution.len(),
        });
    }

    let input = header.equihash_input();
    equihash::is_valid_solution(
        u32::from(eh.n),
        u32::from(eh.k),
        &input,
        &header.nonce,
        &header.solution,
    )
    .map_err(|err| EquihashError::InvalidSolution(err.to_string()))
}
