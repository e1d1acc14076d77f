use thiserror::Error;

use doin_hashes::Hash;

use super::ErrorKind;
use crate::constants;

#[derive(Error, Debug, Clone)]
pub enum RuleError {
    #[error("wrong block version: got {0} but expected {expected}", expected = constants::BLOCK_VERSION)]
    WrongBlockVersion(u16),

    #[error("block index {0} does not follow parent index {1}")]
    NonSequentialIndex(u64, u64),

    #[error("block previous hash {0} does not match chain tip {1}")]
    PreviousHashMismatch(Hash, Hash),

    #[error("block parent {0} is unknown")]
    UnknownParent(Hash),

    #[error("block hash {0} does not match the recomputed header hash {1}")]
    BadBlockHash(Hash, Hash),

    #[error("invalid merkle root: header indicates {0} but calculated value is {1}")]
    BadMerkleRoot(Hash, Hash),

    #[error("block timestamp {0} is before parent timestamp {1}")]
    TimeTooOld(u64, u64),

    #[error("the block timestamp is too far into the future: block timestamp is {0} but maximum timestamp allowed is {1}")]
    TimeTooFarIntoTheFuture(u64, u64),

    #[error("block at index {0} would revert finalized height {1}")]
    ReorgBelowFinality(u64, u64),

    #[error("accepted optima {0} does not bind to its commitment")]
    CommitBindingViolation(crate::OptimaId),

    #[error("accepted optima {0} claims a seed other than the derived one")]
    SeedMismatch(crate::OptimaId),

    #[error("duplicate terminal record for optima {0}")]
    DuplicateTerminalOptima(crate::OptimaId),

    #[error("coin distribution of {0} exceeds allowed emission {1}")]
    ExcessiveEmission(u64, u64),

    #[error("block is known to be invalid")]
    KnownInvalid,
}

impl RuleError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Consistency
    }
}

pub type BlockProcessResult<T> = std::result::Result<T, RuleError>;
