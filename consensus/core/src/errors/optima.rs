use thiserror::Error;

use super::ErrorKind;
use crate::peer::PeerId;
use crate::{DomainId, OptimaId};

#[derive(Error, Debug, Clone)]
pub enum OptimaError {
    #[error("optima {0} was already committed")]
    Duplicate(OptimaId),

    #[error("signature verification failed for peer {0}")]
    BadSignature(PeerId),

    #[error("peer {0} has {1} open commits, exceeding the limit")]
    RateLimited(PeerId, usize),

    #[error("reveal for {0} has no matching commit")]
    NoCommit(OptimaId),

    #[error("revealed parameters of {0} do not hash to the committed value")]
    HashMismatch(OptimaId),

    #[error("reveal for {0} arrived {1} blocks after the commit window closed")]
    LateReveal(OptimaId, u64),

    #[error("domain {0} is not registered")]
    UnknownDomain(DomainId),

    #[error("parameter payload of {0} bytes exceeds the cap of {1}")]
    ParamBytesExceeded(usize, usize),

    #[error("declared training budget {0}s exceeds the cap of {1}s")]
    TrainingBudgetExceeded(u64, u64),

    #[error("declared memory budget {0}MB exceeds the cap of {1}MB")]
    MemoryBudgetExceeded(u64, u64),

    #[error("parameter vector dimension {0} outside domain bounds [{1}, {2}]")]
    DimensionOutOfBounds(usize, usize, usize),

    #[error("peer {0} reputation {1:.2} is below the consensus minimum {2:.2}")]
    InsufficientReputation(PeerId, f64, f64),

    #[error("evaluator {0} is not in the quorum for {1}")]
    NotInQuorum(PeerId, OptimaId),

    #[error("duplicate vote by {0} on {1}")]
    DuplicateVote(PeerId, OptimaId),

    #[error("optima {0} is not accepting votes")]
    VotingClosed(OptimaId),

    #[error("optimization plugin failed for domain {0}: {1}")]
    PluginFailure(DomainId, String),
}

impl OptimaError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OptimaError::BadSignature(_) | OptimaError::NoCommit(_) | OptimaError::Duplicate(_) | OptimaError::UnknownDomain(_) => {
                ErrorKind::Protocol
            }
            OptimaError::HashMismatch(_) => ErrorKind::Consistency,
            OptimaError::RateLimited(..)
            | OptimaError::ParamBytesExceeded(..)
            | OptimaError::TrainingBudgetExceeded(..)
            | OptimaError::MemoryBudgetExceeded(..)
            | OptimaError::DimensionOutOfBounds(..)
            | OptimaError::InsufficientReputation(..) => ErrorKind::Economic,
            OptimaError::LateReveal(..) | OptimaError::VotingClosed(_) | OptimaError::PluginFailure(..) => ErrorKind::Liveness,
            OptimaError::NotInQuorum(..) | OptimaError::DuplicateVote(..) => ErrorKind::Protocol,
        }
    }
}

pub type OptimaResult<T> = std::result::Result<T, OptimaError>;
