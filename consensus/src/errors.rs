use thiserror::Error;

use doin_consensus_core::errors::block::RuleError;
use doin_consensus_core::errors::config::ConfigError;
use doin_consensus_core::errors::optima::OptimaError;
use doin_consensus_core::errors::store::StoreError;
use doin_consensus_core::errors::sync::SyncError;
use doin_consensus_core::errors::ErrorKind;

#[derive(Error, Debug)]
pub enum ConsensusError {
    #[error(transparent)]
    Rule(#[from] RuleError),

    #[error(transparent)]
    Optima(#[from] OptimaError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ConsensusError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConsensusError::Rule(e) => e.kind(),
            ConsensusError::Optima(e) => e.kind(),
            ConsensusError::Sync(e) => e.kind(),
            ConsensusError::Store(e) => e.kind(),
            ConsensusError::Config(e) => e.kind(),
        }
    }
}

pub type ConsensusResult<T> = std::result::Result<T, ConsensusError>;
