use thiserror::Error;

use doin_hashes::Hash;

use super::block::RuleError;
use super::ErrorKind;

#[derive(Error, Debug, Clone)]
pub enum SyncError {
    #[error("requested range [{0}, {1}] exceeds the {2} blocks per response cap")]
    RangeTooWide(u64, u64, usize),

    #[error("requested range [{0}, {1}] is empty or inverted")]
    EmptyRange(u64, u64),

    #[error("response block at index {0} is out of requested order")]
    OutOfOrderResponse(u64),

    #[error("peer served invalid block {0}: {1}")]
    InvalidBlock(Hash, RuleError),

    #[error("anchor at height {0} reports {1} but local chain has {2}")]
    AnchorDivergence(u64, Hash, Hash),

    #[error("node is in suspect mode and refuses further progress")]
    Suspended,
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::RangeTooWide(..) | SyncError::EmptyRange(..) | SyncError::OutOfOrderResponse(_) => ErrorKind::Protocol,
            SyncError::InvalidBlock(..) => ErrorKind::Consistency,
            SyncError::AnchorDivergence(..) | SyncError::Suspended => ErrorKind::External,
        }
    }
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;
