use thiserror::Error;

use doin_hashes::Hash;

use super::ErrorKind;
use crate::encoding::EncodeError;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("chain log i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("chain log corruption at offset {0}: {1}")]
    Corruption(u64, EncodeError),

    #[error("block {0} is not in the store")]
    BlockNotFound(Hash),

    #[error("no block at height {0}")]
    HeightNotFound(u64),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Io(_) | StoreError::Corruption(..) => ErrorKind::Fatal,
            StoreError::BlockNotFound(_) | StoreError::HeightNotFound(_) => ErrorKind::Consistency,
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
