use thiserror::Error;

use doin_consensus_core::encoding::EncodeError;
use doin_consensus_core::errors::ErrorKind;
use doin_consensus_core::peer::PeerId;

#[derive(Error, Debug, Clone)]
pub enum ProtocolError {
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    #[error("unknown message type code {0:#04x}")]
    UnknownType(u8),

    #[error("malformed payload: {0}")]
    Decode(#[from] EncodeError),

    #[error("payload of {0} bytes exceeds the {1} byte cap")]
    OversizedPayload(usize, usize),

    #[error("envelope signature does not verify against origin {0}")]
    BadSignature(PeerId),

    #[error("payload identity does not match the envelope origin")]
    OriginMismatch,
}

impl ProtocolError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Protocol
    }
}

pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;
