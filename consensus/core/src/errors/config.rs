use thiserror::Error;

use super::ErrorKind;

#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    #[error("threshold bounds [{0}, {1}] are invalid")]
    InvalidThresholdBounds(f64, f64),

    #[error("initial threshold {0} is outside the configured bounds")]
    InitialThresholdOutOfBounds(f64),

    #[error("quorum bounds [{0}, {1}] are invalid")]
    InvalidQuorumBounds(usize, usize),

    #[error("{0} value {1} is out of range")]
    InvalidFraction(&'static str, f64),

    #[error("target block time must be positive")]
    ZeroTargetBlockTime,
}

impl ConfigError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Fatal
    }
}
