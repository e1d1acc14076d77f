use serde::{Deserialize, Serialize};

use doin_hashes::ZERO_HASH;

use crate::block::Block;
use crate::constants::BLOCK_VERSION;
use crate::peer::PeerId;

/// Parameters of the genesis block. The block itself is built at boot since
/// its hash is a function of these fields.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct GenesisSpec {
    pub version: u16,
    pub timestamp: u64,
    pub threshold: f64,
}

impl GenesisSpec {
    pub fn build(&self) -> Block {
        Block::new(self.version, 0, ZERO_HASH, self.timestamp, self.threshold, PeerId::default(), Vec::new())
    }
}

pub const GENESIS: GenesisSpec = GenesisSpec { version: BLOCK_VERSION, timestamp: 1_735_689_600_000, threshold: 1.0 };

pub const SIMNET_GENESIS: GenesisSpec = GenesisSpec { version: BLOCK_VERSION, timestamp: 0, threshold: 1.0 };

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_genesis_block_shape() {
        let genesis = GENESIS.build();
        assert_eq!(genesis.index(), 0);
        assert_eq!(genesis.header.previous_hash, ZERO_HASH);
        assert!(genesis.transactions.is_empty());
        assert_eq!(genesis.hash(), GENESIS.build().hash());
        assert_ne!(genesis.hash(), SIMNET_GENESIS.build().hash());
    }
}
