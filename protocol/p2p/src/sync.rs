//! Block sync flow decisions.
//!
//! On connect (or on a block announcement from the future) nodes exchange
//! `CHAIN_STATUS` and pull missing ranges with bounded `BLOCK_REQUEST`s.
//! The sync planner is pure: it turns (local state, remote message) into the
//! next request, and the node loop executes it.

use doin_consensus_core::block::Block;

use crate::message::{ChainStatus, Payload};

/// Largest range a single request may ask for; mirrors the serving cap.
pub const MAX_BLOCKS_PER_REQUEST: u64 = 50;

/// Decides the next sync step after learning a peer's chain status.
/// Returns a `BlockRequest` payload while the remote is ahead.
pub fn plan_request(local_height: u64, remote: &ChainStatus) -> Option<Payload> {
    if remote.height <= local_height {
        return None;
    }
    let from = local_height + 1;
    let to = remote.height.min(from + MAX_BLOCKS_PER_REQUEST - 1);
    Some(Payload::BlockRequest { from, to })
}

/// Whether an announced block index implies missing history worth a status
/// exchange instead of direct append.
pub fn announcement_needs_sync(local_height: u64, announced_index: u64) -> bool {
    announced_index > local_height + 1
}

/// Orders and sanity-filters a block response for sequential appending:
/// blocks must cover a contiguous ascending index range. Out-of-order or
/// gapped responses are rejected wholesale (the serving peer is misbehaving).
pub fn sequential_blocks(mut blocks: Vec<Block>) -> Option<Vec<Block>> {
    if blocks.is_empty() {
        return Some(blocks);
    }
    blocks.sort_by_key(|b| b.index());
    let contiguous = blocks.windows(2).all(|w| w[1].index() == w[0].index() + 1);
    contiguous.then_some(blocks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use doin_consensus_core::constants::BLOCK_VERSION;
    use doin_consensus_core::peer::PeerId;
    use doin_hashes::{Hash, ZERO_HASH};

    fn status(height: u64) -> ChainStatus {
        ChainStatus { height, tip_hash: Hash::from(height), finalized_height: height.saturating_sub(6) }
    }

    fn block_at(index: u64) -> Block {
        Block::new(BLOCK_VERSION, index, ZERO_HASH, index * 1000, 1.0, PeerId::default(), vec![])
    }

    #[test]
    fn test_no_request_when_caught_up() {
        assert_eq!(plan_request(10, &status(10)), None);
        assert_eq!(plan_request(10, &status(9)), None);
    }

    #[test]
    fn test_request_clamped_to_max_range() {
        assert_eq!(plan_request(0, &status(7)), Some(Payload::BlockRequest { from: 1, to: 7 }));
        assert_eq!(plan_request(0, &status(500)), Some(Payload::BlockRequest { from: 1, to: 50 }));
        assert_eq!(plan_request(99, &status(500)), Some(Payload::BlockRequest { from: 100, to: 149 }));
    }

    #[test]
    fn test_announcement_gap_detection() {
        assert!(!announcement_needs_sync(10, 11));
        assert!(announcement_needs_sync(10, 12));
        assert!(!announcement_needs_sync(10, 5));
    }

    #[test]
    fn test_sequential_blocks_sorts_and_validates() {
        let blocks = vec![block_at(3), block_at(1), block_at(2)];
        let ordered = sequential_blocks(blocks).unwrap();
        assert_eq!(ordered.iter().map(|b| b.index()).collect::<Vec<_>>(), vec![1, 2, 3]);

        assert!(sequential_blocks(vec![block_at(1), block_at(3)]).is_none());
        assert!(sequential_blocks(vec![]).unwrap().is_empty());
    }
}
