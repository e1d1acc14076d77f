//! In-memory chain store: hash- and height-indexed blocks, competing tips,
//! heaviest-chain selection and the finality fence.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use doin_consensus_core::block::Block;
use doin_consensus_core::errors::block::RuleError;
use doin_consensus_core::errors::store::{StoreError, StoreResult};
use doin_hashes::Hash;

#[derive(Clone, Debug)]
struct BlockEntry {
    block: Arc<Block>,
    /// Total weighted increment accumulated from genesis to this block.
    cumulative_weight: f64,
}

/// Outcome of inserting a block into the store.
#[derive(Clone, Debug, PartialEq)]
pub enum TipUpdate {
    /// Block was already known; nothing changed.
    AlreadyKnown,
    /// Block extends or creates a side chain lighter than the canonical one.
    SideChain,
    /// Block extended the canonical tip in place.
    Extended { new_tip: Hash },
    /// A heavier fork displaced part of the canonical chain.
    Reorged { detached: Vec<Hash>, attached: Vec<Hash> },
}

pub struct ChainStore {
    blocks: HashMap<Hash, BlockEntry>,
    /// Canonical chain, indexed by height. `canonical[0]` is genesis.
    canonical: Vec<Hash>,
    tips: HashSet<Hash>,
    finalized_height: u64,
}

impl ChainStore {
    pub fn new(genesis: Block) -> Self {
        let genesis_hash = genesis.hash();
        let mut blocks = HashMap::new();
        blocks.insert(genesis_hash, BlockEntry { block: Arc::new(genesis), cumulative_weight: 0.0 });
        Self {
            blocks,
            canonical: vec![genesis_hash],
            tips: HashSet::from([genesis_hash]),
            finalized_height: 0,
        }
    }

    pub fn genesis_hash(&self) -> Hash {
        self.canonical[0]
    }

    pub fn tip_hash(&self) -> Hash {
        *self.canonical.last().expect("canonical chain always contains genesis")
    }

    pub fn tip(&self) -> Arc<Block> {
        self.blocks[&self.tip_hash()].block.clone()
    }

    /// Height of the canonical tip.
    pub fn height(&self) -> u64 {
        (self.canonical.len() - 1) as u64
    }

    pub fn finalized_height(&self) -> u64 {
        self.finalized_height
    }

    pub fn contains(&self, hash: Hash) -> bool {
        self.blocks.contains_key(&hash)
    }

    pub fn get(&self, hash: Hash) -> StoreResult<Arc<Block>> {
        self.blocks.get(&hash).map(|e| e.block.clone()).ok_or(StoreError::BlockNotFound(hash))
    }

    /// Canonical block at `height`.
    pub fn get_by_height(&self, height: u64) -> StoreResult<Arc<Block>> {
        let hash = self.canonical.get(height as usize).ok_or(StoreError::HeightNotFound(height))?;
        self.get(*hash)
    }

    pub fn canonical_hash_at(&self, height: u64) -> Option<Hash> {
        self.canonical.get(height as usize).copied()
    }

    pub fn is_canonical(&self, hash: Hash) -> bool {
        self.blocks
            .get(&hash)
            .map(|e| self.canonical.get(e.block.index() as usize) == Some(&hash))
            .unwrap_or(false)
    }

    /// Total weighted increment of the chain ending at `hash`.
    pub fn chain_weight(&self, hash: Hash) -> StoreResult<f64> {
        self.blocks.get(&hash).map(|e| e.cumulative_weight).ok_or(StoreError::BlockNotFound(hash))
    }

    pub fn tips(&self) -> impl Iterator<Item = Hash> + '_ {
        self.tips.iter().copied()
    }

    /// Inserts a validated block and applies the heaviest-chain rule. The
    /// caller has already validated the block in isolation and in context;
    /// `block_weight` is its weighted accepted increment.
    ///
    /// A reorg attempt that would detach a block at or below the finalized
    /// height is rejected with `ReorgBelowFinality` and the block stays as a
    /// side chain entry.
    pub fn insert(&mut self, block: Block, block_weight: f64) -> Result<TipUpdate, RuleError> {
        let hash = block.hash();
        if self.blocks.contains_key(&hash) {
            return Ok(TipUpdate::AlreadyKnown);
        }
        let parent_hash = block.header.previous_hash;
        let parent = self.blocks.get(&parent_hash).ok_or(RuleError::UnknownParent(parent_hash))?;
        let cumulative_weight = parent.cumulative_weight + block_weight;

        self.blocks.insert(hash, BlockEntry { block: Arc::new(block), cumulative_weight });
        self.tips.remove(&parent_hash);
        self.tips.insert(hash);

        let old_tip = self.tip_hash();
        if parent_hash == old_tip {
            self.canonical.push(hash);
            return Ok(TipUpdate::Extended { new_tip: hash });
        }

        if !self.is_heavier(hash, old_tip) {
            return Ok(TipUpdate::SideChain);
        }

        self.reorg_to(hash)
    }

    /// Heaviest-chain comparison: higher cumulative weight wins, ties broken
    /// by the lower block hash.
    fn is_heavier(&self, candidate: Hash, incumbent: Hash) -> bool {
        let cand = self.blocks[&candidate].cumulative_weight;
        let inc = self.blocks[&incumbent].cumulative_weight;
        if cand != inc {
            cand > inc
        } else {
            candidate < incumbent
        }
    }

    fn reorg_to(&mut self, new_tip: Hash) -> Result<TipUpdate, RuleError> {
        // walk the fork back to the first block lying on the canonical chain
        let mut attached = Vec::new();
        let mut cursor = new_tip;
        while !self.is_canonical(cursor) {
            attached.push(cursor);
            cursor = self.blocks[&cursor].block.header.previous_hash;
        }
        attached.reverse();
        let fork_point = self.blocks[&cursor].block.index();

        if fork_point < self.finalized_height {
            let offending = self.blocks[&attached[0]].block.index();
            return Err(RuleError::ReorgBelowFinality(offending, self.finalized_height));
        }

        let detached: Vec<Hash> = self.canonical.drain(fork_point as usize + 1..).collect();
        self.canonical.extend(attached.iter().copied());
        Ok(TipUpdate::Reorged { detached, attached })
    }

    /// Advances the finality fence to `tip height - confirmation_depth` and
    /// returns the newly finalized canonical blocks in height order.
    pub fn advance_finality(&mut self, confirmation_depth: u64) -> Vec<Arc<Block>> {
        let target = self.height().saturating_sub(confirmation_depth);
        if target <= self.finalized_height {
            return Vec::new();
        }
        let newly = (self.finalized_height + 1..=target)
            .map(|h| self.blocks[&self.canonical[h as usize]].block.clone())
            .collect();
        self.finalized_height = target;
        newly
    }

    /// Iterates the canonical chain from genesis to tip.
    pub fn canonical_blocks(&self) -> impl Iterator<Item = Arc<Block>> + '_ {
        self.canonical.iter().map(|h| self.blocks[h].block.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use doin_consensus_core::config::genesis::SIMNET_GENESIS;
    use doin_consensus_core::constants::BLOCK_VERSION;
    use doin_consensus_core::peer::PeerId;

    fn child_of(parent: &Block, salt: u64) -> Block {
        Block::new(
            BLOCK_VERSION,
            parent.index() + 1,
            parent.hash(),
            parent.header.timestamp + 1000 + salt,
            1.0,
            PeerId::from_bytes([salt as u8; 32]),
            vec![],
        )
    }

    fn store() -> (ChainStore, Block) {
        let genesis = SIMNET_GENESIS.build();
        (ChainStore::new(genesis.clone()), genesis)
    }

    #[test]
    fn test_extension_and_lookup() {
        let (mut store, genesis) = store();
        let b1 = child_of(&genesis, 0);
        assert_eq!(store.insert(b1.clone(), 0.5).unwrap(), TipUpdate::Extended { new_tip: b1.hash() });
        assert_eq!(store.height(), 1);
        assert_eq!(store.get_by_height(1).unwrap().hash(), b1.hash());
        assert_eq!(store.chain_weight(b1.hash()).unwrap(), 0.5);
        assert_eq!(store.insert(b1, 0.5).unwrap(), TipUpdate::AlreadyKnown);
    }

    #[test]
    fn test_unknown_parent_is_rejected() {
        let (mut store, genesis) = store();
        let mut orphan = child_of(&genesis, 0);
        orphan.header.previous_hash = Hash::from(999u64);
        orphan.header.hash = orphan.header.recompute_hash();
        assert!(matches!(store.insert(orphan, 0.0), Err(RuleError::UnknownParent(_))));
    }

    #[test]
    fn test_heavier_fork_reorgs() {
        let (mut store, genesis) = store();
        // canonical: g -> a1 (weight 0.5) -> a2 (weight 0.0)
        let a1 = child_of(&genesis, 1);
        let a2 = child_of(&a1, 2);
        store.insert(a1.clone(), 0.5).unwrap();
        store.insert(a2, 0.0).unwrap();

        // fork: g -> b1 (weight 0.9)
        let b1 = child_of(&genesis, 3);
        match store.insert(b1.clone(), 0.9).unwrap() {
            TipUpdate::Reorged { detached, attached } => {
                assert_eq!(detached.len(), 2);
                assert_eq!(attached, vec![b1.hash()]);
            }
            other => panic!("expected reorg, got {:?}", other),
        }
        assert_eq!(store.tip_hash(), b1.hash());
        assert_eq!(store.height(), 1);
    }

    #[test]
    fn test_equal_length_forks_resolve_by_weight() {
        let (mut store, genesis) = store();
        // chain X: two blocks summing 0.5
        let x1 = child_of(&genesis, 1);
        let x2 = child_of(&x1, 2);
        store.insert(x1, 0.3).unwrap();
        store.insert(x2, 0.2).unwrap();

        // chain Y: same length, summing 0.9
        let y1 = child_of(&genesis, 3);
        let y2 = child_of(&y1, 4);
        assert_eq!(store.insert(y1.clone(), 0.45).unwrap(), TipUpdate::SideChain);
        match store.insert(y2.clone(), 0.45).unwrap() {
            TipUpdate::Reorged { detached, attached } => {
                assert_eq!(detached.len(), 2);
                assert_eq!(attached, vec![y1.hash(), y2.hash()]);
            }
            other => panic!("expected reorg, got {:?}", other),
        }
        assert_eq!(store.tip_hash(), y2.hash());
    }

    #[test]
    fn test_lighter_fork_stays_side_chain() {
        let (mut store, genesis) = store();
        let a1 = child_of(&genesis, 1);
        store.insert(a1.clone(), 0.9).unwrap();

        let b1 = child_of(&genesis, 2);
        assert_eq!(store.insert(b1.clone(), 0.1).unwrap(), TipUpdate::SideChain);
        assert_eq!(store.tip_hash(), a1.hash());
        assert!(store.tips().any(|t| t == b1.hash()));
    }

    #[test]
    fn test_equal_weight_tie_breaks_on_lower_hash() {
        let (mut store, genesis) = store();
        let a1 = child_of(&genesis, 1);
        let b1 = child_of(&genesis, 2);
        store.insert(a1.clone(), 0.5).unwrap();
        let update = store.insert(b1.clone(), 0.5).unwrap();
        if b1.hash() < a1.hash() {
            assert!(matches!(update, TipUpdate::Reorged { .. }));
            assert_eq!(store.tip_hash(), b1.hash());
        } else {
            assert_eq!(update, TipUpdate::SideChain);
            assert_eq!(store.tip_hash(), a1.hash());
        }
    }

    #[test]
    fn test_finality_blocks_reorg() {
        let (mut store, genesis) = store();
        let mut parent = genesis.clone();
        for i in 0..8u64 {
            let block = child_of(&parent, i + 1);
            store.insert(block.clone(), 0.1).unwrap();
            parent = block;
        }
        let finalized = store.advance_finality(6);
        assert_eq!(store.finalized_height(), 2);
        assert_eq!(finalized.len(), 2);
        assert_eq!(finalized[0].index(), 1);

        // a heavy fork branching below the finalized height must be rejected
        let attacker = child_of(&genesis, 99);
        assert!(matches!(store.insert(attacker, 1000.0), Err(RuleError::ReorgBelowFinality(..))));
        assert_eq!(store.height(), 8);
    }

    #[test]
    fn test_exactly_confirmation_depth_finalizes() {
        let (mut store, genesis) = store();
        let mut parent = genesis;
        for i in 0..6u64 {
            let block = child_of(&parent, i + 1);
            store.insert(block.clone(), 0.1).unwrap();
            parent = block;
        }
        // height 6, depth 6: exactly the genesis successor boundary
        let finalized = store.advance_finality(6);
        assert!(finalized.is_empty());
        let b7 = child_of(&parent, 77);
        store.insert(b7, 0.1).unwrap();
        let finalized = store.advance_finality(6);
        assert_eq!(finalized.len(), 1);
        assert_eq!(store.finalized_height(), 1);
    }
}
