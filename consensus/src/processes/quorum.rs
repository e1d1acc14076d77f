//! Deterministic quorum selection.
//!
//! Evaluators are drawn by a Fisher–Yates shuffle driven by an XOF keyed on
//! `H(chain_tip_hash ∥ optima_id)`. The eligible set is sorted by peer id
//! before shuffling, so any two nodes with equal inputs select equal quorums.

use doin_consensus_core::peer::PeerId;
use doin_hashes::Hash;

/// Quorum size for `eligible_count` evaluators:
/// `clamp(ceil(sqrt(n)), k_min, k_max)`.
pub fn quorum_size(eligible_count: usize, k_min: usize, k_max: usize) -> usize {
    let root = (eligible_count as f64).sqrt().ceil() as usize;
    root.clamp(k_min, k_max)
}

/// Deterministic keyed randomness stream backing the shuffle.
struct SeedStream {
    reader: blake3::OutputReader,
}

impl SeedStream {
    fn new(seed: Hash) -> Self {
        let mut hasher = blake3::Hasher::new_keyed(seed.as_bytes());
        hasher.update(b"quorum-shuffle");
        Self { reader: hasher.finalize_xof() }
    }

    fn next_u64(&mut self) -> u64 {
        let mut buf = [0u8; 8];
        self.reader.fill(&mut buf);
        u64::from_be_bytes(buf)
    }
}

/// Selects an ordered quorum of size `k` out of `eligible`. The caller has
/// already filtered the eligible set (reputation gate, registered evaluators
/// for the domain, optimizer excluded) and guarantees `k <= eligible.len()`.
///
/// Pure: equal `(seed, eligible, k)` produce equal output on every node.
pub fn select_quorum(seed: Hash, mut eligible: Vec<PeerId>, k: usize) -> Vec<PeerId> {
    debug_assert!(k <= eligible.len());
    // canonical pre-shuffle order regardless of how callers collected the set
    eligible.sort_unstable();
    eligible.dedup();

    let mut stream = SeedStream::new(seed);
    for i in (1..eligible.len()).rev() {
        let j = (stream.next_u64() % (i as u64 + 1)) as usize;
        eligible.swap(i, j);
    }
    eligible.truncate(k);
    eligible
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peers(n: u8) -> Vec<PeerId> {
        (0..n).map(|i| PeerId::from_bytes([i + 1; 32])).collect()
    }

    #[test]
    fn test_quorum_size_clamps() {
        assert_eq!(quorum_size(1, 3, 10), 3);
        assert_eq!(quorum_size(9, 3, 10), 3);
        assert_eq!(quorum_size(10, 3, 10), 4); // ceil(sqrt(10)) = 4
        assert_eq!(quorum_size(100, 3, 10), 10);
        assert_eq!(quorum_size(400, 3, 10), 10);
    }

    #[test]
    fn test_selection_is_deterministic() {
        let seed = Hash::from(42u64);
        let a = select_quorum(seed, peers(20), 5);
        let b = select_quorum(seed, peers(20), 5);
        assert_eq!(a, b);
        assert_eq!(a.len(), 5);
    }

    #[test]
    fn test_selection_is_input_order_independent() {
        let seed = Hash::from(42u64);
        let mut shuffled = peers(20);
        shuffled.reverse();
        assert_eq!(select_quorum(seed, peers(20), 5), select_quorum(seed, shuffled, 5));
    }

    #[test]
    fn test_different_seeds_select_differently() {
        // with 20 candidates two seeds agreeing on all 5 picks is vanishingly unlikely
        let a = select_quorum(Hash::from(1u64), peers(20), 5);
        let b = select_quorum(Hash::from(2u64), peers(20), 5);
        assert_ne!(a, b);
    }

    #[test]
    fn test_no_duplicates_and_members_are_eligible() {
        let eligible = peers(10);
        let quorum = select_quorum(Hash::from(7u64), eligible.clone(), 4);
        let mut seen = quorum.clone();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), quorum.len());
        assert!(quorum.iter().all(|p| eligible.contains(p)));
    }

    #[test]
    fn test_full_set_selection() {
        let eligible = peers(3);
        let quorum = select_quorum(Hash::from(9u64), eligible.clone(), 3);
        let mut sorted = quorum.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, eligible);
    }
}
