//! Deterministic seed derivation.
//!
//! All seeds are recomputable by any node from chain data, so grinding a
//! favorable seed requires grinding the commitment itself.

use super::HasherExtensions;
use doin_hashes::{Hash, HasherBase, OptimizationSeedHash, QuorumSeedHash, SyntheticDataSeedHash};

use crate::peer::PeerId;
use crate::OptimaId;

/// Seed for quorum selection: `H(chain_tip_hash ∥ optima_id)`.
pub fn quorum_seed(chain_tip_hash: Hash, optima_id: OptimaId) -> Hash {
    let mut hasher = QuorumSeedHash::new();
    hasher.update(chain_tip_hash).update(optima_id.as_bytes());
    hasher.finalize()
}

/// Seed driving the optimization run: `H(commit_hash ∥ domain_id)`.
pub fn optimization_seed(commit_hash: Hash, domain_id: &str) -> Hash {
    let mut hasher = OptimizationSeedHash::new();
    hasher.update(commit_hash).write_var_bytes(domain_id.as_bytes());
    hasher.finalize()
}

/// Per-evaluator synthetic-data seed:
/// `H(commit_hash ∥ domain_id ∥ evaluator_id ∥ chain_tip_hash_at_selection)`.
pub fn synthetic_data_seed(commit_hash: Hash, domain_id: &str, evaluator_id: PeerId, tip_at_selection: Hash) -> Hash {
    let mut hasher = SyntheticDataSeedHash::new();
    hasher.update(commit_hash).write_var_bytes(domain_id.as_bytes()).update(evaluator_id).update(tip_at_selection);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_optimization_seed_is_a_function_of_commit_and_domain() {
        let commit = Hash::from(1u64);
        let seed = optimization_seed(commit, "quadratic");
        assert_eq!(seed, optimization_seed(commit, "quadratic"));
        assert_ne!(seed, optimization_seed(commit, "cubic"));
        assert_ne!(seed, optimization_seed(Hash::from(2u64), "quadratic"));
    }

    #[test]
    fn test_synthetic_seed_differs_per_evaluator() {
        let commit = Hash::from(3u64);
        let tip = Hash::from(4u64);
        let a = synthetic_data_seed(commit, "quadratic", PeerId::from_bytes([1; 32]), tip);
        let b = synthetic_data_seed(commit, "quadratic", PeerId::from_bytes([2; 32]), tip);
        assert_ne!(a, b);
    }

    #[test]
    fn test_quorum_seed_tracks_tip() {
        let optima_id = Uuid::from_u128(5);
        let a = quorum_seed(Hash::from(1u64), optima_id);
        let b = quorum_seed(Hash::from(2u64), optima_id);
        assert_ne!(a, b);
        assert_eq!(a, quorum_seed(Hash::from(1u64), optima_id));
    }
}
