use super::HasherExtensions;
use doin_hashes::{Hash, HasherBase, OptimaCommitHash};

/// The commitment binding parameters and nonce:
/// `H(canonical(parameters) ∥ nonce)`.
pub fn commit_hash(parameters: &[u8], nonce: &[u8]) -> Hash {
    let mut hasher = OptimaCommitHash::new();
    hasher.write_var_bytes(parameters).update(nonce);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_hash_binds_both_inputs() {
        let base = commit_hash(&[1, 2, 3], &[9, 9]);
        assert_eq!(base, commit_hash(&[1, 2, 3], &[9, 9]));
        assert_ne!(base, commit_hash(&[1, 2, 4], &[9, 9]));
        assert_ne!(base, commit_hash(&[1, 2, 3], &[9, 8]));
    }

    #[test]
    fn test_length_prefix_prevents_boundary_shifts() {
        // moving a byte across the parameters/nonce boundary must change the digest
        assert_ne!(commit_hash(&[1, 2], &[3]), commit_hash(&[1], &[2, 3]));
    }
}
