use super::HasherExtensions;
use doin_hashes::{BlockHash, Hash, HasherBase};

/// Returns the block hash: `H(index ∥ previous_hash ∥ merkle_root ∥ timestamp)`.
///
/// The threshold and generator are carried in the header but deliberately not
/// hashed; the merkle root already commits to everything reward-relevant.
pub fn hash(index: u64, previous_hash: Hash, merkle_root: Hash, timestamp: u64) -> Hash {
    let mut hasher = BlockHash::new();
    hasher.write_u64(index).update(previous_hash).update(merkle_root).write_u64(timestamp);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use doin_hashes::ZERO_HASH;

    #[test]
    fn test_block_hashing_is_field_sensitive() {
        let base = hash(1, ZERO_HASH, Hash::from(7u64), 1000);
        assert_ne!(base, hash(2, ZERO_HASH, Hash::from(7u64), 1000));
        assert_ne!(base, hash(1, Hash::from(1u64), Hash::from(7u64), 1000));
        assert_ne!(base, hash(1, ZERO_HASH, Hash::from(8u64), 1000));
        assert_ne!(base, hash(1, ZERO_HASH, Hash::from(7u64), 1001));
        assert_eq!(base, hash(1, ZERO_HASH, Hash::from(7u64), 1000));
    }
}
