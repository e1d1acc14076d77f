use doin_hashes::{Hash, HasherBase, MerkleBranchHash, ZERO_HASH};

/// Computes the merkle root over the given leaf hashes. The tree is padded to
/// the next power of two with `ZERO_HASH` on the right.
pub fn calc_merkle_root(hashes: impl ExactSizeIterator<Item = Hash>) -> Hash {
    if hashes.len() == 0 {
        return ZERO_HASH;
    }
    let next_pot = hashes.len().next_power_of_two();
    let vec_len = 2 * next_pot - 1;

    let mut merkles = vec![None; vec_len];
    for (i, hash) in hashes.enumerate() {
        merkles[i] = Some(hash);
    }
    let mut offset = next_pot;
    for i in (0..vec_len - 1).step_by(2) {
        if merkles[i].is_none() {
            merkles[offset] = None;
        } else {
            merkles[offset] = Some(merkle_hash(merkles[i].unwrap(), merkles[i + 1].unwrap_or(ZERO_HASH)));
        }
        offset += 1
    }
    merkles.last().unwrap().unwrap()
}

pub fn merkle_hash(left: Hash, right: Hash) -> Hash {
    let mut hasher = MerkleBranchHash::new();
    hasher.update(left).update(right);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use doin_hashes::{HasherBase, TransactionHash};
    use std::iter;

    fn make_hash(data: &[u8]) -> Hash {
        let mut hasher = TransactionHash::new();
        hasher.update(data);
        hasher.finalize()
    }

    #[test]
    fn test_empty_returns_zero_hash() {
        let root = calc_merkle_root(std::iter::empty());
        assert_eq!(root, ZERO_HASH, "Empty input should return ZERO_HASH");
    }

    #[test]
    fn test_single_entry_returns_hash() {
        let entry = make_hash(b"single_entry");
        let root = calc_merkle_root(iter::once(entry));
        assert_eq!(root, entry);
    }

    #[test]
    fn test_two_entries_returns_hash_of_both() {
        let h1 = make_hash(b"entry1");
        let h2 = make_hash(b"entry2");

        let root = calc_merkle_root([h1, h2].into_iter());
        let expected = merkle_hash(h1, h2);
        assert_eq!(root, expected, "Two entries should hash directly together");
    }

    #[test]
    fn test_three_entries() {
        // Tree structure for 3 entries (next_pot = 4):
        // Level 0: h1, h2, h3, None
        // Level 1: hash(h1,h2), hash(h3,ZERO)
        // Level 2: hash(hash(h1,h2), hash(h3,ZERO))
        let h1 = make_hash(b"h1");
        let h2 = make_hash(b"h2");
        let h3 = make_hash(b"h3");

        let root = calc_merkle_root([h1, h2, h3].into_iter());

        let left = merkle_hash(h1, h2);
        let right = merkle_hash(h3, ZERO_HASH);
        let expected = merkle_hash(left, right);

        assert_eq!(root, expected, "Three entries should build correct tree");
    }

    #[test]
    fn test_consistency_multiple_calls() {
        let hashes: Vec<Hash> = (0..5).map(|i| make_hash(&[i])).collect();

        let root1 = calc_merkle_root(hashes.clone().into_iter());
        let root2 = calc_merkle_root(hashes.into_iter());

        assert_eq!(root1, root2, "Multiple calls with same input should produce same result");
    }

    #[test]
    fn test_order_matters() {
        let h1 = make_hash(b"h1");
        let h2 = make_hash(b"h2");

        let root1 = calc_merkle_root([h1, h2].into_iter());
        let root2 = calc_merkle_root([h2, h1].into_iter());

        assert_ne!(root1, root2, "Order of hashes should matter");
    }
}
