use serde::{Deserialize, Serialize};

use doin_hashes::Hash;
use doin_merkle::calc_merkle_root;

use crate::encoding::{CanonicalDecode, CanonicalEncode, CanonicalReader, CanonicalWriter, EncodeResult};
use crate::hashing;
use crate::peer::PeerId;
use crate::tx::Transaction;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Header {
    /// Cached block hash, `H(index ∥ previous_hash ∥ merkle_root ∥ timestamp)`
    pub hash: Hash,
    pub version: u16,
    pub index: u64,
    pub previous_hash: Hash,
    /// Block wall-clock in milliseconds; monotone non-decreasing along a chain
    pub timestamp: u64,
    pub merkle_root: Hash,
    /// Threshold the generator had to cross to emit this block
    pub threshold_used: f64,
    pub generator_id: PeerId,
}

impl Header {
    pub fn new(
        version: u16,
        index: u64,
        previous_hash: Hash,
        timestamp: u64,
        merkle_root: Hash,
        threshold_used: f64,
        generator_id: PeerId,
    ) -> Self {
        let hash = hashing::block::hash(index, previous_hash, merkle_root, timestamp);
        Self { hash, version, index, previous_hash, timestamp, merkle_root, threshold_used, generator_id }
    }

    /// Recomputes the hash from the header fields it covers.
    pub fn recompute_hash(&self) -> Hash {
        hashing::block::hash(self.index, self.previous_hash, self.merkle_root, self.timestamp)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub header: Header,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(
        version: u16,
        index: u64,
        previous_hash: Hash,
        timestamp: u64,
        threshold_used: f64,
        generator_id: PeerId,
        transactions: Vec<Transaction>,
    ) -> Self {
        let merkle_root = merkle_root_of(&transactions);
        Self {
            header: Header::new(version, index, previous_hash, timestamp, merkle_root, threshold_used, generator_id),
            transactions,
        }
    }

    #[inline]
    pub fn hash(&self) -> Hash {
        self.header.hash
    }

    #[inline]
    pub fn index(&self) -> u64 {
        self.header.index
    }

    /// Recomputes the merkle root over the contained transactions.
    pub fn recompute_merkle_root(&self) -> Hash {
        merkle_root_of(&self.transactions)
    }
}

pub fn merkle_root_of(transactions: &[Transaction]) -> Hash {
    calc_merkle_root(transactions.iter().map(|tx| tx.hash()))
}

impl CanonicalEncode for Block {
    fn encode(&self, writer: &mut CanonicalWriter) {
        writer
            .write_u16(self.header.version)
            .write_u64(self.header.index)
            .write_hash(self.header.previous_hash)
            .write_u64(self.header.timestamp)
            .write_hash(self.header.merkle_root)
            .write_f64(self.header.threshold_used)
            .write_raw(self.header.generator_id.as_bytes());
        writer.write_len(self.transactions.len());
        for tx in &self.transactions {
            tx.encode(writer);
        }
    }
}

impl CanonicalDecode for Block {
    fn decode(reader: &mut CanonicalReader<'_>) -> EncodeResult<Self> {
        let version = reader.read_u16()?;
        let index = reader.read_u64()?;
        let previous_hash = reader.read_hash()?;
        let timestamp = reader.read_u64()?;
        let merkle_root = reader.read_hash()?;
        let threshold_used = reader.read_f64()?;
        let generator_id = PeerId::decode(reader)?;
        let len = reader.read_len()?;
        let mut transactions = Vec::with_capacity(len.min(4096));
        for _ in 0..len {
            transactions.push(Transaction::decode(reader)?);
        }
        // the cached hash is always rederived, never trusted from the wire
        let header = Header::new(version, index, previous_hash, timestamp, merkle_root, threshold_used, generator_id);
        Ok(Block { header, transactions })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optima::RejectReason;
    use doin_hashes::ZERO_HASH;
    use uuid::Uuid;

    fn sample_block() -> Block {
        Block::new(
            1,
            5,
            Hash::from(4u64),
            1_700_000_000_500,
            12.5,
            PeerId::from_bytes([9; 32]),
            vec![Transaction::RejectedOptima { optima_id: Uuid::from_u128(77), reason: RejectReason::Expired }],
        )
    }

    #[test]
    fn test_block_hash_covers_spec_fields_only() {
        let block = sample_block();
        assert_eq!(block.hash(), block.header.recompute_hash());

        // generator and threshold are carried but not hashed
        let mut other = sample_block();
        other.header.generator_id = PeerId::from_bytes([1; 32]);
        other.header.threshold_used = 99.0;
        assert_eq!(block.hash(), other.header.recompute_hash());
    }

    #[test]
    fn test_merkle_root_matches_transactions() {
        let block = sample_block();
        assert_eq!(block.header.merkle_root, block.recompute_merkle_root());

        let empty = Block::new(1, 0, ZERO_HASH, 0, 1.0, PeerId::default(), vec![]);
        assert_eq!(empty.header.merkle_root, ZERO_HASH);
    }

    #[test]
    fn test_block_roundtrip() {
        let block = sample_block();
        let decoded = Block::from_canonical_bytes(&block.canonical_bytes()).unwrap();
        assert_eq!(block, decoded);
        assert_eq!(block.hash(), decoded.hash());
    }
}
