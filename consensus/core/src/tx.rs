//! Block transactions: the tagged outcomes of the optimae pipeline plus the
//! bookkeeping records (task completions, reputation deltas, coin shares)
//! packaged alongside them.

use serde::{Deserialize, Serialize};

use doin_hashes::{Hash, HasherBase, TransactionHash};

use crate::encoding::{CanonicalDecode, CanonicalEncode, CanonicalReader, CanonicalWriter, EncodeError, EncodeResult};
use crate::optima::{ExperimentMeta, Optima, RejectReason};
use crate::peer::PeerId;
use crate::{OptimaId, TaskId};

/// One minted share of a block's coin distribution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinShare {
    pub peer_id: PeerId,
    pub amount: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Transaction {
    AcceptedOptima { optima: Optima, effective_increment: f64, reward_fraction: f64, meta: ExperimentMeta },
    RejectedOptima { optima_id: OptimaId, reason: RejectReason },
    CompletedTask { task_id: TaskId, result_hash: Hash },
    ReputationUpdate { peer_id: PeerId, delta: f64 },
    CoinDistribution { shares: Vec<CoinShare> },
}

const TAG_ACCEPTED_OPTIMA: u8 = 0;
const TAG_REJECTED_OPTIMA: u8 = 1;
const TAG_COMPLETED_TASK: u8 = 2;
const TAG_REPUTATION_UPDATE: u8 = 3;
const TAG_COIN_DISTRIBUTION: u8 = 4;

impl Transaction {
    /// Hash of the canonical transaction bytes; the merkle leaf.
    pub fn hash(&self) -> Hash {
        let mut hasher = TransactionHash::new();
        hasher.update(self.canonical_bytes());
        hasher.finalize()
    }
}

impl CanonicalEncode for Transaction {
    fn encode(&self, writer: &mut CanonicalWriter) {
        match self {
            Transaction::AcceptedOptima { optima, effective_increment, reward_fraction, meta } => {
                writer.write_u8(TAG_ACCEPTED_OPTIMA);
                optima.encode(writer);
                writer.write_f64(*effective_increment).write_f64(*reward_fraction);
                meta.encode(writer);
            }
            Transaction::RejectedOptima { optima_id, reason } => {
                writer.write_u8(TAG_REJECTED_OPTIMA).write_uuid(*optima_id).write_u8(reason.to_tag());
            }
            Transaction::CompletedTask { task_id, result_hash } => {
                writer.write_u8(TAG_COMPLETED_TASK).write_uuid(*task_id).write_hash(*result_hash);
            }
            Transaction::ReputationUpdate { peer_id, delta } => {
                writer.write_u8(TAG_REPUTATION_UPDATE).write_raw(peer_id.as_bytes()).write_f64(*delta);
            }
            Transaction::CoinDistribution { shares } => {
                writer.write_u8(TAG_COIN_DISTRIBUTION).write_len(shares.len());
                for share in shares {
                    writer.write_raw(share.peer_id.as_bytes()).write_u64(share.amount);
                }
            }
        }
    }
}

impl CanonicalDecode for Transaction {
    fn decode(reader: &mut CanonicalReader<'_>) -> EncodeResult<Self> {
        match reader.read_u8()? {
            TAG_ACCEPTED_OPTIMA => Ok(Transaction::AcceptedOptima {
                optima: Optima::decode(reader)?,
                effective_increment: reader.read_f64()?,
                reward_fraction: reader.read_f64()?,
                meta: ExperimentMeta::decode(reader)?,
            }),
            TAG_REJECTED_OPTIMA => Ok(Transaction::RejectedOptima {
                optima_id: reader.read_uuid()?,
                reason: RejectReason::from_tag(reader.read_u8()?)?,
            }),
            TAG_COMPLETED_TASK => {
                Ok(Transaction::CompletedTask { task_id: reader.read_uuid()?, result_hash: reader.read_hash()? })
            }
            TAG_REPUTATION_UPDATE => {
                Ok(Transaction::ReputationUpdate { peer_id: PeerId::decode(reader)?, delta: reader.read_f64()? })
            }
            TAG_COIN_DISTRIBUTION => {
                let len = reader.read_len()?;
                let mut shares = Vec::with_capacity(len.min(1024));
                for _ in 0..len {
                    shares.push(CoinShare { peer_id: PeerId::decode(reader)?, amount: reader.read_u64()? });
                }
                Ok(Transaction::CoinDistribution { shares })
            }
            other => Err(EncodeError::InvalidTag(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ResourceBudget;
    use crate::hashing;
    use uuid::Uuid;

    fn accepted() -> Transaction {
        let optima = Optima {
            optima_id: Uuid::from_u128(1),
            domain_id: "quadratic".into(),
            optimizer_id: PeerId::from_bytes([1; 32]),
            commit_hash: hashing::optima::commit_hash(&[1, 2, 3], &[7; 8]),
            reported_metric: -100.0,
            timestamp: 1000,
            budget: ResourceBudget::default(),
            parameters: vec![1, 2, 3],
            nonce: vec![7; 8],
        };
        Transaction::AcceptedOptima {
            optima,
            effective_increment: 0.25,
            reward_fraction: 1.0,
            meta: ExperimentMeta {
                median_verified: -99.99,
                quorum: vec![PeerId::from_bytes([2; 32])],
                optimization_seed: Hash::from(42u64),
            },
        }
    }

    #[test]
    fn test_transaction_roundtrip_all_variants() {
        let txs = vec![
            accepted(),
            Transaction::RejectedOptima { optima_id: Uuid::from_u128(2), reason: RejectReason::HashMismatch },
            Transaction::CompletedTask { task_id: Uuid::from_u128(3), result_hash: Hash::from(9u64) },
            Transaction::ReputationUpdate { peer_id: PeerId::from_bytes([4; 32]), delta: -3.0 },
            Transaction::CoinDistribution {
                shares: vec![
                    CoinShare { peer_id: PeerId::from_bytes([5; 32]), amount: 32 },
                    CoinShare { peer_id: PeerId::from_bytes([6; 32]), amount: 15 },
                ],
            },
        ];
        for tx in txs {
            let decoded = Transaction::from_canonical_bytes(&tx.canonical_bytes()).unwrap();
            assert_eq!(tx, decoded);
        }
    }

    #[test]
    fn test_transaction_hash_tracks_content() {
        let a = accepted();
        let b = Transaction::RejectedOptima { optima_id: Uuid::from_u128(2), reason: RejectReason::Expired };
        assert_ne!(a.hash(), b.hash());
        assert_eq!(a.hash(), accepted().hash());
    }
}
