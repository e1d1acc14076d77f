//! Optimae: units of optimization work moving through the commit-reveal,
//! verification and decision pipeline.

use serde::{Deserialize, Serialize};

use doin_hashes::Hash;

use crate::domain::ResourceBudget;
use crate::encoding::{CanonicalDecode, CanonicalEncode, CanonicalReader, CanonicalWriter, EncodeError, EncodeResult};
use crate::hashing;
use crate::peer::PeerId;
use crate::sign::Signature;
use crate::{DomainId, OptimaId};

/// Lifecycle of an optima. Terminal states are immutable and recorded in
/// exactly one block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimaState {
    Committed,
    Revealed,
    Voting,
    Accepted,
    Rejected,
    Expired,
}

impl OptimaState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OptimaState::Accepted | OptimaState::Rejected | OptimaState::Expired)
    }
}

/// Machine-readable reason attached to a `RejectedOptima` transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    HashMismatch,
    Discrepancy,
    InsufficientQuorum,
    BoundsExceeded,
    SeedMismatch,
    Expired,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::HashMismatch => "hash_mismatch",
            RejectReason::Discrepancy => "discrepancy",
            RejectReason::InsufficientQuorum => "insufficient_quorum",
            RejectReason::BoundsExceeded => "bounds_exceeded",
            RejectReason::SeedMismatch => "seed_mismatch",
            RejectReason::Expired => "expired",
        }
    }

    pub(crate) fn to_tag(self) -> u8 {
        match self {
            RejectReason::HashMismatch => 0,
            RejectReason::Discrepancy => 1,
            RejectReason::InsufficientQuorum => 2,
            RejectReason::BoundsExceeded => 3,
            RejectReason::SeedMismatch => 4,
            RejectReason::Expired => 5,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> EncodeResult<Self> {
        Ok(match tag {
            0 => RejectReason::HashMismatch,
            1 => RejectReason::Discrepancy,
            2 => RejectReason::InsufficientQuorum,
            3 => RejectReason::BoundsExceeded,
            4 => RejectReason::SeedMismatch,
            5 => RejectReason::Expired,
            other => return Err(EncodeError::InvalidTag(other)),
        })
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of optimization work. `parameters` and `nonce` are empty until the
/// reveal phase binds them against `commit_hash`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Optima {
    pub optima_id: OptimaId,
    pub domain_id: DomainId,
    pub optimizer_id: PeerId,
    pub commit_hash: Hash,
    pub reported_metric: f64,
    /// Commit wall-clock in milliseconds; the priority timestamp for disputes.
    pub timestamp: u64,
    pub budget: ResourceBudget,
    pub parameters: Vec<u8>,
    pub nonce: Vec<u8>,
}

impl Optima {
    /// Whether the revealed parameters and nonce hash back to the commitment.
    pub fn reveal_binds(&self) -> bool {
        hashing::optima::commit_hash(&self.parameters, &self.nonce) == self.commit_hash
    }
}

impl CanonicalEncode for Optima {
    fn encode(&self, writer: &mut CanonicalWriter) {
        writer
            .write_uuid(self.optima_id)
            .write_str(&self.domain_id)
            .write_raw(self.optimizer_id.as_bytes())
            .write_hash(self.commit_hash)
            .write_f64(self.reported_metric)
            .write_u64(self.timestamp)
            .write_u64(self.budget.training_seconds)
            .write_u64(self.budget.memory_mb)
            .write_var_bytes(&self.parameters)
            .write_var_bytes(&self.nonce);
    }
}

impl CanonicalDecode for Optima {
    fn decode(reader: &mut CanonicalReader<'_>) -> EncodeResult<Self> {
        Ok(Optima {
            optima_id: reader.read_uuid()?,
            domain_id: reader.read_str()?,
            optimizer_id: PeerId::decode(reader)?,
            commit_hash: reader.read_hash()?,
            reported_metric: reader.read_f64()?,
            timestamp: reader.read_u64()?,
            budget: ResourceBudget { training_seconds: reader.read_u64()?, memory_mb: reader.read_u64()? },
            parameters: reader.read_var_bytes()?,
            nonce: reader.read_var_bytes()?,
        })
    }
}

/// Phase-one submission: binds the optimizer to a parameter hash and a
/// reported metric without disclosing the parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OptimaCommit {
    pub optima_id: OptimaId,
    pub domain_id: DomainId,
    pub optimizer_id: PeerId,
    pub commit_hash: Hash,
    pub reported_metric: f64,
    pub timestamp: u64,
    pub budget: ResourceBudget,
    pub signature: Signature,
}

impl OptimaCommit {
    /// The canonical bytes covered by the commit signature.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut writer = CanonicalWriter::new();
        writer
            .write_uuid(self.optima_id)
            .write_str(&self.domain_id)
            .write_raw(self.optimizer_id.as_bytes())
            .write_hash(self.commit_hash)
            .write_f64(self.reported_metric)
            .write_u64(self.timestamp)
            .write_u64(self.budget.training_seconds)
            .write_u64(self.budget.memory_mb);
        writer.finish()
    }
}

impl CanonicalEncode for OptimaCommit {
    fn encode(&self, writer: &mut CanonicalWriter) {
        writer
            .write_uuid(self.optima_id)
            .write_str(&self.domain_id)
            .write_raw(self.optimizer_id.as_bytes())
            .write_hash(self.commit_hash)
            .write_f64(self.reported_metric)
            .write_u64(self.timestamp)
            .write_u64(self.budget.training_seconds)
            .write_u64(self.budget.memory_mb);
        self.signature.encode(writer);
    }
}

impl CanonicalDecode for OptimaCommit {
    fn decode(reader: &mut CanonicalReader<'_>) -> EncodeResult<Self> {
        Ok(OptimaCommit {
            optima_id: reader.read_uuid()?,
            domain_id: reader.read_str()?,
            optimizer_id: PeerId::decode(reader)?,
            commit_hash: reader.read_hash()?,
            reported_metric: reader.read_f64()?,
            timestamp: reader.read_u64()?,
            budget: ResourceBudget { training_seconds: reader.read_u64()?, memory_mb: reader.read_u64()? },
            signature: Signature::decode(reader)?,
        })
    }
}

/// Phase-two submission: discloses the parameters and nonce bound by a prior
/// commit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OptimaReveal {
    pub optima_id: OptimaId,
    pub optimizer_id: PeerId,
    pub parameters: Vec<u8>,
    pub nonce: Vec<u8>,
    pub signature: Signature,
}

impl OptimaReveal {
    /// The canonical bytes covered by the reveal signature.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut writer = CanonicalWriter::new();
        writer
            .write_uuid(self.optima_id)
            .write_raw(self.optimizer_id.as_bytes())
            .write_var_bytes(&self.parameters)
            .write_var_bytes(&self.nonce);
        writer.finish()
    }
}

impl CanonicalEncode for OptimaReveal {
    fn encode(&self, writer: &mut CanonicalWriter) {
        writer
            .write_uuid(self.optima_id)
            .write_raw(self.optimizer_id.as_bytes())
            .write_var_bytes(&self.parameters)
            .write_var_bytes(&self.nonce);
        self.signature.encode(writer);
    }
}

impl CanonicalDecode for OptimaReveal {
    fn decode(reader: &mut CanonicalReader<'_>) -> EncodeResult<Self> {
        Ok(OptimaReveal {
            optima_id: reader.read_uuid()?,
            optimizer_id: PeerId::decode(reader)?,
            parameters: reader.read_var_bytes()?,
            nonce: reader.read_var_bytes()?,
            signature: Signature::decode(reader)?,
        })
    }
}

/// A verification vote by a selected quorum member. One vote per
/// `(optima_id, evaluator_id)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub optima_id: OptimaId,
    pub evaluator_id: PeerId,
    pub measured_metric: f64,
    pub signature: Signature,
}

impl Vote {
    /// The canonical bytes covered by the vote signature.
    pub fn signing_bytes(optima_id: OptimaId, evaluator_id: PeerId, measured_metric: f64) -> Vec<u8> {
        let mut writer = CanonicalWriter::new();
        writer.write_uuid(optima_id).write_raw(evaluator_id.as_bytes()).write_f64(measured_metric);
        writer.finish()
    }
}

impl CanonicalEncode for Vote {
    fn encode(&self, writer: &mut CanonicalWriter) {
        writer.write_uuid(self.optima_id).write_raw(self.evaluator_id.as_bytes()).write_f64(self.measured_metric);
        self.signature.encode(writer);
    }
}

impl CanonicalDecode for Vote {
    fn decode(reader: &mut CanonicalReader<'_>) -> EncodeResult<Self> {
        Ok(Vote {
            optima_id: reader.read_uuid()?,
            evaluator_id: PeerId::decode(reader)?,
            measured_metric: reader.read_f64()?,
            signature: Signature::decode(reader)?,
        })
    }
}

/// Verification context recorded alongside an accepted optima.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExperimentMeta {
    pub median_verified: f64,
    pub quorum: Vec<PeerId>,
    pub optimization_seed: Hash,
}

impl CanonicalEncode for ExperimentMeta {
    fn encode(&self, writer: &mut CanonicalWriter) {
        writer.write_f64(self.median_verified);
        writer.write_len(self.quorum.len());
        for peer in &self.quorum {
            writer.write_raw(peer.as_bytes());
        }
        writer.write_hash(self.optimization_seed);
    }
}

impl CanonicalDecode for ExperimentMeta {
    fn decode(reader: &mut CanonicalReader<'_>) -> EncodeResult<Self> {
        let median_verified = reader.read_f64()?;
        let len = reader.read_len()?;
        let mut quorum = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            quorum.push(PeerId::decode(reader)?);
        }
        Ok(ExperimentMeta { median_verified, quorum, optimization_seed: reader.read_hash()? })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn sample_optima() -> Optima {
        Optima {
            optima_id: Uuid::from_u128(7),
            domain_id: "quadratic".into(),
            optimizer_id: PeerId::from_bytes([3; 32]),
            commit_hash: hashing::optima::commit_hash(&[1, 2, 3], &[9; 16]),
            reported_metric: -100.0,
            timestamp: 1_700_000_000_000,
            budget: ResourceBudget { training_seconds: 60, memory_mb: 512 },
            parameters: vec![1, 2, 3],
            nonce: vec![9; 16],
        }
    }

    #[test]
    fn test_optima_roundtrip() {
        let optima = sample_optima();
        let decoded = Optima::from_canonical_bytes(&optima.canonical_bytes()).unwrap();
        assert_eq!(optima, decoded);
    }

    #[test]
    fn test_reveal_binding() {
        let mut optima = sample_optima();
        assert!(optima.reveal_binds());

        // any single-bit change in parameters or nonce must break the binding
        optima.parameters[0] ^= 1;
        assert!(!optima.reveal_binds());
        optima.parameters[0] ^= 1;
        optima.nonce[0] ^= 1;
        assert!(!optima.reveal_binds());
    }

    #[test]
    fn test_reject_reason_tags_roundtrip() {
        for reason in [
            RejectReason::HashMismatch,
            RejectReason::Discrepancy,
            RejectReason::InsufficientQuorum,
            RejectReason::BoundsExceeded,
            RejectReason::SeedMismatch,
            RejectReason::Expired,
        ] {
            assert_eq!(RejectReason::from_tag(reason.to_tag()).unwrap(), reason);
        }
        assert!(RejectReason::from_tag(99).is_err());
    }

    #[test]
    fn test_vote_roundtrip() {
        let vote = Vote {
            optima_id: Uuid::from_u128(11),
            evaluator_id: PeerId::from_bytes([5; 32]),
            measured_metric: -99.7,
            signature: Signature([8; 64]),
        };
        let decoded = Vote::from_canonical_bytes(&vote.canonical_bytes()).unwrap();
        assert_eq!(vote, decoded);
    }
}
