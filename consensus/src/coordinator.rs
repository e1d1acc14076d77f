//! Verification rounds: the VOTING stage of the optimae lifecycle.
//!
//! A round opens when a reveal passes quorum selection and closes when every
//! quorum vote arrived or the voting window elapsed. Decision logic lives in
//! the consensus facade; this module owns the per-optima round state.

use std::collections::HashMap;

use doin_consensus_core::errors::optima::{OptimaError, OptimaResult};
use doin_consensus_core::optima::{Optima, Vote};
use doin_consensus_core::peer::PeerId;
use doin_consensus_core::sign;
use doin_consensus_core::task::{Task, VERIFY_PRIORITY};
use doin_consensus_core::{OptimaId, TaskId, Uuid};
use doin_hashes::Hash;

/// Work handed to a quorum member: recompute the optimization, regenerate the
/// per-evaluator synthetic data, measure, vote.
#[derive(Clone, Debug)]
pub struct VerificationAssignment {
    pub task_id: TaskId,
    pub optima_id: OptimaId,
    pub evaluator: PeerId,
    pub optimization_seed: Hash,
    pub synthetic_seed: Hash,
}

impl VerificationAssignment {
    pub fn to_task(&self, payload_ref: Hash) -> Task {
        Task::new(self.task_id, VERIFY_PRIORITY, payload_ref)
    }
}

#[derive(Clone, Debug)]
pub struct VotingRound {
    pub optima: Optima,
    pub quorum: Vec<PeerId>,
    pub tip_at_selection: Hash,
    pub opened_at_height: u64,
    pub deadline_height: u64,
    pub votes: HashMap<PeerId, Vote>,
}

impl VotingRound {
    pub fn is_complete(&self) -> bool {
        self.votes.len() == self.quorum.len()
    }

    /// Quorum members that failed to vote.
    pub fn missing_voters(&self) -> Vec<PeerId> {
        self.quorum.iter().copied().filter(|p| !self.votes.contains_key(p)).collect()
    }
}

pub struct Coordinator {
    voting_timeout_blocks: u64,
    rounds: HashMap<OptimaId, VotingRound>,
}

impl Coordinator {
    pub fn new(voting_timeout_blocks: u64) -> Self {
        Self { voting_timeout_blocks, rounds: HashMap::new() }
    }

    /// Opens a round for a revealed optima and returns one verification
    /// assignment per quorum member, each with its own synthetic-data seed.
    pub fn begin_round(&mut self, optima: Optima, quorum: Vec<PeerId>, tip: Hash, height: u64) -> Vec<VerificationAssignment> {
        use doin_consensus_core::hashing::seed;

        let optimization_seed = seed::optimization_seed(optima.commit_hash, &optima.domain_id);
        let assignments = quorum
            .iter()
            .map(|evaluator| {
                let synthetic_seed = seed::synthetic_data_seed(optima.commit_hash, &optima.domain_id, *evaluator, tip);
                VerificationAssignment {
                    // derived, not random: every node names the task identically
                    task_id: Uuid::from_bytes(synthetic_seed.as_bytes()[..16].try_into().expect("hash is wider than a uuid")),
                    optima_id: optima.optima_id,
                    evaluator: *evaluator,
                    optimization_seed,
                    synthetic_seed,
                }
            })
            .collect();

        let round = VotingRound {
            optima,
            quorum,
            tip_at_selection: tip,
            opened_at_height: height,
            deadline_height: height + self.voting_timeout_blocks,
            votes: HashMap::new(),
        };
        self.rounds.insert(round.optima.optima_id, round);
        assignments
    }

    pub fn round(&self, optima_id: OptimaId) -> Option<&VotingRound> {
        self.rounds.get(&optima_id)
    }

    /// Records a vote. Verifies the signature, quorum membership and the
    /// one-vote-per-evaluator rule; returns whether the round is now complete.
    pub fn add_vote(&mut self, vote: Vote) -> OptimaResult<bool> {
        let round = self.rounds.get_mut(&vote.optima_id).ok_or(OptimaError::VotingClosed(vote.optima_id))?;
        if !round.quorum.contains(&vote.evaluator_id) {
            return Err(OptimaError::NotInQuorum(vote.evaluator_id, vote.optima_id));
        }
        if round.votes.contains_key(&vote.evaluator_id) {
            return Err(OptimaError::DuplicateVote(vote.evaluator_id, vote.optima_id));
        }

        let bytes = Vote::signing_bytes(vote.optima_id, vote.evaluator_id, vote.measured_metric);
        sign::verify_message(&vote.evaluator_id, &bytes, &vote.signature)
            .map_err(|_| OptimaError::BadSignature(vote.evaluator_id))?;

        round.votes.insert(vote.evaluator_id, vote);
        Ok(round.is_complete())
    }

    /// Removes and returns a completed round for decision.
    pub fn close_round(&mut self, optima_id: OptimaId) -> Option<VotingRound> {
        self.rounds.remove(&optima_id)
    }

    /// Removes and returns all rounds whose voting window elapsed at `height`.
    pub fn take_timed_out(&mut self, height: u64) -> Vec<VotingRound> {
        let due: Vec<OptimaId> =
            self.rounds.iter().filter(|(_, r)| height > r.deadline_height).map(|(id, _)| *id).collect();
        due.into_iter().map(|id| self.rounds.remove(&id).expect("collected above")).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use doin_consensus_core::domain::ResourceBudget;
    use doin_consensus_core::hashing;
    use doin_consensus_core::sign::{keypair_from_secret, peer_id_of, sign_message, Signature};

    fn optima() -> Optima {
        Optima {
            optima_id: Uuid::from_u128(1),
            domain_id: "quadratic".into(),
            optimizer_id: PeerId::from_bytes([1; 32]),
            commit_hash: hashing::optima::commit_hash(&[1], &[2]),
            reported_metric: -100.0,
            timestamp: 0,
            budget: ResourceBudget::default(),
            parameters: vec![1],
            nonce: vec![2],
        }
    }

    fn signed_vote(secret: u8, optima_id: OptimaId, metric: f64) -> (PeerId, Vote) {
        let keypair = keypair_from_secret(&[secret; 32]).unwrap();
        let evaluator = peer_id_of(&keypair);
        let signature = sign_message(&keypair, &Vote::signing_bytes(optima_id, evaluator, metric));
        (evaluator, Vote { optima_id, evaluator_id: evaluator, measured_metric: metric, signature })
    }

    #[test]
    fn test_round_completes_when_all_vote() {
        let mut coordinator = Coordinator::new(4);
        let (eval_a, vote_a) = signed_vote(1, Uuid::from_u128(1), -99.9);
        let (eval_b, vote_b) = signed_vote(2, Uuid::from_u128(1), -100.1);

        let assignments = coordinator.begin_round(optima(), vec![eval_a, eval_b], Hash::from(1u64), 10);
        assert_eq!(assignments.len(), 2);
        // per-evaluator synthetic seeds differ, shared optimization seed
        assert_ne!(assignments[0].synthetic_seed, assignments[1].synthetic_seed);
        assert_eq!(assignments[0].optimization_seed, assignments[1].optimization_seed);

        assert!(!coordinator.add_vote(vote_a).unwrap());
        assert!(coordinator.add_vote(vote_b).unwrap());

        let round = coordinator.close_round(Uuid::from_u128(1)).unwrap();
        assert!(round.is_complete());
        assert!(round.missing_voters().is_empty());
    }

    #[test]
    fn test_outsider_and_duplicate_votes_rejected() {
        let mut coordinator = Coordinator::new(4);
        let (eval_a, vote_a) = signed_vote(1, Uuid::from_u128(1), -99.9);
        let (_, outsider_vote) = signed_vote(9, Uuid::from_u128(1), -99.9);

        coordinator.begin_round(optima(), vec![eval_a], Hash::from(1u64), 10);
        assert!(matches!(coordinator.add_vote(outsider_vote), Err(OptimaError::NotInQuorum(..))));
        coordinator.add_vote(vote_a.clone()).unwrap();
        assert!(matches!(coordinator.add_vote(vote_a), Err(OptimaError::DuplicateVote(..))));
    }

    #[test]
    fn test_forged_vote_rejected() {
        let mut coordinator = Coordinator::new(4);
        let (eval_a, mut vote_a) = signed_vote(1, Uuid::from_u128(1), -99.9);
        coordinator.begin_round(optima(), vec![eval_a], Hash::from(1u64), 10);

        vote_a.measured_metric = -50.0; // altered after signing
        assert!(matches!(coordinator.add_vote(vote_a), Err(OptimaError::BadSignature(_))));
    }

    #[test]
    fn test_forged_signature_bytes_rejected() {
        let mut coordinator = Coordinator::new(4);
        let (eval_a, mut vote_a) = signed_vote(1, Uuid::from_u128(1), -99.9);
        coordinator.begin_round(optima(), vec![eval_a], Hash::from(1u64), 10);
        vote_a.signature = Signature([1; 64]);
        assert!(matches!(coordinator.add_vote(vote_a), Err(OptimaError::BadSignature(_))));
    }

    #[test]
    fn test_timeout_returns_partial_round() {
        let mut coordinator = Coordinator::new(4);
        let (eval_a, vote_a) = signed_vote(1, Uuid::from_u128(1), -99.9);
        let (eval_b, _) = signed_vote(2, Uuid::from_u128(1), -100.0);

        coordinator.begin_round(optima(), vec![eval_a, eval_b], Hash::from(1u64), 10);
        coordinator.add_vote(vote_a).unwrap();

        assert!(coordinator.take_timed_out(14).is_empty());
        let rounds = coordinator.take_timed_out(15);
        assert_eq!(rounds.len(), 1);
        assert!(!rounds[0].is_complete());
        assert_eq!(rounds[0].missing_voters(), vec![eval_b]);

        // votes for a closed round bounce
        let (_, late) = signed_vote(2, Uuid::from_u128(1), -100.0);
        assert!(matches!(coordinator.add_vote(late), Err(OptimaError::VotingClosed(_))));
    }
}
