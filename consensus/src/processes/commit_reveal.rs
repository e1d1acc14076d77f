//! Two-phase optimae submission.
//!
//! A commit binds the optimizer to a parameter hash before disclosure; the
//! reveal is accepted only while the commit window is open and only when the
//! disclosed parameters hash back to the commitment. Windows are measured in
//! blocks, not wall time.

use std::collections::HashMap;

use doin_consensus_core::errors::optima::{OptimaError, OptimaResult};
use doin_consensus_core::optima::{Optima, OptimaCommit, OptimaReveal, OptimaState};
use doin_consensus_core::peer::PeerId;
use doin_consensus_core::sign;
use doin_consensus_core::OptimaId;

#[derive(Clone, Debug)]
struct PendingCommit {
    optima: Optima,
    commit_height: u64,
    state: OptimaState,
}

pub struct CommitRevealManager {
    window_blocks: u64,
    max_pending_per_peer: usize,
    pending: HashMap<OptimaId, PendingCommit>,
}

impl CommitRevealManager {
    pub fn new(window_blocks: u64, max_pending_per_peer: usize) -> Self {
        Self { window_blocks, max_pending_per_peer, pending: HashMap::new() }
    }

    fn open_commits_of(&self, peer: PeerId) -> usize {
        self.pending.values().filter(|p| p.optima.optimizer_id == peer && p.state == OptimaState::Committed).count()
    }

    /// Registers a commit observed at `height`. Verifies the signature, the
    /// duplicate rule and the per-peer rate limit; budget caps are the bounds
    /// validator's concern and checked by the caller beforehand.
    pub fn commit(&mut self, commit: OptimaCommit, height: u64) -> OptimaResult<()> {
        sign::verify_message(&commit.optimizer_id, &commit.signing_bytes(), &commit.signature)
            .map_err(|_| OptimaError::BadSignature(commit.optimizer_id))?;

        if self.pending.contains_key(&commit.optima_id) {
            return Err(OptimaError::Duplicate(commit.optima_id));
        }
        let open = self.open_commits_of(commit.optimizer_id);
        if open >= self.max_pending_per_peer {
            return Err(OptimaError::RateLimited(commit.optimizer_id, open));
        }

        let optima = Optima {
            optima_id: commit.optima_id,
            domain_id: commit.domain_id,
            optimizer_id: commit.optimizer_id,
            commit_hash: commit.commit_hash,
            reported_metric: commit.reported_metric,
            timestamp: commit.timestamp,
            budget: commit.budget,
            parameters: Vec::new(),
            nonce: Vec::new(),
        };
        self.pending.insert(commit.optima_id, PendingCommit { optima, commit_height: height, state: OptimaState::Committed });
        Ok(())
    }

    /// Processes a reveal observed at `height`. On success the assembled
    /// optima (with parameters and nonce) is returned for quorum selection.
    ///
    /// A hash mismatch removes the pending entry and surfaces as an error so
    /// the caller can reject the optima and slash the optimizer.
    pub fn reveal(&mut self, reveal: OptimaReveal, height: u64) -> OptimaResult<Optima> {
        let entry = self.pending.get(&reveal.optima_id).ok_or(OptimaError::NoCommit(reveal.optima_id))?;
        if entry.state != OptimaState::Committed || entry.optima.optimizer_id != reveal.optimizer_id {
            return Err(OptimaError::NoCommit(reveal.optima_id));
        }

        sign::verify_message(&reveal.optimizer_id, &reveal.signing_bytes(), &reveal.signature)
            .map_err(|_| OptimaError::BadSignature(reveal.optimizer_id))?;

        let deadline = entry.commit_height + self.window_blocks;
        if height > deadline {
            let late_by = height - deadline;
            self.pending.remove(&reveal.optima_id);
            return Err(OptimaError::LateReveal(reveal.optima_id, late_by));
        }

        let mut optima = entry.optima.clone();
        optima.parameters = reveal.parameters;
        optima.nonce = reveal.nonce;
        if !optima.reveal_binds() {
            self.pending.remove(&reveal.optima_id);
            return Err(OptimaError::HashMismatch(reveal.optima_id));
        }

        let entry = self.pending.get_mut(&reveal.optima_id).expect("entry present above");
        entry.optima = optima.clone();
        entry.state = OptimaState::Revealed;
        Ok(optima)
    }

    /// Drops commits whose reveal window closed before `height` and returns
    /// them for EXPIRED bookkeeping.
    pub fn expire(&mut self, height: u64) -> Vec<Optima> {
        let window = self.window_blocks;
        let expired: Vec<OptimaId> = self
            .pending
            .iter()
            .filter(|(_, p)| p.state == OptimaState::Committed && height > p.commit_height + window)
            .map(|(id, _)| *id)
            .collect();
        expired.into_iter().map(|id| self.pending.remove(&id).expect("collected above").optima).collect()
    }

    /// Removes a revealed optima once its verification round decided.
    pub fn settle(&mut self, optima_id: OptimaId) {
        self.pending.remove(&optima_id);
    }

    /// The commit's priority timestamp for dispute resolution.
    pub fn commit_timestamp(&self, optima_id: OptimaId) -> Option<u64> {
        self.pending.get(&optima_id).map(|p| p.optima.timestamp)
    }
}
