//! Replicated work items pulled by evaluators.

use serde::{Deserialize, Serialize};

use doin_hashes::Hash;

use crate::peer::PeerId;
use crate::TaskId;

/// Priority class of a task; lower sorts first. Verification tasks created by
/// quorum selection use `VERIFY_PRIORITY`.
pub type TaskPriority = u8;

pub const VERIFY_PRIORITY: TaskPriority = 0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Pending,
    Claimed,
    Completed,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub priority: TaskPriority,
    /// Hash reference to the task payload (e.g. the optima under verification).
    pub payload_ref: Hash,
    pub state: TaskState,
    pub claimant: Option<PeerId>,
}

impl Task {
    pub fn new(task_id: TaskId, priority: TaskPriority, payload_ref: Hash) -> Self {
        Self { task_id, priority, payload_ref, state: TaskState::Pending, claimant: None }
    }
}

/// Ordering key deciding which of several competing claims is authoritative:
/// earliest by block order, then timestamp, then peer id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClaimPriority {
    pub block_height: u64,
    pub timestamp: u64,
    pub claimant: PeerId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_priority_ordering() {
        let a = ClaimPriority { block_height: 1, timestamp: 10, claimant: PeerId::from_bytes([1; 32]) };
        let b = ClaimPriority { block_height: 1, timestamp: 10, claimant: PeerId::from_bytes([2; 32]) };
        let c = ClaimPriority { block_height: 1, timestamp: 9, claimant: PeerId::from_bytes([9; 32]) };
        let d = ClaimPriority { block_height: 0, timestamp: 99, claimant: PeerId::from_bytes([9; 32]) };

        // block order dominates, then timestamp, then peer id
        assert!(d < c && c < a && a < b);
    }
}
