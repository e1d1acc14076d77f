//! Replicated pull-based task queue.
//!
//! State transitions are message-driven (create/claim/complete floods). When
//! several peers race for the same task, the earliest claim by
//! `(block order, timestamp, peer id)` is authoritative everywhere, so all
//! honest nodes converge on the same claimant without coordination.

use std::collections::HashMap;

use doin_consensus_core::task::{ClaimPriority, Task, TaskState};
use doin_consensus_core::peer::PeerId;
use doin_consensus_core::TaskId;
use doin_hashes::Hash;

use doin_core::debug;

#[derive(Clone, Debug)]
struct TaskEntry {
    task: Task,
    claim: Option<ClaimPriority>,
    claimed_at_height: u64,
}

pub struct TaskQueue {
    claim_timeout_blocks: u64,
    tasks: HashMap<TaskId, TaskEntry>,
}

impl TaskQueue {
    pub fn new(claim_timeout_blocks: u64) -> Self {
        Self { claim_timeout_blocks, tasks: HashMap::new() }
    }

    /// Registers a task. Redeliveries of a known task are ignored.
    pub fn create(&mut self, task: Task) {
        self.tasks.entry(task.task_id).or_insert(TaskEntry { task, claim: None, claimed_at_height: 0 });
    }

    pub fn get(&self, task_id: TaskId) -> Option<&Task> {
        self.tasks.get(&task_id).map(|e| &e.task)
    }

    /// Records a claim observed at `height`. Returns true when the claim is
    /// (now) the authoritative one: the earliest seen by priority order.
    pub fn claim(&mut self, task_id: TaskId, claim: ClaimPriority, height: u64) -> bool {
        let Some(entry) = self.tasks.get_mut(&task_id) else {
            return false;
        };
        if entry.task.state == TaskState::Completed {
            return false;
        }
        match entry.claim {
            Some(existing) if existing <= claim => false,
            _ => {
                entry.claim = Some(claim);
                entry.claimed_at_height = height;
                entry.task.state = TaskState::Claimed;
                entry.task.claimant = Some(claim.claimant);
                true
            }
        }
    }

    /// Records a completion by the authoritative claimant. Returns the result
    /// reference for the pending `CompletedTask` transaction.
    pub fn complete(&mut self, task_id: TaskId, claimant: PeerId, result_hash: Hash) -> Option<Hash> {
        let entry = self.tasks.get_mut(&task_id)?;
        if entry.task.state != TaskState::Claimed || entry.task.claimant != Some(claimant) {
            return None;
        }
        entry.task.state = TaskState::Completed;
        Some(result_hash)
    }

    pub fn fail(&mut self, task_id: TaskId, claimant: PeerId) {
        if let Some(entry) = self.tasks.get_mut(&task_id) {
            if entry.task.claimant == Some(claimant) && entry.task.state == TaskState::Claimed {
                entry.task.state = TaskState::Failed;
            }
        }
    }

    /// Reopens claimed tasks abandoned past the claim timeout, plus failed
    /// ones. Returns the reopened task ids.
    pub fn reopen_abandoned(&mut self, height: u64) -> Vec<TaskId> {
        let timeout = self.claim_timeout_blocks;
        let mut reopened = Vec::new();
        for entry in self.tasks.values_mut() {
            let stale = entry.task.state == TaskState::Claimed && height > entry.claimed_at_height + timeout;
            if stale || entry.task.state == TaskState::Failed {
                debug!("reopening task {}", entry.task.task_id);
                entry.task.state = TaskState::Pending;
                entry.task.claimant = None;
                entry.claim = None;
                reopened.push(entry.task.task_id);
            }
        }
        reopened
    }

    /// The local queue view evaluators poll: pending tasks, highest priority
    /// (lowest value) first.
    pub fn pending(&self) -> Vec<&Task> {
        let mut pending: Vec<&Task> =
            self.tasks.values().filter(|e| e.task.state == TaskState::Pending).map(|e| &e.task).collect();
        pending.sort_by_key(|t| (t.priority, t.task_id));
        pending
    }

    pub fn remove(&mut self, task_id: TaskId) {
        self.tasks.remove(&task_id);
    }
}
