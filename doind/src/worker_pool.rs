//! OS-thread worker pool for heavy plugin work.
//!
//! The protocol loop never blocks on evaluation: jobs carry a wall-clock
//! deadline, run on pool threads against immutable snapshots and report back
//! over a result channel. A job finishing past its deadline reports
//! `Timeout`, which the coordinator treats as an evaluator no-show.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};

use doin_consensus_core::domain::{Domain, PluginError, PluginSet};
use doin_consensus_core::peer::PeerId;
use doin_consensus_core::{OptimaId, TaskId};
use doin_hashes::Hash;

use doin_core::trace;

/// An evaluation work order: re-measure the revealed parameters over this
/// evaluator's synthetic data.
pub struct EvaluationJob {
    pub optima_id: OptimaId,
    pub task_id: TaskId,
    pub evaluator: PeerId,
    pub domain: Domain,
    pub plugins: PluginSet,
    pub parameters: Arc<Vec<u8>>,
    pub synthetic_seed: Hash,
    pub deadline: Duration,
}

#[derive(Debug)]
pub struct EvaluationResult {
    pub optima_id: OptimaId,
    pub task_id: TaskId,
    pub evaluator: PeerId,
    pub outcome: Result<f64, PluginError>,
}

enum PoolMessage {
    Job(Box<EvaluationJob>),
    Shutdown,
}

pub struct WorkerPool {
    job_tx: Sender<PoolMessage>,
    result_rx: Receiver<EvaluationResult>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(threads: usize) -> Self {
        let (job_tx, job_rx) = unbounded::<PoolMessage>();
        let (result_tx, result_rx) = unbounded();

        let workers = (0..threads.max(1))
            .map(|id| {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                thread::Builder::new()
                    .name(format!("worker-{id}"))
                    .spawn(move || worker_loop(id, job_rx, result_tx))
                    .expect("spawning a worker thread")
            })
            .collect();

        Self { job_tx, result_rx, workers }
    }

    pub fn submit(&self, job: EvaluationJob) {
        // receiver outlives senders until shutdown, so send cannot fail earlier
        let _ = self.job_tx.send(PoolMessage::Job(Box::new(job)));
    }

    /// The channel the protocol loop selects over.
    pub fn results(&self) -> &Receiver<EvaluationResult> {
        &self.result_rx
    }

    pub fn shutdown(mut self) {
        for _ in &self.workers {
            let _ = self.job_tx.send(PoolMessage::Shutdown);
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(id: usize, job_rx: Receiver<PoolMessage>, result_tx: Sender<EvaluationResult>) {
    while let Ok(message) = job_rx.recv() {
        let job = match message {
            PoolMessage::Job(job) => job,
            PoolMessage::Shutdown => break,
        };

        let started = Instant::now();
        let outcome = job.plugins.infer.evaluate(&job.domain, &job.parameters, job.synthetic_seed);
        let outcome = if started.elapsed() > job.deadline { Err(PluginError::Timeout) } else { outcome };

        let result = EvaluationResult { optima_id: job.optima_id, task_id: job.task_id, evaluator: job.evaluator, outcome };
        if result_tx.send(result).is_err() {
            break;
        }
    }
    trace!("worker-{} exiting", id);
}
