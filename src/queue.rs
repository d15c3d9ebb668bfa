use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::context::lock;
use crate::models::{Job, UserId};

#[derive(Debug)]
pub struct RunningTask {
    pub job_id: Uuid,
    pub cancel: CancellationToken,
}

/// Jobs currently held by a worker, keyed by submitter.
#[derive(Debug, Default)]
pub struct RunningTable {
    tasks: HashMap<UserId, RunningTask>,
}

impl RunningTable {
    /// Records `job` as running and returns the token that aborts its transfer.
    pub fn start(&mut self, job: &Job) -> CancellationToken {
        let cancel = CancellationToken::new();
        self.tasks.insert(
            job.submitter_id,
            RunningTask {
                job_id: job.id,
                cancel: cancel.clone(),
            },
        );
        cancel
    }

    /// Removes the submitter's entry only if it still belongs to `job_id`.
    pub fn finish(&mut self, submitter_id: UserId, job_id: Uuid) -> bool {
        match self.tasks.get(&submitter_id) {
            Some(task) if task.job_id == job_id => {
                self.tasks.remove(&submitter_id);
                true
            }
            _ => false,
        }
    }

    pub fn remove(&mut self, submitter_id: UserId) -> Option<RunningTask> {
        self.tasks.remove(&submitter_id)
    }

    pub fn contains(&self, submitter_id: UserId) -> bool {
        self.tasks.contains_key(&submitter_id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }
}

/// What a cancel request hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cancelled {
    /// The submitter's running job, by id.
    Running(Uuid),
    /// Ids of the submitter's jobs taken out of the queue.
    Pending(Vec<Uuid>),
}

/// Unbounded FIFO of admitted jobs waiting for a worker.
#[derive(Debug, Default)]
pub struct JobQueue {
    pending: Mutex<VecDeque<Job>>,
    notify: Notify,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends to the tail and returns the 1-based queue position.
    pub fn enqueue(&self, job: Job) -> usize {
        let position = {
            let mut pending = lock(&self.pending);
            pending.push_back(job);
            pending.len()
        };
        self.notify.notify_one();
        position
    }

    pub fn try_dequeue_nowait(&self) -> Option<Job> {
        lock(&self.pending).pop_front()
    }

    /// Calls `take` whenever the queue may have work, until it yields a value.
    ///
    /// `take` runs synchronously, so callers can pop a job and record it
    /// elsewhere under their own locks without an await in between.
    pub async fn wait_for<T>(&self, mut take: impl FnMut(&Self) -> Option<T>) -> T {
        loop {
            let notified = self.notify.notified();

            if let Some(taken) = take(self) {
                // Hand the wakeup on so a second idle worker is not left waiting.
                if self.len() > 0 {
                    self.notify.notify_one();
                }
                return taken;
            }

            notified.await;
        }
    }

    /// Cancels whatever the submitter has in flight or waiting.
    ///
    /// A running entry wins: it is dropped from `running` and its token fired,
    /// and the pending queue is left alone. Otherwise every pending job of the
    /// submitter is removed in one pass, keeping the others in order.
    pub fn cancel_by_submitter(
        &self,
        submitter_id: UserId,
        running: &mut RunningTable,
    ) -> Option<Cancelled> {
        if let Some(task) = running.remove(submitter_id) {
            task.cancel.cancel();
            tracing::info!(submitter = submitter_id, job = %task.job_id, "running job cancelled");
            return Some(Cancelled::Running(task.job_id));
        }

        let mut removed = Vec::new();
        lock(&self.pending).retain(|job| {
            let keep = job.submitter_id != submitter_id;
            if !keep {
                removed.push(job.id);
            }
            keep
        });

        if removed.is_empty() {
            return None;
        }

        tracing::info!(submitter = submitter_id, removed = removed.len(), "queued job cancelled");
        Some(Cancelled::Pending(removed))
    }

    pub fn position_of(&self, submitter_id: UserId) -> Option<usize> {
        lock(&self.pending)
            .iter()
            .position(|job| job.submitter_id == submitter_id)
            .map(|index| index + 1)
    }

    pub fn len(&self) -> usize {
        lock(&self.pending).len()
    }
}
