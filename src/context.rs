use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::access::AccessGuard;
use crate::config::Config;
use crate::models::{Job, UserId, UserState};
use crate::progress::ProgressBoard;
use crate::queue::{Cancelled, JobQueue, RunningTable};

/// Locks `mutex`, recovering the data if a previous holder panicked.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!("mutex was poisoned by a panicking holder, recovering");
            poisoned.into_inner()
        }
    }
}

/// Everything the submission flow, workers and HTTP handlers share.
/// Built once at startup and handed around behind an `Arc`.
///
/// `admission` serialises the steps that move a job between the queue and
/// the running table: submit, claiming the next job, and cancel. Take it
/// before any of the other locks.
#[derive(Debug)]
pub struct Context {
    pub config: Config,
    pub(crate) admission: Mutex<()>,
    pub queue: JobQueue,
    pub running: Mutex<RunningTable>,
    pub users: Mutex<HashMap<UserId, UserState>>,
    pub access: Mutex<AccessGuard>,
    pub progress: ProgressBoard,
}

impl Context {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            admission: Mutex::new(()),
            queue: JobQueue::new(),
            running: Mutex::new(RunningTable::default()),
            users: Mutex::new(HashMap::new()),
            access: Mutex::new(AccessGuard::new()),
            progress: ProgressBoard::new(),
        }
    }

    pub fn user_state(&self, user_id: UserId) -> UserState {
        lock(&self.users).get(&user_id).copied().unwrap_or_default()
    }

    pub fn running_count(&self) -> usize {
        lock(&self.running).len()
    }

    pub fn cancel(&self, submitter_id: UserId) -> bool {
        let cancelled = {
            let _admission = lock(&self.admission);
            let mut running = lock(&self.running);
            self.queue.cancel_by_submitter(submitter_id, &mut running)
        };

        match cancelled {
            // The worker reports the running job's final state itself.
            Some(Cancelled::Running(job_id)) => {
                tracing::debug!(job = %job_id, "waiting for worker to discard cancelled job");
                true
            }
            Some(Cancelled::Pending(ids)) => {
                self.progress.mark_cancelled(&ids);
                true
            }
            None => false,
        }
    }

    /// Waits for the next queued job and records it as running before any
    /// submit or cancel can observe the queue again.
    pub(crate) async fn take_next(&self) -> (Job, CancellationToken) {
        self.queue
            .wait_for(|queue| {
                let _admission = lock(&self.admission);
                let job = queue.try_dequeue_nowait()?;
                let cancel = self.begin(&job);
                Some((job, cancel))
            })
            .await
    }

    /// Records a dequeued job as running and flags its submitter as busy.
    pub(crate) fn begin(&self, job: &Job) -> CancellationToken {
        let cancel = lock(&self.running).start(job);
        lock(&self.users).insert(
            job.submitter_id,
            UserState {
                downloading: true,
                cooldown_until: None,
            },
        );
        cancel
    }

    /// Resets the submitter to idle-with-cooldown and forgets the running entry.
    pub(crate) fn finish(&self, job: &Job) {
        lock(&self.users).insert(
            job.submitter_id,
            UserState {
                downloading: false,
                cooldown_until: Some(Instant::now() + self.config.standard_cooldown),
            },
        );
        lock(&self.running).finish(job.submitter_id, job.id);
    }
}
