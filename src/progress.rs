use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::context::lock;
use crate::models::{Job, State, UserId};

/// Where status lines for a job go. Each call replaces the previous line.
pub trait ProgressSink: Send + Sync {
    fn notify(&self, job: &Job, text: &str);
}

#[derive(Serialize, Debug, Clone)]
pub struct JobStatus {
    pub id: Uuid,
    pub submitter_id: UserId,
    pub state: State,
    pub message: String,
    #[serde(skip)]
    finished_at: Option<Instant>,
}

impl JobStatus {
    fn new(job: &Job, state: State, message: &str) -> Self {
        Self {
            id: job.id,
            submitter_id: job.submitter_id,
            state,
            message: message.to_owned(),
            finished_at: None,
        }
    }

    fn transition(&mut self, state: State) {
        self.finished_at = state.is_terminal().then(Instant::now);
        self.state = state;
    }
}

/// In-memory status of every known job, read back over HTTP.
#[derive(Debug, Default)]
pub struct ProgressBoard {
    jobs: Mutex<HashMap<Uuid, JobStatus>>,
}

impl ProgressBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, job: &Job) {
        lock(&self.jobs).insert(job.id, JobStatus::new(job, State::Waiting, "Added to queue."));
    }

    pub fn set_state(&self, job: &Job, state: State) {
        lock(&self.jobs)
            .entry(job.id)
            .or_insert_with(|| JobStatus::new(job, State::Waiting, ""))
            .transition(state);
    }

    /// Marks jobs taken out of the queue as cancelled. Jobs that already
    /// left `Waiting` are not touched.
    pub fn mark_cancelled(&self, ids: &[Uuid]) {
        let mut jobs = lock(&self.jobs);

        for id in ids {
            if let Some(status) = jobs.get_mut(id).filter(|status| status.state == State::Waiting) {
                status.message = "Download cancelled.".to_owned();
                status.transition(State::Cancelled);
            }
        }
    }

    pub fn get(&self, id: Uuid) -> Option<JobStatus> {
        lock(&self.jobs).get(&id).cloned()
    }

    /// Lists live entries, dropping finished ones older than `expire_after`.
    pub fn snapshot(&self, expire_after: Duration) -> Vec<JobStatus> {
        let mut jobs = lock(&self.jobs);

        jobs.retain(|_, status| {
            status
                .finished_at
                .map_or(true, |time| time.elapsed() <= expire_after)
        });

        jobs.values().cloned().collect()
    }
}

impl ProgressSink for ProgressBoard {
    fn notify(&self, job: &Job, text: &str) {
        tracing::debug!(job = %job.id, submitter = job.submitter_id, "{text}");

        lock(&self.jobs)
            .entry(job.id)
            .or_insert_with(|| JobStatus::new(job, State::Processing, ""))
            .message = text.to_owned();
    }
}
