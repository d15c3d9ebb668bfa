use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::time::Instant;
use uuid::Uuid;

/// Opaque identity of whoever submitted a job.
pub type UserId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Live stream, transcoded while it is being pulled.
    Live,
    /// Recording, fetched by the higher-level download tool.
    Recorded,
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub submitter_id: UserId,
    pub source_url: String,
    pub mode: Mode,
    pub caption: String,
    pub delivery_url: String,
}

impl Job {
    pub fn new(
        submitter_id: UserId,
        source_url: impl Into<String>,
        mode: Mode,
        caption: impl Into<String>,
        delivery_url: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            submitter_id,
            source_url: source_url.into(),
            mode,
            caption: caption.into(),
            delivery_url: delivery_url.into(),
        }
    }
}

/// Per-user bookkeeping written by the workers and read during admission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserState {
    pub downloading: bool,
    pub cooldown_until: Option<Instant>,
}

impl UserState {
    pub fn on_cooldown(&self, now: Instant) -> bool {
        self.cooldown_until.is_some_and(|until| until > now)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub enum State {
    Waiting,
    Processing,
    Done,
    Error,
    Cancelled,
}

impl State {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, State::Waiting | State::Processing)
    }
}

pub enum FileType<'a> {
    /// File the external process writes into.
    Transfer,
    /// Renamed artifact handed to the delivery sink.
    Delivery(&'a str),
}

pub fn build_path(dir: &Path, id: Uuid, file_type: FileType) -> PathBuf {
    match file_type {
        FileType::Transfer => dir.join(format!("{id}.mp4")),
        FileType::Delivery(name) => dir.join(format!("{id}-{name}")),
    }
}
