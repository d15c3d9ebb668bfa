//! Fakes shared by the unit tests.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::path::Path;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::delivery::DeliverySink;
use crate::error::DeliveryError;
use crate::executor::{TransferExecutor, TransferOutcome};
use crate::models::{Job, Mode, UserId};
use crate::progress::ProgressSink;

pub fn job_for(user: UserId) -> Job {
    Job::new(
        user,
        "https://d1abc.cloudfront.net/videos/index_1.m3u8",
        Mode::Live,
        "caption",
        "https://uploads.example.com/put",
    )
}

#[derive(Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

impl ProgressSink for RecordingSink {
    fn notify(&self, _job: &Job, text: &str) {
        self.messages.lock().unwrap().push(text.to_owned());
    }
}

/// Writes `bytes` zero bytes to the destination; 0 means no output at all.
pub struct FakeExecutor {
    pub bytes: usize,
}

impl TransferExecutor for FakeExecutor {
    fn execute<'a>(
        &'a self,
        job: &'a Job,
        destination: &'a Path,
        progress: &'a dyn ProgressSink,
        _cancel: CancellationToken,
    ) -> BoxFuture<'a, TransferOutcome> {
        async move {
            if self.bytes == 0 {
                return TransferOutcome::Failed("no output".to_owned());
            }
            tokio::fs::write(destination, vec![0u8; self.bytes])
                .await
                .unwrap();
            progress.notify(job, "Downloading... 100%");
            TransferOutcome::Completed
        }
        .boxed()
    }
}

/// Never finishes on its own; returns once the job is cancelled.
pub struct HoldingExecutor;

impl TransferExecutor for HoldingExecutor {
    fn execute<'a>(
        &'a self,
        _job: &'a Job,
        destination: &'a Path,
        _progress: &'a dyn ProgressSink,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, TransferOutcome> {
        async move {
            tokio::fs::write(destination, b"partial").await.unwrap();
            cancel.cancelled().await;
            TransferOutcome::Cancelled
        }
        .boxed()
    }
}

pub struct PanickingExecutor;

impl TransferExecutor for PanickingExecutor {
    fn execute<'a>(
        &'a self,
        _job: &'a Job,
        destination: &'a Path,
        _progress: &'a dyn ProgressSink,
        _cancel: CancellationToken,
    ) -> BoxFuture<'a, TransferOutcome> {
        async move {
            tokio::fs::write(destination, b"partial").await.unwrap();
            explode()
        }
        .boxed()
    }
}

fn explode() -> TransferOutcome {
    panic!("transfer blew up")
}

/// Records (target, caption, size) of every delivery.
#[derive(Default)]
pub struct RecordingDelivery {
    deliveries: Mutex<Vec<(String, String, u64)>>,
    fail: bool,
}

impl RecordingDelivery {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn deliveries(&self) -> Vec<(String, String, u64)> {
        self.deliveries.lock().unwrap().clone()
    }
}

impl DeliverySink for RecordingDelivery {
    fn deliver<'a>(
        &'a self,
        target: &'a str,
        path: &'a Path,
        caption: &'a str,
    ) -> BoxFuture<'a, Result<(), DeliveryError>> {
        async move {
            let size = tokio::fs::metadata(path).await?.len();
            if self.fail {
                return Err(DeliveryError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "receiver went away",
                )));
            }
            self.deliveries
                .lock()
                .unwrap()
                .push((target.to_owned(), caption.to_owned(), size));
            Ok(())
        }
        .boxed()
    }
}
