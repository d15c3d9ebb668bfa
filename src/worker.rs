use futures::FutureExt;
use std::io::ErrorKind;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::context::{lock, Context};
use crate::delivery::DeliverySink;
use crate::error::WorkerError;
use crate::executor::{TransferExecutor, TransferOutcome};
use crate::models::{build_path, FileType, Job, State};
use crate::progress::ProgressSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Delivered,
    Failed,
    /// Transfer succeeded but the artifact was over the size limit.
    Oversized,
    Cancelled,
    Errored,
}

impl JobOutcome {
    fn state(self) -> State {
        match self {
            JobOutcome::Delivered => State::Done,
            JobOutcome::Cancelled => State::Cancelled,
            JobOutcome::Failed | JobOutcome::Oversized | JobOutcome::Errored => State::Error,
        }
    }
}

/// Starts `max_concurrent_transfers` workers draining the queue.
pub fn spawn_workers(
    ctx: Arc<Context>,
    executor: Arc<dyn TransferExecutor>,
    delivery: Arc<dyn DeliverySink>,
) -> Vec<JoinHandle<()>> {
    (0..ctx.config.max_concurrent_transfers)
        .map(|slot| {
            tokio::spawn(run_worker(
                slot,
                ctx.clone(),
                executor.clone(),
                delivery.clone(),
            ))
        })
        .collect()
}

async fn run_worker(
    slot: usize,
    ctx: Arc<Context>,
    executor: Arc<dyn TransferExecutor>,
    delivery: Arc<dyn DeliverySink>,
) {
    tracing::info!(slot, "transfer worker started");

    loop {
        let (job, cancel) = ctx.take_next().await;
        let id = job.id;

        let handled = AssertUnwindSafe(process_job(
            &ctx,
            executor.as_ref(),
            delivery.as_ref(),
            job,
            cancel,
        ))
        .catch_unwind()
        .await;

        if handled.is_err() {
            tracing::error!(slot, job = %id, "worker panicked while processing job");
        }
    }
}

/// Resets the submitter and removes local artifacts however the job ends.
struct Finalizer<'a> {
    ctx: &'a Context,
    job: &'a Job,
    artifacts: [PathBuf; 2],
}

impl Drop for Finalizer<'_> {
    fn drop(&mut self) {
        self.ctx.finish(self.job);

        // Drop cannot await. Normal paths already removed their files through
        // tokio::fs, so this only unlinks what a failure left behind.
        for path in &self.artifacts {
            match std::fs::remove_file(path) {
                Ok(()) => {
                    tracing::debug!(job = %self.job.id, path = %path.display(), "removed leftover artifact")
                }
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => {
                    tracing::warn!(job = %self.job.id, path = %path.display(), "could not remove artifact: {err}")
                }
            }
        }
    }
}

/// Runs a job already recorded as running by `Context::take_next` or
/// `Context::begin`, with the token it was given there.
pub async fn process_job(
    ctx: &Context,
    executor: &dyn TransferExecutor,
    delivery: &dyn DeliverySink,
    job: Job,
    cancel: CancellationToken,
) -> JobOutcome {
    ctx.progress.set_state(&job, State::Processing);

    let transfer_path = build_path(&ctx.config.work_dir, job.id, FileType::Transfer);
    let delivery_path = build_path(
        &ctx.config.work_dir,
        job.id,
        FileType::Delivery(&ctx.config.delivery_name),
    );
    let _finalizer = Finalizer {
        ctx,
        job: &job,
        artifacts: [transfer_path.clone(), delivery_path.clone()],
    };

    tracing::info!(job = %job.id, submitter = job.submitter_id, mode = ?job.mode, "processor: starting transfer");
    ctx.progress.notify(&job, "Starting download...");

    let outcome = match run_job(
        ctx,
        executor,
        delivery,
        &job,
        cancel,
        &transfer_path,
        &delivery_path,
    )
    .await
    {
        Ok(outcome) => outcome,
        Err(err) => {
            tracing::error!(job = %job.id, "processor: ended with error: {err}");
            ctx.progress.notify(&job, &format!("Error: {err}"));
            JobOutcome::Errored
        }
    };

    ctx.progress.set_state(&job, outcome.state());
    tracing::info!(job = %job.id, ?outcome, "processor: complete");

    outcome
}

async fn run_job(
    ctx: &Context,
    executor: &dyn TransferExecutor,
    delivery: &dyn DeliverySink,
    job: &Job,
    cancel: CancellationToken,
    transfer_path: &Path,
    delivery_path: &Path,
) -> Result<JobOutcome, WorkerError> {
    match executor
        .execute(job, transfer_path, &ctx.progress, cancel.clone())
        .await
    {
        TransferOutcome::Completed => {}
        TransferOutcome::Failed(reason) => {
            tracing::warn!(job = %job.id, "processor: transfer failed: {reason}");
            ctx.progress.notify(job, "Download failed.");
            return Ok(JobOutcome::Failed);
        }
        TransferOutcome::Cancelled => return Ok(discard_cancelled(ctx, job)),
    }

    let size = tokio::fs::metadata(transfer_path).await?.len();
    if size > ctx.config.max_artifact_bytes() {
        tracing::warn!(job = %job.id, bytes = size, "processor: artifact over size limit");
        ctx.progress.notify(
            job,
            &format!(
                "File exceeds {} MB. You are blocked for {} minutes.",
                ctx.config.max_artifact_size_mb,
                ctx.config.punitive_block.as_secs() / 60
            ),
        );
        lock(&ctx.access).impose_temporary_block(job.submitter_id, ctx.config.punitive_block);
        remove_artifact(transfer_path).await;
        return Ok(JobOutcome::Oversized);
    }

    // Cancelled after the process had already finished.
    if cancel.is_cancelled() {
        return Ok(discard_cancelled(ctx, job));
    }

    tokio::fs::rename(transfer_path, delivery_path).await?;
    ctx.progress.notify(job, "Uploading...");
    delivery
        .deliver(&job.delivery_url, delivery_path, &job.caption)
        .await?;
    ctx.progress.notify(job, "Upload complete!");
    remove_artifact(delivery_path).await;

    Ok(JobOutcome::Delivered)
}

fn discard_cancelled(ctx: &Context, job: &Job) -> JobOutcome {
    tracing::info!(job = %job.id, "processor: result discarded after cancellation");
    ctx.progress.notify(job, "Download cancelled.");
    JobOutcome::Cancelled
}

async fn remove_artifact(path: &Path) {
    if let Err(err) = tokio::fs::remove_file(path).await {
        if err.kind() != ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), "could not remove artifact: {err}");
        }
    }
}
