//! External transfer processes and file-size based progress.
//!
//! The real size of an HLS download is not known up front, so progress is the
//! number of bytes written so far over a fixed assumed total. It is an
//! approximation and is capped at 100%.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::models::{Job, Mode};
use crate::progress::ProgressSink;

const MEGABYTE: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// The process exited and left a non-empty file behind.
    Completed,
    Failed(String),
    Cancelled,
}

pub trait TransferExecutor: Send + Sync {
    /// Runs one transfer of `job` into `destination`. Never returns an error;
    /// every fault ends up as `TransferOutcome::Failed`.
    fn execute<'a>(
        &'a self,
        job: &'a Job,
        destination: &'a Path,
        progress: &'a dyn ProgressSink,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, TransferOutcome>;
}

/// Runs a command template per mode, `$INPUT` and `$OUTPUT` substituted.
pub struct CommandExecutor {
    live_command: String,
    recorded_command: String,
    poll_interval: Duration,
    assumed_total_size_mb: u64,
}

impl CommandExecutor {
    pub fn from_config(config: &Config) -> Self {
        Self {
            live_command: config.live_command.clone(),
            recorded_command: config.recorded_command.clone(),
            poll_interval: config.progress_poll_interval,
            assumed_total_size_mb: config.assumed_total_size_mb,
        }
    }

    fn template(&self, mode: Mode) -> &str {
        match mode {
            Mode::Live => &self.live_command,
            Mode::Recorded => &self.recorded_command,
        }
    }

    async fn run(
        &self,
        job: &Job,
        destination: &Path,
        progress: &dyn ProgressSink,
        cancel: CancellationToken,
    ) -> TransferOutcome {
        let arguments = build_arguments(self.template(job.mode), &job.source_url, destination);
        let Some((program, arguments)) = arguments.split_first() else {
            let message = format!("no command configured for {:?} jobs", job.mode);
            progress.notify(job, &message);
            return TransferOutcome::Failed(message);
        };

        match self
            .watch_process(program, arguments, job, destination, progress, cancel)
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!(job = %job.id, "{program} error: {err}");
                progress.notify(job, &format!("{program} error: {err}"));
                TransferOutcome::Failed(err.to_string())
            }
        }
    }

    async fn watch_process(
        &self,
        program: &str,
        arguments: &[String],
        job: &Job,
        destination: &Path,
        progress: &dyn ProgressSink,
        cancel: CancellationToken,
    ) -> std::io::Result<TransferOutcome> {
        let mut process = Command::new(program)
            .args(arguments)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        tracing::info!(job = %job.id, "{program} started");

        let mut reporter = PercentReporter::new(self.assumed_total_size_mb);

        let exit_status = loop {
            tokio::select! {
                status = process.wait() => break status?,
                _ = cancel.cancelled() => {
                    process.kill().await?;
                    tracing::info!(job = %job.id, "{program} killed after cancellation");
                    return Ok(TransferOutcome::Cancelled);
                }
                _ = tokio::time::sleep(self.poll_interval) => {
                    if let Some(percent) = reporter.observe(file_size(destination).await) {
                        progress.notify(job, &format!("Downloading... {percent}%"));
                    }
                }
            }
        };

        if file_size(destination).await > 0 {
            if !exit_status.success() {
                tracing::warn!(job = %job.id, "{program} exited with {exit_status} but produced output");
            }
            Ok(TransferOutcome::Completed)
        } else {
            Ok(TransferOutcome::Failed(format!(
                "{program} exited with {exit_status} and produced no output"
            )))
        }
    }
}

impl TransferExecutor for CommandExecutor {
    fn execute<'a>(
        &'a self,
        job: &'a Job,
        destination: &'a Path,
        progress: &'a dyn ProgressSink,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, TransferOutcome> {
        self.run(job, destination, progress, cancel).boxed()
    }
}

pub fn build_arguments(template: &str, input: &str, output: &Path) -> Vec<String> {
    template
        .split_whitespace()
        .map(|arg| match arg {
            "$INPUT" => input.to_owned(),
            "$OUTPUT" => output.to_string_lossy().into_owned(),
            other => other.to_owned(),
        })
        .collect()
}

/// Size of `path` in bytes, 0 when it does not exist.
pub async fn file_size(path: &Path) -> u64 {
    tokio::fs::metadata(path)
        .await
        .map(|metadata| metadata.len())
        .unwrap_or(0)
}

/// Turns byte counts into whole percentages, reporting only forward moves.
#[derive(Debug)]
pub struct PercentReporter {
    assumed_total_bytes: u64,
    last_percent: u64,
}

impl PercentReporter {
    pub fn new(assumed_total_size_mb: u64) -> Self {
        Self {
            assumed_total_bytes: assumed_total_size_mb.max(1) * MEGABYTE,
            last_percent: 0,
        }
    }

    pub fn observe(&mut self, bytes: u64) -> Option<u64> {
        let percent = (bytes.saturating_mul(100) / self.assumed_total_bytes).min(100);

        if percent > self.last_percent {
            self.last_percent = percent;
            Some(percent)
        } else {
            None
        }
    }
}
