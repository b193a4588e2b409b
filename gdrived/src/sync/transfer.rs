use std::io;
use std::path::Path;
use std::sync::Arc;

use gdrive_core::{DownloadProgress, DriveError};
use thiserror::Error;
use tracing::{error, info, warn};

use super::backoff::Backoff;
use super::expand::{ExpandError, FolderExpander};
use super::job::{Direction, Job, JobKey};
use crate::remote::{RemoteEntry, RemoteStorage};

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("remote storage error: {0}")]
    Remote(#[from] DriveError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("folder expansion failed: {0}")]
    Expand(#[from] ExpandError),
}

#[derive(Debug)]
pub enum JobOutcome {
    Transferred,
    /// The job named a folder; these file jobs replace it.
    Expanded(Vec<JobKey>),
    /// Given up without retrying further.
    Abandoned { reason: String },
    Failed(TransferError),
}

/// Runs one job against the worker's own storage handle. Transfer attempts
/// are retried until they succeed, except for empty upload sources.
pub struct TransferExecutor {
    storage: Arc<dyn RemoteStorage>,
    retry: Backoff,
}

impl TransferExecutor {
    pub fn new(storage: Arc<dyn RemoteStorage>, retry: Backoff) -> Self {
        Self { storage, retry }
    }

    pub async fn execute(&self, job: &Job) -> JobOutcome {
        let key = job.key();
        let result = match key.direction {
            Direction::Upload => {
                self.execute_upload(job, Path::new(&key.local_path), &key.remote_id)
                    .await
            }
            Direction::Download => {
                self.execute_download(job, &key.remote_id, &key.local_path)
                    .await
            }
        };
        result.unwrap_or_else(|err| {
            error!(job = %key, error = %err, "job failed");
            JobOutcome::Failed(err)
        })
    }

    pub async fn execute_upload(
        &self,
        job: &Job,
        source: &Path,
        dest_folder_id: &str,
    ) -> Result<JobOutcome, TransferError> {
        if tokio::fs::metadata(source).await?.is_dir() {
            let jobs = FolderExpander::new(Arc::clone(&self.storage))
                .expand_upload(source, dest_folder_id)
                .await?;
            job.complete(display_name(source));
            return Ok(JobOutcome::Expanded(jobs));
        }

        info!(path = %source.display(), folder = dest_folder_id, "upload started");
        let mut attempt = 0u32;
        loop {
            match self.storage.upload_file(source, dest_folder_id).await {
                Ok(entry) => {
                    job.complete(entry.name.clone());
                    info!(path = %source.display(), id = %entry.id, "upload finished");
                    return Ok(JobOutcome::Transferred);
                }
                Err(err) => {
                    warn!(path = %source.display(), attempt, error = %err, "upload attempt failed");
                    // The service rejects empty bodies, so retrying cannot help.
                    if tokio::fs::metadata(source).await?.len() == 0 {
                        error!(path = %source.display(), "empty file cannot be uploaded");
                        return Ok(JobOutcome::Abandoned {
                            reason: format!("{} is empty: {err}", source.display()),
                        });
                    }
                }
            }
            self.retry.wait(attempt).await;
            attempt = attempt.saturating_add(1);
        }
    }

    pub async fn execute_download(
        &self,
        job: &Job,
        remote_id: &str,
        dest_folder: &str,
    ) -> Result<JobOutcome, TransferError> {
        let entry = self.storage.get_entry(remote_id).await?;
        if entry.is_folder() {
            let jobs = FolderExpander::new(Arc::clone(&self.storage))
                .expand_download_entry(&entry, dest_folder)
                .await?;
            job.complete(entry.name.clone());
            return Ok(JobOutcome::Expanded(jobs));
        }

        info!(name = %entry.name, id = %entry.id, dest = dest_folder, "download started");
        let mut on_progress = |file: &RemoteEntry, status: DownloadProgress, done: bool| {
            job.update(|progress| {
                progress.percent = if done { 100 } else { status.percent() };
                progress.finished = done;
                progress.display_name = Some(file.name.clone());
            });
        };
        let mut attempt = 0u32;
        loop {
            match self
                .storage
                .download_file(&entry, Path::new(dest_folder), &mut on_progress)
                .await
            {
                Ok(()) => {
                    info!(name = %entry.name, id = %entry.id, "download finished");
                    return Ok(JobOutcome::Transferred);
                }
                Err(err) => {
                    warn!(name = %entry.name, attempt, error = %err, "download attempt failed");
                }
            }
            self.retry.wait(attempt).await;
            attempt = attempt.saturating_add(1);
        }
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}
