use std::io;
use std::path::Path;
use std::sync::Arc;

use async_recursion::async_recursion;
use gdrive_core::DriveError;
use thiserror::Error;
use tracing::{debug, warn};

use super::job::JobKey;
use crate::remote::{RemoteEntry, RemoteStorage};

#[derive(Debug, Error)]
pub enum ExpandError {
    #[error("remote storage error: {0}")]
    Remote(#[from] DriveError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Turns a folder-level request into one job per file. Upload expansion also
/// mirrors the local directory structure remotely; neither side moves bytes.
pub struct FolderExpander {
    storage: Arc<dyn RemoteStorage>,
}

impl FolderExpander {
    pub fn new(storage: Arc<dyn RemoteStorage>) -> Self {
        Self { storage }
    }

    /// Jobs for every file below `local_folder`, each targeting the remote
    /// folder that mirrors its parent directory. A missing folder yields no
    /// jobs.
    #[async_recursion]
    pub async fn expand_upload(
        &self,
        local_folder: &Path,
        dest_folder_id: &str,
    ) -> Result<Vec<JobKey>, ExpandError> {
        if !tokio::fs::try_exists(local_folder).await? {
            return Ok(Vec::new());
        }
        let name = folder_name(local_folder);
        let folder = self.resolve_folder(&name, dest_folder_id).await?;
        debug!(local = %local_folder.display(), remote = %folder.id, "mirrored folder");

        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(local_folder).await?;
        while let Some(entry) = dir.next_entry().await? {
            entries.push(entry.path());
        }
        entries.sort();

        let mut jobs = Vec::new();
        for path in entries {
            if tokio::fs::metadata(&path).await?.is_dir() {
                jobs.extend(self.expand_upload(&path, &folder.id).await?);
            } else if let Some(local) = path.to_str() {
                jobs.push(JobKey::upload(local, folder.id.clone()));
            } else {
                // Job keys carry UTF-8 paths; a lossy name would point nowhere.
                warn!(path = %path.display(), "skipping file with a non-UTF-8 name");
            }
        }
        Ok(jobs)
    }

    pub async fn expand_download(
        &self,
        remote_folder_id: &str,
        local_dest: &str,
    ) -> Result<Vec<JobKey>, ExpandError> {
        let folder = self.storage.get_entry(remote_folder_id).await?;
        self.expand_download_entry(&folder, local_dest).await
    }

    /// Files of `folder` land in `local_dest/<folder name>`, and sub-folders
    /// recurse with that directory as their destination.
    #[async_recursion]
    pub async fn expand_download_entry(
        &self,
        folder: &RemoteEntry,
        local_dest: &str,
    ) -> Result<Vec<JobKey>, ExpandError> {
        let here = join_local(local_dest, &folder.name);
        let children = self.storage.list_children(&folder.id).await?;

        let mut jobs = Vec::new();
        for child in &children {
            if child.is_folder() {
                jobs.extend(self.expand_download_entry(child, &here).await?);
            } else {
                jobs.push(JobKey::download(child.id.clone(), here.clone()));
            }
        }
        Ok(jobs)
    }

    async fn resolve_folder(&self, name: &str, parent_id: &str) -> Result<RemoteEntry, DriveError> {
        let existing = self
            .storage
            .list_children(parent_id)
            .await?
            .into_iter()
            .find(|entry| entry.is_folder() && entry.name == name);
        match existing {
            Some(folder) => Ok(folder),
            None => self.storage.create_folder(name, parent_id).await,
        }
    }
}

fn folder_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

fn join_local(base: &str, name: &str) -> String {
    Path::new(base).join(name).to_string_lossy().into_owned()
}
