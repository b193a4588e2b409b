use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use gdrive_core::{DownloadProgress, DriveClient, DriveError, DriveFile};

pub type RemoteEntry = DriveFile;

/// Called once per transferred chunk with the file being downloaded, the
/// bytes so far, and whether the transfer has completed.
pub type ProgressFn<'a> = dyn FnMut(&RemoteEntry, DownloadProgress, bool) + Send + 'a;

/// What the work engine needs from the remote store.
#[async_trait]
pub trait RemoteStorage: Send + Sync {
    async fn list_children(&self, folder_id: &str) -> Result<Vec<RemoteEntry>, DriveError>;

    async fn search_by_name(&self, name: &str) -> Result<Vec<RemoteEntry>, DriveError>;

    async fn get_entry(&self, id: &str) -> Result<RemoteEntry, DriveError>;

    async fn create_folder(&self, name: &str, parent_id: &str)
    -> Result<RemoteEntry, DriveError>;

    async fn upload_file(&self, source: &Path, folder_id: &str)
    -> Result<RemoteEntry, DriveError>;

    /// Creates a small file from memory. Without a parent the service's
    /// default root is used.
    async fn upload_bytes(
        &self,
        name: &str,
        parent_id: Option<&str>,
        bytes: Vec<u8>,
    ) -> Result<RemoteEntry, DriveError>;

    async fn download_file(
        &self,
        entry: &RemoteEntry,
        dest_folder: &Path,
        progress: &mut ProgressFn<'_>,
    ) -> Result<(), DriveError>;

    /// A separate handle for a worker, sharing no connection state with this
    /// one.
    fn fork(&self) -> Arc<dyn RemoteStorage>;

    async fn parent_of(&self, id: &str) -> Result<String, DriveError> {
        Ok(self.get_entry(id).await?.parent_id().to_string())
    }
}

#[async_trait]
impl RemoteStorage for DriveClient {
    async fn list_children(&self, folder_id: &str) -> Result<Vec<RemoteEntry>, DriveError> {
        DriveClient::list_children(self, folder_id).await
    }

    async fn search_by_name(&self, name: &str) -> Result<Vec<RemoteEntry>, DriveError> {
        DriveClient::search_by_name(self, name).await
    }

    async fn get_entry(&self, id: &str) -> Result<RemoteEntry, DriveError> {
        self.get_file(id).await
    }

    async fn create_folder(
        &self,
        name: &str,
        parent_id: &str,
    ) -> Result<RemoteEntry, DriveError> {
        DriveClient::create_folder(self, name, parent_id).await
    }

    async fn upload_file(
        &self,
        source: &Path,
        folder_id: &str,
    ) -> Result<RemoteEntry, DriveError> {
        DriveClient::upload_file(self, source, Some(folder_id)).await
    }

    async fn upload_bytes(
        &self,
        name: &str,
        parent_id: Option<&str>,
        bytes: Vec<u8>,
    ) -> Result<RemoteEntry, DriveError> {
        DriveClient::upload_bytes(self, name, parent_id, bytes).await
    }

    async fn download_file(
        &self,
        entry: &RemoteEntry,
        dest_folder: &Path,
        progress: &mut ProgressFn<'_>,
    ) -> Result<(), DriveError> {
        DriveClient::download_file(self, entry, dest_folder, |status, done| {
            progress(entry, status, done)
        })
        .await
        .map(|_| ())
    }

    fn fork(&self) -> Arc<dyn RemoteStorage> {
        Arc::new(self.fresh())
    }
}
