use std::path::PathBuf;
use std::sync::Arc;

use gdrive_core::DriveError;
use thiserror::Error;
use tracing::{info, warn};

use super::job::{JobKey, JobView};
use super::pool::{PoolSettings, WorkerPool};
use super::queue::{QueueKind, WorkQueue};
use super::root::{DEFAULT_MARKER_NAME, DEFAULT_WALK_LIMIT, RootError, resolve_root_id};
use super::session::Session;
use crate::remote::{RemoteEntry, RemoteStorage};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("local path does not exist: {0}")]
    MissingLocalPath(String),
    #[error("remote storage error: {0}")]
    Remote(#[from] DriveError),
    #[error("root resolution failed: {0}")]
    Root(#[from] RootError),
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub pool: PoolSettings,
    /// Destination for downloads that name no folder.
    pub save_root: PathBuf,
    pub marker_name: String,
    pub root_walk_limit: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            pool: PoolSettings::default(),
            save_root: dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")),
            marker_name: DEFAULT_MARKER_NAME.to_string(),
            root_walk_limit: DEFAULT_WALK_LIMIT,
        }
    }
}

/// Everything the RPC surface talks to: the job pool, the browse cursor and
/// the browse client shared with it.
pub struct SyncEngine {
    pool: Arc<WorkerPool>,
    session: Session,
    root_id: String,
    save_root: String,
}

impl SyncEngine {
    pub fn new(storage: Arc<dyn RemoteStorage>, root_id: String, settings: &EngineSettings) -> Self {
        let pool = WorkerPool::new(Arc::new(WorkQueue::new()), Arc::clone(&storage), settings.pool);
        Self {
            pool,
            session: Session::new(storage, root_id.clone()),
            root_id,
            save_root: settings.save_root.to_string_lossy().into_owned(),
        }
    }

    /// Resolves the storage root, then builds an engine browsing from it.
    pub async fn bootstrap(
        storage: Arc<dyn RemoteStorage>,
        settings: &EngineSettings,
    ) -> Result<Self, EngineError> {
        let root_id = resolve_root_id(
            storage.as_ref(),
            &settings.marker_name,
            settings.root_walk_limit,
        )
        .await?;
        info!(root = %root_id, "engine ready");
        Ok(Self::new(storage, root_id, settings))
    }

    pub fn root_id(&self) -> &str {
        &self.root_id
    }

    pub fn worker_count(&self) -> usize {
        self.pool.worker_count()
    }

    /// Queues `local_path` for upload into the folder currently browsed.
    /// Returns `false` when the same upload is already queued.
    pub async fn upload(&self, local_path: &str) -> Result<bool, EngineError> {
        if !tokio::fs::try_exists(local_path).await.unwrap_or(false) {
            warn!(path = local_path, "upload of missing path refused");
            return Err(EngineError::MissingLocalPath(local_path.to_string()));
        }
        Ok(self.accept(JobKey::upload(local_path, self.session.current())))
    }

    pub fn download(&self, remote_id: &str, save_folder: Option<&str>) -> bool {
        let dest = match save_folder {
            Some(folder) if !folder.is_empty() => folder.to_string(),
            _ => self.save_root.clone(),
        };
        self.accept(JobKey::download(remote_id, dest))
    }

    pub fn delete_wait_work(&self, key: &JobKey) -> bool {
        self.pool.queue().cancel_waiting(key)
    }

    pub fn delete_done_work(&self, key: &JobKey) -> bool {
        self.pool.queue().acknowledge_done(key)
    }

    pub fn snapshot(&self, kind: QueueKind) -> Vec<JobView> {
        self.pool.queue().snapshot(kind)
    }

    pub async fn current_listing(&self) -> Result<Vec<RemoteEntry>, EngineError> {
        Ok(self.session.current_listing().await?)
    }

    pub async fn goto_parent(&self) -> Result<Vec<RemoteEntry>, EngineError> {
        Ok(self.session.goto_parent().await?)
    }

    pub async fn goto_child(&self, id: &str) -> Result<Vec<RemoteEntry>, EngineError> {
        Ok(self.session.goto_child(id).await?)
    }

    fn accept(&self, key: JobKey) -> bool {
        match self.pool.submit(key) {
            Ok(job) => {
                info!(job = %job.key(), "job accepted");
                true
            }
            Err(err) => {
                warn!(error = %err, "job rejected");
                false
            }
        }
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
