use std::sync::{Arc, Mutex};

use gdrive_core::DriveError;

use super::lock;
use crate::remote::{RemoteEntry, RemoteStorage};

/// Browse cursor shared by all RPC callers.
pub struct Session {
    storage: Arc<dyn RemoteStorage>,
    current: Mutex<String>,
}

impl Session {
    pub fn new(storage: Arc<dyn RemoteStorage>, root_id: impl Into<String>) -> Self {
        Self {
            storage,
            current: Mutex::new(root_id.into()),
        }
    }

    pub fn current(&self) -> String {
        lock(&self.current).clone()
    }

    pub async fn current_listing(&self) -> Result<Vec<RemoteEntry>, DriveError> {
        let current = self.current();
        self.storage.list_children(&current).await
    }

    /// The root is its own parent, so this stays put there.
    pub async fn goto_parent(&self) -> Result<Vec<RemoteEntry>, DriveError> {
        let parent = self.storage.parent_of(&self.current()).await?;
        *lock(&self.current) = parent.clone();
        self.storage.list_children(&parent).await
    }

    pub async fn goto_child(&self, id: &str) -> Result<Vec<RemoteEntry>, DriveError> {
        *lock(&self.current) = id.to_string();
        self.storage.list_children(id).await
    }
}
