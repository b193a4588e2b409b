use gdrive_core::DriveError;
use thiserror::Error;
use tracing::{debug, info};

use crate::remote::RemoteStorage;

pub const DEFAULT_MARKER_NAME: &str = "gdrived.marker.txt";
pub const DEFAULT_WALK_LIMIT: usize = 64;

const MARKER_CONTENT: &[u8] = b"gdrived root marker\n";

#[derive(Debug, Error)]
pub enum RootError {
    #[error("remote storage error: {0}")]
    Remote(#[from] DriveError),
    #[error("no self-parented folder within {0} hops of the marker")]
    Unterminated(usize),
}

/// Finds the id of the storage root by walking up from a marker file. The
/// marker is created at the default location when the search finds none.
pub async fn resolve_root_id(
    storage: &dyn RemoteStorage,
    marker_name: &str,
    max_hops: usize,
) -> Result<String, RootError> {
    let found = storage.search_by_name(marker_name).await?.into_iter().next();
    let marker = match found {
        Some(marker) => marker,
        None => {
            info!(name = marker_name, "creating root marker");
            storage
                .upload_bytes(marker_name, None, MARKER_CONTENT.to_vec())
                .await?
        }
    };

    let mut current = marker.id;
    for _ in 0..max_hops {
        let parent = storage.parent_of(&current).await?;
        if parent == current {
            debug!(root = %current, "resolved root folder");
            return Ok(current);
        }
        current = parent;
    }
    Err(RootError::Unterminated(max_hops))
}
