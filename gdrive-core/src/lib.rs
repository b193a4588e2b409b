mod client;

pub use client::{DownloadProgress, DriveClient, DriveError, DriveFile, FOLDER_MIME_TYPE};
