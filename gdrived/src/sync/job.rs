use std::fmt;
use std::sync::Mutex;

use serde::{Deserialize, Deserializer, Serialize};

use super::lock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Upload,
    Download,
}

impl Direction {
    pub fn is_download(self) -> bool {
        matches!(self, Direction::Download)
    }

    pub fn from_is_download(is_download: bool) -> Self {
        if is_download {
            Direction::Download
        } else {
            Direction::Upload
        }
    }
}

// Accepts the console's `is_download` flag as well as a direction name.
impl<'de> Deserialize<'de> for Direction {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Flag(bool),
            Name(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Flag(flag) => Ok(Direction::from_is_download(flag)),
            Raw::Name(name) => match name.to_ascii_lowercase().as_str() {
                "upload" => Ok(Direction::Upload),
                "download" => Ok(Direction::Download),
                other => Err(serde::de::Error::custom(format!(
                    "unknown direction: {other}"
                ))),
            },
        }
    }
}

/// Identity of a job. Two jobs with equal keys are the same work.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub direction: Direction,
    pub local_path: String,
    /// File or folder id for downloads, destination folder id for uploads.
    pub remote_id: String,
}

impl JobKey {
    pub fn new(
        direction: Direction,
        local_path: impl Into<String>,
        remote_id: impl Into<String>,
    ) -> Self {
        Self {
            direction,
            local_path: local_path.into(),
            remote_id: remote_id.into(),
        }
    }

    pub fn upload(local_path: impl Into<String>, dest_folder_id: impl Into<String>) -> Self {
        Self::new(Direction::Upload, local_path, dest_folder_id)
    }

    pub fn download(remote_id: impl Into<String>, local_dest: impl Into<String>) -> Self {
        Self::new(Direction::Download, local_dest, remote_id)
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.direction {
            Direction::Upload => write!(f, "upload {} -> {}", self.local_path, self.remote_id),
            Direction::Download => {
                write!(f, "download {} -> {}", self.remote_id, self.local_path)
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobProgress {
    pub percent: u8,
    pub finished: bool,
    pub display_name: Option<String>,
}

#[derive(Debug)]
pub struct Job {
    key: JobKey,
    progress: Mutex<JobProgress>,
}

impl Job {
    pub fn new(key: JobKey) -> Self {
        Self {
            key,
            progress: Mutex::new(JobProgress::default()),
        }
    }

    pub fn key(&self) -> &JobKey {
        &self.key
    }

    pub fn matches(&self, key: &JobKey) -> bool {
        self.key == *key
    }

    pub fn progress(&self) -> JobProgress {
        lock(&self.progress).clone()
    }

    pub fn update(&self, apply: impl FnOnce(&mut JobProgress)) {
        apply(&mut *lock(&self.progress));
    }

    pub fn complete(&self, display_name: impl Into<String>) {
        self.update(|progress| {
            progress.percent = 100;
            progress.finished = true;
            progress.display_name = Some(display_name.into());
        });
    }

    pub fn view(&self) -> JobView {
        let progress = self.progress();
        JobView {
            is_download: self.key.direction.is_download(),
            path: self.key.local_path.clone(),
            id: self.key.remote_id.clone(),
            progress: progress.percent,
            done: progress.finished,
            file_name: progress.display_name,
        }
    }
}

/// Point-in-time copy of a job as reported to the console.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobView {
    pub is_download: bool,
    pub path: String,
    pub id: String,
    pub progress: u8,
    pub done: bool,
    pub file_name: Option<String>,
}
