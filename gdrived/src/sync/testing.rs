//! In-memory remote store for engine tests.

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use gdrive_core::{DownloadProgress, DriveError, FOLDER_MIME_TYPE};

use super::lock;
use crate::remote::{ProgressFn, RemoteEntry, RemoteStorage};

pub const ROOT_ID: &str = "root";

struct Node {
    entry: RemoteEntry,
    content: Vec<u8>,
}

#[derive(Default)]
struct Inner {
    nodes: Mutex<HashMap<String, Node>>,
    next_id: AtomicUsize,
    created_folders: AtomicUsize,
    upload_failures: AtomicUsize,
    download_failures: AtomicUsize,
    upload_attempts: AtomicUsize,
    download_attempts: AtomicUsize,
    transfer_delay: Mutex<Duration>,
    midway_pause: Mutex<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    forks: AtomicUsize,
}

#[derive(Clone)]
pub struct FakeStorage {
    inner: Arc<Inner>,
}

impl FakeStorage {
    pub fn new() -> Self {
        let storage = Self {
            inner: Arc::new(Inner::default()),
        };
        storage.insert(entry(ROOT_ID, "My Drive", FOLDER_MIME_TYPE, &[]), Vec::new());
        storage
    }

    pub fn handle(&self) -> Arc<dyn RemoteStorage> {
        Arc::new(self.clone())
    }

    pub fn insert(&self, entry: RemoteEntry, content: Vec<u8>) {
        lock(&self.inner.nodes).insert(entry.id.clone(), Node { entry, content });
    }

    pub fn add_folder(&self, name: &str, parent: &str) -> String {
        let id = self.next_id("folder");
        self.insert(entry(&id, name, FOLDER_MIME_TYPE, &[parent]), Vec::new());
        id
    }

    pub fn add_file(&self, name: &str, parent: &str, content: &[u8]) -> String {
        let id = self.next_id("file");
        self.insert(entry(&id, name, "text/plain", &[parent]), content.to_vec());
        id
    }

    pub fn folder_named(&self, name: &str, parent: &str) -> Option<String> {
        self.find(name, parent)
            .filter(|node| node.0.is_folder())
            .map(|node| node.0.id)
    }

    pub fn file_content(&self, name: &str, parent: &str) -> Option<Vec<u8>> {
        self.find(name, parent).map(|node| node.1)
    }

    pub fn files_named(&self, name: &str) -> usize {
        lock(&self.inner.nodes)
            .values()
            .filter(|node| node.entry.name == name)
            .count()
    }

    pub fn fail_uploads(&self, count: usize) {
        self.inner.upload_failures.store(count, Ordering::SeqCst);
    }

    pub fn fail_downloads(&self, count: usize) {
        self.inner.download_failures.store(count, Ordering::SeqCst);
    }

    pub fn set_transfer_delay(&self, delay: Duration) {
        *lock(&self.inner.transfer_delay) = delay;
    }

    /// Holds each download after its half-way progress report.
    pub fn pause_downloads_midway(&self, pause: Duration) {
        *lock(&self.inner.midway_pause) = pause;
    }

    pub fn upload_attempts(&self) -> usize {
        self.inner.upload_attempts.load(Ordering::SeqCst)
    }

    pub fn download_attempts(&self) -> usize {
        self.inner.download_attempts.load(Ordering::SeqCst)
    }

    pub fn created_folders(&self) -> usize {
        self.inner.created_folders.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.inner.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn forks(&self) -> usize {
        self.inner.forks.load(Ordering::SeqCst)
    }

    fn next_id(&self, prefix: &str) -> String {
        let n = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        format!("{prefix}-{n}")
    }

    fn find(&self, name: &str, parent: &str) -> Option<(RemoteEntry, Vec<u8>)> {
        lock(&self.inner.nodes)
            .values()
            .find(|node| node.entry.name == name && node.entry.parents.iter().any(|p| p == parent))
            .map(|node| (node.entry.clone(), node.content.clone()))
    }

    fn create(&self, name: &str, parent: &str, mime_type: &str, content: Vec<u8>) -> RemoteEntry {
        let id = self.next_id(if mime_type == FOLDER_MIME_TYPE { "folder" } else { "file" });
        let created = entry(&id, name, mime_type, &[parent]);
        self.insert(created.clone(), content);
        created
    }

    async fn simulate_transfer(&self) {
        let delay = *lock(&self.inner.transfer_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

impl Default for FakeStorage {
    fn default() -> Self {
        Self::new()
    }
}

pub fn entry(id: &str, name: &str, mime_type: &str, parents: &[&str]) -> RemoteEntry {
    RemoteEntry {
        id: id.to_string(),
        name: name.to_string(),
        mime_type: mime_type.to_string(),
        parents: parents.iter().map(|p| p.to_string()).collect(),
        size: None,
        web_view_link: None,
        web_content_link: None,
    }
}

/// Polls `condition` until it holds, failing the test after five seconds.
pub async fn wait_until(condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn injected(what: &str) -> DriveError {
    DriveError::Io(io::Error::other(format!("injected {what} failure")))
}

struct InFlight<'a>(&'a Inner);

impl<'a> InFlight<'a> {
    fn enter(inner: &'a Inner) -> Self {
        let now = inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        inner.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self(inner)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RemoteStorage for FakeStorage {
    async fn list_children(&self, folder_id: &str) -> Result<Vec<RemoteEntry>, DriveError> {
        let mut children: Vec<RemoteEntry> = lock(&self.inner.nodes)
            .values()
            .filter(|node| node.entry.id != folder_id)
            .filter(|node| node.entry.parents.iter().any(|p| p == folder_id))
            .map(|node| node.entry.clone())
            .collect();
        children.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(children)
    }

    async fn search_by_name(&self, name: &str) -> Result<Vec<RemoteEntry>, DriveError> {
        Ok(lock(&self.inner.nodes)
            .values()
            .filter(|node| node.entry.name == name)
            .map(|node| node.entry.clone())
            .collect())
    }

    async fn get_entry(&self, id: &str) -> Result<RemoteEntry, DriveError> {
        lock(&self.inner.nodes)
            .get(id)
            .map(|node| node.entry.clone())
            .ok_or_else(|| {
                DriveError::Io(io::Error::new(io::ErrorKind::NotFound, format!("no node {id}")))
            })
    }

    async fn create_folder(
        &self,
        name: &str,
        parent_id: &str,
    ) -> Result<RemoteEntry, DriveError> {
        self.inner.created_folders.fetch_add(1, Ordering::SeqCst);
        Ok(self.create(name, parent_id, FOLDER_MIME_TYPE, Vec::new()))
    }

    async fn upload_file(
        &self,
        source: &Path,
        folder_id: &str,
    ) -> Result<RemoteEntry, DriveError> {
        self.inner.upload_attempts.fetch_add(1, Ordering::SeqCst);
        let _guard = InFlight::enter(&self.inner);
        self.simulate_transfer().await;
        if take_failure(&self.inner.upload_failures) {
            return Err(injected("upload"));
        }
        let content = tokio::fs::read(source).await?;
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(self.create(&name, folder_id, "application/octet-stream", content))
    }

    async fn upload_bytes(
        &self,
        name: &str,
        parent_id: Option<&str>,
        bytes: Vec<u8>,
    ) -> Result<RemoteEntry, DriveError> {
        Ok(self.create(name, parent_id.unwrap_or(ROOT_ID), "text/plain", bytes))
    }

    async fn download_file(
        &self,
        entry: &RemoteEntry,
        dest_folder: &Path,
        progress: &mut ProgressFn<'_>,
    ) -> Result<(), DriveError> {
        self.inner.download_attempts.fetch_add(1, Ordering::SeqCst);
        let _guard = InFlight::enter(&self.inner);
        self.simulate_transfer().await;
        if take_failure(&self.inner.download_failures) {
            return Err(injected("download"));
        }
        let content = lock(&self.inner.nodes)
            .get(&entry.id)
            .map(|node| node.content.clone())
            .unwrap_or_default();
        let total = Some(content.len() as u64);
        let half = content.len() / 2;
        progress(
            entry,
            DownloadProgress {
                downloaded: half as u64,
                total,
            },
            false,
        );
        let pause = *lock(&self.inner.midway_pause);
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
        tokio::fs::create_dir_all(dest_folder).await?;
        tokio::fs::write(dest_folder.join(&entry.name), &content).await?;
        progress(
            entry,
            DownloadProgress {
                downloaded: content.len() as u64,
                total,
            },
            true,
        );
        Ok(())
    }

    fn fork(&self) -> Arc<dyn RemoteStorage> {
        self.inner.forks.fetch_add(1, Ordering::SeqCst);
        Arc::new(self.clone())
    }
}
