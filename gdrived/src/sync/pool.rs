use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, error, warn};

use super::backoff::Backoff;
use super::job::{Job, JobKey};
use super::lock;
use super::queue::{QueueError, WorkQueue};
use super::transfer::{JobOutcome, TransferExecutor};
use crate::remote::RemoteStorage;

pub type WorkerId = u64;

#[derive(Debug, Clone, Copy)]
pub struct PoolSettings {
    pub capacity: usize,
    /// Consecutive empty polls after which a worker retires.
    pub idle_polls: u32,
    pub poll_interval: Duration,
    pub retry: Backoff,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            capacity: 2,
            idle_polls: 10,
            poll_interval: Duration::from_secs(1),
            retry: Backoff::new(Duration::from_millis(250), Duration::from_secs(10), true),
        }
    }
}

/// Bounded set of worker tasks draining the waiting queue. Workers are
/// started on demand by `submit` and retire on their own once idle.
pub struct WorkerPool {
    queue: Arc<WorkQueue>,
    storage: Arc<dyn RemoteStorage>,
    settings: PoolSettings,
    members: Mutex<Vec<WorkerId>>,
    next_id: AtomicU64,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<WorkQueue>,
        storage: Arc<dyn RemoteStorage>,
        mut settings: PoolSettings,
    ) -> Arc<Self> {
        settings.capacity = settings.capacity.max(1);
        Arc::new(Self {
            queue,
            storage,
            settings,
            members: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    pub fn worker_count(&self) -> usize {
        lock(&self.members).len()
    }

    pub fn submit(self: &Arc<Self>, key: JobKey) -> Result<Arc<Job>, QueueError> {
        let job = self.queue.enqueue(key)?;
        self.grow();
        Ok(job)
    }

    /// Starts a worker when the pool is empty, or when more than one job is
    /// waiting and the pool is below capacity.
    pub fn grow(self: &Arc<Self>) {
        // Read before taking the pool lock; the two locks never nest.
        let waiting = self.queue.waiting_len();
        let id = {
            let mut members = lock(&self.members);
            let wanted = members.is_empty()
                || (waiting > 1 && members.len() < self.settings.capacity);
            if !wanted {
                return;
            }
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            members.push(id);
            id
        };
        spawn_worker(Arc::clone(self), id);
    }

    fn retire(&self, id: WorkerId) {
        let mut members = lock(&self.members);
        if let Some(position) = members.iter().position(|member| *member == id) {
            members.remove(position);
        }
    }

    async fn run_worker(self: Arc<Self>, id: WorkerId) {
        debug!(worker = id, "worker started");
        let executor = TransferExecutor::new(self.storage.fork(), self.settings.retry);
        let mut empty_polls = 0u32;
        loop {
            let Some(job) = self.queue.dequeue() else {
                if empty_polls >= self.settings.idle_polls {
                    break;
                }
                self.queue.wait_for_work(self.settings.poll_interval).await;
                empty_polls += 1;
                continue;
            };
            empty_polls = 0;
            self.run_job(&executor, job).await;
        }

        self.retire(id);
        debug!(worker = id, "worker retired");
        // A job submitted while this worker was leaving saw a non-empty pool
        // and started nobody.
        if self.queue.waiting_len() > 0 {
            self.grow();
        }
    }

    async fn run_job(self: &Arc<Self>, executor: &TransferExecutor, job: Arc<Job>) {
        self.queue.mark_active(Arc::clone(&job));
        match executor.execute(&job).await {
            JobOutcome::Transferred | JobOutcome::Failed(_) => {}
            JobOutcome::Expanded(keys) => {
                for key in keys {
                    if let Err(err) = self.submit(key) {
                        warn!(error = %err, "expanded job skipped");
                    }
                }
            }
            JobOutcome::Abandoned { reason } => {
                error!(job = %job.key(), reason = %reason, "job abandoned");
            }
        }
        self.queue.mark_inactive(&job);
    }
}

fn spawn_worker(pool: Arc<WorkerPool>, id: WorkerId) {
    tokio::spawn(async move { pool.run_worker(id).await });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::queue::QueueKind;
    use crate::sync::testing::{FakeStorage, wait_until};
    use std::fs;
    use tempfile::{TempDir, tempdir};

    fn settings(capacity: usize, idle_polls: u32) -> PoolSettings {
        PoolSettings {
            capacity,
            idle_polls,
            poll_interval: Duration::from_millis(10),
            retry: Backoff::immediate(),
        }
    }

    fn pool(storage: &FakeStorage, settings: PoolSettings) -> Arc<WorkerPool> {
        WorkerPool::new(Arc::new(WorkQueue::new()), storage.handle(), settings)
    }

    fn local_files(count: usize) -> (TempDir, Vec<String>) {
        let dir = tempdir().unwrap();
        let paths = (0..count)
            .map(|n| {
                let path = dir.path().join(format!("file-{n}.txt"));
                fs::write(&path, format!("content {n}")).unwrap();
                path.to_string_lossy().into_owned()
            })
            .collect();
        (dir, paths)
    }

    fn done_count(pool: &WorkerPool) -> usize {
        pool.queue().snapshot(QueueKind::Done).len()
    }

    #[tokio::test]
    async fn never_runs_more_workers_than_capacity() {
        let storage = FakeStorage::new();
        storage.set_transfer_delay(Duration::from_millis(30));
        let pool = pool(&storage, settings(2, 1));
        let (_dir, paths) = local_files(5);

        for path in &paths {
            pool.submit(JobKey::upload(path.clone(), "root")).unwrap();
            assert!(pool.worker_count() <= 2);
        }
        wait_until(|| done_count(&pool) == 5).await;

        assert!(storage.max_in_flight() <= 2);
        assert!(storage.forks() <= 2);
        assert_eq!(storage.upload_attempts(), 5);
    }

    #[tokio::test]
    async fn running_jobs_are_never_listed_twice() {
        let storage = FakeStorage::new();
        storage.set_transfer_delay(Duration::from_millis(40));
        let pool = pool(&storage, settings(1, 1));
        let (_dir, paths) = local_files(3);
        for path in &paths {
            pool.submit(JobKey::upload(path.clone(), "root")).unwrap();
        }

        let mut saw_active = false;
        while done_count(&pool) < paths.len() {
            // Jobs only move forward, so reading the later stages first can
            // miss a job in transit but never count it twice.
            let done = pool.queue().snapshot(QueueKind::Done);
            let active = pool.queue().snapshot(QueueKind::Active);
            let waiting = pool.queue().snapshot(QueueKind::Waiting);
            saw_active |= !active.is_empty();
            assert!(active.len() <= 1);
            for path in &paths {
                let listed = [&done, &active, &waiting]
                    .iter()
                    .map(|views| views.iter().filter(|view| &view.path == path).count())
                    .sum::<usize>();
                assert!(listed <= 1, "{path} listed {listed} times");
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        assert!(saw_active);
        let done = pool.queue().snapshot(QueueKind::Done);
        for path in &paths {
            assert_eq!(done.iter().filter(|view| &view.path == path).count(), 1);
        }
    }

    #[tokio::test]
    async fn single_job_starts_a_single_worker() {
        let storage = FakeStorage::new();
        let pool = pool(&storage, settings(4, 2));
        let (_dir, paths) = local_files(1);

        pool.submit(JobKey::upload(paths[0].clone(), "root")).unwrap();
        assert_eq!(pool.worker_count(), 1);

        wait_until(|| done_count(&pool) == 1).await;
        assert_eq!(storage.forks(), 1);
    }

    #[tokio::test]
    async fn idle_workers_retire() {
        let storage = FakeStorage::new();
        let pool = pool(&storage, settings(2, 2));
        let (_dir, paths) = local_files(3);

        for path in &paths {
            pool.submit(JobKey::upload(path.clone(), "root")).unwrap();
        }
        wait_until(|| pool.worker_count() == 0).await;

        assert_eq!(done_count(&pool), 3);
        assert!(pool.queue().is_idle());
    }

    #[tokio::test]
    async fn job_after_retirement_starts_a_new_worker() {
        let storage = FakeStorage::new();
        let pool = pool(&storage, settings(2, 1));
        let (_dir, paths) = local_files(2);

        pool.submit(JobKey::upload(paths[0].clone(), "root")).unwrap();
        wait_until(|| pool.worker_count() == 0).await;

        pool.submit(JobKey::upload(paths[1].clone(), "root")).unwrap();
        wait_until(|| done_count(&pool) == 2).await;
        assert_eq!(storage.forks(), 2);
    }

    #[tokio::test]
    async fn duplicate_submit_is_rejected() {
        let storage = FakeStorage::new();
        let pool = pool(&storage, settings(2, 1));

        pool.submit(JobKey::upload("/A", "root")).unwrap();
        let err = pool.submit(JobKey::upload("/A", "root")).unwrap_err();

        assert!(matches!(err, QueueError::Duplicate(_)));
        assert_eq!(pool.worker_count(), 1);
    }

    #[tokio::test]
    async fn folder_upload_is_expanded_into_file_jobs() {
        let dir = tempdir().unwrap();
        let top = dir.path().join("photos");
        fs::create_dir_all(top.join("2024")).unwrap();
        fs::write(top.join("a.jpg"), b"a").unwrap();
        fs::write(top.join("2024/b.jpg"), b"b").unwrap();

        let storage = FakeStorage::new();
        let pool = pool(&storage, settings(2, 1));
        pool.submit(JobKey::upload(top.to_string_lossy(), "root"))
            .unwrap();

        // The folder job plus one job per file.
        wait_until(|| done_count(&pool) == 3 && pool.queue().is_idle()).await;

        let photos = storage.folder_named("photos", "root").unwrap();
        let year = storage.folder_named("2024", &photos).unwrap();
        assert_eq!(storage.file_content("a.jpg", &photos).unwrap(), b"a");
        assert_eq!(storage.file_content("b.jpg", &year).unwrap(), b"b");
        let done = pool.queue().snapshot(QueueKind::Done);
        assert!(done.iter().all(|view| view.done && view.progress == 100));
    }

    #[tokio::test]
    async fn abandoned_job_still_reaches_done() {
        let dir = tempdir().unwrap();
        let empty = dir.path().join("empty.txt");
        fs::write(&empty, b"").unwrap();

        let storage = FakeStorage::new();
        storage.fail_uploads(usize::MAX);
        let pool = pool(&storage, settings(1, 1));
        pool.submit(JobKey::upload(empty.to_string_lossy(), "root"))
            .unwrap();

        wait_until(|| done_count(&pool) == 1).await;
        let done = pool.queue().snapshot(QueueKind::Done);
        assert!(!done[0].done);
        assert_eq!(storage.upload_attempts(), 1);
    }
}
