use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Notify;

use super::job::{Job, JobKey, JobView};
use super::lock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    Waiting,
    Active,
    Done,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("already queued: {0}")]
    Duplicate(JobKey),
}

/// Waiting, active and done jobs, each behind its own lock. No method holds
/// more than one of the three locks at a time.
#[derive(Debug, Default)]
pub struct WorkQueue {
    waiting: Mutex<VecDeque<Arc<Job>>>,
    active: Mutex<VecDeque<Arc<Job>>>,
    done: Mutex<VecDeque<Arc<Job>>>,
    wakeup: Notify,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, key: JobKey) -> Result<Arc<Job>, QueueError> {
        // The waiting and active checks are separate critical sections. A job
        // dequeued between them is seen by neither, so a duplicate can slip in.
        let waiting = lock(&self.waiting).iter().any(|job| job.matches(&key));
        if waiting {
            return Err(QueueError::Duplicate(key));
        }
        let active = lock(&self.active).iter().any(|job| job.matches(&key));
        if active {
            return Err(QueueError::Duplicate(key));
        }

        let job = Arc::new(Job::new(key));
        lock(&self.waiting).push_back(Arc::clone(&job));
        self.wakeup.notify_one();
        Ok(job)
    }

    pub fn dequeue(&self) -> Option<Arc<Job>> {
        lock(&self.waiting).pop_front()
    }

    pub fn cancel_waiting(&self, key: &JobKey) -> bool {
        remove_first(&mut lock(&self.waiting), key).is_some()
    }

    pub fn mark_active(&self, job: Arc<Job>) {
        lock(&self.active).push_back(job);
    }

    /// Moves this exact job out of the active set and appends it to the done
    /// list. A twin with an equal key stays active.
    pub fn mark_inactive(&self, job: &Arc<Job>) {
        {
            let mut active = lock(&self.active);
            if let Some(position) = active.iter().position(|other| Arc::ptr_eq(other, job)) {
                active.remove(position);
            }
        }
        lock(&self.done).push_back(Arc::clone(job));
    }

    pub fn acknowledge_done(&self, key: &JobKey) -> bool {
        remove_first(&mut lock(&self.done), key).is_some()
    }

    pub fn snapshot(&self, kind: QueueKind) -> Vec<JobView> {
        match kind {
            QueueKind::Waiting => lock(&self.waiting).iter().map(|job| job.view()).collect(),
            QueueKind::Active => lock(&self.active).iter().map(|job| job.view()).collect(),
            QueueKind::Done => lock(&self.done).iter().map(|job| job.view()).collect(),
        }
    }

    pub fn waiting_len(&self) -> usize {
        lock(&self.waiting).len()
    }

    pub fn is_idle(&self) -> bool {
        let waiting_empty = lock(&self.waiting).is_empty();
        waiting_empty && lock(&self.active).is_empty()
    }

    /// Waits until a job is enqueued or the timeout elapses. Returns whether
    /// a wake-up arrived; the caller still has to dequeue.
    pub async fn wait_for_work(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wakeup.notified())
            .await
            .is_ok()
    }
}

fn remove_first(jobs: &mut VecDeque<Arc<Job>>, key: &JobKey) -> Option<Arc<Job>> {
    let position = jobs.iter().position(|job| job.matches(key))?;
    jobs.remove(position)
}
