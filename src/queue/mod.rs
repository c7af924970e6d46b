//! Processing queue
//!
//! One ordered queue of job IDs for the whole workspace. Callers append
//! with [`ProcessingQueue::enqueue`] and may withdraw a job that has not
//! started with [`ProcessingQueue::cancel_if_queued`]. Only the
//! [`QueueDriver`] takes jobs off the head, one at a time, and awaits each
//! job to its terminal status before taking the next.

mod driver;
mod shutdown;

pub use driver::QueueDriver;
pub use shutdown::ShutdownToken;

use crate::job::{JobBoard, JobId, JobStatus, PipelineError, PipelineResult};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard, Notify};

/// FIFO of queued job IDs
pub struct ProcessingQueue {
    board: Arc<JobBoard>,
    pending: Mutex<VecDeque<JobId>>,
    work: Notify,
    /// Held by whichever driver is taking and running the head job
    consumer: AsyncMutex<()>,
}

impl ProcessingQueue {
    pub fn new(board: Arc<JobBoard>) -> Self {
        Self {
            board,
            pending: Mutex::new(VecDeque::new()),
            work: Notify::new(),
            consumer: AsyncMutex::new(()),
        }
    }

    pub fn board(&self) -> &Arc<JobBoard> {
        &self.board
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<JobId>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a queued job to the tail. Returns its 1-based position.
    ///
    /// Rejects unknown jobs, jobs that are not `Queued`, and jobs already
    /// waiting in the queue. Appending never disturbs the job in flight.
    pub fn enqueue(&self, id: &JobId) -> PipelineResult<usize> {
        let position = {
            let mut pending = self.lock();
            match self.board.status(id) {
                None => return Err(PipelineError::JobNotFound(id.clone())),
                Some(JobStatus::Queued) => {}
                Some(status) => {
                    return Err(PipelineError::NotQueueable {
                        job: id.clone(),
                        status,
                    })
                }
            }
            if pending.contains(id) {
                return Err(PipelineError::AlreadyQueued(id.clone()));
            }
            pending.push_back(id.clone());
            pending.len()
        };

        self.board
            .append_log(id, format!("Waiting in processing queue (position {})", position))?;
        tracing::debug!(job_id = %id, position, "Job enqueued");
        self.work.notify_one();
        Ok(position)
    }

    /// Withdraw a job that has not started. Returns whether it was waiting.
    ///
    /// The job record stays `Queued` and can be enqueued again.
    pub fn cancel_if_queued(&self, id: &JobId) -> bool {
        let removed = {
            let mut pending = self.lock();
            match pending.iter().position(|p| p == id) {
                Some(index) => pending.remove(index).is_some(),
                None => false,
            }
        };

        if removed {
            if let Err(e) = self.board.append_log(id, "Removed from processing queue") {
                tracing::warn!(job_id = %id, error = %e, "Failed to log cancellation");
            }
            tracing::info!(job_id = %id, "Job cancelled before start");
        }
        removed
    }

    /// Waiting job IDs, head first
    pub fn pending(&self) -> Vec<JobId> {
        self.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// The job currently processing, if any
    pub fn in_flight(&self) -> Option<JobId> {
        self.board.processing()
    }

    /// Take the head job. IDs whose job was deleted or is no longer
    /// `Queued` are dropped on the way.
    pub(crate) fn dequeue_next(&self) -> Option<JobId> {
        let mut pending = self.lock();
        while let Some(id) = pending.pop_front() {
            if self.board.status(&id) == Some(JobStatus::Queued) {
                return Some(id);
            }
            tracing::debug!(job_id = %id, "Skipping stale queue entry");
        }
        None
    }

    /// Put a taken job back at the head.
    pub(crate) fn return_to_front(&self, id: JobId) {
        let mut pending = self.lock();
        if !pending.contains(&id) {
            pending.push_front(id);
        }
    }

    /// Wait for the exclusive right to take and run jobs.
    pub(crate) async fn consumer_turn(&self) -> AsyncMutexGuard<'_, ()> {
        self.consumer.lock().await
    }

    /// Resolves when work may have arrived since the last call.
    pub(crate) async fn work_available(&self) {
        self.work.notified().await;
    }
}
