//! Queue driver: the single consumer of the processing queue
//!
//! Each job is awaited to its terminal status before the next one is taken,
//! so at most one job is ever processing. Clones of a driver share the
//! queue's consumer turn, so only one of them takes jobs at a time.

use super::{ProcessingQueue, ShutdownToken};
use crate::analysis::JobOrchestrator;
use crate::job::{JobId, JobStatus, PipelineError};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Drains a [`ProcessingQueue`] through a [`JobOrchestrator`]
#[derive(Clone)]
pub struct QueueDriver {
    queue: Arc<ProcessingQueue>,
    orchestrator: Arc<JobOrchestrator>,
}

impl QueueDriver {
    pub fn new(queue: Arc<ProcessingQueue>, orchestrator: Arc<JobOrchestrator>) -> Self {
        Self {
            queue,
            orchestrator,
        }
    }

    pub fn queue(&self) -> &Arc<ProcessingQueue> {
        &self.queue
    }

    /// Take the head job and process it. Returns `None` when the queue is
    /// empty.
    ///
    /// If the processing slot is held outside the queue, the job goes back
    /// to the head and the driver waits for the slot to free up.
    pub async fn step(&self) -> Option<(JobId, JobStatus)> {
        let _turn = self.queue.consumer_turn().await;
        loop {
            let id = self.queue.dequeue_next()?;
            match self.orchestrator.process(&id).await {
                Ok(status) => return Some((id, status)),
                Err(PipelineError::Busy(running)) => {
                    tracing::debug!(job_id = %id, running = %running, "Processing slot taken, waiting");
                    self.queue.return_to_front(id);
                    self.orchestrator.board().slot_available().await;
                }
                Err(e) => {
                    // Job vanished or changed state between dequeue and start
                    tracing::warn!(job_id = %id, error = %e, "Could not start job");
                }
            }
        }
    }

    /// Process jobs until the queue is empty. Jobs enqueued while this runs
    /// are picked up too. Returns each job's terminal status in run order.
    pub async fn run_until_idle(&self) -> Vec<(JobId, JobStatus)> {
        let mut finished = Vec::new();
        while let Some(outcome) = self.step().await {
            finished.push(outcome);
        }
        tracing::debug!(jobs = finished.len(), "Queue idle");
        finished
    }

    /// Run in the background until `shutdown` is signalled, waking whenever
    /// a job is enqueued. Shutdown is checked between jobs.
    pub fn spawn(self, shutdown: ShutdownToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!("Queue driver started");
            while !shutdown.is_shutdown() {
                if self.step().await.is_some() {
                    continue;
                }
                tokio::select! {
                    _ = self.queue.work_available() => {}
                    _ = shutdown.wait() => {}
                }
            }
            tracing::info!("Queue driver stopped");
        })
    }
}
