//! JobBoard: shared per-document state
//!
//! The board owns every [`DocumentJob`]. Readers (UI, MCP, CLI) may look at
//! any job at any time and subscribe to change events. Mutation of a job's
//! status, progress and reports is crate-private and happens only through a
//! [`JobWriter`] held by the orchestrator while the job is `Processing`.

use super::document::{DocumentJob, JobId, JobStatus, NewJob};
use super::log::{LogEntry, LogSink};
use crate::analysis::{StageKind, StageResult};
use crate::storage::{JobStore, StorageError};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{broadcast, Notify};

const EVENT_CAPACITY: usize = 256;

/// Errors raised by job and queue operations
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Job {job}: cannot move from {from} to {to}")]
    InvalidTransition {
        job: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Job {0} is processing and cannot be changed by the caller")]
    JobInFlight(JobId),

    #[error("Job {job} is {status}, not processing")]
    NotProcessing { job: JobId, status: JobStatus },

    #[error("Another job is already processing: {0}")]
    Busy(JobId),

    #[error("Job {0} is already waiting in the queue")]
    AlreadyQueued(JobId),

    #[error("Job {job} is {status} and cannot be queued")]
    NotQueueable { job: JobId, status: JobStatus },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result type for job and queue operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Change notification broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    Created { job: JobId },
    Status { job: JobId, status: JobStatus },
    Progress { job: JobId, progress: u8 },
    Log { job: JobId, entry: LogEntry },
    Report { job: JobId, stage: StageKind, populated: bool },
    Deleted { job: JobId },
}

impl JobEvent {
    pub fn job(&self) -> &JobId {
        match self {
            JobEvent::Created { job }
            | JobEvent::Status { job, .. }
            | JobEvent::Progress { job, .. }
            | JobEvent::Log { job, .. }
            | JobEvent::Report { job, .. }
            | JobEvent::Deleted { job } => job,
        }
    }
}

/// Shared store of document jobs
pub struct JobBoard {
    jobs: DashMap<JobId, DocumentJob>,
    events: broadcast::Sender<JobEvent>,
    store: Option<Arc<dyn JobStore>>,
    /// The job currently processing, if any
    processing: Mutex<Option<JobId>>,
    slot_freed: Notify,
}

impl Default for JobBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl JobBoard {
    /// In-memory board
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            jobs: DashMap::new(),
            events,
            store: None,
            processing: Mutex::new(None),
            slot_freed: Notify::new(),
        }
    }

    /// Board that persists every change to `store`
    pub fn with_store(store: Arc<dyn JobStore>) -> Self {
        Self {
            store: Some(store),
            ..Self::new()
        }
    }

    /// Load every job from the attached store.
    ///
    /// A job found `Processing` was interrupted mid-run; it is marked
    /// `Error` since a job cannot resume part way through.
    /// Returns the number of jobs loaded.
    pub fn load_all(&self) -> PipelineResult<usize> {
        let Some(store) = &self.store else {
            return Ok(0);
        };

        let jobs = store.load_jobs()?;
        let count = jobs.len();
        for mut job in jobs {
            if job.status == JobStatus::Processing {
                job.status = JobStatus::Error;
                job.progress = 100;
                job.failure = Some("interrupted before completion".to_string());
                job.logs
                    .append("Processing was interrupted; marked as error on restart");
                job.touch();
                store.save_job(&job)?;
                tracing::warn!(job_id = %job.id, "Interrupted job marked as error");
            }
            self.jobs.insert(job.id.clone(), job);
        }
        tracing::debug!(count, "Loaded jobs from store");
        Ok(count)
    }

    /// Create a queued job
    pub fn create(&self, request: NewJob) -> PipelineResult<DocumentJob> {
        let job = DocumentJob::new(request);
        if let Some(store) = &self.store {
            store.save_job(&job)?;
        }
        self.jobs.insert(job.id.clone(), job.clone());
        tracing::info!(job_id = %job.id, document = %job.display_name(), "Job created");
        self.emit(JobEvent::Created { job: job.id.clone() });
        Ok(job)
    }

    /// Snapshot of a job
    pub fn get(&self, id: &JobId) -> Option<DocumentJob> {
        self.jobs.get(id).map(|r| r.clone())
    }

    pub fn contains(&self, id: &JobId) -> bool {
        self.jobs.contains_key(id)
    }

    pub fn status(&self, id: &JobId) -> Option<JobStatus> {
        self.jobs.get(id).map(|r| r.status)
    }

    /// Snapshots of all jobs, oldest first
    pub fn list(&self) -> Vec<DocumentJob> {
        let mut jobs: Vec<DocumentJob> = self.jobs.iter().map(|r| r.clone()).collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        jobs
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Delete a job record. Refused while the job is processing.
    pub fn delete(&self, id: &JobId) -> PipelineResult<DocumentJob> {
        match self.status(id) {
            None => return Err(PipelineError::JobNotFound(id.clone())),
            Some(JobStatus::Processing) => return Err(PipelineError::JobInFlight(id.clone())),
            Some(_) => {}
        }

        if let Some(store) = &self.store {
            store.delete_job(id)?;
        }
        let (_, job) = self
            .jobs
            .remove_if(id, |_, job| job.status != JobStatus::Processing)
            .ok_or_else(|| PipelineError::JobInFlight(id.clone()))?;
        tracing::info!(job_id = %id, "Job deleted");
        self.emit(JobEvent::Deleted { job: id.clone() });
        Ok(job)
    }

    /// Subscribe to change events for all jobs
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Number of jobs currently `Processing`
    pub fn processing_count(&self) -> usize {
        self.jobs
            .iter()
            .filter(|r| r.status == JobStatus::Processing)
            .count()
    }

    /// The job currently processing, if any
    pub fn processing(&self) -> Option<JobId> {
        self.processing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Resolves once no job holds the processing slot.
    pub async fn slot_available(&self) {
        loop {
            let freed = self.slot_freed.notified();
            tokio::pin!(freed);
            freed.as_mut().enable();
            if self.processing().is_none() {
                return;
            }
            freed.await;
        }
    }

    /// Append a line to a job's log. Allowed in every state.
    pub(crate) fn append_log(&self, id: &JobId, message: impl Into<String>) -> PipelineResult<()> {
        let message = message.into();
        self.update(id, |job| {
            let entry = job.logs.append(message).clone();
            Ok(((), vec![JobEvent::Log { job: job.id.clone(), entry }]))
        })
    }

    /// Move a queued job to `Processing` and claim the processing slot.
    pub(crate) fn begin(&self, id: &JobId) -> PipelineResult<JobWriter<'_>> {
        let mut slot = self.processing.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(running) = slot.as_ref() {
            return Err(PipelineError::Busy(running.clone()));
        }

        self.update(id, |job| {
            transition(job, JobStatus::Processing)?;
            let entry = job.logs.append("Processing started").clone();
            Ok((
                (),
                vec![
                    JobEvent::Status {
                        job: job.id.clone(),
                        status: JobStatus::Processing,
                    },
                    JobEvent::Log { job: job.id.clone(), entry },
                ],
            ))
        })?;

        *slot = Some(id.clone());
        tracing::info!(job_id = %id, "Job processing");
        Ok(JobWriter {
            board: self,
            id: id.clone(),
        })
    }

    fn release(&self, id: &JobId) {
        let mut slot = self.processing.lock().unwrap_or_else(|e| e.into_inner());
        if slot.as_ref() == Some(id) {
            *slot = None;
            self.slot_freed.notify_waiters();
        }
    }

    /// Apply a mutation, then persist the snapshot and broadcast events.
    ///
    /// The closure must validate before it mutates; an error leaves the
    /// job untouched. Persistence failures are logged, not returned: the
    /// in-memory board stays authoritative while a job runs.
    fn update<R>(
        &self,
        id: &JobId,
        mutate: impl FnOnce(&mut DocumentJob) -> PipelineResult<(R, Vec<JobEvent>)>,
    ) -> PipelineResult<R> {
        let (result, events, snapshot) = {
            let mut job = self
                .jobs
                .get_mut(id)
                .ok_or_else(|| PipelineError::JobNotFound(id.clone()))?;
            let (result, events) = mutate(&mut *job)?;
            job.touch();
            (result, events, job.value().clone())
        };

        if let Some(store) = &self.store {
            if let Err(e) = store.save_job(&snapshot) {
                tracing::warn!(job_id = %id, error = %e, "Failed to persist job");
            }
        }
        for event in events {
            self.emit(event);
        }
        Ok(result)
    }

    fn emit(&self, event: JobEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

fn transition(job: &mut DocumentJob, to: JobStatus) -> PipelineResult<()> {
    if !job.status.can_transition_to(to) {
        return Err(PipelineError::InvalidTransition {
            job: job.id.clone(),
            from: job.status,
            to,
        });
    }
    job.status = to;
    Ok(())
}

fn require_processing(job: &DocumentJob) -> PipelineResult<()> {
    if job.status != JobStatus::Processing {
        return Err(PipelineError::NotProcessing {
            job: job.id.clone(),
            status: job.status,
        });
    }
    Ok(())
}

/// Exclusive write handle for the job being processed
///
/// Obtained from [`JobBoard::begin`]. Dropping the writer without calling
/// [`complete`](Self::complete) or [`fail`](Self::fail) marks the job as
/// failed, so the processing slot is never leaked.
pub struct JobWriter<'a> {
    board: &'a JobBoard,
    id: JobId,
}

impl JobWriter<'_> {
    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn snapshot(&self) -> Option<DocumentJob> {
        self.board.get(&self.id)
    }

    pub fn log(&self, message: impl Into<String>) {
        if let Err(e) = self.board.append_log(&self.id, message) {
            tracing::warn!(job_id = %self.id, error = %e, "Failed to append log line");
        }
    }

    /// Record the number of stages this run will attempt.
    pub fn set_plan(&self, stages_planned: usize) -> PipelineResult<()> {
        self.board.update(&self.id, |job| {
            require_processing(job)?;
            job.stages_planned = stages_planned;
            Ok(((), Vec::new()))
        })
    }

    /// Raise progress. A value at or below the current progress is ignored.
    pub fn set_progress(&self, progress: u8) -> PipelineResult<u8> {
        self.board.update(&self.id, |job| {
            require_processing(job)?;
            let progress = progress.min(100);
            if progress <= job.progress {
                return Ok((job.progress, Vec::new()));
            }
            job.progress = progress;
            Ok((
                progress,
                vec![JobEvent::Progress {
                    job: job.id.clone(),
                    progress,
                }],
            ))
        })
    }

    /// Merge one attempted stage's outcome into the report map.
    pub fn merge_report(&self, kind: StageKind, outcome: Option<StageResult>) -> PipelineResult<()> {
        self.board.update(&self.id, |job| {
            require_processing(job)?;
            job.reports.merge(kind, outcome);
            job.stages_attempted += 1;
            Ok((
                (),
                vec![JobEvent::Report {
                    job: job.id.clone(),
                    stage: kind,
                    populated: job.reports.is_populated(kind),
                }],
            ))
        })
    }

    /// Finish the job as `Completed`.
    pub fn complete(self, message: impl Into<String>) -> PipelineResult<DocumentJob> {
        self.finish(JobStatus::Completed, message.into(), None)
    }

    /// Finish the job as `Error` with a fatal reason.
    pub fn fail(self, reason: impl Into<String>) -> PipelineResult<DocumentJob> {
        let reason = reason.into();
        self.finish(JobStatus::Error, format!("Failed: {}", reason), Some(reason))
    }

    fn finish(
        self,
        status: JobStatus,
        message: String,
        failure: Option<String>,
    ) -> PipelineResult<DocumentJob> {
        let result = self.board.update(&self.id, |job| {
            transition(job, status)?;
            job.failure = failure;
            let mut events = Vec::new();
            if job.progress < 100 {
                job.progress = 100;
                events.push(JobEvent::Progress {
                    job: job.id.clone(),
                    progress: 100,
                });
            }
            let entry = job.logs.append(message).clone();
            events.push(JobEvent::Log { job: job.id.clone(), entry });
            events.push(JobEvent::Status { job: job.id.clone(), status });
            Ok((job.clone(), events))
        });
        self.board.release(&self.id);
        result
    }
}

impl Drop for JobWriter<'_> {
    fn drop(&mut self) {
        if self.board.status(&self.id) == Some(JobStatus::Processing) {
            tracing::error!(job_id = %self.id, "Job writer dropped while processing");
            let _ = self.board.update(&self.id, |job| {
                transition(job, JobStatus::Error)?;
                job.progress = 100;
                job.failure = Some("processing was abandoned".to_string());
                let entry = job.logs.append("Failed: processing was abandoned").clone();
                Ok((
                    (),
                    vec![
                        JobEvent::Log { job: job.id.clone(), entry },
                        JobEvent::Status {
                            job: job.id.clone(),
                            status: JobStatus::Error,
                        },
                    ],
                ))
            });
        }
        self.board.release(&self.id);
    }
}

impl LogSink for JobWriter<'_> {
    fn append(&self, message: String) {
        self.log(message);
    }
}
