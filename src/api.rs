//! Transport-independent API layer
//!
//! `FolioApi` is the single entry point for consumer-facing operations.
//! The MCP server and the CLI call `FolioApi` methods; they never reach
//! into the board, queue or orchestrator directly.

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use crate::analysis::JobOrchestrator;
use crate::config::PipelineConfig;
use crate::export::{ExportError, ExportFormat};
use crate::extract::PlainTextExtractor;
use crate::job::{DocumentJob, JobBoard, JobEvent, JobId, JobStatus, NewJob, PipelineError, SourceRef};
use crate::queue::{ProcessingQueue, QueueDriver};
use crate::rules::{ProfileLibrary, RuleProfile, RuleResolver};
use crate::service::{AnalysisService, MockService};
use crate::storage::{JobStore, OpenStore, SqliteStore, StorageError};
use crate::usage::UsageLedger;

/// Errors surfaced by [`FolioApi`]
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unknown rule profile: {0}")]
    UnknownProfile(String),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error("Could not create database directory: {0}")]
    Io(#[from] std::io::Error),
}

/// Single entry point for all consumer-facing operations.
#[derive(Clone)]
pub struct FolioApi {
    board: Arc<JobBoard>,
    queue: Arc<ProcessingQueue>,
    orchestrator: Arc<JobOrchestrator>,
    library: Arc<ProfileLibrary>,
}

impl FolioApi {
    /// Assemble from parts. The orchestrator must share `library` as its
    /// rule resolver and `orchestrator.board()` is used as the board.
    pub fn new(orchestrator: Arc<JobOrchestrator>, library: Arc<ProfileLibrary>) -> Self {
        let board = Arc::clone(orchestrator.board());
        Self {
            queue: Arc::new(ProcessingQueue::new(Arc::clone(&board))),
            board,
            orchestrator,
            library,
        }
    }

    /// Build the full pipeline from a config.
    ///
    /// With a database configured, jobs and usage are loaded from it, jobs
    /// interrupted mid-run are marked `Error`, and jobs still `Queued` are
    /// enqueued again in submission order.
    pub fn from_config(
        config: &PipelineConfig,
        service: Arc<dyn AnalysisService>,
    ) -> Result<Self, ApiError> {
        let store = match config.database_path() {
            Some(path) => Some(open_store(&path)?),
            None => None,
        };

        let (board, usage) = match store {
            Some(store) => {
                let board = JobBoard::with_store(Arc::clone(&store));
                board.load_all()?;
                (board, UsageLedger::with_store(store)?)
            }
            None => (JobBoard::new(), UsageLedger::new()),
        };
        let board = Arc::new(board);
        let library = Arc::new(config.profile_library());

        let orchestrator = JobOrchestrator::new(
            Arc::clone(&board),
            Arc::new(PlainTextExtractor::new()),
            Arc::clone(&library) as Arc<dyn RuleResolver>,
            service,
        )
        .with_config(config)
        .with_usage(Arc::new(usage));

        let api = Self::new(Arc::new(orchestrator), library);
        let requeued = api.requeue_waiting();
        if requeued > 0 {
            tracing::info!(jobs = requeued, "Re-enqueued waiting jobs");
        }
        Ok(api)
    }

    fn requeue_waiting(&self) -> usize {
        let mut count = 0;
        for job in self.board.list() {
            if job.status != JobStatus::Queued {
                continue;
            }
            match self.queue.enqueue(&job.id) {
                Ok(_) => count += 1,
                Err(e) => {
                    tracing::warn!(job_id = %job.id, error = %e, "Could not re-enqueue job")
                }
            }
        }
        count
    }

    // --- Submission ---

    /// Create a job for a document and append it to the processing queue.
    ///
    /// The profile must exist. The file itself is only read when the job
    /// is processed, so a missing file ends the job in `Error`.
    pub fn add_document(
        &self,
        path: impl AsRef<Path>,
        profile_id: &str,
        user: Option<&str>,
    ) -> Result<DocumentJob, ApiError> {
        if self.library.get(profile_id).is_none() {
            return Err(ApiError::UnknownProfile(profile_id.to_string()));
        }

        let mut request = NewJob::new(SourceRef::from_path(path), profile_id);
        if let Some(user) = user {
            request = request.submitted_by(user);
        }
        let job = self.board.create(request)?;
        self.queue.enqueue(&job.id)?;
        tracing::info!(job_id = %job.id, document = %job.display_name(), "Document added");

        Ok(self.board.get(&job.id).unwrap_or(job))
    }

    /// Withdraw a job that has not started. Returns whether it was waiting.
    pub fn cancel_document(&self, id: &JobId) -> bool {
        self.queue.cancel_if_queued(id)
    }

    /// Put a cancelled job back at the tail of the queue.
    pub fn requeue(&self, id: &JobId) -> Result<usize, ApiError> {
        Ok(self.queue.enqueue(id)?)
    }

    // --- Read ---

    pub fn job(&self, id: &JobId) -> Option<DocumentJob> {
        self.board.get(id)
    }

    /// All jobs, oldest first
    pub fn jobs(&self) -> Vec<DocumentJob> {
        self.board.list()
    }

    /// Rendered log of one job
    pub fn job_log(&self, id: &JobId) -> Result<String, ApiError> {
        let job = self.require(id)?;
        Ok(job.logs.render())
    }

    pub fn export(&self, id: &JobId, format: ExportFormat) -> Result<String, ApiError> {
        let job = self.require(id)?;
        Ok(format.render(&job)?)
    }

    pub fn profiles(&self) -> Vec<RuleProfile> {
        self.library.list()
    }

    /// Job IDs waiting in the queue, head first
    pub fn pending(&self) -> Vec<JobId> {
        self.queue.pending()
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<JobEvent> {
        self.board.subscribe()
    }

    // --- Delete ---

    /// Delete a job that is not processing, withdrawing it from the queue
    /// first if it is waiting.
    pub fn delete_job(&self, id: &JobId) -> Result<DocumentJob, ApiError> {
        if self.board.status(id) == Some(JobStatus::Processing) {
            return Err(PipelineError::JobInFlight(id.clone()).into());
        }
        self.queue.cancel_if_queued(id);
        Ok(self.board.delete(id)?)
    }

    // --- Plumbing ---

    pub fn board(&self) -> &Arc<JobBoard> {
        &self.board
    }

    pub fn queue(&self) -> &Arc<ProcessingQueue> {
        &self.queue
    }

    pub fn usage(&self) -> &Arc<UsageLedger> {
        self.orchestrator.usage()
    }

    /// A driver for this API's queue
    pub fn driver(&self) -> QueueDriver {
        QueueDriver::new(Arc::clone(&self.queue), Arc::clone(&self.orchestrator))
    }

    fn require(&self, id: &JobId) -> Result<DocumentJob, ApiError> {
        self.board
            .get(id)
            .ok_or_else(|| PipelineError::JobNotFound(id.clone()).into())
    }
}

fn open_store(path: &Path) -> Result<Arc<dyn JobStore>, ApiError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let store = SqliteStore::open(path)?;
    tracing::debug!(path = %path.display(), "Opened job database");
    Ok(Arc::new(store))
}

/// The configured subprocess client, or the scripted mock when no command
/// is set.
pub fn service_from_config(config: &PipelineConfig) -> Arc<dyn AnalysisService> {
    match config.service.command_service() {
        Some(service) => Arc::new(service),
        None => {
            tracing::warn!("No analysis service command configured; using mock responses");
            Arc::new(MockService::new())
        }
    }
}
