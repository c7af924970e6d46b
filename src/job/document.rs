//! Document job: one manuscript moving through the pipeline

use super::log::JobLog;
use crate::analysis::ReportMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Unique identifier for a document job
///
/// Serializes as a plain string (UUID v4 for new jobs)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Create a new random JobId
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Where the manuscript comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub path: PathBuf,
    /// Name shown in logs and exports (file name by default)
    pub display_name: String,
}

impl SourceRef {
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let display_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self { path, display_name }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }
}

/// Lifecycle of a job: `Queued -> Processing -> {Completed, Error}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Error,
}

impl JobStatus {
    /// Whether moving to `next` is a legal forward transition.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Error)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "error" => Some(JobStatus::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request to create a job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub source: SourceRef,
    pub profile_id: String,
    pub submitted_by: Option<String>,
}

impl NewJob {
    pub fn new(source: SourceRef, profile_id: impl Into<String>) -> Self {
        Self {
            source,
            profile_id: profile_id.into(),
            submitted_by: None,
        }
    }

    pub fn submitted_by(mut self, user: impl Into<String>) -> Self {
        self.submitted_by = Some(user.into());
        self
    }
}

/// Full state of one document job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentJob {
    pub id: JobId,
    pub source: SourceRef,
    /// Rule profile used for the compliance stage
    pub profile_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_by: Option<String>,
    pub status: JobStatus,
    /// 0..=100, never decreases
    pub progress: u8,
    pub logs: JobLog,
    pub reports: ReportMap,
    /// Stages planned for this run; zero until chunking is done
    #[serde(default)]
    pub stages_planned: usize,
    #[serde(default)]
    pub stages_attempted: usize,
    /// Reason for a fatal error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DocumentJob {
    pub fn new(request: NewJob) -> Self {
        let now = Utc::now();
        let mut logs = JobLog::new();
        logs.append(format!("Queued {}", request.source.display_name));
        Self {
            id: JobId::new(),
            source: request.source,
            profile_id: request.profile_id,
            submitted_by: request.submitted_by,
            status: JobStatus::Queued,
            progress: 0,
            logs,
            reports: ReportMap::new(),
            stages_planned: 0,
            stages_attempted: 0,
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn display_name(&self) -> &str {
        &self.source.display_name
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
