//! Storage trait definitions

use crate::job::{DocumentJob, JobId};
use crate::usage::UsageEntry;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Persistence for document jobs and usage entries
///
/// Jobs are saved whole on every change; the store keeps the latest
/// snapshot per job ID. Usage entries are append-only.
pub trait JobStore: Send + Sync {
    /// Insert or replace a job snapshot
    fn save_job(&self, job: &DocumentJob) -> StorageResult<()>;

    /// Load one job
    fn load_job(&self, id: &JobId) -> StorageResult<Option<DocumentJob>>;

    /// Load every job, oldest first
    fn load_jobs(&self) -> StorageResult<Vec<DocumentJob>>;

    /// Delete a job; returns whether it existed
    fn delete_job(&self, id: &JobId) -> StorageResult<bool>;

    /// Append a usage entry
    fn record_usage(&self, entry: &UsageEntry) -> StorageResult<()>;

    /// Load all usage entries, oldest first
    fn load_usage(&self) -> StorageResult<Vec<UsageEntry>>;
}

/// Extension trait for stores that can be opened from a path
pub trait OpenStore: JobStore + Sized {
    /// Open or create a store at the given path
    fn open(path: impl AsRef<Path>) -> StorageResult<Self>;

    /// Create an in-memory store (useful for testing)
    fn open_in_memory() -> StorageResult<Self>;
}
