//! Folio: manuscript analysis pipeline
//!
//! Takes uploaded manuscripts through a fixed sequence of analysis stages
//! against an external AI service: a compliance check against a rule
//! profile (run per chunk of pages), then whole-document structure,
//! readability, scoring, metadata and peer-review passes.
//!
//! # Core Concepts
//!
//! - **Jobs**: one per document, moving `Queued → Processing →
//!   Completed | Error` with monotonic progress and an append-only log
//! - **Queue**: a single FIFO drained by one driver, so at most one job is
//!   ever processing
//! - **Stages**: each stage runs through a retry policy; a stage that still
//!   fails records "no result" without stopping the job
//!
//! # Example
//!
//! ```
//! use folio::{FolioApi, MockService, PipelineConfig};
//! use std::sync::Arc;
//!
//! let api = FolioApi::from_config(&PipelineConfig::default(), Arc::new(MockService::new()))
//!     .unwrap();
//! assert!(api.jobs().is_empty());
//! ```

pub mod analysis;
pub mod api;
pub mod backoff;
pub mod chunk;
pub mod config;
pub mod export;
pub mod extract;
pub mod job;
pub mod mcp;
pub mod queue;
pub mod rules;
pub mod service;
pub mod storage;
pub mod usage;

pub use analysis::{JobOrchestrator, ReportMap, StageKind, StageResult};
pub use api::{ApiError, FolioApi};
pub use backoff::BackoffPolicy;
pub use chunk::{Chunker, PageBreak, TextChunk};
pub use config::{ConfigError, PipelineConfig};
pub use export::{ExportError, ExportFormat};
pub use extract::{ExtractionError, PlainTextExtractor, TextExtractor};
pub use job::{
    DocumentJob, JobBoard, JobEvent, JobId, JobStatus, NewJob, PipelineError, PipelineResult,
    SourceRef,
};
pub use queue::{ProcessingQueue, QueueDriver, ShutdownToken};
pub use rules::{ProfileLibrary, RuleError, RuleProfile, RuleResolver};
pub use service::{AnalysisService, CommandService, MockService, ServiceError};
pub use storage::{JobStore, OpenStore, SqliteStore, StorageError, StorageResult};
pub use usage::{UsageEntry, UsageLedger};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
