//! Manuscript analysis pipeline
//!
//! # Architecture
//!
//! - **StageKind / StageResult**: the fixed set of stages and the strict,
//!   validated result each one produces
//! - **prompt / validate**: request construction and response checking
//!   for the analysis service
//! - **StageRunner**: runs one stage through the backoff policy and turns
//!   any failure into an explicit no-result outcome
//! - **ReportMap**: merges stage outcomes (per-chunk compliance results
//!   accumulate in chunk order)
//! - **JobOrchestrator**: takes one job from `Queued` to `Completed` or
//!   `Error`
//!
//! # Example
//!
//! ```ignore
//! use folio::analysis::JobOrchestrator;
//!
//! let orchestrator = JobOrchestrator::new(board, extractor, rules, service);
//! let status = orchestrator.process(&job_id).await?;
//! ```

mod merger;
mod orchestrator;
pub mod prompt;
mod runner;
mod types;
pub mod validate;

pub use merger::ReportMap;
pub use orchestrator::{JobOrchestrator, StagePlan};
pub use runner::{StageOutcome, StageRun, StageRunner, StageTask};
pub use types::{
    AnalysisError, ComplianceFinding, ComplianceReport, MetadataReport, PeerReviewSummary,
    ReadabilityIssue, ReviewVerdict, Score, ScoreReport, Severity, StageKind, StageResult,
    StructuralIssue,
};
