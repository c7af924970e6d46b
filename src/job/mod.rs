//! Document jobs, their logs, and the shared board that holds them

mod board;
mod document;
mod log;

pub use board::{JobBoard, JobEvent, JobWriter, PipelineError, PipelineResult};
pub use document::{DocumentJob, JobId, JobStatus, NewJob, SourceRef};
pub use log::{JobLog, LogEntry, LogSink};
