//! Stage runner: one analysis stage, start to finish
//!
//! A stage builds its request, calls the service through the backoff
//! policy, and validates the output. Whatever goes wrong stays inside the
//! stage: the caller always gets a [`StageRun`], with either a result or an
//! explicit no-result marker and the reason.

use super::prompt;
use super::types::{StageKind, StageResult};
use super::validate;
use crate::backoff::{BackoffPolicy, RetryNotice, Retryable};
use crate::chunk::TextChunk;
use crate::job::LogSink;
use crate::service::{AnalysisRequest, AnalysisService, ServiceError, TokenUsage};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Inputs for one stage.
#[derive(Debug, Clone, Copy)]
pub enum StageTask<'a> {
    /// Compliance check of one chunk
    ComplianceChunk {
        chunk: &'a TextChunk,
        chunk_count: usize,
        rules: &'a str,
    },
    /// One whole-document pass
    Document {
        kind: StageKind,
        title: &'a str,
        text: &'a str,
    },
}

impl StageTask<'_> {
    pub fn kind(&self) -> StageKind {
        match self {
            StageTask::ComplianceChunk { .. } => StageKind::Compliance,
            StageTask::Document { kind, .. } => *kind,
        }
    }

    /// Name used in log lines, e.g. "Compliance check 2/3 (Pages 26-50)"
    pub fn label(&self) -> String {
        match self {
            StageTask::ComplianceChunk {
                chunk, chunk_count, ..
            } => format!(
                "{} {}/{} ({})",
                StageKind::Compliance.display_name(),
                chunk.index + 1,
                chunk_count,
                chunk.page_range
            ),
            StageTask::Document { kind, .. } => kind.display_name().to_string(),
        }
    }

    fn is_first_chunk(&self) -> bool {
        matches!(self, StageTask::ComplianceChunk { chunk, .. } if chunk.index == 0)
    }

    pub fn request(&self) -> AnalysisRequest {
        match *self {
            StageTask::ComplianceChunk {
                chunk,
                chunk_count,
                rules,
            } => prompt::compliance_request(chunk, chunk_count, rules, chunk.index == 0),
            StageTask::Document { kind, title, text } => {
                prompt::document_request(kind, title, text)
            }
        }
    }
}

/// How a stage ended.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    Completed(StageResult),
    /// The stage produced nothing; the job carries on without it
    NoResult { reason: String },
}

impl StageOutcome {
    pub fn into_result(self) -> Option<StageResult> {
        match self {
            StageOutcome::Completed(result) => Some(result),
            StageOutcome::NoResult { .. } => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, StageOutcome::Completed(_))
    }
}

/// Record of one stage run.
#[derive(Debug, Clone)]
pub struct StageRun {
    pub kind: StageKind,
    pub label: String,
    pub outcome: StageOutcome,
    /// Service invocations made, retries included
    pub calls: u32,
    pub usage: TokenUsage,
}

/// Runs stages against an analysis service
pub struct StageRunner {
    service: Arc<dyn AnalysisService>,
    backoff: BackoffPolicy,
}

impl StageRunner {
    pub fn new(service: Arc<dyn AnalysisService>) -> Self {
        Self {
            service,
            backoff: BackoffPolicy::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    /// Run one stage. Never fails: service and validation errors become
    /// [`StageOutcome::NoResult`] with one log line describing the failure.
    pub async fn run_stage(&self, task: &StageTask<'_>, log: &dyn LogSink) -> StageRun {
        let kind = task.kind();
        let label = task.label();
        let request = task.request();
        let calls = AtomicU32::new(0);

        let on_retry = |notice: &RetryNotice<'_, ServiceError>| {
            log.append(format!(
                "{}: {} (attempt {}/{}), retrying in {:.1}s",
                label,
                notice.error,
                notice.attempt,
                notice.max_attempts,
                notice.delay.as_secs_f64()
            ));
        };

        let response = self
            .backoff
            .execute_with(&label, on_retry, || {
                calls.fetch_add(1, Ordering::Relaxed);
                let service = &self.service;
                let request = &request;
                async move { service.call(request).await }
            })
            .await;
        let calls = calls.into_inner();

        let (outcome, usage) = match response {
            Ok(response) => match validate::decode(kind, &response.output) {
                Ok(result) => (
                    StageOutcome::Completed(self.finish_result(task, result)),
                    response.usage,
                ),
                Err(e) => (
                    StageOutcome::NoResult {
                        reason: format!("invalid response: {}", e),
                    },
                    response.usage,
                ),
            },
            Err(e) => {
                let reason = if e.is_transient() && calls >= self.backoff.max_attempts() {
                    format!("{} (gave up after {} attempts)", e, calls)
                } else {
                    e.to_string()
                };
                (StageOutcome::NoResult { reason }, TokenUsage::default())
            }
        };

        if let StageOutcome::NoResult { reason } = &outcome {
            tracing::warn!(stage = kind.as_str(), label = %label, calls, reason = %reason, "Stage failed");
            log.append(format!("{} failed: {}", label, reason));
        }

        StageRun {
            kind,
            label,
            outcome,
            calls,
            usage,
        }
    }

    /// Chunk-level post-processing of a compliance result: findings without
    /// a location get the chunk's page range, and recommendations are only
    /// kept from the first chunk.
    fn finish_result(&self, task: &StageTask<'_>, result: StageResult) -> StageResult {
        match (task, result) {
            (StageTask::ComplianceChunk { chunk, .. }, StageResult::Compliance(mut report)) => {
                for finding in &mut report.findings {
                    if finding.location.is_empty() {
                        finding.location = chunk.page_range.clone();
                    }
                }
                if !task.is_first_chunk() {
                    report.recommendations.clear();
                }
                StageResult::Compliance(report)
            }
            (_, result) => result,
        }
    }
}
