//! Job orchestrator: drives one document through every stage
//!
//! Sequence for a job taken off the queue:
//!
//! 1. `Queued -> Processing`
//! 2. extract text (through the backoff policy), then chunk it
//! 3. resolve the profile's rule text
//! 4. compliance once per chunk, in chunk order, with a courtesy delay
//!    between chunk calls (none after the last chunk)
//! 5. whole-document stages in fixed order: structure, readability,
//!    scoring, metadata, peer review
//! 6. `Processing -> Completed`, usage entry recorded
//!
//! Failures in steps 2 and 3 are fatal (`Processing -> Error`, no stage
//! runs). A stage failure never is: the stage contributes an empty entry
//! and the job carries on.

use super::runner::{StageOutcome, StageRun, StageRunner, StageTask};
use super::types::StageKind;
use crate::backoff::{BackoffPolicy, RetryNotice};
use crate::chunk::Chunker;
use crate::config::{PipelineConfig, DEFAULT_CHUNK_DELAY_MS, DEFAULT_DOCUMENT_EXCERPT_CHARS};
use crate::extract::{ExtractionError, TextExtractor};
use crate::job::{JobBoard, JobId, JobStatus, JobWriter, PipelineResult};
use crate::rules::RuleResolver;
use crate::service::{AnalysisService, TokenUsage};
use crate::usage::{UsageEntry, UsageLedger};
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

/// Stage count for one run: one compliance stage per chunk plus the
/// whole-document stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagePlan {
    pub chunk_count: usize,
}

impl StagePlan {
    pub fn new(chunk_count: usize) -> Self {
        Self { chunk_count }
    }

    pub fn total(&self) -> usize {
        self.chunk_count + StageKind::DOCUMENT_STAGES.len()
    }

    /// `round(100 * attempted / total)`, held at 99 until the job reaches a
    /// terminal status.
    pub fn progress_after(&self, attempted: usize) -> u8 {
        let total = self.total().max(1);
        let attempted = attempted.min(total);
        let rounded = (200 * attempted + total) / (2 * total);
        rounded.min(99) as u8
    }
}

/// Running totals for the usage entry.
#[derive(Debug, Default)]
struct RunTally {
    calls: u32,
    usage: TokenUsage,
}

impl RunTally {
    fn add(&mut self, run: &StageRun) {
        self.calls += run.calls;
        self.usage.add(run.usage);
    }
}

/// Coordinates extraction, chunking, rules and stages for one job at a time
pub struct JobOrchestrator {
    board: Arc<JobBoard>,
    extractor: Arc<dyn TextExtractor>,
    rules: Arc<dyn RuleResolver>,
    runner: StageRunner,
    chunker: Chunker,
    /// Retry policy for text extraction
    extraction_backoff: BackoffPolicy,
    chunk_delay: Duration,
    excerpt_chars: usize,
    usage: Arc<UsageLedger>,
    default_user: Option<String>,
}

impl JobOrchestrator {
    /// Create an orchestrator with default timings
    pub fn new(
        board: Arc<JobBoard>,
        extractor: Arc<dyn TextExtractor>,
        rules: Arc<dyn RuleResolver>,
        service: Arc<dyn AnalysisService>,
    ) -> Self {
        Self {
            board,
            extractor,
            rules,
            runner: StageRunner::new(service),
            chunker: Chunker::default(),
            extraction_backoff: BackoffPolicy::default(),
            chunk_delay: Duration::from_millis(DEFAULT_CHUNK_DELAY_MS),
            excerpt_chars: DEFAULT_DOCUMENT_EXCERPT_CHARS,
            usage: Arc::new(UsageLedger::new()),
            default_user: None,
        }
    }

    /// Apply chunking, retry and delay settings from a config
    pub fn with_config(self, config: &PipelineConfig) -> Self {
        let mut this = self
            .with_chunker(config.chunker())
            .with_backoff(config.backoff())
            .with_chunk_delay(config.chunk_delay())
            .with_excerpt_chars(config.document_excerpt_chars);
        this.default_user = config.user.clone();
        this
    }

    pub fn with_chunker(mut self, chunker: Chunker) -> Self {
        self.chunker = chunker;
        self
    }

    /// Use one retry policy for service calls and text extraction
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.runner = self.runner.with_backoff(backoff);
        self.extraction_backoff = backoff;
        self
    }

    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    pub fn with_excerpt_chars(mut self, chars: usize) -> Self {
        self.excerpt_chars = chars.max(1);
        self
    }

    pub fn with_usage(mut self, usage: Arc<UsageLedger>) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_default_user(mut self, user: impl Into<String>) -> Self {
        self.default_user = Some(user.into());
        self
    }

    pub fn board(&self) -> &Arc<JobBoard> {
        &self.board
    }

    pub fn usage(&self) -> &Arc<UsageLedger> {
        &self.usage
    }

    /// Process one queued job to a terminal status.
    ///
    /// Returns `Completed` or `Error`. An `Err` means the job could not be
    /// started (unknown, not queued, or another job is processing).
    pub async fn process(&self, id: &JobId) -> PipelineResult<JobStatus> {
        let writer = self.board.begin(id)?;
        let span = tracing::info_span!("job", job_id = %id);
        self.run(writer).instrument(span).await
    }

    async fn run(&self, writer: JobWriter<'_>) -> PipelineResult<JobStatus> {
        let Some(job) = writer.snapshot() else {
            return Ok(JobStatus::Error);
        };
        let document = job.source.display_name.clone();

        // === Fatal steps ===

        writer.log(format!("Extracting text from {}", document));
        let extracted = self
            .extraction_backoff
            .execute_with(
                "text extraction",
                |notice: &RetryNotice<'_, ExtractionError>| {
                    writer.log(format!(
                        "Text extraction: {} (attempt {}/{}), retrying in {:.1}s",
                        notice.error,
                        notice.attempt,
                        notice.max_attempts,
                        notice.delay.as_secs_f64()
                    ))
                },
                || self.extractor.extract(&job.source),
            )
            .await;

        let text = match extracted {
            Ok(text) => text,
            Err(e) => return self.fail(writer, format!("text extraction failed: {}", e)),
        };
        if text.trim().is_empty() {
            return self.fail(writer, "no text could be extracted from the document".to_string());
        }

        let chunks = self.chunker.chunk(&text);
        let pages = chunks.last().map(|c| c.last_page).unwrap_or(0);
        writer.log(format!(
            "Extracted {} page(s) into {} chunk(s) of up to {} pages",
            pages,
            chunks.len(),
            self.chunker.pages_per_chunk()
        ));

        writer.log(format!("Resolving rules for profile '{}'", job.profile_id));
        let rules = match self.rules.resolve(&job.profile_id).await {
            Ok(rules) if rules.trim().is_empty() => {
                return self.fail(
                    writer,
                    format!("rule profile '{}' has no rule text", job.profile_id),
                )
            }
            Ok(rules) => rules,
            Err(e) => return self.fail(writer, format!("rule resolution failed: {}", e)),
        };

        // === Stages ===

        let plan = StagePlan::new(chunks.len());
        writer.set_plan(plan.total())?;
        tracing::info!(chunks = chunks.len(), stages = plan.total(), "Stages planned");

        let mut tally = RunTally::default();
        let mut attempted = 0;

        for (i, chunk) in chunks.iter().enumerate() {
            let task = StageTask::ComplianceChunk {
                chunk,
                chunk_count: chunks.len(),
                rules: &rules,
            };
            attempted += 1;
            self.run_stage(&writer, &task, &plan, attempted, &mut tally)
                .await?;

            if i + 1 < chunks.len() && !self.chunk_delay.is_zero() {
                tokio::time::sleep(self.chunk_delay).await;
            }
        }

        let excerpt = truncate_chars(&text, self.excerpt_chars);
        if excerpt.len() < text.len() {
            writer.log(format!(
                "Document text truncated to {} characters for whole-document stages",
                self.excerpt_chars
            ));
        }

        for kind in StageKind::DOCUMENT_STAGES {
            let task = StageTask::Document {
                kind,
                title: &document,
                text: excerpt,
            };
            attempted += 1;
            self.run_stage(&writer, &task, &plan, attempted, &mut tally)
                .await?;
        }

        // === Completion ===

        let finished = writer.snapshot().unwrap_or(job);
        let failed_stages = finished.reports.empty_stages();
        let populated = StageKind::ALL
            .iter()
            .filter(|k| finished.reports.is_populated(**k))
            .count();

        let user = job_user(&finished.submitted_by, &self.default_user);
        let entry = UsageEntry::new(
            user,
            finished.id.clone(),
            document.clone(),
            tally.calls,
            tally.usage,
        )
        .with_failed_stages(failed_stages.clone());
        if let Err(e) = self.usage.record(entry) {
            tracing::warn!(error = %e, "Failed to persist usage entry");
        }

        let summary = if failed_stages.is_empty() {
            format!(
                "Completed: {} stage(s) run, {} service call(s)",
                plan.total(),
                tally.calls
            )
        } else {
            let names: Vec<&str> = failed_stages.iter().map(|k| k.display_name()).collect();
            format!(
                "Completed: {} stage(s) run, {} service call(s); no result from {}",
                plan.total(),
                tally.calls,
                names.join(", ")
            )
        };
        tracing::info!(
            calls = tally.calls,
            populated,
            failed = failed_stages.len(),
            "Job completed"
        );
        writer.complete(summary)?;
        Ok(JobStatus::Completed)
    }

    /// Run one stage, merge its outcome and advance progress.
    async fn run_stage(
        &self,
        writer: &JobWriter<'_>,
        task: &StageTask<'_>,
        plan: &StagePlan,
        attempted: usize,
        tally: &mut RunTally,
    ) -> PipelineResult<()> {
        let label = task.label();
        writer.log(format!("Starting {}", label));
        tracing::debug!(stage = task.kind().as_str(), label = %label, "Stage started");

        let run = self.runner.run_stage(task, writer).await;
        tally.add(&run);

        if let StageOutcome::Completed(result) = &run.outcome {
            writer.log(format!("Finished {}: {}", label, result.summary()));
        }
        writer.merge_report(run.kind, run.outcome.into_result())?;
        writer.set_progress(plan.progress_after(attempted))?;
        Ok(())
    }

    fn fail(&self, writer: JobWriter<'_>, reason: String) -> PipelineResult<JobStatus> {
        tracing::error!(reason = %reason, "Job failed");
        writer.fail(reason)?;
        Ok(JobStatus::Error)
    }
}

fn job_user<'a>(submitted_by: &'a Option<String>, default: &'a Option<String>) -> Option<&'a str> {
    submitted_by.as_deref().or(default.as_deref())
}

/// Longest prefix of `text` with at most `max_chars` characters.
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}
