//! Export of job results
//!
//! Pure functions over job snapshots: a flat key/value record, CSV tables
//! and a plain-text log report. Jobs that are still running export with
//! whatever state they have reached.

use crate::analysis::StageKind;
use crate::job::DocumentJob;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur during export
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Output is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("Unknown export format '{0}' (expected flat, csv, findings or log)")]
    UnknownFormat(String),
}

/// Rendering of a single job for download
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    /// `field: value` lines of [`flat_record`]
    Flat,
    /// [`jobs_csv`] with one row
    Csv,
    /// [`findings_csv`]
    Findings,
    /// [`log_text`]
    Log,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Flat => "flat",
            ExportFormat::Csv => "csv",
            ExportFormat::Findings => "findings",
            ExportFormat::Log => "log",
        }
    }

    pub fn render(&self, job: &DocumentJob) -> Result<String, ExportError> {
        match self {
            ExportFormat::Flat => Ok(flat_text(job)),
            ExportFormat::Csv => jobs_csv(std::slice::from_ref(job)),
            ExportFormat::Findings => findings_csv(job),
            ExportFormat::Log => Ok(log_text(job)),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "flat" => Ok(ExportFormat::Flat),
            "csv" => Ok(ExportFormat::Csv),
            "findings" => Ok(ExportFormat::Findings),
            "log" | "text" => Ok(ExportFormat::Log),
            other => Err(ExportError::UnknownFormat(other.to_string())),
        }
    }
}

/// Column names of [`flat_record`], in order.
pub const FLAT_FIELDS: [&str; 27] = [
    "id",
    "document",
    "source_path",
    "profile",
    "submitted_by",
    "status",
    "progress",
    "created_at",
    "updated_at",
    "stages_planned",
    "stages_attempted",
    "failure",
    "title",
    "authors",
    "genre",
    "keywords",
    "language",
    "compliance_findings",
    "compliance_recommendations",
    "structural_issues",
    "readability_issues",
    "score_overall",
    "score_clarity",
    "score_structure",
    "score_originality",
    "score_market_fit",
    "peer_review",
];

/// Headline fields and counts of one job, in [`FLAT_FIELDS`] order.
///
/// Stages without a result leave their fields empty.
pub fn flat_record(job: &DocumentJob) -> Vec<(&'static str, String)> {
    let reports = &job.reports;
    let metadata = reports.metadata();
    let scores = reports.scores();
    let count = |n: Option<usize>| n.map(|n| n.to_string()).unwrap_or_default();
    let score = |name: &str| {
        scores
            .and_then(|s| s.named().into_iter().find(|(n, _)| *n == name))
            .map(|(_, s)| s.score.to_string())
            .unwrap_or_default()
    };

    let values = [
        job.id.to_string(),
        job.display_name().to_string(),
        job.source.path.display().to_string(),
        job.profile_id.clone(),
        job.submitted_by.clone().unwrap_or_default(),
        job.status.to_string(),
        job.progress.to_string(),
        job.created_at.to_rfc3339(),
        job.updated_at.to_rfc3339(),
        job.stages_planned.to_string(),
        job.stages_attempted.to_string(),
        job.failure.clone().unwrap_or_default(),
        metadata.map(|m| m.title.clone()).unwrap_or_default(),
        metadata.map(|m| m.authors.join("; ")).unwrap_or_default(),
        metadata.and_then(|m| m.genre.clone()).unwrap_or_default(),
        metadata.map(|m| m.keywords.join("; ")).unwrap_or_default(),
        metadata.and_then(|m| m.language.clone()).unwrap_or_default(),
        count(reports.compliance().map(|c| c.findings.len())),
        count(reports.compliance().map(|c| c.recommendations.len())),
        count(reports.structure().map(|s| s.len())),
        count(reports.readability().map(|r| r.len())),
        score("overall"),
        score("clarity"),
        score("structure"),
        score("originality"),
        score("market_fit"),
        reports
            .peer_review()
            .map(|p| p.recommendation.as_str().to_string())
            .unwrap_or_default(),
    ];

    FLAT_FIELDS.into_iter().zip(values).collect()
}

fn flat_text(job: &DocumentJob) -> String {
    flat_record(job)
        .into_iter()
        .map(|(key, value)| format!("{}: {}\n", key, value))
        .collect()
}

fn finish(writer: csv::Writer<Vec<u8>>) -> Result<String, ExportError> {
    let bytes = writer.into_inner().map_err(|e| e.into_error())?;
    Ok(String::from_utf8(bytes)?)
}

fn write_jobs<W: std::io::Write>(
    writer: &mut csv::Writer<W>,
    jobs: &[DocumentJob],
) -> Result<(), ExportError> {
    writer.write_record(FLAT_FIELDS)?;
    for job in jobs {
        writer.write_record(flat_record(job).into_iter().map(|(_, v)| v))?;
    }
    writer.flush()?;
    Ok(())
}

/// One row per job, columns as in [`FLAT_FIELDS`].
pub fn jobs_csv(jobs: &[DocumentJob]) -> Result<String, ExportError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    write_jobs(&mut writer, jobs)?;
    finish(writer)
}

/// Write [`jobs_csv`] output to a file.
pub fn write_jobs_csv(path: impl AsRef<Path>, jobs: &[DocumentJob]) -> Result<(), ExportError> {
    let mut writer = csv::Writer::from_path(path)?;
    write_jobs(&mut writer, jobs)
}

/// One row per compliance finding.
pub fn findings_csv(job: &DocumentJob) -> Result<String, ExportError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record([
        "job_id",
        "document",
        "rule",
        "location",
        "severity",
        "excerpt",
        "issue",
        "recommendation",
    ])?;
    if let Some(report) = job.reports.compliance() {
        for f in &report.findings {
            writer.write_record([
                job.id.as_str(),
                job.display_name(),
                f.rule.as_str(),
                f.location.as_str(),
                f.severity.as_str(),
                f.excerpt.as_str(),
                f.issue.as_str(),
                f.recommendation.as_str(),
            ])?;
        }
    }
    finish(writer)
}

/// Log lines followed by a per-stage summary, for download.
pub fn log_text(job: &DocumentJob) -> String {
    let mut out = format!(
        "Document: {}\nStatus: {} ({}%)\nProfile: {}\n",
        job.display_name(),
        job.status,
        job.progress,
        job.profile_id
    );
    if let Some(failure) = &job.failure {
        out.push_str(&format!("Failure: {}\n", failure));
    }

    out.push_str("\n== Log ==\n");
    out.push_str(&job.logs.render());

    out.push_str("\n== Stages ==\n");
    for kind in StageKind::ALL {
        let line = if !job.reports.attempted(kind) {
            "not run".to_string()
        } else {
            match job.reports.get(kind) {
                Some(result) => result.summary(),
                None => "no result".to_string(),
            }
        };
        out.push_str(&format!("{}: {}\n", kind.display_name(), line));
    }
    out
}
