//! Stage kinds and the strict per-stage result types

use serde::{Deserialize, Serialize};
use std::fmt;

/// One discrete analysis pass.
///
/// Declaration order is execution order: compliance runs first (once per
/// chunk), then the whole-document stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Compliance,
    Structure,
    Readability,
    Scoring,
    Metadata,
    PeerReview,
}

impl StageKind {
    /// Whole-document stages, in execution order.
    pub const DOCUMENT_STAGES: [StageKind; 5] = [
        StageKind::Structure,
        StageKind::Readability,
        StageKind::Scoring,
        StageKind::Metadata,
        StageKind::PeerReview,
    ];

    pub const ALL: [StageKind; 6] = [
        StageKind::Compliance,
        StageKind::Structure,
        StageKind::Readability,
        StageKind::Scoring,
        StageKind::Metadata,
        StageKind::PeerReview,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Compliance => "compliance",
            StageKind::Structure => "structure",
            StageKind::Readability => "readability",
            StageKind::Scoring => "scoring",
            StageKind::Metadata => "metadata",
            StageKind::PeerReview => "peer_review",
        }
    }

    /// Human-readable name used in job logs.
    pub fn display_name(&self) -> &'static str {
        match self {
            StageKind::Compliance => "Compliance check",
            StageKind::Structure => "Structural analysis",
            StageKind::Readability => "Readability analysis",
            StageKind::Scoring => "Scoring",
            StageKind::Metadata => "Metadata extraction",
            StageKind::PeerReview => "Peer-review simulation",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Severity of a compliance finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Coerce free-form severity wording. Unknown words map to `Medium`.
    pub fn coerce(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "low" | "minor" | "info" | "informational" => Severity::Low,
            "high" | "major" | "serious" => Severity::High,
            "critical" | "blocker" | "severe" => Severity::Critical,
            _ => Severity::Medium,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

/// A passage that breaks a rule from the profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceFinding {
    /// Rule reference as named in the rule documents
    pub rule: String,
    /// Where in the manuscript (page range or finer)
    pub location: String,
    /// Quoted text from the manuscript
    pub excerpt: String,
    pub issue: String,
    pub recommendation: String,
    pub severity: Severity,
}

/// Compliance findings across all chunks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub findings: Vec<ComplianceFinding>,
    /// Cross-cutting advice; only requested with the first chunk
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuralIssue {
    pub section: String,
    pub issue: String,
    pub suggestion: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadabilityIssue {
    pub passage: String,
    pub issue: String,
    pub suggestion: String,
}

/// A 0–100 score with the reasoning behind it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub score: u8,
    pub rationale: String,
}

/// Fixed set of named scores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreReport {
    pub overall: Score,
    pub clarity: Score,
    pub structure: Score,
    pub originality: Score,
    pub market_fit: Score,
}

impl ScoreReport {
    pub fn named(&self) -> [(&'static str, &Score); 5] {
        [
            ("overall", &self.overall),
            ("clarity", &self.clarity),
            ("structure", &self.structure),
            ("originality", &self.originality),
            ("market_fit", &self.market_fit),
        ]
    }
}

/// Bibliographic fields extracted from the manuscript.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataReport {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// Editorial verdict of the simulated reviewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewVerdict {
    Accept,
    MinorRevisions,
    MajorRevisions,
    Reject,
}

impl ReviewVerdict {
    /// Coerce free-form verdict wording by keyword.
    pub fn coerce(raw: &str) -> Option<Self> {
        let lower = raw.trim().to_lowercase().replace(['-', '_'], " ");
        if lower.contains("reject") {
            Some(ReviewVerdict::Reject)
        } else if lower.contains("major") {
            Some(ReviewVerdict::MajorRevisions)
        } else if lower.contains("minor") || lower.contains("revis") {
            Some(ReviewVerdict::MinorRevisions)
        } else if lower.contains("accept") || lower.contains("publish") {
            Some(ReviewVerdict::Accept)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewVerdict::Accept => "accept",
            ReviewVerdict::MinorRevisions => "minor_revisions",
            ReviewVerdict::MajorRevisions => "major_revisions",
            ReviewVerdict::Reject => "reject",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerReviewSummary {
    pub recommendation: ReviewVerdict,
    pub summary: String,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
}

/// Validated output of one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "report", rename_all = "snake_case")]
pub enum StageResult {
    Compliance(ComplianceReport),
    Structure(Vec<StructuralIssue>),
    Readability(Vec<ReadabilityIssue>),
    Scoring(ScoreReport),
    Metadata(MetadataReport),
    PeerReview(PeerReviewSummary),
}

impl StageResult {
    pub fn kind(&self) -> StageKind {
        match self {
            StageResult::Compliance(_) => StageKind::Compliance,
            StageResult::Structure(_) => StageKind::Structure,
            StageResult::Readability(_) => StageKind::Readability,
            StageResult::Scoring(_) => StageKind::Scoring,
            StageResult::Metadata(_) => StageKind::Metadata,
            StageResult::PeerReview(_) => StageKind::PeerReview,
        }
    }

    /// One-line description for the job log.
    pub fn summary(&self) -> String {
        match self {
            StageResult::Compliance(r) => format!("{} finding(s)", r.findings.len()),
            StageResult::Structure(issues) => format!("{} structural issue(s)", issues.len()),
            StageResult::Readability(issues) => format!("{} readability issue(s)", issues.len()),
            StageResult::Scoring(r) => format!("overall score {}", r.overall.score),
            StageResult::Metadata(r) => format!("title \"{}\"", r.title),
            StageResult::PeerReview(r) => {
                format!("recommendation {}", r.recommendation.as_str())
            }
        }
    }
}

/// Errors raised while validating service output.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AnalysisError {
    #[error("no JSON object in service output")]
    NoJson,

    #[error("unexpected shape for {stage}: {reason}")]
    Shape { stage: StageKind, reason: String },
}

impl AnalysisError {
    pub fn shape(stage: StageKind, reason: impl Into<String>) -> Self {
        AnalysisError::Shape {
            stage,
            reason: reason.into(),
        }
    }
}
