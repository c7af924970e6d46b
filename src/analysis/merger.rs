//! Report map: per-stage results merged into one document report
//!
//! Every attempted stage gets an entry. A stage that produced nothing is
//! recorded as `None` so readers can tell "failed" apart from "not run yet".
//! Compliance runs once per chunk; chunk results accumulate in chunk order.

use super::types::{
    ComplianceReport, MetadataReport, PeerReviewSummary, ReadabilityIssue, ScoreReport,
    StageKind, StageResult, StructuralIssue,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Merged stage results for one document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReportMap {
    entries: BTreeMap<StageKind, Option<StageResult>>,
}

impl ReportMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one stage outcome.
    ///
    /// Compliance outcomes accumulate: findings and recommendations of a
    /// later chunk are appended to earlier ones, and a failed chunk leaves
    /// earlier findings intact. Other stages replace their entry, except that
    /// an empty outcome never erases an existing result.
    pub fn merge(&mut self, kind: StageKind, outcome: Option<StageResult>) {
        let slot = self.entries.entry(kind).or_insert(None);
        let Some(result) = outcome else {
            return;
        };

        match (slot, result) {
            (Some(StageResult::Compliance(existing)), StageResult::Compliance(more)) => {
                existing.findings.extend(more.findings);
                existing.recommendations.extend(more.recommendations);
            }
            (slot, result) => *slot = Some(result),
        }
    }

    /// Whether the stage has been attempted at least once.
    pub fn attempted(&self, kind: StageKind) -> bool {
        self.entries.contains_key(&kind)
    }

    /// The stage's result, if it produced one.
    pub fn get(&self, kind: StageKind) -> Option<&StageResult> {
        self.entries.get(&kind).and_then(|r| r.as_ref())
    }

    pub fn is_populated(&self, kind: StageKind) -> bool {
        self.get(kind).is_some()
    }

    /// Stages attempted without producing a result.
    pub fn empty_stages(&self) -> Vec<StageKind> {
        self.entries
            .iter()
            .filter(|(_, r)| r.is_none())
            .map(|(k, _)| *k)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (StageKind, Option<&StageResult>)> {
        self.entries.iter().map(|(k, v)| (*k, v.as_ref()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn compliance(&self) -> Option<&ComplianceReport> {
        match self.get(StageKind::Compliance) {
            Some(StageResult::Compliance(r)) => Some(r),
            _ => None,
        }
    }

    pub fn structure(&self) -> Option<&[StructuralIssue]> {
        match self.get(StageKind::Structure) {
            Some(StageResult::Structure(issues)) => Some(issues),
            _ => None,
        }
    }

    pub fn readability(&self) -> Option<&[ReadabilityIssue]> {
        match self.get(StageKind::Readability) {
            Some(StageResult::Readability(issues)) => Some(issues),
            _ => None,
        }
    }

    pub fn scores(&self) -> Option<&ScoreReport> {
        match self.get(StageKind::Scoring) {
            Some(StageResult::Scoring(r)) => Some(r),
            _ => None,
        }
    }

    pub fn metadata(&self) -> Option<&MetadataReport> {
        match self.get(StageKind::Metadata) {
            Some(StageResult::Metadata(r)) => Some(r),
            _ => None,
        }
    }

    pub fn peer_review(&self) -> Option<&PeerReviewSummary> {
        match self.get(StageKind::PeerReview) {
            Some(StageResult::PeerReview(r)) => Some(r),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::types::{ComplianceFinding, Severity};

    fn finding(issue: &str) -> ComplianceFinding {
        ComplianceFinding {
            rule: "R1".into(),
            location: "Pages 1-25".into(),
            excerpt: String::new(),
            issue: issue.into(),
            recommendation: String::new(),
            severity: Severity::Low,
        }
    }

    fn compliance(issues: &[&str], recs: &[&str]) -> Option<StageResult> {
        Some(StageResult::Compliance(ComplianceReport {
            findings: issues.iter().map(|i| finding(i)).collect(),
            recommendations: recs.iter().map(|r| r.to_string()).collect(),
        }))
    }

    #[test]
    fn compliance_chunks_accumulate_in_order() {
        let mut reports = ReportMap::new();
        reports.merge(StageKind::Compliance, compliance(&["a"], &["global"]));
        reports.merge(StageKind::Compliance, None);
        reports.merge(StageKind::Compliance, compliance(&["b", "c"], &[]));

        let merged = reports.compliance().unwrap();
        let issues: Vec<&str> = merged.findings.iter().map(|f| f.issue.as_str()).collect();
        assert_eq!(issues, vec!["a", "b", "c"]);
        assert_eq!(merged.recommendations, vec!["global".to_string()]);
    }

    #[test]
    fn all_failed_chunks_leave_empty_entry() {
        let mut reports = ReportMap::new();
        reports.merge(StageKind::Compliance, None);
        reports.merge(StageKind::Compliance, None);

        assert!(reports.attempted(StageKind::Compliance));
        assert!(!reports.is_populated(StageKind::Compliance));
        assert_eq!(reports.empty_stages(), vec![StageKind::Compliance]);
    }

    #[test]
    fn failed_chunk_after_success_keeps_findings() {
        let mut reports = ReportMap::new();
        reports.merge(StageKind::Compliance, compliance(&["a"], &[]));
        reports.merge(StageKind::Compliance, None);
        assert_eq!(reports.compliance().unwrap().findings.len(), 1);
    }

    #[test]
    fn serializes_as_stage_keyed_object() {
        let mut reports = ReportMap::new();
        reports.merge(StageKind::PeerReview, None);
        reports.merge(StageKind::Structure, Some(StageResult::Structure(vec![])));

        let json = serde_json::to_value(&reports).unwrap();
        assert!(json["peer_review"].is_null());
        assert_eq!(json["structure"]["kind"], "structure");

        let back: ReportMap = serde_json::from_value(json).unwrap();
        assert_eq!(back, reports);
    }
}
