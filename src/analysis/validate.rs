//! Validation of service output into strict stage results
//!
//! The service returns JSON that usually, but not always, follows the
//! requested schema. Output is decoded through lenient wire structs
//! (aliases, defaults, numeric coercion) and then checked for the fields a
//! stage cannot do without. Anything that still does not fit is an
//! [`AnalysisError`] and becomes a stage-local failure.

use super::types::{
    AnalysisError, ComplianceFinding, ComplianceReport, MetadataReport, PeerReviewSummary,
    ReadabilityIssue, ReviewVerdict, Score, ScoreReport, Severity, StageKind, StageResult,
    StructuralIssue,
};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

/// Extract a JSON object from model text.
///
/// Models sometimes wrap JSON in markdown code fences or add explanation text.
/// This function tries, in order:
/// 1. Direct parse (response is pure JSON)
/// 2. Extract from ```json ... ``` or ``` ... ``` fenced block
/// 3. Find the first `{` to last `}` span and parse that
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();

    let parse_object = |candidate: &str| {
        serde_json::from_str::<Value>(candidate.trim())
            .ok()
            .filter(Value::is_object)
    };

    if let Some(v) = parse_object(trimmed) {
        return Some(v);
    }

    let fenced = if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        after.find("```").map(|end| &after[..end])
    } else if let Some(start) = trimmed.find("```\n") {
        let after = &trimmed[start + 4..];
        after.find("```").map(|end| &after[..end])
    } else {
        None
    };
    if let Some(v) = fenced.and_then(parse_object) {
        return Some(v);
    }

    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => parse_object(&trimmed[start..=end]),
        _ => None,
    }
}

/// Normalize raw output to a JSON object.
fn as_object(output: &Value) -> Result<Value, AnalysisError> {
    match output {
        Value::Object(_) => Ok(output.clone()),
        Value::String(text) => extract_json(text).ok_or(AnalysisError::NoJson),
        _ => Err(AnalysisError::NoJson),
    }
}

/// Accept a bare array as shorthand for `{ <key>: [...] }`.
fn wrap_array(stage: StageKind, output: &Value, key: &str) -> Result<Value, AnalysisError> {
    match output {
        Value::Array(_) => {
            let mut wrapped = serde_json::Map::new();
            wrapped.insert(key.to_string(), output.clone());
            Ok(Value::Object(wrapped))
        }
        Value::String(text) => {
            let trimmed = text.trim();
            if trimmed.starts_with('[') {
                let parsed: Value = serde_json::from_str(trimmed)
                    .map_err(|e| AnalysisError::shape(stage, e.to_string()))?;
                return wrap_array(stage, &parsed, key);
            }
            as_object(output)
        }
        _ => as_object(output),
    }
}

fn decode_wire<T: for<'de> Deserialize<'de>>(
    stage: StageKind,
    value: Value,
) -> Result<T, AnalysisError> {
    serde_json::from_value(value).map_err(|e| AnalysisError::shape(stage, e.to_string()))
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Decode service output for a stage.
pub fn decode(stage: StageKind, output: &Value) -> Result<StageResult, AnalysisError> {
    match stage {
        StageKind::Compliance => decode_compliance(output).map(StageResult::Compliance),
        StageKind::Structure => decode_structure(output).map(StageResult::Structure),
        StageKind::Readability => decode_readability(output).map(StageResult::Readability),
        StageKind::Scoring => decode_scores(output).map(StageResult::Scoring),
        StageKind::Metadata => decode_metadata(output).map(StageResult::Metadata),
        StageKind::PeerReview => decode_peer_review(output).map(StageResult::PeerReview),
    }
}

// === Compliance ===

#[derive(Deserialize)]
struct WireCompliance {
    #[serde(alias = "issues", alias = "violations")]
    findings: Vec<WireFinding>,
    #[serde(default)]
    recommendations: Vec<String>,
}

#[derive(Deserialize)]
struct WireFinding {
    #[serde(default, alias = "rule_reference", alias = "guideline")]
    rule: Option<String>,
    #[serde(default, alias = "page", alias = "pages")]
    location: Option<String>,
    #[serde(default, alias = "quote", alias = "text")]
    excerpt: Option<String>,
    #[serde(default, alias = "description", alias = "problem")]
    issue: Option<String>,
    #[serde(default, alias = "suggestion", alias = "fix")]
    recommendation: Option<String>,
    #[serde(default)]
    severity: Option<String>,
}

fn decode_compliance(output: &Value) -> Result<ComplianceReport, AnalysisError> {
    let stage = StageKind::Compliance;
    let wire: WireCompliance = decode_wire(stage, wrap_array(stage, output, "findings")?)?;

    let mut findings = Vec::with_capacity(wire.findings.len());
    for (i, f) in wire.findings.into_iter().enumerate() {
        let issue = non_empty(f.issue)
            .ok_or_else(|| AnalysisError::shape(stage, format!("finding {} has no issue", i + 1)))?;
        findings.push(ComplianceFinding {
            rule: non_empty(f.rule).unwrap_or_else(|| "unspecified".to_string()),
            location: non_empty(f.location).unwrap_or_default(),
            excerpt: f.excerpt.unwrap_or_default(),
            issue,
            recommendation: f.recommendation.unwrap_or_default(),
            severity: f
                .severity
                .as_deref()
                .map(Severity::coerce)
                .unwrap_or(Severity::Medium),
        });
    }

    Ok(ComplianceReport {
        findings,
        recommendations: wire
            .recommendations
            .into_iter()
            .filter_map(|r| non_empty(Some(r)))
            .collect(),
    })
}

// === Structure / readability ===

#[derive(Deserialize)]
struct WireIssues<T> {
    #[serde(alias = "findings")]
    issues: Vec<T>,
}

#[derive(Deserialize)]
struct WireStructural {
    #[serde(default, alias = "location", alias = "chapter")]
    section: Option<String>,
    #[serde(default, alias = "description")]
    issue: Option<String>,
    #[serde(default, alias = "recommendation")]
    suggestion: Option<String>,
}

#[derive(Deserialize)]
struct WireReadability {
    #[serde(default, alias = "excerpt", alias = "text")]
    passage: Option<String>,
    #[serde(default, alias = "description")]
    issue: Option<String>,
    #[serde(default, alias = "recommendation")]
    suggestion: Option<String>,
}

fn decode_structure(output: &Value) -> Result<Vec<StructuralIssue>, AnalysisError> {
    let stage = StageKind::Structure;
    let wire: WireIssues<WireStructural> = decode_wire(stage, wrap_array(stage, output, "issues")?)?;

    wire.issues
        .into_iter()
        .enumerate()
        .map(|(i, w)| {
            Ok(StructuralIssue {
                section: non_empty(w.section).unwrap_or_else(|| "General".to_string()),
                issue: non_empty(w.issue).ok_or_else(|| {
                    AnalysisError::shape(stage, format!("issue {} has no description", i + 1))
                })?,
                suggestion: w.suggestion.unwrap_or_default(),
            })
        })
        .collect()
}

fn decode_readability(output: &Value) -> Result<Vec<ReadabilityIssue>, AnalysisError> {
    let stage = StageKind::Readability;
    let wire: WireIssues<WireReadability> =
        decode_wire(stage, wrap_array(stage, output, "issues")?)?;

    wire.issues
        .into_iter()
        .enumerate()
        .map(|(i, w)| {
            Ok(ReadabilityIssue {
                passage: w.passage.unwrap_or_default(),
                issue: non_empty(w.issue).ok_or_else(|| {
                    AnalysisError::shape(stage, format!("issue {} has no description", i + 1))
                })?,
                suggestion: w.suggestion.unwrap_or_default(),
            })
        })
        .collect()
}

// === Scores ===

#[derive(Deserialize)]
#[serde(untagged)]
enum WireNumber {
    Int(i64),
    Float(f64),
    Text(String),
}

impl WireNumber {
    /// Coerce to 0..=100. Text like "78/100" or "78%" keeps its leading number.
    fn to_score(&self) -> Option<u8> {
        let value = match self {
            WireNumber::Int(i) => *i as f64,
            WireNumber::Float(f) => *f,
            WireNumber::Text(s) => {
                let digits: String = s
                    .trim()
                    .chars()
                    .take_while(|c| c.is_ascii_digit() || *c == '.')
                    .collect();
                digits.parse::<f64>().ok()?
            }
        };
        if !value.is_finite() {
            return None;
        }
        Some(value.round().clamp(0.0, 100.0) as u8)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireScore {
    Bare(WireNumber),
    Full {
        #[serde(alias = "value")]
        score: WireNumber,
        #[serde(default, alias = "reason", alias = "justification")]
        rationale: Option<String>,
    },
}

fn decode_scores(output: &Value) -> Result<ScoreReport, AnalysisError> {
    let stage = StageKind::Scoring;
    let object = as_object(output)?;
    let scores = match object.get("scores") {
        Some(inner @ Value::Object(_)) => inner.clone(),
        _ => object,
    };
    let mut wire: HashMap<String, Value> = decode_wire(stage, scores)?;

    let mut take = |name: &str| -> Result<Score, AnalysisError> {
        let raw = wire
            .remove(name)
            .ok_or_else(|| AnalysisError::shape(stage, format!("missing score '{}'", name)))?;
        let entry: WireScore = decode_wire(stage, raw)?;
        let (number, rationale) = match entry {
            WireScore::Bare(n) => (n, None),
            WireScore::Full { score, rationale } => (score, rationale),
        };
        let score = number
            .to_score()
            .ok_or_else(|| AnalysisError::shape(stage, format!("score '{}' is not a number", name)))?;
        Ok(Score {
            score,
            rationale: rationale.unwrap_or_default(),
        })
    };

    Ok(ScoreReport {
        overall: take("overall")?,
        clarity: take("clarity")?,
        structure: take("structure")?,
        originality: take("originality")?,
        market_fit: take("market_fit")?,
    })
}

// === Metadata ===

#[derive(Deserialize)]
#[serde(untagged)]
enum WireList {
    Many(Vec<String>),
    One(String),
}

impl WireList {
    fn into_vec(self) -> Vec<String> {
        let items = match self {
            WireList::Many(items) => items,
            WireList::One(joined) => joined.split([',', ';']).map(str::to_string).collect(),
        };
        items
            .into_iter()
            .filter_map(|s| non_empty(Some(s)))
            .collect()
    }
}

#[derive(Deserialize)]
struct WireMetadata {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    subtitle: Option<String>,
    #[serde(default, alias = "author")]
    authors: Option<WireList>,
    #[serde(default)]
    genre: Option<String>,
    #[serde(default, alias = "tags")]
    keywords: Option<WireList>,
    #[serde(default, alias = "target_audience")]
    audience: Option<String>,
    #[serde(default, alias = "synopsis", alias = "abstract")]
    summary: Option<String>,
    #[serde(default)]
    language: Option<String>,
}

fn decode_metadata(output: &Value) -> Result<MetadataReport, AnalysisError> {
    let stage = StageKind::Metadata;
    let wire: WireMetadata = decode_wire(stage, as_object(output)?)?;

    Ok(MetadataReport {
        title: non_empty(wire.title).ok_or_else(|| AnalysisError::shape(stage, "missing title"))?,
        subtitle: non_empty(wire.subtitle),
        authors: wire.authors.map(WireList::into_vec).unwrap_or_default(),
        genre: non_empty(wire.genre),
        keywords: wire.keywords.map(WireList::into_vec).unwrap_or_default(),
        audience: non_empty(wire.audience),
        summary: non_empty(wire.summary),
        language: non_empty(wire.language),
    })
}

// === Peer review ===

#[derive(Deserialize)]
struct WirePeerReview {
    #[serde(alias = "verdict", alias = "decision")]
    recommendation: String,
    #[serde(default, alias = "overview")]
    summary: Option<String>,
    #[serde(default)]
    strengths: Vec<String>,
    #[serde(default)]
    weaknesses: Vec<String>,
}

fn decode_peer_review(output: &Value) -> Result<PeerReviewSummary, AnalysisError> {
    let stage = StageKind::PeerReview;
    let wire: WirePeerReview = decode_wire(stage, as_object(output)?)?;

    let recommendation = ReviewVerdict::coerce(&wire.recommendation).ok_or_else(|| {
        AnalysisError::shape(
            stage,
            format!("unrecognized recommendation '{}'", wire.recommendation),
        )
    })?;

    Ok(PeerReviewSummary {
        recommendation,
        summary: wire.summary.unwrap_or_default(),
        strengths: wire.strengths,
        weaknesses: wire.weaknesses,
    })
}
