//! Prompt and output-schema construction for each stage

use super::types::StageKind;
use crate::chunk::TextChunk;
use crate::service::AnalysisRequest;
use serde_json::{json, Value};

const SYSTEM_PREAMBLE: &str = "You are an experienced editor at a publishing house. \
Answer with a single JSON object that matches the requested schema. Do not add commentary.";

/// Request for the compliance check of one chunk.
///
/// Cross-cutting recommendations are only asked for when
/// `with_recommendations` is set (the first chunk).
pub fn compliance_request(
    chunk: &TextChunk,
    chunk_count: usize,
    rules: &str,
    with_recommendations: bool,
) -> AnalysisRequest {
    let mut prompt = format!(
        "{}\n\nCheck the manuscript excerpt below against the house rules. \
         This is part {} of {} ({}). Report every passage that breaks a rule, \
         quoting the passage and naming the rule.",
        SYSTEM_PREAMBLE,
        chunk.index + 1,
        chunk_count,
        chunk.page_range,
    );
    if with_recommendations {
        prompt.push_str(
            " Also list general recommendations that apply to the whole manuscript \
             under \"recommendations\".",
        );
    }
    prompt.push_str("\n\n## Rules\n\n");
    prompt.push_str(rules);
    prompt.push_str("\n\n## Manuscript excerpt\n\n");
    prompt.push_str(&chunk.text);

    AnalysisRequest {
        stage: StageKind::Compliance,
        label: format!("{} ({})", StageKind::Compliance.display_name(), chunk.page_range),
        prompt,
        schema: compliance_schema(with_recommendations),
    }
}

/// Request for a whole-document stage. Compliance normally goes through
/// [`compliance_request`]; here it gets a document-level prompt.
pub fn document_request(kind: StageKind, title: &str, text: &str) -> AnalysisRequest {
    let instruction = match kind {
        StageKind::Compliance => "Check the manuscript against general house style.",
        StageKind::Structure => {
            "Assess the structure of the manuscript: chapter organisation, \
             argument flow, pacing and section balance. List concrete issues."
        }
        StageKind::Readability => {
            "Assess readability: sentence length, jargon, passive voice and \
             paragraph density. Quote the passages concerned."
        }
        StageKind::Scoring => {
            "Score the manuscript from 0 to 100 on overall quality, clarity, \
             structure, originality and market fit, each with a short rationale."
        }
        StageKind::Metadata => {
            "Extract bibliographic metadata: title, subtitle, authors, genre, \
             keywords, intended audience, a one-paragraph summary and the language."
        }
        StageKind::PeerReview => {
            "Act as a peer reviewer. Give a recommendation (accept, minor revisions, \
             major revisions or reject), a summary, and lists of strengths and weaknesses."
        }
    };

    let prompt = format!(
        "{}\n\n{}\n\nManuscript: {}\n\n## Manuscript text\n\n{}",
        SYSTEM_PREAMBLE, instruction, title, text
    );

    AnalysisRequest {
        stage: kind,
        label: kind.display_name().to_string(),
        prompt,
        schema: schema_for(kind),
    }
}

/// Output schema sent alongside a request.
pub fn schema_for(kind: StageKind) -> Value {
    match kind {
        StageKind::Compliance => compliance_schema(false),
        StageKind::Structure => issues_schema(&["section", "issue", "suggestion"]),
        StageKind::Readability => issues_schema(&["passage", "issue", "suggestion"]),
        StageKind::Scoring => {
            let score = json!({
                "type": "object",
                "properties": {
                    "score": { "type": "integer", "minimum": 0, "maximum": 100 },
                    "rationale": { "type": "string" }
                },
                "required": ["score", "rationale"]
            });
            json!({
                "type": "object",
                "properties": {
                    "scores": {
                        "type": "object",
                        "properties": {
                            "overall": score,
                            "clarity": score,
                            "structure": score,
                            "originality": score,
                            "market_fit": score
                        },
                        "required": ["overall", "clarity", "structure", "originality", "market_fit"]
                    }
                },
                "required": ["scores"]
            })
        }
        StageKind::Metadata => json!({
            "type": "object",
            "properties": {
                "title": { "type": "string" },
                "subtitle": { "type": "string" },
                "authors": { "type": "array", "items": { "type": "string" } },
                "genre": { "type": "string" },
                "keywords": { "type": "array", "items": { "type": "string" } },
                "audience": { "type": "string" },
                "summary": { "type": "string" },
                "language": { "type": "string" }
            },
            "required": ["title"]
        }),
        StageKind::PeerReview => json!({
            "type": "object",
            "properties": {
                "recommendation": {
                    "type": "string",
                    "enum": ["accept", "minor_revisions", "major_revisions", "reject"]
                },
                "summary": { "type": "string" },
                "strengths": { "type": "array", "items": { "type": "string" } },
                "weaknesses": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["recommendation", "summary"]
        }),
    }
}

fn compliance_schema(with_recommendations: bool) -> Value {
    let mut schema = json!({
        "type": "object",
        "properties": {
            "findings": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "rule": { "type": "string" },
                        "location": { "type": "string" },
                        "excerpt": { "type": "string" },
                        "issue": { "type": "string" },
                        "recommendation": { "type": "string" },
                        "severity": { "type": "string", "enum": ["low", "medium", "high", "critical"] }
                    },
                    "required": ["rule", "excerpt", "issue", "severity"]
                }
            }
        },
        "required": ["findings"]
    });
    if with_recommendations {
        schema["properties"]["recommendations"] =
            json!({ "type": "array", "items": { "type": "string" } });
    }
    schema
}

fn issues_schema(fields: &[&str]) -> Value {
    let properties: serde_json::Map<String, Value> = fields
        .iter()
        .map(|f| (f.to_string(), json!({ "type": "string" })))
        .collect();
    json!({
        "type": "object",
        "properties": {
            "issues": {
                "type": "array",
                "items": { "type": "object", "properties": properties, "required": fields }
            }
        },
        "required": ["issues"]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Chunker;

    #[test]
    fn first_chunk_asks_for_recommendations() {
        let chunks = Chunker::new(1).chunk("one\u{000C}two");
        let first = compliance_request(&chunks[0], 2, "Use numerals.", true);
        let second = compliance_request(&chunks[1], 2, "Use numerals.", false);

        assert!(first.prompt.contains("recommendations"));
        assert!(first.schema["properties"].get("recommendations").is_some());
        assert!(!second.prompt.contains("general recommendations"));
        assert!(second.schema["properties"].get("recommendations").is_none());
        assert!(second.prompt.contains("part 2 of 2 (Page 2)"));
        assert_eq!(second.label, "Compliance check (Page 2)");
    }

    #[test]
    fn document_request_carries_text_and_schema() {
        let request = document_request(StageKind::Scoring, "Tides", "The sea rose.");
        assert_eq!(request.stage, StageKind::Scoring);
        assert!(request.prompt.ends_with("The sea rose."));
        assert_eq!(
            request.schema["properties"]["scores"]["required"]
                .as_array()
                .map(|a| a.len()),
            Some(5)
        );
    }
}
