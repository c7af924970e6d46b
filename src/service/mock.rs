//! Scripted analysis service for tests and offline runs.

use super::{AnalysisRequest, AnalysisResponse, AnalysisService, ServiceError, TokenUsage};
use crate::analysis::StageKind;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Mock service that returns scripted outcomes per stage.
///
/// Resolution order for each call: the next scripted outcome for the stage
/// (consumed), then a permanent failure registered with `with_failure`,
/// then the configured output, then [`sample_output`].
pub struct MockService {
    outputs: HashMap<StageKind, Value>,
    failures: HashMap<StageKind, ServiceError>,
    scripts: Mutex<HashMap<StageKind, VecDeque<Result<Value, ServiceError>>>>,
    requests: Mutex<Vec<AnalysisRequest>>,
}

impl Default for MockService {
    fn default() -> Self {
        Self::new()
    }
}

impl MockService {
    /// A mock that answers every stage with its sample output.
    pub fn new() -> Self {
        Self {
            outputs: HashMap::new(),
            failures: HashMap::new(),
            scripts: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answer a stage with a fixed output.
    pub fn with_output(mut self, stage: StageKind, output: Value) -> Self {
        self.outputs.insert(stage, output);
        self
    }

    /// Fail every call for a stage with the given error.
    pub fn with_failure(mut self, stage: StageKind, error: ServiceError) -> Self {
        self.failures.insert(stage, error);
        self
    }

    /// Queue outcomes for a stage; they are consumed in order before the
    /// stage falls back to its failure or output.
    pub fn with_script(
        self,
        stage: StageKind,
        outcomes: impl IntoIterator<Item = Result<Value, ServiceError>>,
    ) -> Self {
        self.scripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(stage)
            .or_default()
            .extend(outcomes);
        self
    }

    /// Number of calls made for a stage, retries included.
    pub fn calls(&self, stage: StageKind) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.stage == stage)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Every request received, in call order.
    pub fn requests(&self) -> Vec<AnalysisRequest> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl AnalysisService for MockService {
    async fn call(&self, request: &AnalysisRequest) -> Result<AnalysisResponse, ServiceError> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());

        let scripted = self
            .scripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(&request.stage)
            .and_then(|queue| queue.pop_front());

        let output = match scripted {
            Some(outcome) => outcome?,
            None => {
                if let Some(err) = self.failures.get(&request.stage) {
                    return Err(err.clone());
                }
                self.outputs
                    .get(&request.stage)
                    .cloned()
                    .unwrap_or_else(|| sample_output(request.stage))
            }
        };

        let usage = TokenUsage::new((request.prompt.len() / 4) as u64, 64);
        Ok(AnalysisResponse::new(output).with_usage(usage))
    }
}

/// A well-formed output for each stage.
pub fn sample_output(stage: StageKind) -> Value {
    match stage {
        StageKind::Compliance => json!({
            "findings": [{
                "rule": "House style 4.2: numerals",
                "excerpt": "twenty-five percent",
                "issue": "Percentages should use numerals",
                "recommendation": "Write 25%",
                "severity": "low"
            }],
            "recommendations": ["Run a global search for spelled-out percentages"]
        }),
        StageKind::Structure => json!({
            "issues": [{
                "section": "Chapter 3",
                "issue": "Chapter ends without resolving the opening question",
                "suggestion": "Add a closing paragraph that returns to the question"
            }]
        }),
        StageKind::Readability => json!({
            "issues": [{
                "passage": "Notwithstanding the aforementioned considerations...",
                "issue": "Sentence exceeds 60 words",
                "suggestion": "Split into two sentences"
            }]
        }),
        StageKind::Scoring => json!({
            "scores": {
                "overall": { "score": 72, "rationale": "Solid draft with pacing issues" },
                "clarity": { "score": 68, "rationale": "Dense middle chapters" },
                "structure": { "score": 75, "rationale": "Clear arc" },
                "originality": { "score": 80, "rationale": "Fresh premise" },
                "market_fit": { "score": 64, "rationale": "Crowded category" }
            }
        }),
        StageKind::Metadata => json!({
            "title": "Untitled Manuscript",
            "authors": ["Unknown"],
            "genre": "Non-fiction",
            "keywords": ["publishing"],
            "audience": "General readers",
            "summary": "A manuscript submitted for editorial review.",
            "language": "en"
        }),
        StageKind::PeerReview => json!({
            "recommendation": "minor_revisions",
            "summary": "Worth publishing after a tightening pass.",
            "strengths": ["Engaging voice"],
            "weaknesses": ["Uneven pacing"]
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(stage: StageKind) -> AnalysisRequest {
        AnalysisRequest {
            stage,
            label: stage.to_string(),
            prompt: "prompt text".into(),
            schema: Value::Null,
        }
    }

    #[tokio::test]
    async fn answers_with_sample_output_by_default() {
        let service = MockService::new();
        let response = service.call(&request(StageKind::Metadata)).await.unwrap();
        assert_eq!(response.output["title"], "Untitled Manuscript");
        assert_eq!(service.calls(StageKind::Metadata), 1);
    }

    #[tokio::test]
    async fn script_is_consumed_before_defaults() {
        let service = MockService::new().with_script(
            StageKind::Scoring,
            vec![Err(ServiceError::RateLimited("slow down".into()))],
        );

        let first = service.call(&request(StageKind::Scoring)).await;
        assert!(matches!(first, Err(ServiceError::RateLimited(_))));

        let second = service.call(&request(StageKind::Scoring)).await.unwrap();
        assert!(second.output.get("scores").is_some());
        assert_eq!(service.calls(StageKind::Scoring), 2);
    }

    #[tokio::test]
    async fn registered_failure_repeats() {
        let service = MockService::new()
            .with_failure(StageKind::PeerReview, ServiceError::Unauthorized("key".into()));

        for _ in 0..3 {
            let err = service.call(&request(StageKind::PeerReview)).await.unwrap_err();
            assert!(matches!(err, ServiceError::Unauthorized(_)));
        }
        assert_eq!(service.total_calls(), 3);
    }
}
