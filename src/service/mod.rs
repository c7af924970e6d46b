//! Analysis service client: the external AI boundary
//!
//! Defines the client trait and wire types for asking the analysis service
//! to run one stage. Two implementations:
//! - `CommandService`: runs a configured program per call, JSON over stdin/stdout (production)
//! - `MockService`: returns scripted outputs per stage (testing, demos)
//!
//! The service is a black box: given a prompt and an output schema it
//! returns structured JSON, or fails with a transient or permanent error.
//! Only transient errors are retried (see [`crate::backoff`]).

mod command;
mod mock;

pub use command::CommandService;
pub use mock::{sample_output, MockService};

use crate::analysis::StageKind;
use crate::backoff::Retryable;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One analysis call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    /// Which stage this call belongs to
    pub stage: StageKind,
    /// Short label for logs (e.g. "compliance check (Pages 1-25)")
    pub label: String,
    /// The full prompt text
    pub prompt: String,
    /// JSON schema the output is expected to follow
    pub schema: serde_json::Value,
}

/// Token accounting reported by the service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }

    /// Counts come from the service unchecked and saturate at `u64::MAX`.
    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
    }
}

/// Result of a successful analysis call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResponse {
    /// Structured output; may also be a string holding JSON
    pub output: serde_json::Value,
    #[serde(default)]
    pub usage: TokenUsage,
}

impl AnalysisResponse {
    pub fn new(output: serde_json::Value) -> Self {
        Self {
            output,
            usage: TokenUsage::default(),
        }
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = usage;
        self
    }
}

/// Errors from analysis service calls.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ServiceError {
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl Retryable for ServiceError {
    fn is_transient(&self) -> bool {
        matches!(self, ServiceError::RateLimited(_) | ServiceError::Unavailable(_))
    }
}

/// Client trait for the analysis service.
///
/// Abstracts over transport (subprocess, HTTP, mock) so the stage runner
/// doesn't depend on how the service is reached.
#[async_trait]
pub trait AnalysisService: Send + Sync {
    /// Run one analysis call.
    async fn call(&self, request: &AnalysisRequest) -> Result<AnalysisResponse, ServiceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_rate_limits_and_outages_are_transient() {
        assert!(ServiceError::RateLimited("429".into()).is_transient());
        assert!(ServiceError::Unavailable("503".into()).is_transient());
        assert!(!ServiceError::InvalidRequest("bad".into()).is_transient());
        assert!(!ServiceError::Unauthorized("key".into()).is_transient());
        assert!(!ServiceError::UnexpectedResponse("html".into()).is_transient());
    }

    #[test]
    fn usage_accumulates() {
        let mut usage = TokenUsage::new(10, 5);
        usage.add(TokenUsage::new(1, 2));
        assert_eq!(usage, TokenUsage::new(11, 7));
        assert_eq!(usage.total(), 18);
    }

    #[test]
    fn usage_saturates_instead_of_overflowing() {
        let mut usage = TokenUsage::new(u64::MAX, u64::MAX - 1);
        usage.add(TokenUsage::new(1, 5));
        assert_eq!(usage, TokenUsage::new(u64::MAX, u64::MAX));
        assert_eq!(usage.total(), u64::MAX);
    }

    #[test]
    fn response_usage_defaults_when_missing() {
        let response: AnalysisResponse =
            serde_json::from_str(r#"{"output": {"title": "x"}}"#).unwrap();
        assert_eq!(response.usage, TokenUsage::default());
    }
}
