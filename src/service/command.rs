//! Subprocess transport for the analysis service.
//!
//! Each call spawns the configured program, writes the request as one JSON
//! document on stdin and reads one JSON document from stdout. The program
//! owns credentials, model choice and the HTTP conversation with the AI
//! provider; this side only maps its exit signals onto [`ServiceError`].
//!
//! Exit protocol:
//! - `0`: stdout holds `{"output": ..., "usage": {...}}` or a bare output object
//! - `75` (EX_TEMPFAIL): temporarily unavailable
//! - other non-zero: stderr is inspected for rate-limit / outage / auth
//!   wording, otherwise the request is treated as invalid

use super::{AnalysisRequest, AnalysisResponse, AnalysisService, ServiceError};
use async_trait::async_trait;
use std::io;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

const EX_TEMPFAIL: i32 = 75;

pub struct CommandService {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandService {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(&self, payload: Vec<u8>) -> Result<std::process::Output, ServiceError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_failure(&self.program, e))?;

        // Write stdin while stdout and stderr drain
        let stdin = child.stdin.take();
        let write = async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(&payload).await?;
            }
            Ok::<(), io::Error>(())
        };
        let exchange = async { tokio::join!(write, child.wait_with_output()) };

        let (written, output) = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| {
                ServiceError::Unavailable(format!(
                    "no response within {} seconds",
                    self.timeout.as_secs()
                ))
            })?;

        let output = output
            .map_err(|e| ServiceError::Unavailable(format!("service process failed: {}", e)))?;
        match written {
            // A program may exit without reading its whole request
            Err(e) if e.kind() != io::ErrorKind::BrokenPipe && output.status.success() => Err(
                ServiceError::Unavailable(format!("cannot write request: {}", e)),
            ),
            _ => Ok(output),
        }
    }
}

/// A program that cannot be found or executed will not start on a retry.
fn spawn_failure(program: &str, e: io::Error) -> ServiceError {
    let message = format!("cannot start '{}': {}", program, e);
    match e.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
            ServiceError::InvalidRequest(message)
        }
        _ => ServiceError::Unavailable(message),
    }
}

/// Map a failed exit onto the error taxonomy.
fn classify_failure(code: Option<i32>, stderr: &str) -> ServiceError {
    let message = stderr.trim().to_string();
    let lower = message.to_lowercase();

    if code == Some(EX_TEMPFAIL) {
        return ServiceError::Unavailable(message);
    }
    if lower.contains("429") || lower.contains("rate limit") || lower.contains("quota") {
        return ServiceError::RateLimited(message);
    }
    if lower.contains("503")
        || lower.contains("unavailable")
        || lower.contains("overloaded")
        || lower.contains("timed out")
    {
        return ServiceError::Unavailable(message);
    }
    if lower.contains("401") || lower.contains("403") || lower.contains("api key") {
        return ServiceError::Unauthorized(message);
    }
    match code {
        Some(code) => ServiceError::InvalidRequest(format!("exit status {}: {}", code, message)),
        None => ServiceError::Unavailable(format!("terminated by signal: {}", message)),
    }
}

/// Parse stdout into a response; a bare object is taken as the output.
fn parse_response(stdout: &[u8]) -> Result<AnalysisResponse, ServiceError> {
    let value: serde_json::Value = serde_json::from_slice(stdout)
        .map_err(|e| ServiceError::UnexpectedResponse(format!("stdout is not JSON: {}", e)))?;

    if value.get("output").is_some() {
        serde_json::from_value(value)
            .map_err(|e| ServiceError::UnexpectedResponse(e.to_string()))
    } else {
        Ok(AnalysisResponse::new(value))
    }
}

#[async_trait]
impl AnalysisService for CommandService {
    async fn call(&self, request: &AnalysisRequest) -> Result<AnalysisResponse, ServiceError> {
        let payload = serde_json::to_vec(request)
            .map_err(|e| ServiceError::InvalidRequest(format!("cannot encode request: {}", e)))?;

        let output = self.run(payload).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(output.status.code(), &stderr));
        }

        parse_response(&output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::StageKind;
    use crate::backoff::Retryable;

    #[test]
    fn tempfail_exit_is_transient() {
        let err = classify_failure(Some(75), "try later");
        assert!(matches!(err, ServiceError::Unavailable(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn stderr_wording_is_classified() {
        assert!(matches!(
            classify_failure(Some(1), "HTTP 429 Too Many Requests"),
            ServiceError::RateLimited(_)
        ));
        assert!(matches!(
            classify_failure(Some(1), "upstream 503 service unavailable"),
            ServiceError::Unavailable(_)
        ));
        assert!(matches!(
            classify_failure(Some(1), "401: invalid API key"),
            ServiceError::Unauthorized(_)
        ));
        assert!(matches!(
            classify_failure(Some(2), "schema rejected"),
            ServiceError::InvalidRequest(_)
        ));
    }

    #[test]
    fn parses_envelope_and_bare_output() {
        let wrapped = parse_response(
            br#"{"output": {"title": "A"}, "usage": {"input_tokens": 3, "output_tokens": 4}}"#,
        )
        .unwrap();
        assert_eq!(wrapped.output["title"], "A");
        assert_eq!(wrapped.usage.total(), 7);

        let bare = parse_response(br#"{"title": "B"}"#).unwrap();
        assert_eq!(bare.output["title"], "B");

        let err = parse_response(b"<html>").unwrap_err();
        assert!(matches!(err, ServiceError::UnexpectedResponse(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn round_trips_through_a_shell_program() {
        let service = CommandService::new("sh").with_args(vec![
            "-c".into(),
            r#"cat > /dev/null; echo '{"output": {"title": "From shell"}}'"#.into(),
        ]);
        let request = AnalysisRequest {
            stage: StageKind::Metadata,
            label: "metadata".into(),
            prompt: "p".into(),
            schema: serde_json::Value::Null,
        };

        let response = service.call(&request).await.unwrap();
        assert_eq!(response.output["title"], "From shell");
    }

    fn request(prompt: impl Into<String>) -> AnalysisRequest {
        AnalysisRequest {
            stage: StageKind::Metadata,
            label: "metadata".into(),
            prompt: prompt.into(),
            schema: serde_json::Value::Null,
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn missing_program_is_permanent() {
        let service = CommandService::new("/nonexistent/folio-analysis-service");

        let err = service.call(&request("p")).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidRequest(_)));
        assert!(!err.is_transient());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stalled_program_times_out_with_a_large_request() {
        let service = CommandService::new("sh")
            .with_args(vec!["-c".into(), "sleep 30".into()])
            .with_timeout(Duration::from_secs(1));
        let started = std::time::Instant::now();

        let err = service.call(&request("x".repeat(1 << 20))).await.unwrap_err();
        assert!(matches!(err, ServiceError::Unavailable(_)));
        assert!(err.is_transient());
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn large_request_and_reply_do_not_deadlock() {
        let service = CommandService::new("sh")
            .with_args(vec![
                "-c".into(),
                r#"head -c 200000 /dev/zero | tr '\0' ' ' >&2; cat > /dev/null; echo '{"output": {"title": "Big"}}'"#.into(),
            ])
            .with_timeout(Duration::from_secs(10));

        let response = service.call(&request("x".repeat(1 << 20))).await.unwrap();
        assert_eq!(response.output["title"], "Big");
    }
}
