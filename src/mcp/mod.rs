//! MCP server for folio: document submission, job status and export via
//! the Model Context Protocol.
//!
//! Tools: add_document, cancel_document, job_status, job_log, list_jobs,
//! export_job, delete_job, list_profiles.

pub mod params;

use crate::api::{service_from_config, FolioApi};
use crate::config::PipelineConfig;
use crate::export::ExportFormat;
use crate::job::{DocumentJob, JobId, JobStatus};
use crate::queue::ShutdownToken;
use params::*;
use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler, ServiceExt,
};
use serde::Serialize;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn ok_text(text: String) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::success(vec![Content::text(text)]))
}

fn err_text(msg: String) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::error(vec![Content::text(msg)]))
}

fn ok_json<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    match serde_json::to_string_pretty(value) {
        Ok(text) => ok_text(text),
        Err(e) => err_text(format!("failed to serialize result: {}", e)),
    }
}

/// Status line for job listings; reports and logs are left to
/// `job_status` and `job_log`.
#[derive(Debug, Serialize)]
struct JobSummary<'a> {
    id: &'a str,
    document: &'a str,
    profile_id: &'a str,
    status: JobStatus,
    progress: u8,
    stages_attempted: usize,
    stages_planned: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure: Option<&'a str>,
}

impl<'a> From<&'a DocumentJob> for JobSummary<'a> {
    fn from(job: &'a DocumentJob) -> Self {
        Self {
            id: job.id.as_str(),
            document: job.display_name(),
            profile_id: &job.profile_id,
            status: job.status,
            progress: job.progress,
            stages_attempted: job.stages_attempted,
            stages_planned: job.stages_planned,
            failure: job.failure.as_deref(),
        }
    }
}

// ---------------------------------------------------------------------------
// FolioMcpServer
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct FolioMcpServer {
    api: FolioApi,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl FolioMcpServer {
    pub fn new(api: FolioApi) -> Self {
        Self {
            api,
            tool_router: Self::tool_router(),
        }
    }

    pub fn api(&self) -> &FolioApi {
        &self.api
    }

    // ── Submission ──────────────────────────────────────────────────────

    #[tool(description = "Add a manuscript to the processing queue for analysis against a rule profile")]
    fn add_document(
        &self,
        Parameters(p): Parameters<AddDocumentParams>,
    ) -> Result<CallToolResult, McpError> {
        match self.api.add_document(&p.path, &p.profile_id, p.user.as_deref()) {
            Ok(job) => ok_json(&serde_json::json!({
                "job_id": job.id,
                "document": job.display_name(),
                "status": job.status,
                "queue_position": self.api.pending().iter().position(|id| *id == job.id).map(|i| i + 1),
            })),
            Err(e) => err_text(e.to_string()),
        }
    }

    #[tool(description = "Remove a job from the processing queue before it starts (the job stays queued and can be re-added)")]
    fn cancel_document(
        &self,
        Parameters(p): Parameters<JobIdParams>,
    ) -> Result<CallToolResult, McpError> {
        let id = JobId::from_string(p.job_id);
        if self.api.cancel_document(&id) {
            ok_text(format!("cancelled job {}", id))
        } else {
            err_text(format!("job {} is not waiting in the queue", id))
        }
    }

    // ── Status ──────────────────────────────────────────────────────────

    #[tool(description = "Get the full state of a job, including stage reports")]
    fn job_status(
        &self,
        Parameters(p): Parameters<JobIdParams>,
    ) -> Result<CallToolResult, McpError> {
        let id = JobId::from_string(p.job_id);
        match self.api.job(&id) {
            Some(job) => ok_json(&job),
            None => err_text(format!("job not found: {}", id)),
        }
    }

    #[tool(description = "Get the timestamped processing log of a job")]
    fn job_log(
        &self,
        Parameters(p): Parameters<JobIdParams>,
    ) -> Result<CallToolResult, McpError> {
        match self.api.job_log(&JobId::from_string(p.job_id)) {
            Ok(log) => ok_text(log),
            Err(e) => err_text(e.to_string()),
        }
    }

    #[tool(description = "List all jobs, oldest first, optionally filtered by status")]
    fn list_jobs(
        &self,
        Parameters(p): Parameters<ListJobsParams>,
    ) -> Result<CallToolResult, McpError> {
        let filter = match p.status.as_deref().map(JobStatus::parse) {
            None => None,
            Some(Some(status)) => Some(status),
            Some(None) => {
                return err_text(format!(
                    "unknown status '{}'",
                    p.status.unwrap_or_default()
                ))
            }
        };

        let jobs = self.api.jobs();
        let summaries: Vec<JobSummary<'_>> = jobs
            .iter()
            .filter(|job| filter.map_or(true, |status| job.status == status))
            .map(JobSummary::from)
            .collect();
        ok_json(&summaries)
    }

    #[tool(description = "Export a job as 'flat' (field: value lines), 'csv', 'findings' (CSV of compliance findings) or 'log'")]
    fn export_job(
        &self,
        Parameters(p): Parameters<ExportJobParams>,
    ) -> Result<CallToolResult, McpError> {
        let format = match p.format.as_deref().unwrap_or("flat").parse::<ExportFormat>() {
            Ok(format) => format,
            Err(e) => return err_text(e.to_string()),
        };
        match self.api.export(&JobId::from_string(p.job_id), format) {
            Ok(text) => ok_text(text),
            Err(e) => err_text(e.to_string()),
        }
    }

    #[tool(description = "Delete a job that is not currently processing")]
    fn delete_job(
        &self,
        Parameters(p): Parameters<JobIdParams>,
    ) -> Result<CallToolResult, McpError> {
        match self.api.delete_job(&JobId::from_string(p.job_id)) {
            Ok(job) => ok_text(format!("deleted job {} ({})", job.id, job.display_name())),
            Err(e) => err_text(e.to_string()),
        }
    }

    // ── Profiles ────────────────────────────────────────────────────────

    #[tool(description = "List the configured rule profiles")]
    fn list_profiles(&self) -> Result<CallToolResult, McpError> {
        ok_json(&self.api.profiles())
    }
}

#[tool_handler]
impl ServerHandler for FolioMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Folio MCP server: queue manuscripts for compliance and editorial analysis, then follow job status, logs and exports"
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run_mcp_server(config: PipelineConfig) -> i32 {
    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to create tokio runtime: {}", e);
            return 1;
        }
    };

    rt.block_on(async {
        let api = match FolioApi::from_config(&config, service_from_config(&config)) {
            Ok(api) => api,
            Err(e) => {
                eprintln!("failed to start pipeline: {}", e);
                return 1;
            }
        };

        let shutdown = ShutdownToken::new();
        let driver = api.driver().spawn(shutdown.clone());
        let server = FolioMcpServer::new(api);

        tracing::info!("folio mcp server starting on stdio");

        let service = match server.serve(rmcp::transport::stdio()).await {
            Ok(s) => s,
            Err(e) => {
                eprintln!("failed to start MCP server: {}", e);
                shutdown.shutdown();
                return 1;
            }
        };

        let code = match service.waiting().await {
            Ok(_) => 0,
            Err(e) => {
                eprintln!("MCP server error: {}", e);
                1
            }
        };

        // A job in flight runs to its terminal status first
        shutdown.shutdown();
        if let Err(e) = driver.await {
            tracing::error!(error = %e, "Queue driver task failed");
        }
        code
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{RuleDocument, RuleProfile};
    use crate::service::MockService;
    use std::sync::Arc;

    fn server() -> FolioMcpServer {
        let mut config = PipelineConfig::default();
        config.profiles.push(
            RuleProfile::new("house", "House style")
                .with_document(RuleDocument::inline("Tone", "Keep it plain.")),
        );
        FolioMcpServer::new(FolioApi::from_config(&config, Arc::new(MockService::new())).unwrap())
    }

    fn text(result: &CallToolResult) -> String {
        serde_json::to_value(&result.content)
            .unwrap()
            .pointer("/0/text")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    }

    fn add(server: &FolioMcpServer, path: &str) -> String {
        let result = server
            .add_document(Parameters(AddDocumentParams {
                path: path.into(),
                profile_id: "house".into(),
                user: None,
            }))
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&text(&result)).unwrap();
        assert_eq!(value["status"], "queued");
        value["job_id"].as_str().unwrap().to_string()
    }

    #[test]
    fn add_and_list_jobs() {
        let server = server();
        let id = add(&server, "one.txt");
        add(&server, "two.txt");

        let result = server
            .list_jobs(Parameters(ListJobsParams {
                status: Some("queued".into()),
            }))
            .unwrap();
        let listed: serde_json::Value = serde_json::from_str(&text(&result)).unwrap();
        assert_eq!(listed.as_array().unwrap().len(), 2);
        assert_eq!(listed[0]["id"], id.as_str());
        assert_eq!(listed[0]["document"], "one.txt");
    }

    #[test]
    fn unknown_profile_is_a_tool_error() {
        let server = server();
        let result = server
            .add_document(Parameters(AddDocumentParams {
                path: "a.txt".into(),
                profile_id: "missing".into(),
                user: None,
            }))
            .unwrap();
        assert_eq!(result.is_error, Some(true));
        assert!(text(&result).contains("missing"));
    }

    #[test]
    fn cancel_then_export_log() {
        let server = server();
        let id = add(&server, "one.txt");

        let cancelled = server
            .cancel_document(Parameters(JobIdParams { job_id: id.clone() }))
            .unwrap();
        assert_ne!(cancelled.is_error, Some(true));

        let again = server
            .cancel_document(Parameters(JobIdParams { job_id: id.clone() }))
            .unwrap();
        assert_eq!(again.is_error, Some(true));

        let log = server
            .export_job(Parameters(ExportJobParams {
                job_id: id,
                format: Some("log".into()),
            }))
            .unwrap();
        assert!(text(&log).contains("Removed from processing queue"));
    }

    #[test]
    fn bad_export_format_is_rejected() {
        let server = server();
        let id = add(&server, "one.txt");
        let result = server
            .export_job(Parameters(ExportJobParams {
                job_id: id,
                format: Some("pdf".into()),
            }))
            .unwrap();
        assert_eq!(result.is_error, Some(true));
    }

    #[test]
    fn list_profiles_returns_configured_profiles() {
        let result = server().list_profiles().unwrap();
        assert!(text(&result).contains("House style"));
    }
}
