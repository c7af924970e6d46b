//! MCP tool parameter structs with schemars-derived JSON schemas.

use schemars::JsonSchema;
use serde::Deserialize;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct AddDocumentParams {
    #[schemars(description = "Path to the manuscript file (plain text or Markdown)")]
    pub path: String,
    #[schemars(description = "ID of the rule profile to check compliance against")]
    pub profile_id: String,
    #[schemars(description = "User credited in the usage ledger")]
    pub user: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct JobIdParams {
    #[schemars(description = "The job ID")]
    pub job_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListJobsParams {
    #[schemars(description = "Filter by status: 'queued', 'processing', 'completed' or 'error'")]
    pub status: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ExportJobParams {
    #[schemars(description = "The job ID")]
    pub job_id: String,
    #[schemars(description = "Output format: 'flat', 'csv', 'findings' or 'log' (default 'flat')")]
    pub format: Option<String>,
}
