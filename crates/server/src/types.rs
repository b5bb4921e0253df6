//! Core types for tool handling: context, results, and errors.

use bs_domain::TenantContext;

/// Context provided to every tool handler invocation.
#[derive(Clone, Debug)]
pub struct ToolContext {
    /// Unique per invocation; appears in logs.
    pub request_id: String,
    /// Registered tool name (e.g. `"bs.ingest_url"`).
    pub tool_name: String,
    /// The tenant whose server received the call.
    pub tenant: TenantContext,
}

/// Result type for tool handlers.
pub type ToolResult = Result<serde_json::Value, ToolError>;

/// Errors a tool handler can return.
///
/// The server turns these into a failure envelope; they never reach the
/// transport as errors.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("invalid_args: {0}")]
    InvalidArgs(String),
    #[error("failed: {0}")]
    Failed(String),
    #[error("not_found: {0}")]
    NotFound(String),
}
