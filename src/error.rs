//! The five error kinds from spec §7, collapsed into one enum so every layer
//! (vault store, pipeline, query engine) propagates the same vocabulary and
//! the HTTP layer has exactly one place that maps kind → status code.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// Handle missing, expired, wrong owner, or wrong token. Collapsed into
    /// one kind on purpose — never tell a caller *which* check failed.
    #[error("handle {handle} not found or no longer accessible")]
    DataNotFound { handle: String, hint: String },

    /// Analysis agent unreachable, malformed reply, or missing required
    /// field. Never substituted with heuristic extraction.
    #[error("analysis failed: {0}")]
    AnalysisFailure(String),

    /// SQL compile/execute error or timeout.
    #[error("query failed for handle {handle} (sql: {sql_prefix}...): {message}")]
    QueryError {
        handle: String,
        sql_prefix: String,
        message: String,
    },

    /// Input not a non-empty array, empty analysis paths, bad config.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Store connectivity / transient network failure.
    #[error("backend error: {0}")]
    BackendError(String),
}

impl VaultError {
    pub fn not_found(handle: impl Into<String>, source_tool: Option<&str>) -> Self {
        let handle = handle.into();
        let hint = match source_tool {
            Some(tool) => format!(
                "do not retry with this handle; call {tool} again to obtain a fresh handle"
            ),
            None => "do not retry with this handle; call the original tool that produced \
                      the data again to obtain a fresh handle"
                .to_string(),
        };
        VaultError::DataNotFound { handle, hint }
    }

    pub fn query(handle: impl Into<String>, sql: &str, message: impl Into<String>) -> Self {
        let sql_prefix: String = sql.chars().take(80).collect();
        VaultError::QueryError {
            handle: handle.into(),
            sql_prefix,
            message: message.into(),
        }
    }
}

impl From<redis::RedisError> for VaultError {
    fn from(e: redis::RedisError) -> Self {
        VaultError::BackendError(e.to_string())
    }
}

impl IntoResponse for VaultError {
    fn into_response(self) -> axum::response::Response {
        let (status, body) = match &self {
            VaultError::DataNotFound { handle, hint } => (
                StatusCode::NOT_FOUND,
                json!({ "error": "not_found", "handle": handle, "hint": hint }),
            ),
            VaultError::AnalysisFailure(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "analysis_failure", "message": msg }),
            ),
            VaultError::QueryError {
                handle,
                sql_prefix,
                message,
            } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({
                    "error": "query_error",
                    "handle": handle,
                    "sql_prefix": sql_prefix,
                    "message": message,
                    "hint": "check the SQL against the table's inferred schema",
                }),
            ),
            VaultError::ValidationError(msg) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "validation_error", "message": msg }),
            ),
            VaultError::BackendError(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "backend_error", "message": msg }),
            ),
        };
        (status, Json(body)).into_response()
    }
}

pub type VaultResult<T> = Result<T, VaultError>;
