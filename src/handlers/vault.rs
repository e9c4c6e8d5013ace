//! The Retrieval API (spec §4.8, §6): one HTTP endpoint to fetch full
//! vaulted data by handle, header-authenticated, plus a thin SQL endpoint
//! over the same credentials, plus the OffloadPipeline's entry point
//! (added — see SPEC_FULL.md §4.8).

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use serde_json::json;

use crate::error::VaultError;
use crate::pipeline::{self, ToolCompletion};
use crate::AppState;

const USER_HEADER: &str = "x-user-did";
const TOKEN_HEADER: &str = "x-data-token";

fn extract_principal_and_token(headers: &HeaderMap) -> Result<(String, String), StatusCode> {
    let principal = headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .ok_or(StatusCode::UNAUTHORIZED)?;
    let token = headers
        .get(TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .ok_or(StatusCode::UNAUTHORIZED)?;
    Ok((principal.to_string(), token.to_string()))
}

/// `GET /data-vault/{handleId}` — full retrieval by handle.
pub async fn get_by_handle(
    State(state): State<AppState>,
    Path(handle_id): Path<String>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let (principal, token) = match extract_principal_and_token(&headers) {
        Ok(pair) => pair,
        Err(status) => {
            return (
                status,
                Json(json!({ "success": false, "error": "missing or invalid credentials" })),
            )
                .into_response()
        }
    };

    match state
        .vault
        .get_with_metadata(&handle_id, &principal, &token)
        .await
    {
        Ok((rows, metadata)) => {
            state.usage.track(crate::usage_tracker::UsageEvent {
                handle_id: handle_id.clone(),
                operation: "retrieve".to_string(),
                source_tool: metadata.source_tool.clone(),
            });
            let data: Vec<serde_json::Value> =
                rows.into_iter().map(serde_json::Value::from).collect();
            Json(json!({
                "success": true,
                "handleId": handle_id,
                "rowCount": data.len(),
                "data": data,
                "metadata": metadata,
            }))
            .into_response()
        }
        Err(VaultError::DataNotFound { handle, hint }) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "success": false, "handleId": handle, "error": "not_found", "hint": hint })),
        )
            .into_response(),
        Err(other) => other.into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    #[serde(rename = "handleId")]
    pub handle_id: String,
    pub sql: String,
}

/// `POST /data-vault/query` — SQL aggregation over a vaulted handle.
pub async fn query_by_handle(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<QueryRequest>,
) -> impl IntoResponse {
    let (principal, token) = match extract_principal_and_token(&headers) {
        Ok(pair) => pair,
        Err(status) => {
            return (
                status,
                Json(json!({ "success": false, "error": "missing or invalid credentials" })),
            )
                .into_response()
        }
    };

    match state
        .query_engine
        .execute_query(&state.vault, &req.handle_id, &req.sql, &principal, &token)
        .await
    {
        Ok(result) => {
            state.usage.track(crate::usage_tracker::UsageEvent {
                handle_id: req.handle_id.clone(),
                operation: "query".to_string(),
                source_tool: "sql".to_string(),
            });
            Json(json!({ "success": true, "handleId": req.handle_id, "result": result }))
                .into_response()
        }
        Err(err) => err.into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct InterceptRequest {
    #[serde(rename = "toolName")]
    pub tool_name: String,
    #[serde(rename = "toolArgs", default)]
    pub tool_args: serde_json::Value,
    #[serde(rename = "userQuery", default)]
    pub user_query: Option<String>,
    #[serde(rename = "rawResult")]
    pub raw_result: serde_json::Value,
    #[serde(rename = "sessionId")]
    pub session_id: String,
}

/// `POST /data-vault/intercept` — the OffloadPipeline's HTTP entry point.
/// Header-authenticated by principal only: an offload request precedes the
/// existence of any handle or fetch token, so there is nothing to pair a
/// data token with yet.
pub async fn intercept(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<InterceptRequest>,
) -> impl IntoResponse {
    let principal = match headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
    {
        Some(principal) => principal.to_string(),
        None => {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "success": false, "error": "missing or invalid credentials" })),
            )
                .into_response()
        }
    };

    let completion = ToolCompletion {
        tool_name: req.tool_name.clone(),
        tool_args: req.tool_args,
        user_query: req.user_query,
        raw_result: req.raw_result,
        owner_id: principal,
        session_id: req.session_id,
    };

    match pipeline::intercept(&state.pipeline, completion).await {
        Ok(result) => {
            let result_value: serde_json::Value =
                serde_json::from_str(&result).unwrap_or(serde_json::Value::String(result));
            if let Some(handle_id) = result_value.get("handleId").and_then(|v| v.as_str()) {
                state.usage.track(crate::usage_tracker::UsageEvent {
                    handle_id: handle_id.to_string(),
                    operation: "offload".to_string(),
                    source_tool: req.tool_name,
                });
            }
            Json(json!({ "success": true, "result": result_value })).into_response()
        }
        Err(err) => err.into_response(),
    }
}
