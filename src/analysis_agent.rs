//! Calls an external LLM with strategic samples and parses its structured
//! reply into extraction/preservation paths and semantic classification
//! (spec §4.5). The pipeline depends only on the `AnalysisAgent` trait —
//! constructor-injected, per Design Notes §9 — so it can be tested against a
//! stub without reaching the network.

use crate::error::{VaultError, VaultResult};
use crate::sampler::Samples;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize)]
pub struct ToolContext {
    #[serde(rename = "toolName")]
    pub tool_name: String,
    #[serde(rename = "toolArgs")]
    pub tool_args: serde_json::Value,
    #[serde(rename = "userQuery", skip_serializing_if = "Option::is_none")]
    pub user_query: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BasicMeta {
    #[serde(rename = "byteSize")]
    pub byte_size: usize,
    #[serde(rename = "estimatedTokens")]
    pub estimated_tokens: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisRequest {
    pub samples: Samples,
    #[serde(rename = "toolContext")]
    pub tool_context: ToolContext,
    #[serde(rename = "basicMeta")]
    pub basic_meta: BasicMeta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OffloadRecommendation {
    OffloadAll,
    OffloadArray,
    KeepInline,
    AggregateFirst,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnalysisReply {
    #[serde(rename = "semanticDescription")]
    pub semantic_description: String,
    #[serde(rename = "dataType", default)]
    pub data_type: Option<String>,
    #[serde(rename = "offloadRecommendation")]
    pub offload_recommendation: OffloadRecommendation,
    #[serde(rename = "offloadReason", default)]
    pub offload_reason: Option<String>,
    #[serde(rename = "visualizationSuggestions", default)]
    pub visualization_suggestions: Vec<String>,
    #[serde(rename = "visualizationRationale", default)]
    pub visualization_rationale: Option<String>,
    #[serde(rename = "qualityInsights", default)]
    pub quality_insights: Vec<String>,
    #[serde(rename = "metadataEnhancements", default)]
    pub metadata_enhancements: serde_json::Value,
    #[serde(rename = "dataExtractionPaths")]
    pub data_extraction_paths: Vec<String>,
    #[serde(rename = "preserveInlinePaths")]
    pub preserve_inline_paths: Vec<String>,
}

#[async_trait]
pub trait AnalysisAgent: Send + Sync {
    async fn analyze(&self, request: AnalysisRequest) -> VaultResult<AnalysisReply>;
}

/// Strips a fenced code block, line comments, and trailing commas before
/// JSON parsing — the analysis reply's parsing contract (spec §4.5).
pub fn parse_reply(raw: &str) -> VaultResult<AnalysisReply> {
    let unfenced = strip_code_fence(raw);
    let uncommented = strip_line_comments(&unfenced);
    let cleaned = strip_trailing_commas(&uncommented);

    let reply: AnalysisReply = serde_json::from_str(&cleaned)
        .map_err(|e| VaultError::AnalysisFailure(format!("malformed reply: {e}")))?;

    if reply.semantic_description.trim().is_empty() {
        return Err(VaultError::AnalysisFailure(
            "missing required field semanticDescription".to_string(),
        ));
    }
    Ok(reply)
}

fn strip_code_fence(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        let rest = rest
            .strip_prefix("json")
            .or_else(|| rest.strip_prefix("JSON"))
            .unwrap_or(rest);
        let rest = rest.strip_prefix('\n').unwrap_or(rest);
        if let Some(end) = rest.rfind("```") {
            return rest[..end].trim().to_string();
        }
        return rest.trim().to_string();
    }
    trimmed.to_string()
}

fn strip_line_comments(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '/' if chars.peek() == Some(&'/') => {
                while let Some(&next) = chars.peek() {
                    if next == '\n' {
                        break;
                    }
                    chars.next();
                }
            }
            _ => out.push(c),
        }
    }
    out
}

fn strip_trailing_commas(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let chars: Vec<char> = s.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == ',' {
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            if j < chars.len() && (chars[j] == '}' || chars[j] == ']') {
                i += 1;
                continue;
            }
        }
        out.push(c);
        i += 1;
    }
    out
}

/// Default `AnalysisAgent` implementation: a bearer-token-authenticated HTTP
/// POST to a configured analysis endpoint, with a hard deadline.
pub struct HttpAnalysisAgent {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpAnalysisAgent {
    pub fn new(endpoint: String, api_key: Option<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key,
            timeout,
        }
    }
}

#[async_trait]
impl AnalysisAgent for HttpAnalysisAgent {
    async fn analyze(&self, request: AnalysisRequest) -> VaultResult<AnalysisReply> {
        let mut req = self.client.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = tokio::time::timeout(self.timeout, req.send())
            .await
            .map_err(|_| VaultError::AnalysisFailure("analysis agent timed out".to_string()))?
            .map_err(|e| VaultError::AnalysisFailure(format!("analysis agent unreachable: {e}")))?;

        let body = response
            .text()
            .await
            .map_err(|e| VaultError::AnalysisFailure(format!("failed to read reply: {e}")))?;

        parse_reply(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_reply_json() -> String {
        r#"{
            "semanticDescription": "order rows",
            "dataType": "tabular",
            "offloadRecommendation": "offload_array",
            "offloadReason": "large array",
            "visualizationSuggestions": ["table"],
            "visualizationRationale": "tabular data",
            "qualityInsights": [],
            "metadataEnhancements": {},
            "dataExtractionPaths": ["data.rows"],
            "preserveInlinePaths": ["status"]
        }"#
        .to_string()
    }

    #[test]
    fn parses_plain_json() {
        let reply = parse_reply(&sample_reply_json()).unwrap();
        assert_eq!(reply.offload_recommendation, OffloadRecommendation::OffloadArray);
        assert_eq!(reply.data_extraction_paths, vec!["data.rows"]);
    }

    #[test]
    fn strips_fenced_code_block() {
        let fenced = format!("```json\n{}\n```", sample_reply_json());
        let reply = parse_reply(&fenced).unwrap();
        assert_eq!(reply.preserve_inline_paths, vec!["status"]);
    }

    #[test]
    fn strips_line_comments_and_trailing_commas() {
        let raw = r#"{
            // a comment
            "semanticDescription": "x",
            "offloadRecommendation": "keep_inline",
            "dataExtractionPaths": [],
            "preserveInlinePaths": [],
        }"#;
        let reply = parse_reply(raw).unwrap();
        assert_eq!(reply.offload_recommendation, OffloadRecommendation::KeepInline);
    }

    #[test]
    fn missing_required_field_fails() {
        let raw = r#"{"offloadRecommendation": "keep_inline", "dataExtractionPaths": [], "preserveInlinePaths": []}"#;
        let err = parse_reply(raw);
        assert!(err.is_err());
    }

    #[test]
    fn does_not_strip_slashes_inside_strings() {
        let raw = r#"{
            "semanticDescription": "path is a/b/c",
            "offloadRecommendation": "keep_inline",
            "dataExtractionPaths": [],
            "preserveInlinePaths": []
        }"#;
        let reply = parse_reply(raw).unwrap();
        assert_eq!(reply.semantic_description, "path is a/b/c");
    }
}
