//! The tool-response interceptor: samples a payload, invokes the analysis
//! agent, partitions the result into offload/keep-inline fractions, and
//! merges vault envelopes back into the residual (spec §4.6).

use crate::analysis_agent::{AnalysisAgent, AnalysisRequest, BasicMeta, OffloadRecommendation, ToolContext};
use crate::error::VaultResult;
use crate::metadata::DataSource;
use crate::path_ops;
use crate::sampler;
use crate::value::Value;
use crate::vault_store::VaultStore;
use indexmap::IndexMap;
use std::sync::Arc;

pub struct PipelineContext {
    pub vault: Arc<VaultStore>,
    pub analysis_agent: Option<Arc<dyn AnalysisAgent>>,
}

pub struct ToolCompletion {
    pub tool_name: String,
    pub tool_args: serde_json::Value,
    pub user_query: Option<String>,
    pub raw_result: serde_json::Value,
    pub owner_id: String,
    pub session_id: String,
}

/// Unwrap a `{lc_serializable, content}` wrapper envelope if the payload has
/// that shape, re-parsing `content` as JSON when it is itself a string.
/// Resolves the Open Question in spec §9/Design Notes: the wrapper unwrap
/// happens on the already-parsed outer value, and only then is the inner
/// `content` string re-parsed if applicable (see DESIGN.md).
fn unwrap_lc_envelope(value: serde_json::Value) -> serde_json::Value {
    let is_wrapper = matches!(
        &value,
        serde_json::Value::Object(m) if m.contains_key("lc_serializable") && m.contains_key("content")
    );
    if !is_wrapper {
        return value;
    }
    let serde_json::Value::Object(mut m) = value else {
        unreachable!()
    };
    let content = m.remove("content").unwrap_or(serde_json::Value::Null);
    match content {
        serde_json::Value::String(s) => {
            serde_json::from_str(&s).unwrap_or(serde_json::Value::String(s))
        }
        other => other,
    }
}

/// Step 1-2: serialize, measure, and reparse a string result as JSON when
/// possible.
fn normalize_raw_result(raw: serde_json::Value) -> (serde_json::Value, usize) {
    let serialized = serde_json::to_string(&raw).unwrap_or_default();
    let byte_size = serialized.len();

    let normalized = match raw {
        serde_json::Value::String(s) => {
            serde_json::from_str::<serde_json::Value>(&s).unwrap_or(serde_json::Value::String(s))
        }
        other => other,
    };
    (normalized, byte_size)
}

/// Run the full interception algorithm. Returns the JSON string the LLM
/// should see in place of the raw tool result.
pub async fn intercept(ctx: &PipelineContext, completion: ToolCompletion) -> VaultResult<String> {
    let (normalized, byte_size) = normalize_raw_result(completion.raw_result);
    let estimated_tokens = byte_size / 4;
    tracing::debug!(
        tool = %completion.tool_name,
        byte_size,
        estimated_tokens,
        "offload pipeline: intercepted tool result"
    );

    let unwrapped = unwrap_lc_envelope(normalized);

    let Some(agent) = &ctx.analysis_agent else {
        // No analysis agent configured: fallback path, payload passes through.
        return Ok(serde_json::to_string(&unwrapped).unwrap_or_default());
    };

    let payload: Value = unwrapped.into();
    let serialized_payload = serde_json::to_string(&serde_json::Value::from(payload.clone()))
        .unwrap_or_default();

    let samples = sampler::sample(&serialized_payload);
    let request = AnalysisRequest {
        samples,
        tool_context: ToolContext {
            tool_name: completion.tool_name.clone(),
            tool_args: completion.tool_args.clone(),
            user_query: completion.user_query.clone(),
        },
        basic_meta: BasicMeta {
            byte_size: serialized_payload.len(),
            estimated_tokens: serialized_payload.len() / 4,
        },
    };

    let analysis = agent.analyze(request).await?;

    if analysis.offload_recommendation == OffloadRecommendation::KeepInline {
        return Ok(serde_json::to_string(&serde_json::Value::from(payload)).unwrap_or_default());
    }

    let (extracted, residual) = path_ops::extract(
        &payload,
        &analysis.data_extraction_paths,
        &analysis.preserve_inline_paths,
    );

    let mut accumulator: IndexMap<String, serde_json::Value> = IndexMap::new();
    let data_source = DataSource {
        tool_name: completion.tool_name.clone(),
        tool_args: completion.tool_args.clone(),
        user_query: completion.user_query.clone(),
        timestamp: chrono::Utc::now(),
    };

    let semantics = crate::metadata::Semantics {
        description: analysis.semantic_description.clone(),
        data_type: parse_semantic_data_type(analysis.data_type.as_deref()),
        suggested_visualizations: analysis.visualization_suggestions.clone(),
        visualization_rationale: analysis
            .visualization_rationale
            .clone()
            .unwrap_or_default(),
        quality_insights: analysis.quality_insights.clone(),
        enhancements: analysis.metadata_enhancements.clone(),
    };

    for (_path, value) in extracted {
        if let Value::List(items) = value {
            if items.is_empty() {
                continue; // spec §3 invariant 2: empty arrays are never offloaded
            }
            let (_handle, envelope) = ctx
                .vault
                .put(
                    items,
                    &completion.owner_id,
                    &completion.session_id,
                    &completion.tool_name,
                    Some(data_source.clone()),
                    Some(semantics.clone()),
                )
                .await?;

            let envelope_json = serde_json::to_value(&envelope).unwrap_or(serde_json::Value::Null);
            if let serde_json::Value::Object(fields) = envelope_json {
                for (k, v) in fields {
                    accumulator.insert(k, v);
                }
            }
        }
        // Non-array extractions are skipped, per spec §4.6 step 8.
    }

    let mut merged = accumulator;
    if let serde_json::Value::Object(residual_fields) = serde_json::Value::from(residual) {
        for (k, v) in residual_fields {
            merged.entry(k).or_insert(v);
        }
    }

    let out = serde_json::Value::Object(merged.into_iter().collect());
    Ok(serde_json::to_string(&out).unwrap_or_default())
}

fn parse_semantic_data_type(s: Option<&str>) -> crate::metadata::SemanticDataType {
    use crate::metadata::SemanticDataType::*;
    match s.unwrap_or("") {
        "timeseries" => Timeseries,
        "hierarchical" => Hierarchical,
        "geospatial" => Geospatial,
        "text" => Text,
        "mixed" => Mixed,
        _ => Tabular,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwraps_lc_serializable_envelope_with_string_content() {
        let wrapped = serde_json::json!({
            "lc_serializable": true,
            "content": "{\"rows\": [1,2,3]}"
        });
        let unwrapped = unwrap_lc_envelope(wrapped);
        assert_eq!(unwrapped, serde_json::json!({"rows": [1,2,3]}));
    }

    #[test]
    fn unwraps_lc_serializable_envelope_with_object_content() {
        let wrapped = serde_json::json!({
            "lc_serializable": true,
            "content": {"rows": [1,2,3]}
        });
        let unwrapped = unwrap_lc_envelope(wrapped);
        assert_eq!(unwrapped, serde_json::json!({"rows": [1,2,3]}));
    }

    #[test]
    fn non_wrapper_passes_through_unchanged() {
        let plain = serde_json::json!({"a": 1});
        assert_eq!(unwrap_lc_envelope(plain.clone()), plain);
    }

    #[test]
    fn normalize_reparses_json_strings() {
        let (normalized, size) = normalize_raw_result(serde_json::Value::String(
            "{\"a\":1}".to_string(),
        ));
        assert_eq!(normalized, serde_json::json!({"a": 1}));
        assert!(size > 0);
    }

    #[test]
    fn normalize_keeps_non_json_strings_as_text() {
        let (normalized, _) = normalize_raw_result(serde_json::Value::String("plain text".into()));
        assert_eq!(normalized, serde_json::Value::String("plain text".into()));
    }
}

/// Scenarios S1-S6 from spec §8, exercising `VaultStore` + `OffloadPipeline`
/// + `QueryEngine` together against a stub `AnalysisAgent`. `VaultStore`
/// connects eagerly, so every test here needs a reachable Redis even where
/// the scenario itself never writes (S6) — run with
/// `REDIS_URL=redis://127.0.0.1:6379 cargo test -- --ignored`.
#[cfg(test)]
mod integration_tests {
    use super::*;
    use crate::analysis_agent::AnalysisReply;
    use crate::error::VaultError;
    use crate::query_engine::QueryEngine;
    use async_trait::async_trait;

    struct StubAgent {
        reply: AnalysisReply,
    }

    #[async_trait]
    impl AnalysisAgent for StubAgent {
        async fn analyze(&self, _request: AnalysisRequest) -> VaultResult<AnalysisReply> {
            Ok(self.reply.clone())
        }
    }

    /// Simulates an external analysis reply that failed `parse_reply`'s
    /// required-field check (see `analysis_agent.rs`'s own
    /// `missing_required_field_fails` unit test for that parsing contract).
    struct FailingAgent;

    #[async_trait]
    impl AnalysisAgent for FailingAgent {
        async fn analyze(&self, _request: AnalysisRequest) -> VaultResult<AnalysisReply> {
            Err(VaultError::AnalysisFailure(
                "missing required field dataExtractionPaths".to_string(),
            ))
        }
    }

    async fn test_store(ttl_seconds: u64, grace_period_seconds: u64) -> VaultStore {
        let redis_url = std::env::var("REDIS_URL")
            .expect("REDIS_URL must point at a reachable Redis for this ignored test");
        VaultStore::connect(&redis_url, 100, 51_200, 10_000, ttl_seconds, grace_period_seconds)
            .await
            .expect("failed to connect to REDIS_URL")
    }

    fn keep_inline_reply() -> AnalysisReply {
        AnalysisReply {
            semantic_description: "small rows, no offload needed".to_string(),
            data_type: Some("tabular".to_string()),
            offload_recommendation: OffloadRecommendation::KeepInline,
            offload_reason: Some("under every threshold".to_string()),
            visualization_suggestions: vec![],
            visualization_rationale: None,
            quality_insights: vec![],
            metadata_enhancements: serde_json::Value::Null,
            data_extraction_paths: vec![],
            preserve_inline_paths: vec![],
        }
    }

    /// S1 — small payload kept inline: pipeline output equals the original
    /// payload and no vault entry is created.
    #[tokio::test]
    #[ignore = "requires a live Redis reachable at REDIS_URL"]
    async fn s1_small_payload_kept_inline() {
        let vault = Arc::new(test_store(1800, 300).await);
        let ctx = PipelineContext {
            vault,
            analysis_agent: Some(Arc::new(StubAgent {
                reply: keep_inline_reply(),
            })),
        };

        let payload = serde_json::json!([{"a": 1}, {"a": 2}]);
        let completion = ToolCompletion {
            tool_name: "get_rows".to_string(),
            tool_args: serde_json::json!({}),
            user_query: None,
            raw_result: payload.clone(),
            owner_id: "alice".to_string(),
            session_id: "sess-1".to_string(),
        };

        let out = intercept(&ctx, completion).await.unwrap();
        let out_value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(out_value, payload);
    }

    /// S2 — nested extraction: `data.rows` is offloaded, `status`/`meta`
    /// survive as preserved inline fields alongside the merged envelope.
    /// S3 continues against the same handle: a SQL aggregation with no
    /// `LIMIT` in the query text still returns a single untruncated row.
    #[tokio::test]
    #[ignore = "requires a live Redis reachable at REDIS_URL"]
    async fn s2_nested_extraction_then_s3_sql_aggregation() {
        let vault = Arc::new(test_store(1800, 300).await);
        let rows: Vec<serde_json::Value> = (0..200)
            .map(|i| serde_json::json!({"id": i, "amount": i as f64 * 1.5, "date": "2024-01-01"}))
            .collect();
        let reply = AnalysisReply {
            semantic_description: "order rows".to_string(),
            data_type: Some("tabular".to_string()),
            offload_recommendation: OffloadRecommendation::OffloadArray,
            offload_reason: Some("200 rows exceeds inline limits".to_string()),
            visualization_suggestions: vec!["table".to_string()],
            visualization_rationale: None,
            quality_insights: vec![],
            metadata_enhancements: serde_json::Value::Null,
            data_extraction_paths: vec!["data.rows".to_string()],
            preserve_inline_paths: vec!["status".to_string(), "meta".to_string()],
        };
        let ctx = PipelineContext {
            vault: vault.clone(),
            analysis_agent: Some(Arc::new(StubAgent { reply })),
        };

        let payload = serde_json::json!({
            "status": "ok",
            "meta": {"page": 1},
            "data": {"rows": rows},
        });
        let completion = ToolCompletion {
            tool_name: "get_orders".to_string(),
            tool_args: serde_json::json!({}),
            user_query: None,
            raw_result: payload,
            owner_id: "alice".to_string(),
            session_id: "sess-2".to_string(),
        };

        let out = intercept(&ctx, completion).await.unwrap();
        let out_value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(out_value["status"], serde_json::json!("ok"));
        assert_eq!(out_value["meta"], serde_json::json!({"page": 1}));
        assert_eq!(out_value["rowCount"], serde_json::json!(200));
        assert_eq!(out_value["_offloaded"], serde_json::json!(true));
        let handle_id = out_value["handleId"].as_str().unwrap().to_string();
        assert!(handle_id.starts_with("vault-"));

        let token = out_value["fetchToken"].as_str().unwrap().to_string();
        let query_engine = QueryEngine::new().unwrap();
        let result = query_engine
            .execute_query(
                &vault,
                &handle_id,
                "SELECT AVG(amount) AS avg FROM {table}",
                "alice",
                &token,
            )
            .await
            .unwrap();
        assert_eq!(result.row_count, 1);
        assert_eq!(result.columns, vec!["avg".to_string()]);
        assert!(!result.truncated);
    }

    /// S4 — expired handle: a read after the TTL has lapsed (no prior read,
    /// so no grace-period shrink applied) surfaces `DataNotFound` with a
    /// recovery hint pointing back at the source tool.
    #[tokio::test]
    #[ignore = "requires a live Redis reachable at REDIS_URL"]
    async fn s4_expired_handle_is_not_found() {
        let vault = test_store(1, 1).await;
        let (handle_id, envelope) = vault
            .put(
                vec![Value::from(serde_json::json!({"a": 1}))],
                "alice",
                "sess-4",
                "get_rows",
                None,
                None,
            )
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(1500)).await;

        let err = vault
            .get(&handle_id, "alice", &envelope.fetch_token)
            .await
            .unwrap_err();
        match err {
            VaultError::DataNotFound { hint, .. } => {
                assert!(hint.to_lowercase().contains("tool"));
            }
            other => panic!("expected DataNotFound, got {other:?}"),
        }
    }

    /// S5 — wrong token: correct handle and owner, mismatched token.
    /// Surfaces the same `DataNotFound` kind as a missing handle, never a
    /// distinct "forbidden" outcome (spec §3 invariant 3).
    #[tokio::test]
    #[ignore = "requires a live Redis reachable at REDIS_URL"]
    async fn s5_wrong_token_is_not_found() {
        let vault = test_store(1800, 300).await;
        let (handle_id, _envelope) = vault
            .put(
                vec![Value::from(serde_json::json!({"a": 1}))],
                "alice",
                "sess-5",
                "get_rows",
                None,
                None,
            )
            .await
            .unwrap();

        let err = vault
            .get(&handle_id, "alice", "not-the-real-token")
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::DataNotFound { .. }));
    }

    /// S6 — analysis malformed: the agent's reply fails required-field
    /// validation; `intercept` surfaces `AnalysisFailure` and returns before
    /// any `vault.put` call, so the upstream tool response never reaches the
    /// vault or the LLM.
    #[tokio::test]
    #[ignore = "requires a live Redis reachable at REDIS_URL (PipelineContext holds a connected VaultStore even on this no-write path)"]
    async fn s6_analysis_malformed_surfaces_analysis_failure() {
        let vault = Arc::new(test_store(1800, 300).await);
        let ctx = PipelineContext {
            vault,
            analysis_agent: Some(Arc::new(FailingAgent)),
        };

        let completion = ToolCompletion {
            tool_name: "get_rows".to_string(),
            tool_args: serde_json::json!({}),
            user_query: None,
            raw_result: serde_json::json!([{"a": 1}, {"a": 2}, {"a": 3}]),
            owner_id: "alice".to_string(),
            session_id: "sess-6".to_string(),
        };

        let err = intercept(&ctx, completion).await.unwrap_err();
        assert!(matches!(err, VaultError::AnalysisFailure(_)));
    }
}
