//! Derives the compact `MetadataEnvelope` the LLM sees in place of bulk data
//! (spec §4.3). Pure computation over a row slice; no I/O.

use crate::value::{ColumnType, Value};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub column: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    pub nullable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ColumnStats {
    pub unique: usize,
    #[serde(rename = "topValues", skip_serializing_if = "Option::is_none")]
    pub top_values: Option<Vec<(String, usize)>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sum: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg: Option<f64>,
    #[serde(rename = "nullCount")]
    pub null_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSource {
    #[serde(rename = "toolName")]
    pub tool_name: String,
    #[serde(rename = "toolArgs")]
    pub tool_args: serde_json::Value,
    #[serde(rename = "userQuery", skip_serializing_if = "Option::is_none")]
    pub user_query: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SemanticDataType {
    Timeseries,
    Tabular,
    Hierarchical,
    Geospatial,
    Text,
    Mixed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Semantics {
    pub description: String,
    #[serde(rename = "dataType")]
    pub data_type: SemanticDataType,
    #[serde(rename = "suggestedVisualizations")]
    pub suggested_visualizations: Vec<String>,
    #[serde(rename = "visualizationRationale")]
    pub visualization_rationale: String,
    #[serde(rename = "qualityInsights")]
    pub quality_insights: Vec<String>,
    pub enhancements: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataEnvelope {
    #[serde(rename = "handleId")]
    pub handle_id: String,
    #[serde(rename = "fetchToken")]
    pub fetch_token: String,
    #[serde(rename = "sourceTool")]
    pub source_tool: String,
    pub schema: Vec<ColumnSchema>,
    #[serde(rename = "rowCount")]
    pub row_count: usize,
    #[serde(rename = "sampleRows")]
    pub sample_rows: Vec<Value>,
    #[serde(rename = "columnStats")]
    pub column_stats: IndexMap<String, ColumnStats>,
    #[serde(rename = "dataSource", skip_serializing_if = "Option::is_none")]
    pub data_source: Option<DataSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantics: Option<Semantics>,
    #[serde(rename = "_offloaded")]
    pub offloaded: bool,
    #[serde(rename = "_note")]
    pub note: String,
}

const SAMPLE_SIZE: usize = 5;
const TOP_VALUES_MAX_UNIQUE: usize = 20;
const TOP_VALUES_LIMIT: usize = 5;

/// Build the full envelope for a non-empty row array. Callers (VaultStore)
/// supply the handle/token/provenance/semantics that wrap this pure
/// computation.
pub fn build_envelope(
    rows: &[Value],
    handle_id: &str,
    fetch_token: &str,
    source_tool: &str,
    data_source: Option<DataSource>,
    semantics: Option<Semantics>,
) -> MetadataEnvelope {
    if rows.is_empty() {
        return empty_envelope(handle_id, fetch_token, source_tool);
    }

    let columns = first_row_columns(rows);
    let schema = infer_schema(rows, &columns);
    let column_stats = compute_stats(rows, &columns);
    let sample_rows = rows.iter().take(SAMPLE_SIZE).cloned().collect();

    let note = format!(
        "This data has been offloaded to the vault. To retrieve it, use handle \"{handle_id}\" \
         with token \"{fetch_token}\". Use a SQL query against the vault (table placeholder \
         `{{table}}`) to aggregate, or retrieve the full data if you need every row."
    );

    MetadataEnvelope {
        handle_id: handle_id.to_string(),
        fetch_token: fetch_token.to_string(),
        source_tool: source_tool.to_string(),
        schema,
        row_count: rows.len(),
        sample_rows,
        column_stats,
        data_source,
        semantics,
        offloaded: true,
        note,
    }
}

fn empty_envelope(handle_id: &str, fetch_token: &str, source_tool: &str) -> MetadataEnvelope {
    MetadataEnvelope {
        handle_id: handle_id.to_string(),
        fetch_token: fetch_token.to_string(),
        source_tool: source_tool.to_string(),
        schema: Vec::new(),
        row_count: 0,
        sample_rows: Vec::new(),
        column_stats: IndexMap::new(),
        data_source: None,
        semantics: None,
        offloaded: true,
        note: "No data was present to offload; this entry is empty.".to_string(),
    }
}

fn first_row_columns(rows: &[Value]) -> Vec<String> {
    match rows[0].as_map() {
        Some(m) => m.keys().cloned().collect(),
        None => Vec::new(),
    }
}

fn field<'a>(row: &'a Value, column: &str) -> Option<&'a Value> {
    row.as_map().and_then(|m| m.get(column))
}

fn infer_schema(rows: &[Value], columns: &[String]) -> Vec<ColumnSchema> {
    columns
        .iter()
        .map(|col| {
            let first_non_null = rows
                .iter()
                .filter_map(|r| field(r, col))
                .find(|v| !v.is_null());
            let column_type = first_non_null
                .map(|v| v.column_type())
                .unwrap_or(ColumnType::Null);
            let nullable = rows
                .iter()
                .any(|r| field(r, col).map(Value::is_null).unwrap_or(true));
            ColumnSchema {
                column: col.clone(),
                column_type,
                nullable,
            }
        })
        .collect()
}

fn compute_stats(rows: &[Value], columns: &[String]) -> IndexMap<String, ColumnStats> {
    let mut out = IndexMap::new();
    for col in columns {
        let mut null_count = 0usize;
        let mut seen_order: Vec<String> = Vec::new();
        let mut counts: HashMap<String, usize> = HashMap::new();
        let mut numeric: Vec<f64> = Vec::new();

        for row in rows {
            match field(row, col) {
                None | Some(Value::Null) => null_count += 1,
                Some(v) => {
                    let key = v.stringify();
                    if !counts.contains_key(&key) {
                        seen_order.push(key.clone());
                    }
                    *counts.entry(key).or_insert(0) += 1;
                    if let Some(n) = v.as_f64() {
                        numeric.push(n);
                    }
                }
            }
        }

        let unique = counts.len();
        let top_values = if unique <= TOP_VALUES_MAX_UNIQUE && unique > 0 {
            let mut ordered: Vec<(String, usize)> = seen_order
                .into_iter()
                .map(|k| {
                    let c = counts[&k];
                    (k, c)
                })
                .collect();
            ordered.sort_by(|a, b| b.1.cmp(&a.1));
            ordered.truncate(TOP_VALUES_LIMIT);
            Some(ordered)
        } else {
            None
        };

        let (min, max, sum, avg) = if numeric.is_empty() {
            (None, None, None, None)
        } else {
            let sum: f64 = numeric.iter().sum();
            let min = numeric.iter().cloned().fold(f64::INFINITY, f64::min);
            let max = numeric.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            let avg = sum / numeric.len() as f64;
            (Some(min), Some(max), Some(sum), Some(avg))
        };

        out.insert(
            col.clone(),
            ColumnStats {
                unique,
                top_values,
                min,
                max,
                sum,
                avg,
                null_count,
            },
        );
    }
    out
}
