//! Embedded columnar SQL engine: mounts a vault entry as a temp table,
//! executes user SQL with a forced row cap and timeout, tears the table
//! down (spec §4.7). Backed by `rusqlite` against a single in-memory
//! connection — "no persistent state between calls" holds because the temp
//! table is created and dropped around each call, never shared.

use crate::error::{VaultError, VaultResult};
use crate::value::Value;
use crate::vault_store::VaultStore;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const MAX_RESULT_ROWS: usize = 10_000;
const QUERY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub rows: Vec<serde_json::Value>,
    pub row_count: usize,
    pub columns: Vec<String>,
    #[serde(rename = "executionTimeMs")]
    pub execution_time_ms: u64,
    pub truncated: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResult {
    pub rows: Vec<serde_json::Value>,
    #[serde(rename = "rowCount")]
    pub row_count: usize,
    #[serde(rename = "limitApplied")]
    pub limit_applied: bool,
    #[serde(rename = "sizeBytes")]
    pub size_bytes: usize,
    #[serde(rename = "estimatedTokens")]
    pub estimated_tokens: usize,
}

#[derive(Clone)]
pub struct QueryEngine {
    conn: Arc<Mutex<Connection>>,
}

impl QueryEngine {
    pub fn new() -> VaultResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| VaultError::BackendError(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub async fn execute_query(
        &self,
        vault: &VaultStore,
        handle_id: &str,
        sql: &str,
        principal: &str,
        token: &str,
    ) -> VaultResult<QueryResult> {
        let rows = vault.get(handle_id, principal, token).await?;

        let conn = self.conn.clone();
        let handle_owned = handle_id.to_string();
        let sql_owned = sql.to_string();

        let blocking = tokio::task::spawn_blocking(move || {
            run_query_sync(&conn, &handle_owned, &rows, &sql_owned)
        });

        match tokio::time::timeout(QUERY_TIMEOUT, blocking).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(VaultError::query(
                handle_id,
                sql,
                format!("query task panicked: {join_err}"),
            )),
            Err(_) => Err(VaultError::query(handle_id, sql, "query timed out after 30s")),
        }
    }

    /// Bypasses SQL entirely and returns up to `limit` rows (or all).
    pub async fn retrieve_full_data(
        &self,
        vault: &VaultStore,
        handle_id: &str,
        principal: &str,
        token: &str,
        limit: Option<usize>,
    ) -> VaultResult<RetrievalResult> {
        let rows = vault.get(handle_id, principal, token).await?;
        let total = rows.len();
        let limited: Vec<Value> = match limit {
            Some(n) if n < total => rows.into_iter().take(n).collect(),
            _ => rows,
        };
        let limit_applied = limited.len() < total;

        let json_rows: Vec<serde_json::Value> = limited
            .into_iter()
            .map(|v| serde_json::Value::from(v))
            .collect();
        let size_bytes = serde_json::to_vec(&json_rows).map(|b| b.len()).unwrap_or(0);
        let estimated_tokens = size_bytes.div_ceil(4);

        Ok(RetrievalResult {
            row_count: json_rows.len(),
            rows: json_rows,
            limit_applied,
            size_bytes,
            estimated_tokens,
        })
    }
}

/// RAII guard that always drops the temp table, success or failure — the
/// "finally"-style cleanup spec §4.7 requires.
struct TempTableGuard<'a> {
    conn: &'a Connection,
    table: String,
}

impl Drop for TempTableGuard<'_> {
    fn drop(&mut self) {
        let sql = format!("DROP TABLE IF EXISTS {}", self.table);
        if let Err(e) = self.conn.execute(&sql, []) {
            tracing::warn!(table = %self.table, error = %e, "failed to drop temp table");
        }
    }
}

fn sanitize_table_name(handle_id: &str) -> String {
    format!("vault_{}", handle_id.replace('-', "_"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SqlColumnType {
    Integer,
    Real,
    Boolean,
    Timestamp,
    Text,
    Json,
}

impl SqlColumnType {
    fn ddl(self) -> &'static str {
        match self {
            SqlColumnType::Integer => "INTEGER",
            SqlColumnType::Real => "REAL",
            SqlColumnType::Boolean => "INTEGER",
            SqlColumnType::Timestamp => "TIMESTAMP",
            SqlColumnType::Text => "TEXT",
            SqlColumnType::Json => "TEXT",
        }
    }
}

fn infer_column_type(v: &Value) -> SqlColumnType {
    match v {
        Value::Number(n) => {
            if n.fract() == 0.0 && n.is_finite() && n.abs() < 9e18 {
                SqlColumnType::Integer
            } else {
                SqlColumnType::Real
            }
        }
        Value::Bool(_) => SqlColumnType::Boolean,
        Value::String(s) => {
            if crate::value::is_date_like(s) {
                SqlColumnType::Timestamp
            } else {
                SqlColumnType::Text
            }
        }
        Value::List(_) | Value::Map(_) => SqlColumnType::Json,
        Value::Null => SqlColumnType::Text,
    }
}

fn columns_of(rows: &[Value]) -> Vec<(String, SqlColumnType)> {
    let Some(first) = rows.first().and_then(Value::as_map) else {
        return Vec::new();
    };
    first
        .iter()
        .map(|(k, v)| {
            let inferred = if v.is_null() {
                rows.iter()
                    .filter_map(|r| r.as_map().and_then(|m| m.get(k)))
                    .find(|v| !v.is_null())
                    .map(infer_column_type)
                    .unwrap_or(SqlColumnType::Text)
            } else {
                infer_column_type(v)
            };
            (k.clone(), inferred)
        })
        .collect()
}

fn to_sql_param(v: &Value, col_type: SqlColumnType) -> rusqlite::types::Value {
    use rusqlite::types::Value as SqlValue;
    match v {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(if *b { 1 } else { 0 }),
        Value::Number(n) => {
            if col_type == SqlColumnType::Integer {
                SqlValue::Integer(*n as i64)
            } else {
                SqlValue::Real(*n)
            }
        }
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::List(_) | Value::Map(_) => {
            SqlValue::Text(serde_json::to_string(&serde_json::Value::from(v.clone())).unwrap_or_default())
        }
    }
}

fn value_ref_to_json(v: ValueRef<'_>) -> serde_json::Value {
    match v {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Text(t) => {
            let s = String::from_utf8_lossy(t).to_string();
            serde_json::Value::String(s)
        }
        ValueRef::Blob(b) => serde_json::Value::String(format!("<{} bytes>", b.len())),
    }
}

fn run_query_sync(
    conn: &Mutex<Connection>,
    handle_id: &str,
    rows: &[Value],
    user_sql: &str,
) -> VaultResult<QueryResult> {
    let started = Instant::now();
    let conn = conn
        .lock()
        .map_err(|_| VaultError::query(handle_id, user_sql, "query engine connection poisoned"))?;

    let table = sanitize_table_name(handle_id);
    let columns = columns_of(rows);

    let ddl_cols = columns
        .iter()
        .map(|(name, ty)| format!("\"{name}\" {}", ty.ddl()))
        .collect::<Vec<_>>()
        .join(", ");
    conn.execute(&format!("DROP TABLE IF EXISTS {table}"), [])
        .map_err(|e| VaultError::query(handle_id, user_sql, e.to_string()))?;
    conn.execute(&format!("CREATE TEMP TABLE {table} ({ddl_cols})"), [])
        .map_err(|e| VaultError::query(handle_id, user_sql, e.to_string()))?;

    let guard = TempTableGuard {
        conn: &conn,
        table: table.clone(),
    };

    if !columns.is_empty() {
        let placeholders = columns.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        let col_names = columns
            .iter()
            .map(|(n, _)| format!("\"{n}\""))
            .collect::<Vec<_>>()
            .join(", ");
        let insert_sql = format!("INSERT INTO {table} ({col_names}) VALUES ({placeholders})");
        let mut stmt = conn
            .prepare(&insert_sql)
            .map_err(|e| VaultError::query(handle_id, user_sql, e.to_string()))?;
        for row in rows {
            let params: Vec<rusqlite::types::Value> = columns
                .iter()
                .map(|(name, ty)| {
                    let v = row.as_map().and_then(|m| m.get(name)).cloned().unwrap_or(Value::Null);
                    to_sql_param(&v, *ty)
                })
                .collect();
            stmt.execute(rusqlite::params_from_iter(params.iter()))
                .map_err(|e| VaultError::query(handle_id, user_sql, e.to_string()))?;
        }
    }

    let substituted = user_sql.replace("{table}", &table);
    let final_sql = if substituted.to_lowercase().contains("limit") {
        substituted
    } else {
        format!("{substituted} LIMIT {}", MAX_RESULT_ROWS)
    };

    let mut stmt = conn
        .prepare(&final_sql)
        .map_err(|e| VaultError::query(handle_id, user_sql, e.to_string()))?;
    let col_names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();

    let result_rows = stmt
        .query_map([], |row| {
            let mut obj = serde_json::Map::new();
            for (i, name) in col_names.iter().enumerate() {
                let value = row.get_ref(i)?;
                obj.insert(name.clone(), value_ref_to_json(value));
            }
            Ok(serde_json::Value::Object(obj))
        })
        .map_err(|e| VaultError::query(handle_id, user_sql, e.to_string()))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| VaultError::query(handle_id, user_sql, e.to_string()))?;

    drop(guard);

    let row_count = result_rows.len();
    let columns = if row_count > 0 {
        col_names
    } else {
        Vec::new()
    };
    let truncated = row_count >= MAX_RESULT_ROWS;

    Ok(QueryResult {
        rows: result_rows,
        row_count,
        columns,
        execution_time_ms: started.elapsed().as_millis() as u64,
        truncated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_table_name() {
        assert_eq!(
            sanitize_table_name("vault-1234-5678"),
            "vault_vault_1234_5678"
        );
    }

    #[test]
    fn infers_integer_vs_real() {
        assert_eq!(infer_column_type(&Value::Number(5.0)), SqlColumnType::Integer);
        assert_eq!(infer_column_type(&Value::Number(5.5)), SqlColumnType::Real);
    }

    #[test]
    fn infers_timestamp_strings() {
        assert_eq!(
            infer_column_type(&Value::String("2024-01-01T00:00:00Z".into())),
            SqlColumnType::Timestamp
        );
        assert_eq!(
            infer_column_type(&Value::String("hello".into())),
            SqlColumnType::Text
        );
    }

    #[test]
    fn infers_json_for_nested_values() {
        assert_eq!(infer_column_type(&Value::List(vec![])), SqlColumnType::Json);
    }

    #[test]
    fn end_to_end_count_query() {
        let rows: Vec<Value> = (0..5)
            .map(|i| Value::from(serde_json::json!({"id": i, "amount": i as f64 * 1.5})))
            .collect();
        let conn = Mutex::new(Connection::open_in_memory().unwrap());
        let result = run_query_sync(&conn, "vault-test", &rows, "SELECT COUNT(*) as c FROM {table}")
            .unwrap();
        assert_eq!(result.rows[0]["c"], serde_json::json!(5));
    }

    #[test]
    fn appends_limit_when_absent() {
        let rows = vec![Value::from(serde_json::json!({"id": 1}))];
        let conn = Mutex::new(Connection::open_in_memory().unwrap());
        let result = run_query_sync(&conn, "h", &rows, "SELECT * FROM {table}").unwrap();
        assert!(!result.truncated);
        assert_eq!(result.row_count, 1);
    }

    #[test]
    fn drops_temp_table_after_query() {
        let rows = vec![Value::from(serde_json::json!({"id": 1}))];
        let conn = Mutex::new(Connection::open_in_memory().unwrap());
        let _ = run_query_sync(&conn, "h", &rows, "SELECT * FROM {table}").unwrap();
        let locked = conn.lock().unwrap();
        let count: i64 = locked
            .query_row(
                "SELECT COUNT(*) FROM sqlite_temp_master WHERE name = 'vault_h'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn drops_temp_table_even_on_query_error() {
        let rows = vec![Value::from(serde_json::json!({"id": 1}))];
        let conn = Mutex::new(Connection::open_in_memory().unwrap());
        let _ = run_query_sync(&conn, "h", &rows, "SELECT nonexistent_col FROM {table}");
        let locked = conn.lock().unwrap();
        let count: i64 = locked
            .query_row(
                "SELECT COUNT(*) FROM sqlite_temp_master WHERE name = 'vault_h'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(count, 0);
    }
}
