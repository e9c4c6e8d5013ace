//! TTL-governed, ownership-and-token-authenticated key-value store of typed
//! tabular blobs (spec §4.2). Backed by Redis; the only mutable shared
//! resource in the system (spec §5) — every other component reaches storage
//! only through this API.

use crate::error::{VaultError, VaultResult};
use crate::metadata::{self, DataSource, MetadataEnvelope, Semantics};
use crate::value::Value;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const KEY_PREFIX: &str = "data-vault:";

/// Atomic read-validate-shrink-TTL, run server-side via `EVAL` so it needs no
/// client-side WATCH/MULTI/EXEC isolation. `ConnectionManager` multiplexes
/// every caller over one shared physical connection, so a WATCH set by one
/// logical request can be cleared by another concurrent request's EXEC (or
/// vice versa) — a single atomic script sidesteps that entirely, since Redis
/// runs the whole script without interleaving other clients' commands.
/// Returns the raw JSON entry, or `false` if the key is absent or the
/// embedded owner/token don't match — collapsed into one outcome per spec §3
/// invariant 3 ("indistinguishable from handle does not exist").
const READ_AND_SHRINK_SCRIPT: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then
  return false
end
local ok, entry = pcall(cjson.decode, raw)
if not ok then
  return false
end
if entry.owner_id ~= ARGV[1] or entry.access_token ~= ARGV[2] then
  return false
end
local ttl = redis.call('TTL', KEYS[1])
local grace = tonumber(ARGV[3])
local new_ttl = grace
if ttl > 0 and ttl < grace then
  new_ttl = ttl
end
redis.call('EXPIRE', KEYS[1], new_ttl)
return raw
"#;

/// Pure threshold check, factored out of `VaultStore::should_offload` so it
/// is testable without a live Redis connection.
fn should_offload_with_limits(data: &Value, max_rows: u64, max_bytes: u64, max_tokens: u64) -> bool {
    let Value::List(items) = data else {
        return false;
    };
    if items.len() as u64 > max_rows {
        return true;
    }
    let serialized = serde_json::to_vec(&serde_json::Value::from(data.clone()))
        .map(|v| v.len() as u64)
        .unwrap_or(0);
    if serialized > max_bytes {
        return true;
    }
    (serialized / 4) > max_tokens
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VaultEntry {
    full_data: Vec<Value>,
    owner_id: String,
    session_id: String,
    created_at: chrono::DateTime<chrono::Utc>,
    access_token: String,
    metadata: MetadataEnvelope,
}

#[derive(Clone)]
pub struct VaultStore {
    conn: ConnectionManager,
    pub max_inline_rows: u64,
    pub max_inline_bytes: u64,
    pub max_inline_tokens: u64,
    pub ttl_seconds: u64,
    pub grace_period_seconds: u64,
}

impl VaultStore {
    pub async fn connect(
        redis_url: &str,
        max_inline_rows: u64,
        max_inline_bytes: u64,
        max_inline_tokens: u64,
        ttl_seconds: u64,
        grace_period_seconds: u64,
    ) -> VaultResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| VaultError::BackendError(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| VaultError::BackendError(e.to_string()))?;
        Ok(Self {
            conn,
            max_inline_rows,
            max_inline_bytes,
            max_inline_tokens,
            ttl_seconds,
            grace_period_seconds,
        })
    }

    fn key(handle_id: &str) -> String {
        format!("{KEY_PREFIX}{handle_id}")
    }

    /// True iff `data` is a non-empty array and at least one of the three
    /// thresholds is exceeded (spec §4.2, §8).
    pub fn should_offload(&self, data: &Value) -> bool {
        should_offload_with_limits(
            data,
            self.max_inline_rows,
            self.max_inline_bytes,
            self.max_inline_tokens,
        )
    }

    /// Mint a handle + token, compute metadata, and store the entry with TTL
    /// `ttl_seconds`. Each call mints a new handle — `put` is never an
    /// update.
    pub async fn put(
        &self,
        rows: Vec<Value>,
        owner_id: &str,
        session_id: &str,
        source_tool: &str,
        data_source: Option<DataSource>,
        semantics: Option<Semantics>,
    ) -> VaultResult<(String, MetadataEnvelope)> {
        if rows.is_empty() {
            return Err(VaultError::ValidationError(
                "vault put requires at least one row".to_string(),
            ));
        }

        let handle_id = format!("vault-{}", Uuid::new_v4());
        let access_token = Uuid::new_v4().to_string();

        let envelope = metadata::build_envelope(
            &rows,
            &handle_id,
            &access_token,
            source_tool,
            data_source,
            semantics,
        );

        let entry = VaultEntry {
            full_data: rows,
            owner_id: owner_id.to_string(),
            session_id: session_id.to_string(),
            created_at: chrono::Utc::now(),
            access_token: access_token.clone(),
            metadata: envelope.clone(),
        };

        let serialized = serde_json::to_string(&entry)
            .map_err(|e| VaultError::BackendError(e.to_string()))?;

        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(Self::key(&handle_id), serialized, self.ttl_seconds)
            .await
            .map_err(|e| VaultError::BackendError(e.to_string()))?;

        Ok((handle_id, envelope))
    }

    /// Returns the stored rows iff ownership and token match and the entry
    /// is live, performing the atomic read-validate-shrink-TTL described in
    /// spec §4.2 via a single server-side `EVAL` (see `READ_AND_SHRINK_SCRIPT`).
    pub async fn get(
        &self,
        handle_id: &str,
        principal: &str,
        token: &str,
    ) -> VaultResult<Vec<Value>> {
        let entry = self.get_with_metadata(handle_id, principal, token).await?;
        Ok(entry.0)
    }

    pub async fn get_with_metadata(
        &self,
        handle_id: &str,
        principal: &str,
        token: &str,
    ) -> VaultResult<(Vec<Value>, MetadataEnvelope)> {
        self.try_read_and_shrink(handle_id, principal, token).await
    }

    /// Runs `READ_AND_SHRINK_SCRIPT`. `Err(DataNotFound)` covers both "no
    /// such key" and "owner/token mismatch" — the script returns `false` for
    /// both and we can't (and per spec §3 invariant 3, shouldn't) tell them
    /// apart on this side.
    async fn try_read_and_shrink(
        &self,
        handle_id: &str,
        principal: &str,
        token: &str,
    ) -> VaultResult<(Vec<Value>, MetadataEnvelope)> {
        let key = Self::key(handle_id);
        let mut conn = self.conn.clone();

        let raw: Option<String> = Script::new(READ_AND_SHRINK_SCRIPT)
            .key(&key)
            .arg(principal)
            .arg(token)
            .arg(self.grace_period_seconds)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| VaultError::BackendError(e.to_string()))?;

        let Some(raw) = raw else {
            return Err(VaultError::not_found(handle_id, None));
        };

        let entry: VaultEntry = serde_json::from_str(&raw)
            .map_err(|e| VaultError::BackendError(e.to_string()))?;

        Ok((entry.full_data, entry.metadata))
    }

    /// Checks token without mutating TTL.
    pub async fn validate_token(&self, handle_id: &str, token: &str) -> VaultResult<bool> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(Self::key(handle_id))
            .await
            .map_err(|e| VaultError::BackendError(e.to_string()))?;
        let Some(raw) = raw else {
            return Ok(false);
        };
        let entry: VaultEntry = serde_json::from_str(&raw)
            .map_err(|e| VaultError::BackendError(e.to_string()))?;
        Ok(entry.access_token == token)
    }

    /// Remaining TTL in seconds, or `None` if the handle does not exist.
    /// Operational helper for `vault-admin`; not part of the read path.
    pub async fn ttl_remaining(&self, handle_id: &str) -> VaultResult<Option<i64>> {
        let mut conn = self.conn.clone();
        let ttl: i64 = conn
            .ttl(Self::key(handle_id))
            .await
            .map_err(|e| VaultError::BackendError(e.to_string()))?;
        Ok(if ttl > 0 { Some(ttl) } else { None })
    }

    /// Force-expire a handle immediately. Operational helper for
    /// `vault-admin`.
    pub async fn expire_now(&self, handle_id: &str) -> VaultResult<bool> {
        let mut conn = self.conn.clone();
        let deleted: i64 = conn
            .del(Self::key(handle_id))
            .await
            .map_err(|e| VaultError::BackendError(e.to_string()))?;
        Ok(deleted > 0)
    }
}
