use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Top-level config loaded from `vault.toml`, giving the defaults that
/// environment variables (see `VaultConfig::resolve`) then override.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct FileConfig {
    #[serde(default)]
    pub vault: VaultLimits,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VaultLimits {
    #[serde(default = "default_max_inline_rows")]
    pub max_inline_rows: u64,
    #[serde(default = "default_max_inline_tokens")]
    pub max_inline_tokens: u64,
    #[serde(default = "default_max_inline_bytes")]
    pub max_inline_bytes: u64,
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,
    #[serde(default = "default_grace_period_seconds")]
    pub grace_period_seconds: u64,
}

impl Default for VaultLimits {
    fn default() -> Self {
        Self {
            max_inline_rows: default_max_inline_rows(),
            max_inline_tokens: default_max_inline_tokens(),
            max_inline_bytes: default_max_inline_bytes(),
            ttl_seconds: default_ttl_seconds(),
            grace_period_seconds: default_grace_period_seconds(),
        }
    }
}

fn default_max_inline_rows() -> u64 {
    100
}
fn default_max_inline_tokens() -> u64 {
    10_000
}
fn default_max_inline_bytes() -> u64 {
    51_200
}
fn default_ttl_seconds() -> u64 {
    1800
}
fn default_grace_period_seconds() -> u64 {
    300
}

/// Fully resolved runtime configuration: file defaults overlaid with
/// environment variables, per spec §6.
#[derive(Debug, Clone)]
pub struct VaultConfig {
    pub redis_url: String,
    pub max_inline_rows: u64,
    pub max_inline_tokens: u64,
    pub max_inline_bytes: u64,
    pub ttl_seconds: u64,
    pub grace_period_seconds: u64,
    pub analysis_agent_url: Option<String>,
    pub analysis_agent_api_key: Option<String>,
    pub analysis_agent_timeout: Duration,
}

impl FileConfig {
    /// Load config from a TOML file. Returns defaults if the file doesn't exist.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("config file not found at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let config: FileConfig = toml::from_str(&contents)?;
        tracing::info!("loaded config from {}", path.display());
        Ok(config)
    }
}

impl VaultConfig {
    /// Resolve the final config: `vault.toml` (if present) as the base,
    /// environment variables as the highest-precedence override. `REDIS_URL`
    /// has no file-level default — a missing backend URL is a
    /// `ValidationError` at startup, per spec §7.
    pub fn resolve(file: FileConfig) -> anyhow::Result<Self> {
        let redis_url =
            std::env::var("REDIS_URL").map_err(|_| anyhow::anyhow!("REDIS_URL is required"))?;

        let max_inline_rows = env_u64("DATA_VAULT_MAX_INLINE_ROWS", file.vault.max_inline_rows);
        let max_inline_tokens =
            env_u64("DATA_VAULT_MAX_INLINE_TOKENS", file.vault.max_inline_tokens);
        let max_inline_bytes =
            env_u64("DATA_VAULT_MAX_INLINE_BYTES", file.vault.max_inline_bytes);
        let ttl_seconds = env_u64("DATA_VAULT_TTL_SECONDS", file.vault.ttl_seconds);
        let grace_period_seconds = env_u64(
            "DATA_VAULT_GRACE_PERIOD_SECONDS",
            file.vault.grace_period_seconds,
        );

        let analysis_agent_url = std::env::var("ANALYSIS_AGENT_URL").ok();
        let analysis_agent_api_key = std::env::var("ANALYSIS_AGENT_API_KEY").ok();
        let analysis_agent_timeout =
            Duration::from_millis(env_u64("ANALYSIS_AGENT_TIMEOUT_MS", 10_000));

        Ok(Self {
            redis_url,
            max_inline_rows,
            max_inline_tokens,
            max_inline_bytes,
            ttl_seconds,
            grace_period_seconds,
            analysis_agent_url,
            analysis_agent_api_key,
            analysis_agent_timeout,
        })
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_config_defaults_match_spec() {
        let file = FileConfig::default();
        assert_eq!(file.vault.max_inline_rows, 100);
        assert_eq!(file.vault.max_inline_tokens, 10_000);
        assert_eq!(file.vault.max_inline_bytes, 51_200);
        assert_eq!(file.vault.ttl_seconds, 1800);
        assert_eq!(file.vault.grace_period_seconds, 300);
    }
}
