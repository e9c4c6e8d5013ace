use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use data_vault::analysis_agent::{AnalysisAgent, HttpAnalysisAgent};
use data_vault::config::{FileConfig, VaultConfig};
use data_vault::pipeline::PipelineContext;
use data_vault::query_engine::QueryEngine;
use data_vault::vault_store::VaultStore;
use data_vault::{handlers, usage_tracker, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("data_vault=debug,tower_http=debug")),
        )
        .init();

    let file_config_path =
        std::env::var("DATA_VAULT_CONFIG").unwrap_or_else(|_| "./vault.toml".to_string());
    let file_config = FileConfig::load(&file_config_path)?;
    let config = VaultConfig::resolve(file_config)?;

    let vault = Arc::new(
        VaultStore::connect(
            &config.redis_url,
            config.max_inline_rows,
            config.max_inline_bytes,
            config.max_inline_tokens,
            config.ttl_seconds,
            config.grace_period_seconds,
        )
        .await
        .map_err(|e| anyhow::anyhow!("failed to connect to vault backend: {e}"))?,
    );
    tracing::info!(redis_url = %config.redis_url, "vault store connected");

    let query_engine = Arc::new(QueryEngine::new()?);

    let analysis_agent: Option<Arc<dyn AnalysisAgent>> =
        config.analysis_agent_url.clone().map(|url| {
            let agent: Arc<dyn AnalysisAgent> = Arc::new(HttpAnalysisAgent::new(
                url,
                config.analysis_agent_api_key.clone(),
                config.analysis_agent_timeout,
            ));
            agent
        });

    if analysis_agent.is_none() {
        tracing::warn!(
            "no ANALYSIS_AGENT_URL configured; offload pipeline will pass tool results through unchanged"
        );
    }

    let pipeline = Arc::new(PipelineContext {
        vault: vault.clone(),
        analysis_agent,
    });

    let usage = usage_tracker::spawn();

    let state = AppState {
        vault,
        query_engine,
        pipeline,
        usage,
    };

    let app = Router::new()
        .route("/data-vault/{handleId}", get(handlers::vault::get_by_handle))
        .route("/data-vault/query", post(handlers::vault::query_by_handle))
        .route("/data-vault/intercept", post(handlers::vault::intercept))
        .route("/healthz", get(handlers::health::healthz))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], 8080));
    tracing::info!("data-vault listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
