pub mod analysis_agent;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metadata;
pub mod path_ops;
pub mod pipeline;
pub mod query_engine;
pub mod sampler;
pub mod usage_tracker;
pub mod value;
pub mod vault_store;

use std::sync::Arc;

use pipeline::PipelineContext;
use query_engine::QueryEngine;
use usage_tracker::UsageTracker;
use vault_store::VaultStore;

#[derive(Clone)]
pub struct AppState {
    pub vault: Arc<VaultStore>,
    pub query_engine: Arc<QueryEngine>,
    pub pipeline: Arc<PipelineContext>,
    pub usage: UsageTracker,
}
