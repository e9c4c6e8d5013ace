//! Ambient observability for the vault: offload/query/retrieval events are
//! fire-and-forget sent here and periodically flushed as aggregated log
//! lines. Not a spec contract (§1 excludes metrics from scope) but carried
//! regardless, per the transformation rules — the teacher logs usage the
//! same way, just against ClickHouse instead of `tracing`.

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;

/// A single usage event emitted by vault operations.
#[derive(Debug, Clone)]
pub struct UsageEvent {
    pub handle_id: String,
    pub operation: String, // "offload", "query", "retrieve", "get"
    pub source_tool: String,
}

/// Handle for sending usage events (non-blocking, fire-and-forget).
#[derive(Clone)]
pub struct UsageTracker {
    tx: mpsc::UnboundedSender<UsageEvent>,
}

impl UsageTracker {
    /// Track a vault operation. Never blocks the caller.
    pub fn track(&self, event: UsageEvent) {
        let _ = self.tx.send(event);
    }
}

/// Spawn the background usage aggregator and return the tracker handle.
pub fn spawn() -> UsageTracker {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(usage_logger(rx));
    UsageTracker { tx }
}

/// Background task that batches usage events and logs aggregated counts
/// every 30s.
async fn usage_logger(mut rx: mpsc::UnboundedReceiver<UsageEvent>) {
    let mut buffer: Vec<UsageEvent> = Vec::new();
    let mut interval = tokio::time::interval(Duration::from_secs(30));

    loop {
        tokio::select! {
            Some(event) = rx.recv() => {
                buffer.push(event);
                if buffer.len() >= 500 {
                    let batch = std::mem::take(&mut buffer);
                    flush(batch);
                }
            }
            _ = interval.tick() => {
                if !buffer.is_empty() {
                    let batch = std::mem::take(&mut buffer);
                    flush(batch);
                }
            }
        }
    }
}

fn flush(events: Vec<UsageEvent>) {
    let mut counts: HashMap<(String, String), u64> = HashMap::new();
    for e in &events {
        *counts
            .entry((e.operation.clone(), e.source_tool.clone()))
            .or_insert(0) += 1;
    }
    for ((operation, source_tool), count) in &counts {
        tracing::info!(operation = %operation, source_tool = %source_tool, count, "vault usage");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn track_does_not_block_and_events_are_received() {
        let tracker = spawn();
        tracker.track(UsageEvent {
            handle_id: "vault-1".to_string(),
            operation: "offload".to_string(),
            source_tool: "get_orders".to_string(),
        });
        // No panic / no assertion on delivery timing; the channel is
        // unbounded and this call must never block.
    }
}
