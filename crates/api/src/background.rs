use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::observability;
use crate::state::AppState;

/// Periodically pings every realtime session and evicts the ones that missed
/// the previous probe.
pub fn spawn_presence_probe(state: AppState) -> JoinHandle<()> {
    let period = Duration::from_millis(state.config.presence_probe_interval_ms.max(1_000));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick fires immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let evicted = state.hub.probe_sessions().await;
            if !evicted.is_empty() {
                tracing::info!(count = evicted.len(), "evicted unresponsive realtime sessions");
                observability::register_session_evictions(evicted.len());
            }
        }
    })
}

/// Marks elapsed ACTIVE connections as EXPIRED ahead of any read touching them.
pub fn spawn_expiry_sweep(state: AppState) -> Option<JoinHandle<()>> {
    if !state.config.expiry_sweep_enabled {
        return None;
    }
    let period = Duration::from_millis(state.config.expiry_sweep_interval_ms.max(1_000));
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match state.connections.sweep_expired().await {
                Ok(0) => {}
                Ok(count) => {
                    tracing::info!(count, "expired elapsed connections");
                    for _ in 0..count {
                        observability::register_ledger_transition("connection", "expired");
                    }
                }
                Err(err) => tracing::warn!(error = %err, "expiry sweep failed"),
            }
        }
    }))
}
