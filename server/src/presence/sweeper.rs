//! Background liveness sweep.
//!
//! Connections that stop heartbeating are removed and go through the same
//! offline transition as a clean disconnect.

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use tokio::task::JoinHandle;

use super::go_offline;
use crate::chat::scope::UserId;
use crate::state::AppState;
use crate::ws::broadcast::force_close;
use crate::ws::close_code;

/// Spawn a background task that sweeps stale connections every
/// `sweep_interval_secs`.
pub fn spawn_liveness_sweeper(state: AppState) -> JoinHandle<()> {
    let period = state.presence.sweep_interval();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // Skip the first immediate tick
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let swept = sweep_once(&state, Utc::now()).await;
            if swept.is_empty() {
                tracing::trace!("Liveness sweep: no stale connections");
            } else {
                tracing::info!("Liveness sweep: removed {} stale connections", swept.len());
            }
        }
    })
}

/// Remove every connection whose heartbeat is older than the timeout at
/// `now`, close its socket, and broadcast the offline transitions.
///
/// Removal is atomic per connection, so a connection is reported by exactly
/// one sweep and its own teardown later finds nothing to remove.
pub async fn sweep_once(state: &AppState, now: DateTime<Utc>) -> Vec<UserId> {
    let stale = state
        .connections
        .remove_stale(now, state.presence.heartbeat_timeout());
    if stale.is_empty() {
        return Vec::new();
    }

    for conn in &stale {
        tracing::warn!(
            user_id = conn.user_id,
            conn_id = conn.id,
            last_heartbeat = %conn.last_heartbeat_at,
            "Heartbeat timeout, dropping connection"
        );
        force_close(
            &conn.sender,
            conn.user_id,
            close_code::HEARTBEAT_TIMEOUT,
            "Heartbeat timeout",
        );
    }

    // Sends never block, so one slow recipient cannot hold up the others.
    join_all(
        stale
            .iter()
            .map(|conn| go_offline(state, conn.offline_presence(now))),
    )
    .await;

    stale.iter().map(|conn| conn.user_id).collect()
}
