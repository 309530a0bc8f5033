//! Periodic worker that deletes flags whose age exceeds
//! `flag_ttl * tick_time`. Runs iff `flag_ttl > 0`; cancelled together with
//! the Submission Loop on config swap.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;

pub async fn run(pool: SqlitePool, tick_time: u64, flag_ttl: u64, cancel: CancellationToken) {
    if flag_ttl == 0 {
        tracing::info!("ttl reaper disabled (flag_ttl = 0)");
        return;
    }

    let window_secs = tick_time * flag_ttl;
    let mut ticker = tokio::time::interval(Duration::from_secs(window_secs.max(1)));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("ttl reaper cancelled");
                return;
            }
            _ = ticker.tick() => {
                match reap_once(&pool, window_secs).await {
                    Ok(removed) => tracing::info!(removed, window_secs, "ttl reaper tick"),
                    Err(err) => tracing::warn!(%err, "ttl reaper tick failed"),
                }
            }
        }
    }
}

/// Runs one reap cycle against the current wall clock. Exposed for scenario
/// tests that want to drive the reaper without waiting on its ticker.
pub async fn reap_once(pool: &SqlitePool, window_secs: u64) -> anyhow::Result<u64> {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
    flagpipe_store::delete_expired(pool, window_secs, now).await
}
