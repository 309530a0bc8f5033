//! Consumer that pulls flag messages off the bus, buffers them, and
//! bulk-writes to Store with bounded latency.

use std::time::Duration;

use flagpipe_bus::{fetch_batch, Bus};
use flagpipe_schemas::Flag;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;

const FETCH_BATCH: usize = 50;
const FETCH_TIMEOUT: Duration = Duration::from_secs(5);
const BUFFER_CAP: usize = 200;
const FLUSH_TICK: Duration = Duration::from_secs(30);

/// Runs until `cancel` fires. Ack-then-flush ordering: a message is ack'd as
/// soon as it decodes successfully (or is recognized as poison), never held
/// waiting on the next Store write — a flush failure does not re-queue
/// already-acked messages, trading possible loss for liveness, since the
/// Store's insert-or-ignore makes a redelivered duplicate harmless anyway.
pub async fn run(bus: &Bus, pool: &SqlitePool, cancel: CancellationToken) -> anyhow::Result<()> {
    let consumer = bus.flags_consumer().await?;
    let mut buffer: Vec<Flag> = Vec::with_capacity(BUFFER_CAP);
    let mut flush_ticker = tokio::time::interval(FLUSH_TICK);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                flush(pool, &mut buffer).await;
                tracing::info!("ingestion loop cancelled, final flush complete");
                return Ok(());
            }
            _ = flush_ticker.tick() => {
                if !buffer.is_empty() {
                    flush(pool, &mut buffer).await;
                }
            }
            fetched = fetch_batch(&consumer, FETCH_BATCH, FETCH_TIMEOUT) => {
                let messages = match fetched {
                    Ok(m) => m,
                    Err(err) => {
                        tracing::warn!(%err, "ingestion fetch failed, retrying next tick");
                        continue;
                    }
                };

                for m in messages {
                    match &m.decoded {
                        Some(flag) => buffer.push(flag.clone()),
                        None => tracing::warn!("dropped poison flag message (non-JSON payload)"),
                    }
                    if let Err(err) = m.ack().await {
                        tracing::warn!(%err, "ack failed for ingested message");
                    }
                }

                if buffer.len() >= BUFFER_CAP {
                    flush(pool, &mut buffer).await;
                }
            }
        }
    }
}

async fn flush(pool: &SqlitePool, buffer: &mut Vec<Flag>) {
    if buffer.is_empty() {
        return;
    }
    match flagpipe_store::add_flags(pool, buffer).await {
        Ok(inserted) => tracing::info!(buffered = buffer.len(), inserted, "flushed ingestion buffer"),
        Err(err) => tracing::warn!(%err, buffered = buffer.len(), "ingestion flush failed"),
    }
    buffer.clear();
}
