//! Periodic worker that pulls unsubmitted flags from Store, hands them to
//! the Protocol Adapter, and writes verdicts back.
//!
//! State machine: IDLE -> FETCH -> SUBMIT -> UPDATE -> IDLE, driven by a
//! ticker at `submit_flag_checker_time` seconds. Submission is single-flight:
//! there is no parallel batch in flight at once.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use flagpipe_protocol::ProtocolAdapter;
use flagpipe_schemas::{FlagStatus, Verdict};
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;

pub struct SubmissionConfig {
    pub checker_url: String,
    pub team_token: String,
    pub max_batch_size: i64,
    pub tick_interval: Duration,
}

pub async fn run(
    pool: SqlitePool,
    adapter: Arc<dyn ProtocolAdapter>,
    config: SubmissionConfig,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(config.tick_interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("submission loop cancelled");
                return;
            }
            _ = ticker.tick() => {
                if let Err(err) = tick(&pool, adapter.as_ref(), &config).await {
                    tracing::warn!(%err, "submission tick failed");
                }
            }
        }
    }
}

/// Runs exactly one FETCH -> SUBMIT -> UPDATE cycle. Exposed for scenario
/// tests that want to drive the state machine without waiting on a ticker.
pub async fn tick(
    pool: &SqlitePool,
    adapter: &dyn ProtocolAdapter,
    config: &SubmissionConfig,
) -> anyhow::Result<()> {
    // FETCH
    let codes = flagpipe_store::get_unsubmitted_flag_codes(pool, config.max_batch_size).await?;
    if codes.is_empty() {
        return Ok(());
    }

    // SUBMIT
    let verdicts = match adapter.submit(&config.checker_url, &config.team_token, &codes).await {
        Ok(v) => v,
        Err(err) => {
            tracing::warn!(%err, batch = codes.len(), "checker unreachable, skipping tick");
            return Ok(());
        }
    };

    // UPDATE — drop verdicts outside {ACCEPTED, DENIED, ERROR}.
    let filtered = filter_known_verdicts(verdicts);
    let mut accepted = 0u32;
    let mut denied = 0u32;
    let mut errored = 0u32;
    for v in &filtered {
        match v.status.as_str() {
            "ACCEPTED" => accepted += 1,
            "DENIED" => denied += 1,
            "ERROR" => errored += 1,
            _ => unreachable!("filtered to known statuses"),
        }
    }

    if filtered.is_empty() {
        return Ok(());
    }

    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
    flagpipe_store::update_statuses(pool, &filtered, now).await?;
    tracing::info!(accepted, denied, errored, "submission tick wrote verdicts");

    Ok(())
}

fn filter_known_verdicts(verdicts: Vec<Verdict>) -> Vec<Verdict> {
    verdicts
        .into_iter()
        .filter(|v| FlagStatus::parse_verdict(&v.status).is_some())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_statuses_are_dropped() {
        let verdicts = vec![
            Verdict { flag_code: "a".into(), status: "ACCEPTED".into(), msg: "".into() },
            Verdict { flag_code: "b".into(), status: "DENIED".into(), msg: "".into() },
            Verdict { flag_code: "c".into(), status: "ERROR".into(), msg: "".into() },
            Verdict { flag_code: "d".into(), status: "PENDING".into(), msg: "".into() },
            Verdict { flag_code: "e".into(), status: "NOPE".into(), msg: "".into() },
        ];
        let filtered = filter_known_verdicts(verdicts);
        assert_eq!(filtered.len(), 3);
    }
}
