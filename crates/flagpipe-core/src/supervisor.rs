//! Owns the Submission Loop and TTL Reaper as child tasks and exposes a
//! single `restart` operation, so "swap config under contention" is
//! testable: the old tasks are cancelled and the new ones are live before
//! `restart` returns, matching the linearizable-from-HTTP guarantee in the
//! concurrency model.

use std::sync::{Arc, Mutex};

use flagpipe_protocol::ProtocolAdapter;
use sqlx::SqlitePool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::submission::SubmissionConfig;
use crate::{submission, ttl};

pub struct LoopSupervisor {
    pool: SqlitePool,
    generation: Mutex<Generation>,
}

struct Generation {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl LoopSupervisor {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            generation: Mutex::new(Generation {
                cancel: CancellationToken::new(),
                handles: Vec::new(),
            }),
        }
    }

    /// Cancels the currently running Submission Loop + TTL Reaper and starts
    /// fresh ones against `adapter` and the new tick intervals. Returns only
    /// after the old generation's cancellation has been requested and the
    /// new generation's tasks have been spawned.
    pub async fn restart(
        &self,
        adapter: Arc<dyn ProtocolAdapter>,
        submission_config: SubmissionConfig,
        tick_time: u64,
        flag_ttl: u64,
    ) {
        let old = {
            let mut guard = self.generation.lock().expect("generation lock poisoned");
            let old_cancel = guard.cancel.clone();
            let old_handles = std::mem::take(&mut guard.handles);

            let new_cancel = CancellationToken::new();
            let submission_handle = tokio::spawn(submission::run(
                self.pool.clone(),
                adapter,
                submission_config,
                new_cancel.clone(),
            ));
            let ttl_handle = tokio::spawn(ttl::run(
                self.pool.clone(),
                tick_time,
                flag_ttl,
                new_cancel.clone(),
            ));

            guard.cancel = new_cancel;
            guard.handles = vec![submission_handle, ttl_handle];

            (old_cancel, old_handles)
        };

        old.0.cancel();
        tracing::info!("loop supervisor restarted submission + ttl loops");
    }

    pub async fn shutdown(&self) {
        let (cancel, handles) = {
            let mut guard = self.generation.lock().expect("generation lock poisoned");
            (guard.cancel.clone(), std::mem::take(&mut guard.handles))
        };
        cancel.cancel();
        for h in handles {
            let _ = h.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flagpipe_protocol::MockAdapter;

    #[tokio::test]
    async fn restart_replaces_running_loops() {
        let pool = flagpipe_store::connect(":memory:").await.unwrap();
        flagpipe_store::migrate(&pool).await.unwrap();

        let supervisor = LoopSupervisor::new(pool);
        let adapter: Arc<dyn ProtocolAdapter> = Arc::new(MockAdapter {
            fixed_status: "ACCEPTED".to_string(),
            fail_unreachable: false,
        });

        supervisor
            .restart(
                adapter.clone(),
                SubmissionConfig {
                    checker_url: "http://checker".to_string(),
                    team_token: "tok".to_string(),
                    max_batch_size: 10,
                    tick_interval: std::time::Duration::from_secs(10),
                },
                60,
                5,
            )
            .await;

        // Swapping again must not panic and must leave exactly one live generation.
        supervisor
            .restart(
                adapter,
                SubmissionConfig {
                    checker_url: "http://checker".to_string(),
                    team_token: "tok".to_string(),
                    max_batch_size: 10,
                    tick_interval: std::time::Duration::from_millis(10),
                },
                60,
                5,
            )
            .await;

        supervisor.shutdown().await;
    }
}
