//! Shared runtime state for flagpipe-daemon.
//!
//! Wraps the Store pool, Bus handle, Config singleton, and loop supervisor
//! in one server-context struct passed explicitly to handlers, rather than
//! leaving any of them as a process-global mutable.

use std::sync::Arc;
use std::time::Duration;

use flagpipe_bus::Bus;
use flagpipe_core::{LoopSupervisor, SubmissionConfig};
use flagpipe_protocol::ProtocolAdapter;
use flagpipe_schemas::ConfigShared;
use sqlx::SqlitePool;
use tokio::sync::RwLock;

#[derive(Clone, Debug)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

/// Cloneable (Arc) handle shared across all Axum handlers.
pub struct AppState {
    pub pool: SqlitePool,
    pub bus: Arc<Bus>,
    /// Config singleton guarded by a readers-writer discipline; only the
    /// config handler writes.
    pub config: RwLock<ConfigShared>,
    pub supervisor: LoopSupervisor,
    pub build: BuildInfo,
}

impl AppState {
    pub fn new(pool: SqlitePool, bus: Arc<Bus>, initial_config: ConfigShared) -> Self {
        Self {
            supervisor: LoopSupervisor::new(pool.clone()),
            pool,
            bus,
            config: RwLock::new(initial_config),
            build: BuildInfo {
                service: "flagpipe-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
        }
    }

    /// Resolves the protocol adapter named by `config.server.protocol` and
    /// (re)starts the Submission Loop + TTL Reaper against it. Called once
    /// at boot and again, atomically, on every successful config swap.
    pub async fn apply_config(&self, config: &ConfigShared) -> anyhow::Result<()> {
        let adapter: Arc<dyn ProtocolAdapter> = flagpipe_protocol::build_adapter(&config.server.protocol)?.into();

        self.supervisor
            .restart(
                adapter,
                SubmissionConfig {
                    checker_url: config.server.url_flag_checker.clone(),
                    team_token: config.server.team_token.clone(),
                    max_batch_size: config.server.max_flag_batch_size as i64,
                    tick_interval: Duration::from_secs(config.server.submit_flag_checker_time.max(1)),
                },
                config.server.tick_time,
                config.server.flag_ttl,
            )
            .await;

        Ok(())
    }
}
