//! flagpipe-daemon entry point.
//!
//! This file is intentionally thin: it opens the store, connects the bus,
//! loads config, boots the Ingestion Loop, Submission Loop, and TTL Reaper,
//! wires middleware, and starts the HTTP server. All route handlers live in
//! `routes.rs`; all shared state types live in `state.rs`.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use flagpipe_daemon::{routes, state};
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env.local if present (dev convenience).
    // Silent if the file does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let db_url = flagpipe_store::resolve_db_url().context("resolve flag store location")?;
    let pool = flagpipe_store::connect(&db_url).await.context("connect to flag store")?;
    flagpipe_store::migrate(&pool).await.context("run store migrations")?;

    let nats_url = std::env::var("NATS_URL").unwrap_or_else(|_| "nats://127.0.0.1:4222".to_string());
    let bus = flagpipe_bus::Bus::connect(&nats_url).await.context("connect to message bus")?;
    bus.ensure_stream().await.context("ensure flag/config stream")?;
    let bus = Arc::new(bus);

    let boot_token = flagpipe_bus::generate_boot_token();
    info!(boot_token, "daemon boot token (not persisted)");

    let config_path = std::env::var("FLAGPIPE_CONFIG").unwrap_or_else(|_| "config.yaml".to_string());
    let config = flagpipe_config::load_or_default(&config_path);

    let shared = Arc::new(state::AppState::new(pool.clone(), Arc::clone(&bus), config.clone()));

    // A config-named protocol that the server doesn't know is fatal only to
    // the submission loop it was meant to drive, not to the server: log and
    // keep listening so a corrected POST /api/v1/config can recover it.
    if let Err(err) = shared.apply_config(&config).await {
        tracing::error!(%err, "failed to start submission/ttl loops from boot config, awaiting corrected config");
    }

    let ingestion_cancel = CancellationToken::new();
    tokio::spawn({
        let bus = Arc::clone(&bus);
        let pool = pool.clone();
        let cancel = ingestion_cancel.clone();
        async move {
            if let Err(err) = flagpipe_core::ingestion::run(&bus, &pool, cancel).await {
                tracing::error!(%err, "ingestion loop exited");
            }
        }
    });

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = bind_addr_from_env().unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8899)));
    info!("flagpipe-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .await
        .context("server crashed")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var("FLAGPIPE_DAEMON_ADDR").ok()?.parse().ok()
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(tower_http::cors::Any)
}
