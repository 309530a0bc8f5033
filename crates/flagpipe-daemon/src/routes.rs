//! Axum router and all HTTP handlers for flagpipe-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. All handlers are `pub(crate)` so the scenario tests in
//! `tests/` can compose the router directly.
//!
//! Cookie-based operator authentication is an external collaborator concern
//! (see scope notes) and is not implemented here; routes below are the
//! core-relevant subset only.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use flagpipe_schemas::{FilterOptions, Flag, FlagStatus, SearchField, SortDir, SortField, Verdict};

use crate::api_types::{
    ConfigUpdateRequest, DeleteFlagResponse, ErrorResponse, FlagsQuery, FlagsResponse,
    ProtocolsResponse, SubmitFlagRequest, SubmitFlagsStandaloneRequest, SubmitResponse,
};
use crate::state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/config", get(config_get).post(config_post))
        .route("/api/v1/flags/:limit", get(flags_get))
        .route("/api/v1/submit-flag", post(submit_flag))
        .route("/api/v1/submit-flags-standalone", post(submit_flags_standalone))
        .route("/api/v1/protocols", get(protocols_get))
        .route("/api/v1/flag", delete(flag_delete))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// GET/POST /api/v1/config
// ---------------------------------------------------------------------------

pub(crate) async fn config_get(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let cfg = st.config.read().await.clone();
    (StatusCode::OK, Json(cfg))
}

/// Atomically swaps config, restarts Submission + TTL loops against it, then
/// broadcasts it. The response returns only after all three have happened,
/// matching the linearizable-from-HTTP guarantee in the concurrency model.
pub(crate) async fn config_post(
    State(st): State<Arc<AppState>>,
    Json(body): Json<ConfigUpdateRequest>,
) -> Response {
    let mut new_config = body.config;
    new_config.configured = true;

    if let Err(err) = st.apply_config(&new_config).await {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ErrorResponse { error: err.to_string() }),
        )
            .into_response();
    }

    {
        let mut guard = st.config.write().await;
        *guard = new_config.clone();
    }

    if let Err(err) = st.bus.publish_config(&new_config).await {
        tracing::warn!(%err, "config broadcast failed after loop restart");
    }

    (StatusCode::OK, Json(new_config)).into_response()
}

// ---------------------------------------------------------------------------
// GET /api/v1/flags/:limit
// ---------------------------------------------------------------------------

pub(crate) async fn flags_get(
    State(st): State<Arc<AppState>>,
    Path(limit): Path<i64>,
    Query(q): Query<FlagsQuery>,
) -> Response {
    let opts = FilterOptions {
        status: q.status.as_deref().and_then(FlagStatus::parse_any),
        service_name: q.service,
        team_id: q.team,
        search: q.search,
        search_field: q.search_field.as_deref().map(SearchField::parse),
        sort_field: q.sort_field.as_deref().and_then(SortField::parse),
        sort_dir: q.sort_dir.as_deref().and_then(SortDir::parse),
        limit: Some(limit),
        offset: q.offset,
    };

    let flags = match flagpipe_store::get_filtered(&st.pool, &opts).await {
        Ok(f) => f,
        Err(err) => return store_error(err),
    };
    let total = match flagpipe_store::count_filtered(&st.pool, &opts).await {
        Ok(n) => n,
        Err(err) => return store_error(err),
    };

    (StatusCode::OK, Json(FlagsResponse { flags, total })).into_response()
}

// ---------------------------------------------------------------------------
// POST /api/v1/submit-flag, /api/v1/submit-flags-standalone
// ---------------------------------------------------------------------------

pub(crate) async fn submit_flag(
    State(st): State<Arc<AppState>>,
    Json(body): Json<SubmitFlagRequest>,
) -> Response {
    submit_batch(&st, vec![body.flag]).await
}

pub(crate) async fn submit_flags_standalone(
    State(st): State<Arc<AppState>>,
    Json(body): Json<SubmitFlagsStandaloneRequest>,
) -> Response {
    submit_batch(&st, body.flags).await
}

/// Stores the batch and submits it synchronously via the currently
/// configured adapter, blocking the request on checker latency. An
/// alternative design would queue and return 202 Accepted instead; this
/// implementation keeps the synchronous path, matching the reference
/// behavior, since standalone submission is an operator/debug path rather
/// than the high-throughput ingestion route.
async fn submit_batch(st: &Arc<AppState>, flags: Vec<Flag>) -> Response {
    let codes: Vec<String> = flags.iter().map(|f| f.flag_code.clone()).collect();

    let stored = match flagpipe_store::add_flags(&st.pool, &flags).await {
        Ok(n) => n,
        Err(err) => return store_error(err),
    };

    let config = st.config.read().await.clone();
    let adapter = match flagpipe_protocol::build_adapter(&config.server.protocol) {
        Ok(a) => a,
        Err(err) => {
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(ErrorResponse { error: err.to_string() }),
            )
                .into_response()
        }
    };

    let verdicts = match adapter
        .submit(&config.server.url_flag_checker, &config.server.team_token, &codes)
        .await
    {
        Ok(v) => v,
        Err(err) => {
            tracing::warn!(%err, "standalone submission: checker unreachable");
            return (
                StatusCode::OK,
                Json(SubmitResponse { stored, accepted: 0, denied: 0, errored: 0 }),
            )
                .into_response();
        }
    };

    let filtered: Vec<Verdict> = verdicts
        .into_iter()
        .filter(|v| FlagStatus::parse_verdict(&v.status).is_some())
        .collect();

    let (mut accepted, mut denied, mut errored) = (0u32, 0u32, 0u32);
    for v in &filtered {
        match v.status.as_str() {
            "ACCEPTED" => accepted += 1,
            "DENIED" => denied += 1,
            "ERROR" => errored += 1,
            _ => {}
        }
    }

    if !filtered.is_empty() {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        if let Err(err) = flagpipe_store::update_statuses(&st.pool, &filtered, now).await {
            return store_error(err);
        }
    }

    (StatusCode::OK, Json(SubmitResponse { stored, accepted, denied, errored })).into_response()
}

// ---------------------------------------------------------------------------
// GET /api/v1/protocols
// ---------------------------------------------------------------------------

pub(crate) async fn protocols_get() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(ProtocolsResponse { protocols: flagpipe_protocol::known_protocols() }),
    )
}

// ---------------------------------------------------------------------------
// DELETE /api/v1/flag?flag=<code>
// ---------------------------------------------------------------------------

#[derive(serde::Deserialize)]
pub(crate) struct DeleteFlagQuery {
    flag: String,
}

pub(crate) async fn flag_delete(
    State(st): State<Arc<AppState>>,
    Query(q): Query<DeleteFlagQuery>,
) -> Response {
    match flagpipe_store::delete_flag(&st.pool, &q.flag).await {
        Ok(removed) => (StatusCode::OK, Json(DeleteFlagResponse { removed })).into_response(),
        Err(err) => store_error(err),
    }
}

fn store_error(err: anyhow::Error) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse { error: err.to_string() }),
    )
        .into_response()
}
