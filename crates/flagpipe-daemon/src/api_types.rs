//! Request and response types for flagpipe-daemon HTTP endpoints.
//!
//! These types are `Serialize + Deserialize` so they can be JSON-encoded by
//! Axum and decoded by tests. No business logic lives here.

use flagpipe_schemas::{ConfigShared, Flag};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfigUpdateRequest {
    pub config: ConfigShared,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct FlagsQuery {
    pub offset: Option<i64>,
    pub status: Option<String>,
    pub service: Option<String>,
    pub team: Option<u16>,
    pub search: Option<String>,
    pub search_field: Option<String>,
    pub sort_field: Option<String>,
    pub sort_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FlagsResponse {
    pub flags: Vec<Flag>,
    pub total: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitFlagRequest {
    pub flag: Flag,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitFlagsStandaloneRequest {
    pub flags: Vec<Flag>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitResponse {
    pub stored: u64,
    pub accepted: u32,
    pub denied: u32,
    pub errored: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProtocolsResponse {
    pub protocols: Vec<&'static str>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteFlagResponse {
    pub removed: u64,
}
