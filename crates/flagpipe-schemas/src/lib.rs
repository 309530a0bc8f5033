use serde::{Deserialize, Serialize};

/// Wire and storage representation of a captured flag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Flag {
    pub flag_code: String,
    pub service_name: String,
    pub port_service: u16,
    pub team_id: u16,
    pub submit_time: u64,
    #[serde(default)]
    pub response_time: u64,
    #[serde(default)]
    pub status: FlagStatus,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub exploit_name: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum FlagStatus {
    #[default]
    Unsubmitted,
    Accepted,
    Denied,
    Error,
}

impl FlagStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlagStatus::Unsubmitted => "UNSUBMITTED",
            FlagStatus::Accepted => "ACCEPTED",
            FlagStatus::Denied => "DENIED",
            FlagStatus::Error => "ERROR",
        }
    }

    /// Parses a checker verdict string. Returns `None` for anything outside
    /// {ACCEPTED, DENIED, ERROR} — the caller drops such verdicts rather than
    /// writing them, per the verdict-filtering invariant.
    pub fn parse_verdict(s: &str) -> Option<FlagStatus> {
        match s {
            "ACCEPTED" => Some(FlagStatus::Accepted),
            "DENIED" => Some(FlagStatus::Denied),
            "ERROR" => Some(FlagStatus::Error),
            _ => None,
        }
    }

    pub fn parse_any(s: &str) -> Option<FlagStatus> {
        match s {
            "UNSUBMITTED" => Some(FlagStatus::Unsubmitted),
            other => Self::parse_verdict(other),
        }
    }
}

/// A checker's verdict on one submitted flag code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub flag_code: String,
    /// Raw status string as returned by the adapter; validated/filtered by
    /// the submission loop before it reaches the Store.
    pub status: String,
    #[serde(default)]
    pub msg: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    SubmitTime,
    ResponseTime,
    Status,
    FlagCode,
    ServiceName,
    TeamId,
    PortService,
}

impl SortField {
    pub fn parse(s: &str) -> Option<SortField> {
        match s {
            "submit_time" => Some(SortField::SubmitTime),
            "response_time" => Some(SortField::ResponseTime),
            "status" => Some(SortField::Status),
            "flag_code" => Some(SortField::FlagCode),
            "service_name" => Some(SortField::ServiceName),
            "team_id" => Some(SortField::TeamId),
            "port_service" => Some(SortField::PortService),
            _ => None,
        }
    }

    pub fn column(&self) -> &'static str {
        match self {
            SortField::SubmitTime => "submit_time",
            SortField::ResponseTime => "response_time",
            SortField::Status => "status",
            SortField::FlagCode => "flag_code",
            SortField::ServiceName => "service_name",
            SortField::TeamId => "team_id",
            SortField::PortService => "port_service",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDir {
    Asc,
    Desc,
}

impl SortDir {
    pub fn parse(s: &str) -> Option<SortDir> {
        match s.to_ascii_uppercase().as_str() {
            "ASC" => Some(SortDir::Asc),
            "DESC" => Some(SortDir::Desc),
            _ => None,
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDir::Asc => "ASC",
            SortDir::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchField {
    FlagCode,
    ServiceName,
    ExploitName,
    Msg,
    All,
}

impl SearchField {
    pub fn parse(s: &str) -> SearchField {
        match s {
            "flag_code" => SearchField::FlagCode,
            "service_name" => SearchField::ServiceName,
            "exploit_name" => SearchField::ExploitName,
            "msg" => SearchField::Msg,
            _ => SearchField::All,
        }
    }
}

/// Parameters for `Store::get_filtered` / `Store::count_filtered`.
#[derive(Debug, Clone, Default)]
pub struct FilterOptions {
    pub status: Option<FlagStatus>,
    pub service_name: Option<String>,
    pub team_id: Option<u16>,
    pub search: Option<String>,
    pub search_field: Option<SearchField>,
    pub sort_field: Option<SortField>,
    pub sort_dir: Option<SortDir>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// One exploited-service entry in `ConfigClient::services`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigServer {
    pub submit_flag_checker_time: u64,
    pub max_flag_batch_size: u32,
    pub url_flag_checker: String,
    pub team_token: String,
    pub protocol: String,
    pub tick_time: u64,
    pub flag_ttl: u64,
    pub start_time: String,
    pub end_time: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigClient {
    pub regex_flag: String,
    pub format_ip_teams: String,
    pub my_team_id: u16,
    pub services: Vec<Service>,
    pub range_ip_teams: u16,
    pub nop_team: u16,
    pub url_flag_ids: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigShared {
    pub server: ConfigServer,
    pub client: ConfigClient,
    #[serde(default)]
    pub configured: bool,
}

/// Error kinds named in the error-handling design, attached at the boundary
/// between a component and its caller so handlers/loops can match on kind
/// instead of inspecting error strings.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("bad input: {0}")]
    BadInput(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("storage write failed: {0}")]
    StorageWrite(String),
    #[error("checker unreachable: {0}")]
    CheckerUnreachable(String),
    #[error("bus unavailable: {0}")]
    BusUnavailable(String),
    #[error("bad config: {0}")]
    BadConfig(String),
    #[error("unknown protocol: {0}")]
    UnknownProtocol(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_parsing_filters_unknown_statuses() {
        assert_eq!(FlagStatus::parse_verdict("ACCEPTED"), Some(FlagStatus::Accepted));
        assert_eq!(FlagStatus::parse_verdict("DENIED"), Some(FlagStatus::Denied));
        assert_eq!(FlagStatus::parse_verdict("ERROR"), Some(FlagStatus::Error));
        assert_eq!(FlagStatus::parse_verdict("PENDING"), None);
        assert_eq!(FlagStatus::parse_verdict("NOPE"), None);
    }

    #[test]
    fn sort_field_falls_back_on_unknown_input() {
        assert!(SortField::parse("flag_code").is_some());
        assert!(SortField::parse("nonsense").is_none());
    }
}
