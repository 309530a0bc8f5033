//! Pluggable checker wire-dialects ("protocols"). A protocol is identified
//! by a string name in `config.server.protocol`; the registry resolves the
//! name to an implementation at submission-loop startup.
//!
//! This is the Protocol Adapter Contract: `submit(url, token, codes) ->
//! verdicts`. An adapter owns rate-limit handling and must not write partial
//! state itself — the submission loop owns writing verdicts to Store.

use anyhow::Result;
use async_trait::async_trait;
use flagpipe_schemas::{CoreError, Verdict};

impl std::fmt::Debug for dyn ProtocolAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "dyn ProtocolAdapter")
    }
}

#[async_trait]
pub trait ProtocolAdapter: Send + Sync {
    /// Submits a batch of flag codes to the checker and returns its verdicts.
    /// Transport failure (no response reached) must return
    /// `CoreError::CheckerUnreachable`, never a synthesized per-flag verdict.
    async fn submit(
        &self,
        checker_url: &str,
        team_token: &str,
        flag_codes: &[String],
    ) -> Result<Vec<Verdict>>;
}

/// Resolves a protocol by name. Unknown names are `UnknownProtocol`, fatal to
/// the submission loop that requested it but not to the server as a whole.
pub fn build_adapter(name: &str) -> Result<Box<dyn ProtocolAdapter>> {
    match name {
        "http-json" => Ok(Box::new(HttpJsonAdapter::new())),
        other => Err(CoreError::UnknownProtocol(other.to_string()).into()),
    }
}

pub fn known_protocols() -> Vec<&'static str> {
    vec!["http-json"]
}

/// Built-in adapter: POSTs `{team_token, flags: [codes]}` as JSON and expects
/// back a JSON array of `{flag_code, status, msg}`.
pub struct HttpJsonAdapter {
    client: reqwest::Client,
}

impl Default for HttpJsonAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpJsonAdapter {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

#[derive(serde::Serialize)]
struct SubmitRequestBody<'a> {
    team_token: &'a str,
    flags: &'a [String],
}

#[async_trait]
impl ProtocolAdapter for HttpJsonAdapter {
    async fn submit(
        &self,
        checker_url: &str,
        team_token: &str,
        flag_codes: &[String],
    ) -> Result<Vec<Verdict>> {
        let body = SubmitRequestBody {
            team_token,
            flags: flag_codes,
        };

        let resp = self
            .client
            .post(checker_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::CheckerUnreachable(e.to_string()))?;

        let verdicts: Vec<Verdict> = resp
            .json()
            .await
            .map_err(|e| CoreError::CheckerUnreachable(format!("decode checker response: {e}")))?;

        Ok(verdicts)
    }
}

/// Deterministic test double. Returns a fixed status for every code, or an
/// unreachable error if configured to. Mirrors the order-router's
/// `MockBroker` test pattern: no network, no timestamps.
pub struct MockAdapter {
    pub fixed_status: String,
    pub fail_unreachable: bool,
}

#[async_trait]
impl ProtocolAdapter for MockAdapter {
    async fn submit(
        &self,
        _checker_url: &str,
        _team_token: &str,
        flag_codes: &[String],
    ) -> Result<Vec<Verdict>> {
        if self.fail_unreachable {
            return Err(CoreError::CheckerUnreachable("mock unreachable".to_string()).into());
        }
        Ok(flag_codes
            .iter()
            .map(|code| Verdict {
                flag_code: code.clone(),
                status: self.fixed_status.clone(),
                msg: "ok".to_string(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_protocol_name_is_rejected() {
        let err = build_adapter("nonexistent-checker").unwrap_err();
        assert!(err.to_string().contains("unknown protocol"));
    }

    #[tokio::test]
    async fn mock_adapter_returns_accepted_for_every_code() {
        let adapter = MockAdapter {
            fixed_status: "ACCEPTED".to_string(),
            fail_unreachable: false,
        };
        let codes = vec!["FLAG{a}".to_string(), "FLAG{b}".to_string()];
        let verdicts = adapter.submit("http://checker", "tok", &codes).await.unwrap();
        assert_eq!(verdicts.len(), 2);
        assert!(verdicts.iter().all(|v| v.status == "ACCEPTED"));
    }

    #[tokio::test]
    async fn mock_adapter_surfaces_checker_unreachable() {
        let adapter = MockAdapter {
            fixed_status: "ACCEPTED".to_string(),
            fail_unreachable: true,
        };
        let err = adapter
            .submit("http://checker", "tok", &["FLAG{a}".to_string()])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unreachable"));
    }
}
