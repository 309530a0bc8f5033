use anyhow::{Context, Result};
use flagpipe_schemas::{ConfigClient, ConfigServer, ConfigShared};

/// Loads `ConfigShared` from a YAML file. A missing file or a parse error is
/// `BadConfig` — the caller (daemon boot) logs a warning and falls through to
/// [`default_config`], awaiting the first `POST /api/v1/config`.
pub fn load_yaml(path: &str) -> Result<ConfigShared> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("read config file: {path}"))?;
    let cfg: ConfigShared =
        serde_yaml::from_str(&raw).with_context(|| format!("parse config yaml: {path}"))?;
    Ok(cfg)
}

/// Loads from `path` if possible, otherwise logs and returns the unconfigured
/// default. Never fails — matches the `BadConfig` policy of "warn, fall
/// through", since the server still has a usable (if `configured: false`)
/// in-memory config to serve from.
pub fn load_or_default(path: &str) -> ConfigShared {
    match load_yaml(path) {
        Ok(mut cfg) => {
            cfg.configured = true;
            cfg
        }
        Err(err) => {
            tracing::warn!(%err, path, "falling through to default config; awaiting web config");
            default_config()
        }
    }
}

pub fn default_config() -> ConfigShared {
    ConfigShared {
        server: ConfigServer {
            submit_flag_checker_time: 30,
            max_flag_batch_size: 500,
            url_flag_checker: String::new(),
            team_token: String::new(),
            protocol: "http-json".to_string(),
            tick_time: 120,
            flag_ttl: 5,
            start_time: String::new(),
            end_time: String::new(),
        },
        client: ConfigClient {
            regex_flag: String::new(),
            format_ip_teams: String::new(),
            my_team_id: 0,
            services: Vec::new(),
            range_ip_teams: 0,
            nop_team: 0,
            url_flag_ids: String::new(),
        },
        configured: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_falls_through_to_default() {
        let cfg = load_or_default("/nonexistent/path/for/flagpipe/tests.yaml");
        assert!(!cfg.configured);
        assert_eq!(cfg.server.protocol, "http-json");
    }

    #[test]
    fn loads_valid_yaml_and_marks_configured() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            f,
            "{}",
            "server:\n  submit_flag_checker_time: 10\n  max_flag_batch_size: 50\n  url_flag_checker: \"http://checker\"\n  team_token: \"tok\"\n  protocol: \"http-json\"\n  tick_time: 60\n  flag_ttl: 5\n  start_time: \"\"\n  end_time: \"\"\nclient:\n  regex_flag: \"FLAG\\\\{.+\\\\}\"\n  format_ip_teams: \"10.60.x.1\"\n  my_team_id: 2\n  services: []\n  range_ip_teams: 30\n  nop_team: 0\n  url_flag_ids: \"\"\n"
        )
        .unwrap();

        let cfg = load_or_default(f.path().to_str().unwrap());
        assert!(cfg.configured);
        assert_eq!(cfg.server.submit_flag_checker_time, 10);
        assert_eq!(cfg.client.my_team_id, 2);
    }
}
