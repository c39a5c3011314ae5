//! Runtime configuration, read once from the environment at startup.

use std::path::PathBuf;
use std::time::Duration;

/// Settings threaded into every component at construction
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the agent's `{session_id}.jsonl` logs
    pub log_dir: PathBuf,
    /// Default tmux session/window receiving dispatched commands
    pub tmux_session: String,
    pub tmux_window: String,
    /// Idle wait between tail polls
    pub poll_interval: Duration,
    /// Wait between correlation scans
    pub discovery_interval: Duration,
    /// How long to look for the session that received a new command
    pub correlation_timeout: Duration,
    /// Tailing gives up after this long without the log growing
    pub idle_timeout: Duration,
    /// Number of most recently modified logs inspected during correlation
    pub candidate_files: usize,
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/home/coder".to_string());
        Self {
            log_dir: PathBuf::from(home).join(".local").join("share").join("goose").join("sessions"),
            tmux_session: "goose-controller".to_string(),
            tmux_window: "goose".to_string(),
            poll_interval: Duration::from_millis(500),
            discovery_interval: Duration::from_millis(500),
            correlation_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(300),
            candidate_files: 5,
            port: 8000,
        }
    }
}

impl Config {
    /// Build from `GOOSE_*` / `PORT` environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let millis = |key: &str, default: Duration| {
            parse_or(&lookup, key, default.as_millis() as u64).map_or(default, Duration::from_millis)
        };
        let secs = |key: &str, default: Duration| {
            parse_or(&lookup, key, default.as_secs()).map_or(default, Duration::from_secs)
        };

        Self {
            log_dir: lookup("GOOSE_LOG_DIR").map(PathBuf::from).unwrap_or(defaults.log_dir),
            tmux_session: lookup("GOOSE_TMUX_SESSION").unwrap_or(defaults.tmux_session),
            tmux_window: lookup("GOOSE_TMUX_WINDOW").unwrap_or(defaults.tmux_window),
            poll_interval: millis("GOOSE_POLL_INTERVAL_MS", defaults.poll_interval),
            discovery_interval: millis("GOOSE_DISCOVERY_INTERVAL_MS", defaults.discovery_interval),
            correlation_timeout: secs("GOOSE_CORRELATION_TIMEOUT_SECS", defaults.correlation_timeout),
            idle_timeout: secs("GOOSE_IDLE_TIMEOUT_SECS", defaults.idle_timeout),
            candidate_files: parse_or(&lookup, "GOOSE_CANDIDATE_FILES", defaults.candidate_files as u64)
                .map_or(defaults.candidate_files, |n| n.max(1) as usize),
            port: parse_or(&lookup, "PORT", defaults.port as u64)
                .and_then(|p| u16::try_from(p).ok())
                .unwrap_or(defaults.port),
        }
    }
}

/// Parse a numeric variable; `None` means "use the default"
fn parse_or(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> Option<u64> {
    let value = lookup(key)?;
    match value.trim().parse::<u64>() {
        Ok(n) => Some(n),
        Err(_) => {
            tracing::warn!("Ignoring invalid {}={:?}, using {}", key, value, default);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn config_with(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_with(&[]);
        assert_eq!(config.tmux_session, "goose-controller");
        assert_eq!(config.tmux_window, "goose");
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.discovery_interval, Duration::from_millis(500));
        assert_eq!(config.correlation_timeout, Duration::from_secs(10));
        assert_eq!(config.idle_timeout, Duration::from_secs(300));
        assert_eq!(config.candidate_files, 5);
        assert_eq!(config.port, 8000);
        assert!(config.log_dir.ends_with(".local/share/goose/sessions"));
    }

    #[test]
    fn test_overrides() {
        let config = config_with(&[
            ("GOOSE_LOG_DIR", "/tmp/logs"),
            ("GOOSE_POLL_INTERVAL_MS", "100"),
            ("GOOSE_IDLE_TIMEOUT_SECS", "1"),
            ("GOOSE_CANDIDATE_FILES", "0"),
            ("PORT", "9001"),
        ]);
        assert_eq!(config.log_dir, PathBuf::from("/tmp/logs"));
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert_eq!(config.idle_timeout, Duration::from_secs(1));
        assert_eq!(config.candidate_files, 1);
        assert_eq!(config.port, 9001);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = config_with(&[("GOOSE_POLL_INTERVAL_MS", "fast"), ("PORT", "70000")]);
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.port, 8000);
    }
}
