//! # Tmux Dispatch
//!
//! Goose runs inside a shared tmux pane (by default `goose-controller:goose`).
//! Commands reach it as keystrokes: the text is sent with `send-keys -l`
//! (literal mode, no key-name interpretation) followed by a separate `Enter`.
//!
//! The stream controller only sees the [`Dispatcher`] trait, so tests can
//! substitute a fake that writes fixture log lines instead of typing.

use serde::Serialize;
use std::process::Command;
use std::time::Duration;

use crate::error::DispatchError;

/// Injects text into a running agent's terminal
pub trait Dispatcher: Send + Sync {
    fn send(&self, session: &str, window: &str, text: &str) -> Result<(), DispatchError>;
}

/// A tmux session as reported by `tmux list-sessions`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TmuxSession {
    pub name: String,
    /// Unix timestamp string from `#{session_created}`
    pub created: String,
}

/// Dispatcher backed by the local tmux server
#[derive(Debug, Default, Clone)]
pub struct TmuxDispatcher;

impl TmuxDispatcher {
    pub fn new() -> Self {
        Self
    }

    /// List all tmux sessions; empty when no server is running
    pub fn list_sessions(&self) -> Vec<TmuxSession> {
        let output = Command::new("tmux")
            .args(["list-sessions", "-F", "#{session_name},#{session_created}"])
            .output();

        match output {
            Ok(o) if o.status.success() => parse_session_list(&String::from_utf8_lossy(&o.stdout)),
            _ => Vec::new(),
        }
    }

    fn send_keys(&self, target: &str, args: &[&str]) -> Result<(), DispatchError> {
        let output = Command::new("tmux")
            .args(["send-keys", "-t", target])
            .args(args)
            .output()?;

        if !output.status.success() {
            return Err(DispatchError::Rejected {
                target: target.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

impl Dispatcher for TmuxDispatcher {
    fn send(&self, session: &str, window: &str, text: &str) -> Result<(), DispatchError> {
        let target = format!("{}:{}", session, window);

        self.send_keys(&target, &["-l", text])?;

        // Let the pane consume the text before Enter arrives
        std::thread::sleep(Duration::from_millis(100));

        self.send_keys(&target, &["Enter"])?;
        tracing::debug!("Sent {} bytes to tmux target {}", text.len(), target);
        Ok(())
    }
}

fn parse_session_list(stdout: &str) -> Vec<TmuxSession> {
    stdout
        .lines()
        .filter_map(|line| {
            let (name, created) = line.rsplit_once(',')?;
            Some(TmuxSession {
                name: name.to_string(),
                created: created.trim().to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_session_list() {
        let sessions = parse_session_list("goose-controller,1741400000\nwork,with,commas,1741400123\n\n");
        assert_eq!(
            sessions,
            vec![
                TmuxSession {
                    name: "goose-controller".to_string(),
                    created: "1741400000".to_string(),
                },
                TmuxSession {
                    name: "work,with,commas".to_string(),
                    created: "1741400123".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_parse_session_list_skips_garbage() {
        assert!(parse_session_list("no-separator\n").is_empty());
    }
}
