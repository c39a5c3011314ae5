//! Finds the session log that received a freshly dispatched command.
//!
//! The agent decides which log a command lands in, so after dispatch we poll
//! the few most recently modified logs until one of them contains a user
//! message whose text is exactly the command. Only lines written after the
//! dispatch count: the caller records every log's size beforehand, and a
//! match must start at or past that size (or anywhere in a log created since).
//!
//! Matching is exact: if the agent reformats the command before logging it,
//! correlation times out. When two recent logs both contain the same command
//! text, the more recently modified one wins.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::entry::{LogEntry, Role};
use crate::sessions::{list_sessions, SessionHandle};

/// A located session plus the byte offset where the matching line starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correlation {
    pub handle: SessionHandle,
    pub anchor: u64,
}

/// Size of every log just before dispatch, keyed by session id
pub type Baseline = HashMap<String, u64>;

/// Record the current size of every log in `log_dir`
pub fn baseline(log_dir: &Path) -> Baseline {
    match list_sessions(log_dir) {
        Ok(sessions) => sessions.into_iter().map(|s| (s.id, s.size_bytes)).collect(),
        Err(e) => {
            warn!("Failed to list {}: {}", log_dir.display(), e);
            Baseline::new()
        }
    }
}

pub struct SessionCorrelator {
    log_dir: PathBuf,
    candidate_files: usize,
    interval: Duration,
}

impl SessionCorrelator {
    pub fn new(log_dir: PathBuf, candidate_files: usize, interval: Duration) -> Self {
        Self {
            log_dir,
            candidate_files,
            interval,
        }
    }

    /// Poll until a recent log contains `command` past its `baseline` size,
    /// or `max_wait` has elapsed.
    ///
    /// Never returns `None` before `max_wait`.
    pub async fn correlate(
        &self,
        command: &str,
        baseline: &Baseline,
        max_wait: Duration,
    ) -> Option<Correlation> {
        let deadline = Instant::now() + max_wait;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            if let Some(found) = self.scan(command, baseline) {
                debug!(
                    "Correlated command to session {} after {} scans",
                    found.handle.id, attempts
                );
                return Some(found);
            }

            let now = Instant::now();
            if now >= deadline {
                debug!("No session matched command after {} scans", attempts);
                return None;
            }
            tokio::time::sleep(self.interval.min(deadline - now)).await;
        }
    }

    /// One pass over the newest candidate logs
    fn scan(&self, command: &str, baseline: &Baseline) -> Option<Correlation> {
        let sessions = match list_sessions(&self.log_dir) {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!("Failed to list {}: {}", self.log_dir.display(), e);
                return None;
            }
        };

        sessions
            .into_iter()
            .take(self.candidate_files)
            .find_map(|handle| {
                let from = baseline.get(&handle.id).copied().unwrap_or(0);
                match find_command(&handle.path, command, from) {
                    Ok(Some(anchor)) => Some(Correlation { handle, anchor }),
                    Ok(None) => None,
                    Err(e) => {
                        // Logs can disappear between listing and reading
                        debug!("Skipping {}: {}", handle.path.display(), e);
                        None
                    }
                }
            })
    }
}

/// Byte offset of the last complete user line at or after `from` whose text
/// equals `command`
fn find_command(path: &Path, command: &str, from: u64) -> io::Result<Option<u64>> {
    let bytes = fs::read(path)?;
    let Some(fresh) = usize::try_from(from).ok().and_then(|from| bytes.get(from..)) else {
        // Shorter than before dispatch: not the append-only log we measured
        return Ok(None);
    };
    let mut found = None;
    let mut offset = from;

    for line in fresh.split_inclusive(|&b| b == b'\n') {
        let start = offset;
        offset += line.len() as u64;
        if line.last() != Some(&b'\n') {
            break;
        }
        let entry = LogEntry::decode(&String::from_utf8_lossy(line));
        if entry.role == Some(Role::User) && entry.text() == command {
            found = Some(start);
        }
    }

    Ok(found)
}
