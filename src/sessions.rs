//! Session log discovery.
//!
//! Every Goose session is one append-only `{session_id}.jsonl` file in the
//! configured log directory. Handles are cheap snapshots of filesystem
//! metadata; they are re-read by listing the directory again.

use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

const LOG_EXTENSION: &str = ".jsonl";

/// One session log file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    pub id: String,
    pub path: PathBuf,
    pub modified: SystemTime,
    pub size_bytes: u64,
}

impl SessionHandle {
    fn from_path(path: PathBuf) -> Option<Self> {
        let id = path.file_name()?.to_str()?.strip_suffix(LOG_EXTENSION)?.to_string();
        if id.is_empty() {
            return None;
        }
        let meta = fs::metadata(&path).ok()?;
        if !meta.is_file() {
            return None;
        }
        Some(Self {
            id,
            path,
            modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            size_bytes: meta.len(),
        })
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.id.clone(),
            file_path: self.path.display().to_string(),
            size_bytes: self.size_bytes,
            last_modified: self
                .modified
                .duration_since(SystemTime::UNIX_EPOCH)
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0),
        }
    }
}

/// Listing entry returned by `GET /api/sessions`
#[derive(Debug, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub file_path: String,
    pub size_bytes: u64,
    /// Unix seconds
    pub last_modified: f64,
}

/// Session ids map straight onto file names, so only a conservative alphabet is accepted
pub fn is_safe_session_id(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// All session logs in `dir`, most recently modified first.
///
/// A missing directory is an empty listing: Goose creates it on first run.
pub fn list_sessions(dir: &Path) -> io::Result<Vec<SessionHandle>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut sessions: Vec<SessionHandle> = entries
        .flatten()
        .filter_map(|entry| SessionHandle::from_path(entry.path()))
        .collect();

    sessions.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.id.cmp(&b.id)));
    Ok(sessions)
}

/// Look up a session log by id
pub fn find_session(dir: &Path, session_id: &str) -> Option<SessionHandle> {
    if !is_safe_session_id(session_id) {
        return None;
    }
    SessionHandle::from_path(dir.join(format!("{}{}", session_id, LOG_EXTENSION)))
}

/// The most recently modified session log, if any
pub fn latest_session(dir: &Path) -> io::Result<Option<SessionHandle>> {
    Ok(list_sessions(dir)?.into_iter().next())
}
