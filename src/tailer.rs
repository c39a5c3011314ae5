//! Byte-offset tailing of an append-only session log.
//!
//! The tailer never holds the file open between polls: each read opens the
//! log, seeks to the cursor, reads the delta and drops the handle. Only lines
//! terminated by `\n` are decoded; a trailing partial line stays behind the
//! cursor and is re-read in full once its terminator has been written.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::entry::LogEntry;
use crate::sessions::SessionHandle;

/// Read position within one session log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub session_id: String,
    pub offset: u64,
}

impl Cursor {
    /// Opaque token handed to HTTP clients (base64-encoded byte offset)
    pub fn token(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.offset.to_string())
    }

    pub fn from_token(session_id: &str, token: &str) -> Option<Self> {
        let offset = URL_SAFE_NO_PAD
            .decode(token)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .and_then(|s| s.parse().ok())?;
        Some(Self {
            session_id: session_id.to_string(),
            offset,
        })
    }
}

/// Incremental reader for one session's log
#[derive(Debug, Clone)]
pub struct LogTailer {
    session_id: String,
    path: PathBuf,
}

impl LogTailer {
    pub fn open_at(handle: &SessionHandle) -> Self {
        Self {
            session_id: handle.id.clone(),
            path: handle.path.clone(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Every complete line currently in the log
    pub fn snapshot(&self) -> io::Result<(Vec<LogEntry>, Cursor)> {
        self.read(0, None)
    }

    /// Complete lines that end at or before `limit`
    pub fn snapshot_until(&self, limit: u64) -> io::Result<(Vec<LogEntry>, Cursor)> {
        self.read(0, Some(limit))
    }

    /// Complete lines appended since `cursor`.
    ///
    /// Returns an empty batch and the same cursor when the log has not grown.
    pub fn poll_since(&self, cursor: &Cursor) -> io::Result<(Vec<LogEntry>, Cursor)> {
        self.read(cursor.offset, None)
    }

    fn read(&self, offset: u64, limit: Option<u64>) -> io::Result<(Vec<LogEntry>, Cursor)> {
        let (lines, new_offset) = read_from_offset(&self.path, offset, limit)?;
        let entries = lines.iter().map(|line| LogEntry::decode(line)).collect();
        Ok((
            entries,
            Cursor {
                session_id: self.session_id.clone(),
                offset: new_offset,
            },
        ))
    }
}

/// Read complete lines from `offset` up to `limit` (or end of file).
///
/// Returns the non-blank lines and the offset just past the last consumed
/// newline. Blank lines are consumed without producing a line.
fn read_from_offset(path: &Path, offset: u64, limit: Option<u64>) -> io::Result<(Vec<String>, u64)> {
    let mut file = File::open(path)?;
    let file_size = file.metadata()?.len();
    let end = limit.map_or(file_size, |l| l.min(file_size));

    // Nothing new
    if offset >= end {
        return Ok((Vec::new(), offset));
    }

    file.seek(SeekFrom::Start(offset))?;
    let mut buffer = Vec::with_capacity((end - offset) as usize);
    file.take(end - offset).read_to_end(&mut buffer)?;

    // Anything after the last newline is an incomplete line
    let complete_len = match buffer.iter().rposition(|&b| b == b'\n') {
        Some(pos) => pos + 1,
        None => return Ok((Vec::new(), offset)),
    };

    let lines = buffer[..complete_len]
        .split(|&b| b == b'\n')
        .map(|line| String::from_utf8_lossy(line).trim_end_matches('\r').to_string())
        .filter(|line| !line.trim().is_empty())
        .collect();

    Ok((lines, offset + complete_len as u64))
}
