//! Persistent conversation sessions.
//!
//! A [`Session`] is an append-only list of [`Content`] entries with an id and
//! a creation timestamp. The [`SessionStore`] keeps one `<id>.json` per
//! session in a directory; saves are full-file rewrites, files are created
//! owner-read/write (0600) inside an owner-only directory (0700).

use crate::agentflow::content::Content;
use crate::agentflow::error::AgentError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One persisted conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    /// Stable session id (also the file stem on disk).
    pub id: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Ordered conversation entries.
    pub messages: Vec<Content>,
}

impl Session {
    /// A fresh, empty session with a random id.
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string()[..8].to_string(),
            created_at: Utc::now(),
            messages: Vec::new(),
        }
    }

    /// A fresh session with a caller-chosen id.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created_at: Utc::now(),
            messages: Vec::new(),
        }
    }

    /// Append one entry.
    pub fn append(&mut self, content: Content) {
        self.messages.push(content);
    }

    /// Append an entire history.
    pub fn extend(&mut self, history: Vec<Content>) {
        self.messages.extend(history);
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Directory-backed store of sessions.
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    /// Open a store rooted at `dir`, creating the directory (0700) when
    /// missing.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, AgentError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| AgentError::other(format!("create session dir: {}", e)))?;
        restrict_dir_permissions(&dir);
        Ok(Self { dir })
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    /// Save a session as a full-file rewrite.
    pub fn save(&self, session: &Session) -> Result<(), AgentError> {
        let json = serde_json::to_string_pretty(session)
            .map_err(|e| AgentError::other(format!("serialize session: {}", e)))?;
        let path = self.path_for(&session.id);
        std::fs::write(&path, json)
            .map_err(|e| AgentError::other(format!("write session: {}", e)))?;
        restrict_file_permissions(&path);
        Ok(())
    }

    /// Load a session by id.
    pub fn load(&self, id: &str) -> Result<Session, AgentError> {
        let raw = std::fs::read_to_string(self.path_for(id))
            .map_err(|e| AgentError::other(format!("read session '{}': {}", id, e)))?;
        serde_json::from_str(&raw)
            .map_err(|e| AgentError::other(format!("parse session '{}': {}", id, e)))
    }

    /// Ids of every stored session, sorted.
    pub fn list(&self) -> Result<Vec<String>, AgentError> {
        let mut ids = Vec::new();
        let entries = std::fs::read_dir(&self.dir)
            .map_err(|e| AgentError::other(format!("list sessions: {}", e)))?;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(stem) = name.strip_suffix(".json") {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Delete a session by id; missing sessions are not an error.
    pub fn delete(&self, id: &str) -> Result<(), AgentError> {
        match std::fs::remove_file(self.path_for(id)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(AgentError::other(format!("delete session '{}': {}", id, err))),
        }
    }
}

#[cfg(unix)]
fn restrict_file_permissions(path: &PathBuf) {
    use std::os::unix::fs::PermissionsExt;
    let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
}

#[cfg(not(unix))]
fn restrict_file_permissions(_path: &PathBuf) {}

#[cfg(unix)]
fn restrict_dir_permissions(path: &PathBuf) {
    use std::os::unix::fs::PermissionsExt;
    let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700));
}

#[cfg(not(unix))]
fn restrict_dir_permissions(_path: &PathBuf) {}
