//! File-backed chat session store.
//!
//! One pretty-printed JSON file per session, `{chat_dir}/{session_id}.json`.
//! Session ids are restricted to ASCII alphanumerics, `-` and `_`, so an id
//! can never address a file outside `chat_dir`. Writes go to a temp file
//! that is renamed over the target; concurrent writers to the same session
//! are not coordinated (last writer wins).

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::error::SqlChatError;
use crate::models::{ChatSession, SessionSummary};

#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

/// True if `id` is non-empty and only `[A-Za-z0-9_-]`.
pub fn is_valid_session_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> Result<PathBuf> {
        if !is_valid_session_id(id) {
            return Err(SqlChatError::InvalidSessionId(id.to_string()).into());
        }
        Ok(self.dir.join(format!("{}.json", id)))
    }

    /// Load a session. Missing, unreadable or mismatched files are
    /// [`SqlChatError::SessionNotFound`].
    pub async fn load(&self, id: &str) -> Result<ChatSession> {
        let path = self.path_for(id)?;
        match read_session(&path).await {
            Ok(Some(session)) => Ok(session),
            Ok(None) => Err(SqlChatError::SessionNotFound(id.to_string()).into()),
            Err(e) => {
                tracing::warn!("Error loading session {}: {:#}", id, e);
                Err(SqlChatError::SessionNotFound(id.to_string()).into())
            }
        }
    }

    /// Write `{session.session_id}.json` atomically.
    pub async fn save(&self, session: &ChatSession) -> Result<()> {
        let path = self.path_for(&session.session_id)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;

        let json = serde_json::to_string_pretty(session)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to save session {}", session.session_id))?;
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let path = self.path_for(id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::info!(session = id, "session deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SqlChatError::SessionNotFound(id.to_string()).into())
            }
            Err(e) => Err(e).with_context(|| format!("Failed to delete session {}", id)),
        }
    }

    /// Sidebar listing, most recently updated first. Unreadable files are
    /// skipped.
    pub async fn list(&self) -> Result<Vec<SessionSummary>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to list {}", self.dir.display()))
            }
        };

        let mut sessions = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_session(&path).await {
                Ok(Some(s)) => sessions.push(SessionSummary {
                    session_id: s.session_id,
                    title: s.title,
                    last_updated: s.last_updated,
                }),
                Ok(None) => {}
                Err(e) => tracing::warn!("Error loading session {}: {:#}", path.display(), e),
            }
        }

        sessions.sort_by(|a, b| {
            b.last_updated
                .cmp(&a.last_updated)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        Ok(sessions)
    }
}

/// `Ok(None)` if the file does not exist. A file whose recorded id differs
/// from its stem is an error.
async fn read_session(path: &Path) -> Result<Option<ChatSession>> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
    };
    let session: ChatSession = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
    if session.session_id != stem {
        anyhow::bail!(
            "session id '{}' does not match file name '{}'",
            session.session_id,
            stem
        );
    }
    Ok(Some(session))
}
