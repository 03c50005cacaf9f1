//! Feedback ledger: lessons from user-reported errors.
//!
//! Stored as `{"lessons": [...]}`, newest first. The file is read at the
//! start of every query and rewritten whole on every append; concurrent
//! writers are not serialized.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Prefix for lessons recorded from feedback-classified messages.
pub const LESSON_PREFIX: &str = "User-reported error/context: ";

/// Characters of the user's message kept in a lesson.
const LESSON_MESSAGE_CHARS: usize = 500;

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerFile {
    #[serde(default)]
    lessons: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct FeedbackLedger {
    path: PathBuf,
    cap: usize,
    prompt_limit: usize,
}

impl FeedbackLedger {
    pub fn new(path: impl Into<PathBuf>, cap: usize, prompt_limit: usize) -> Self {
        Self {
            path: path.into(),
            cap: cap.max(1),
            prompt_limit,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All lessons, newest first. A missing or unreadable file is empty.
    pub async fn lessons(&self) -> Vec<String> {
        match read_ledger(&self.path).await {
            Ok(file) => file.lessons,
            Err(e) => {
                tracing::warn!("Could not read feedback ledger: {:#}", e);
                Vec::new()
            }
        }
    }

    /// Newest lessons as `- lesson` lines, or `""` when there are none.
    pub async fn prompt_block(&self) -> String {
        self.lessons()
            .await
            .iter()
            .take(self.prompt_limit)
            .map(|l| format!("- {}", l))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Insert `lesson` at the front, keeping at most `cap` entries.
    /// Returns `false` when the lesson is empty or already recorded.
    pub async fn append(&self, lesson: &str) -> Result<bool> {
        if lesson.trim().is_empty() {
            return Ok(false);
        }
        let mut file = read_ledger(&self.path).await.unwrap_or_else(|e| {
            tracing::warn!("Feedback ledger unreadable, starting fresh: {:#}", e);
            LedgerFile::default()
        });
        if file.lessons.iter().any(|l| l == lesson) {
            return Ok(false);
        }
        file.lessons.insert(0, lesson.to_string());
        file.lessons.truncate(self.cap);
        write_ledger(&self.path, &file).await?;
        tracing::info!(lessons = file.lessons.len(), "feedback lesson recorded");
        Ok(true)
    }

    /// Record a feedback-classified message as a lesson.
    pub async fn record_message(&self, message: &str) -> Result<bool> {
        let excerpt: String = message.chars().take(LESSON_MESSAGE_CHARS).collect();
        self.append(&format!("{}{}", LESSON_PREFIX, excerpt)).await
    }
}

async fn read_ledger(path: &Path) -> Result<LedgerFile> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(LedgerFile::default()),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}

async fn write_ledger(path: &Path, file: &LedgerFile) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let json = serde_json::to_string_pretty(file)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}
