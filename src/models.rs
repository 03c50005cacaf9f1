//! Core data models used throughout sqlchat.
//!
//! Chat transcripts ([`ChatSession`], [`ChatMessage`]), the `/query` wire
//! types, and the documents and chunks that flow into the retrieval index.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Who authored a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One turn of a conversation. Never modified after it is appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub sql_query: Option<String>,
    #[serde(default)]
    pub explanation: Option<String>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp: Utc::now(),
            sql_query: None,
            explanation: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
            sql_query: None,
            explanation: None,
        }
    }

    /// Assistant message carrying a generated query and its explanation.
    pub fn assistant_sql(sql: &str, explanation: &str) -> Self {
        Self {
            role: Role::Assistant,
            content: format!(
                "Here's the SQL query for your request:\n\n```sql\n{}\n```\n\n**Explanation:**\n{}",
                sql, explanation
            ),
            timestamp: Utc::now(),
            sql_query: Some(sql.to_string()),
            explanation: Some(explanation.to_string()),
        }
    }
}

/// A persisted conversation. Stored as `{session_id}.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    pub session_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
}

impl ChatSession {
    pub fn new(session_id: impl Into<String>, first_message: &str) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            title: session_title(first_message),
            created_at: now,
            last_updated: now,
            messages: Vec::new(),
            metadata: None,
        }
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }
}

/// Sidebar entry returned by `GET /sessions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub title: String,
    pub last_updated: DateTime<Utc>,
}

const TITLE_CHARS: usize = 50;

/// Short title from the first message: 50 characters, `...` if cut.
pub fn session_title(first_message: &str) -> String {
    let mut title: String = first_message.chars().take(TITLE_CHARS).collect();
    title = title.trim().to_string();
    if first_message.chars().count() > TITLE_CHARS {
        title.push_str("...");
    }
    title
}

/// Body of `POST /query`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Response of `POST /query`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub session_id: String,
    pub sql_query: String,
    pub explanation: String,
    pub message_id: String,
}

/// Retrieval priority of a corpus document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Normal,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Normal => "normal",
        }
    }
}

/// A retrieval document produced by the corpus builder.
#[derive(Debug, Clone)]
pub struct CorpusDocument {
    /// Stable id: SHA-256 of source and relative path.
    pub id: String,
    pub text: String,
    pub priority: Priority,
    /// `source`, `type`, `system`, `category`, `file_name`, ...
    pub metadata: BTreeMap<String, String>,
}

/// A chunk of a corpus document's text.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
}
