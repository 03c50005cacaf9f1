//! Typed failure kinds for sqlchat.
//!
//! Most functions return [`anyhow::Result`]; the variants below are the
//! failures a caller needs to tell apart (for example to pick an HTTP status
//! or to decide whether a smaller retrieval is worth trying). Detect them
//! with [`anyhow::Error::downcast_ref`] or the helpers at the bottom.

use thiserror::Error;

/// Failure kinds that callers branch on.
#[derive(Error, Debug)]
pub enum SqlChatError {
    /// Application configuration is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The hosted model API returned a non-retryable error.
    #[error("Provider error {status}: {message}")]
    Provider {
        /// HTTP status code returned by the provider.
        status: u16,
        /// Response body or description.
        message: String,
    },

    /// The prompt plus retrieved context exceeded the model's context size.
    #[error("Context size exceeded: {0}")]
    ContextOverflow(String),

    /// A credential required by a capability is not set.
    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    /// No session file exists for the given id.
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// The session id is not a safe file stem.
    #[error("Invalid session id: {0}")]
    InvalidSessionId(String),

    /// The contact relay could not send the message.
    #[error("{0}")]
    Mail(String),
}

/// Returns true if `err` (or anything in its chain) reports a context overflow.
///
/// Besides the typed variant this also recognises the plain-text messages
/// hosted backends use ("context size", "context length", "maximum context").
pub fn is_context_overflow(err: &anyhow::Error) -> bool {
    if err
        .chain()
        .any(|e| matches!(e.downcast_ref::<SqlChatError>(), Some(SqlChatError::ContextOverflow(_))))
    {
        return true;
    }
    let msg = format!("{:#}", err).to_lowercase();
    msg.contains("context size") || msg.contains("context length") || msg.contains("maximum context")
}

/// Returns true if `err` means the requested session does not exist.
pub fn is_session_not_found(err: &anyhow::Error) -> bool {
    err.chain().any(|e| {
        matches!(
            e.downcast_ref::<SqlChatError>(),
            Some(SqlChatError::SessionNotFound(_)) | Some(SqlChatError::InvalidSessionId(_))
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_context_overflow_detected() {
        let err: anyhow::Error = SqlChatError::ContextOverflow("8192 tokens".into()).into();
        assert!(is_context_overflow(&err));
    }

    #[test]
    fn test_plain_text_context_size_detected() {
        let err = anyhow::anyhow!("Requested tokens exceed context size of model");
        assert!(is_context_overflow(&err));
    }

    #[test]
    fn test_other_errors_not_overflow() {
        let err = anyhow::anyhow!("connection refused");
        assert!(!is_context_overflow(&err));
        assert!(!is_session_not_found(&err));
    }

    #[test]
    fn test_session_not_found_through_context() {
        let err = anyhow::Error::from(SqlChatError::SessionNotFound("abc".into()))
            .context("loading session");
        assert!(is_session_not_found(&err));
    }
}
