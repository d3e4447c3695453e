//! Error types for the chat core.

use thiserror::Error;

/// Main error type for chat operations.
///
/// Every variant is recoverable: the session reports it to the originating
/// connection and keeps the socket open.
#[derive(Error, Debug)]
pub enum ChatError {
    /// Room or message reference does not resolve
    #[error("{0}")]
    NotFound(String),

    /// Caller's role does not allow the action
    #[error("{0}")]
    Unauthorized(String),

    /// Missing or malformed request fields
    #[error("{0}")]
    InvalidInput(String),

    /// SQLite failure
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Frame could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Blocking storage task panicked or was cancelled
    #[error("background task failed: {0}")]
    Task(String),
}

impl ChatError {
    /// Text sent back in the `error` event. Internal failures stay generic.
    pub fn client_reason(&self) -> String {
        match self {
            ChatError::NotFound(reason)
            | ChatError::Unauthorized(reason)
            | ChatError::InvalidInput(reason) => reason.clone(),
            ChatError::Serialization(_) => "Malformed request".to_string(),
            ChatError::Storage(_) | ChatError::Io(_) | ChatError::Task(_) => {
                "Failed to process request".to_string()
            }
        }
    }

    /// Whether the failure is on our side and should reach the operator log.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            ChatError::Storage(_) | ChatError::Io(_) | ChatError::Task(_)
        )
    }
}

/// Result type alias using [`ChatError`].
pub type Result<T> = std::result::Result<T, ChatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_detail_is_not_leaked() {
        let err = ChatError::from(rusqlite::Error::InvalidQuery);
        assert!(err.is_internal());
        assert_eq!(err.client_reason(), "Failed to process request");
    }

    #[test]
    fn domain_errors_pass_their_reason_through() {
        let err = ChatError::Unauthorized("Only buyers can initiate chat".into());
        assert!(!err.is_internal());
        assert_eq!(err.client_reason(), "Only buyers can initiate chat");
    }
}
