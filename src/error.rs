//! Error kinds shared by the tree, store, provider and session layers

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Malformed message or path, or a parent reference to a node that does not exist
    #[error("validation failed: {0}")]
    Validation(String),

    /// A write arrived before the message it depends on was persisted
    #[error("conversation {conversation_id}: parent message {missing_parent} is not persisted")]
    Dependency {
        conversation_id: String,
        missing_parent: String,
    },

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("completion provider error: {0}")]
    Provider(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn conversation_not_found(id: impl Into<String>) -> Self {
        Error::NotFound {
            kind: "conversation",
            id: id.into(),
        }
    }

    pub fn message_not_found(id: impl Into<String>) -> Self {
        Error::NotFound {
            kind: "message",
            id: id.into(),
        }
    }

    /// Provider and transport failures are recovered by the session's failure
    /// transition; everything else goes back to the caller untouched.
    pub fn is_recoverable_turn_failure(&self) -> bool {
        matches!(self, Error::Provider(_) | Error::Transport(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependency_error_names_missing_parent() {
        let err = Error::Dependency {
            conversation_id: "conv_1".to_string(),
            missing_parent: "msg_a".to_string(),
        };
        assert!(err.to_string().contains("msg_a"));
        assert!(!err.is_recoverable_turn_failure());
    }

    #[test]
    fn test_provider_and_transport_are_recoverable() {
        assert!(Error::Provider("empty".into()).is_recoverable_turn_failure());
        assert!(Error::Transport("reset".into()).is_recoverable_turn_failure());
        assert!(!Error::Validation("bad".into()).is_recoverable_turn_failure());
    }
}
