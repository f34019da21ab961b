//! Error types for pledgewall.

use thiserror::Error;

use crate::models::LoadState;

/// Result type alias using pledgewall's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for pledgewall operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Bulk fetch of existing entities failed
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// Push subscription could not be opened or detached
    #[error("Subscription error: {0}")]
    Subscribe(String),

    /// Entity submission failed
    #[error("Submit error: {0}")]
    Submit(String),

    /// Illegal load state transition
    #[error("Invalid load transition: {from} -> {to}")]
    InvalidTransition { from: LoadState, to: LoadState },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A channel the feed depends on was closed
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl Error {
    /// Whether the user can meaningfully retry the operation that failed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Fetch(_) | Error::Subscribe(_) | Error::Submit(_) | Error::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_fetch() {
        let err = Error::Fetch("connection reset".to_string());
        assert_eq!(err.to_string(), "Fetch error: connection reset");
    }

    #[test]
    fn test_error_display_invalid_transition() {
        let err = Error::InvalidTransition {
            from: LoadState::Loading,
            to: LoadState::Loading,
        };
        assert_eq!(err.to_string(), "Invalid load transition: LOADING -> LOADING");
    }

    #[test]
    fn test_error_display_channel_closed() {
        let err = Error::ChannelClosed("local broadcast".to_string());
        assert_eq!(err.to_string(), "Channel closed: local broadcast");
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        match err {
            Error::Serialization(msg) => assert!(!msg.is_empty()),
            _ => panic!("Expected Serialization error"),
        }
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "seed.json");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("seed.json"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(Error::Fetch("x".into()).is_retryable());
        assert!(Error::Submit("x".into()).is_retryable());
        assert!(!Error::Config("x".into()).is_retryable());
        assert!(!Error::InvalidTransition {
            from: LoadState::Loaded,
            to: LoadState::Loaded
        }
        .is_retryable());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
