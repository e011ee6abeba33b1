//! Error types for frame streaming.
//!
//! All errors implement `std::error::Error` and carry enough structured context
//! to decide whether a retry makes sense.
//!
//! ## Error Categories
//!
//! - **Connection Errors**: the transport could not be opened or dropped
//! - **Malformed Messages**: an inbound payload could not be decoded
//! - **Configuration Errors**: invalid settings or unreadable config files
//! - **Client Errors**: the driver task is gone or no runtime is available
//!
//! ## Recovery and Retry
//!
//! ```rust
//! use framestream::StreamError;
//!
//! let error = StreamError::connection_failed("connection refused");
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```
//!
//! Nothing in the streaming core treats these as fatal. The driver logs them,
//! records the latest one on the observable status, and keeps going.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for streaming operations.
pub type Result<T, E = StreamError> = std::result::Result<T, E>;

/// Main error type for streaming operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StreamError {
    #[error("Failed to connect to frame producer: {reason}")]
    Connection {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Malformed message: {details}")]
    MalformedMessage { details: String },

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    #[error("Config file error: {path}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Credential provider failed: {reason}")]
    Credentials { reason: String },

    #[error("No async runtime available: {reason}")]
    Runtime { reason: String },

    #[error("Stream client has shut down")]
    ClientClosed,
}

impl StreamError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            StreamError::Connection { .. } => true,
            StreamError::Timeout { .. } => true,
            StreamError::MalformedMessage { .. } => false,
            StreamError::Config { .. } => false,
            StreamError::File { .. } => false,
            StreamError::Credentials { .. } => false,
            StreamError::Runtime { .. } => false,
            StreamError::ClientClosed => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            StreamError::Connection { .. } => vec![
                "Check that the producer endpoint is reachable",
                "Verify the stream identifier exists",
                "Check that the access token is still valid",
            ],
            StreamError::Timeout { .. } => vec![
                "Increase connect_timeout_ms",
                "Check network latency to the producer",
            ],
            StreamError::MalformedMessage { .. } => vec![
                "Check producer and client protocol versions",
                "Inspect the raw message in debug logs",
            ],
            StreamError::Config { .. } => vec![
                "Check configuration values against their documented ranges",
                "Use a ws:// or wss:// base URL",
            ],
            StreamError::File { .. } => vec![
                "Check the config file exists and is readable",
                "Check file permissions",
            ],
            StreamError::Credentials { .. } => vec![
                "Obtain a fresh access token",
                "Check the credential provider configuration",
            ],
            StreamError::Runtime { .. } => vec![
                "Create the client from within a tokio runtime",
                "Annotate the entry point with #[tokio::main]",
            ],
            StreamError::ClientClosed => vec![
                "Create a new client",
                "Keep the client alive for as long as the stream is needed",
            ],
        }
    }

    /// Helper constructor for connection errors.
    pub fn connection_failed(reason: impl Into<String>) -> Self {
        StreamError::Connection { reason: reason.into(), source: None }
    }

    /// Helper constructor for connection errors with source.
    pub fn connection_failed_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        StreamError::Connection { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for malformed message errors.
    pub fn malformed(details: impl Into<String>) -> Self {
        StreamError::MalformedMessage { details: details.into() }
    }

    /// Helper constructor for configuration errors.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        StreamError::Config { reason: reason.into() }
    }

    /// Helper constructor for config file errors with path context.
    pub fn file_error(path: PathBuf, source: std::io::Error) -> Self {
        StreamError::File { path, source }
    }

    /// Helper constructor for credential errors.
    pub fn credentials(reason: impl Into<String>) -> Self {
        StreamError::Credentials { reason: reason.into() }
    }
}

impl From<std::io::Error> for StreamError {
    fn from(err: std::io::Error) -> Self {
        StreamError::File { path: PathBuf::from("<unknown>"), source: err }
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(err: serde_json::Error) -> Self {
        StreamError::MalformedMessage { details: err.to_string() }
    }
}

impl From<serde_yaml_ng::Error> for StreamError {
    fn from(err: serde_yaml_ng::Error) -> Self {
        StreamError::Config { reason: err.to_string() }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for StreamError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        StreamError::connection_failed_with_source("websocket transport error", Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
          #[test]
          fn error_messages_format_correctly_with_arbitrary_context(
            reason in ".*",
            details in ".*",
            duration_ms in 1u64..60000u64
          ) {
            let connection_error = StreamError::connection_failed(reason.clone());
            let malformed_error = StreamError::malformed(details.clone());
            let config_error = StreamError::invalid_config(reason.clone());
            let timeout_error = StreamError::Timeout { duration: Duration::from_millis(duration_ms) };

            prop_assert!(connection_error.to_string().contains(&reason));
            prop_assert!(malformed_error.to_string().contains(&details));
            prop_assert!(config_error.to_string().contains(&reason));
            prop_assert!(!timeout_error.to_string().is_empty());
          }

          #[test]
          fn error_source_chaining_preserves_base_message(
            base_message in ".*",
            reasons in prop::collection::vec(".*", 1..5)
          ) {
            let mut current: Box<dyn std::error::Error + Send + Sync> =
              Box::new(std::io::Error::other(base_message.clone()));

            for (i, reason) in reasons.iter().enumerate() {
              current = Box::new(StreamError::connection_failed_with_source(
                format!("Level {}: {}", i, reason),
                current,
              ));
            }

            let mut depth = 0;
            let mut found_base = false;
            let mut source = std::error::Error::source(current.as_ref());
            while let Some(err) = source {
              depth += 1;
              if err.to_string().contains(&base_message) {
                found_base = true;
              }
              source = err.source();
              if depth > 10 {
                break;
              }
            }

            prop_assert_eq!(depth, reasons.len());
            prop_assert!(found_base, "Base message '{}' not found in chain", base_message);
          }
        }
    }

    #[test]
    fn error_constructors_validation() {
        let file_error = StreamError::file_error(
            PathBuf::from("/etc/framestream.yaml"),
            std::io::Error::new(std::io::ErrorKind::NotFound, "test"),
        );
        assert!(matches!(file_error, StreamError::File { .. }));
        assert!(matches!(StreamError::connection_failed("x"), StreamError::Connection { .. }));
        assert!(matches!(StreamError::malformed("x"), StreamError::MalformedMessage { .. }));
        assert!(matches!(StreamError::credentials("x"), StreamError::Credentials { .. }));
    }

    #[test]
    fn error_traits_validation() {
        fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<StreamError>();

        let error = StreamError::connection_failed("test");
        let _: &dyn std::error::Error = &error;
    }

    #[test]
    fn only_transport_failures_are_retryable() {
        assert!(StreamError::connection_failed("refused").is_retryable());
        assert!(StreamError::Timeout { duration: Duration::from_secs(1) }.is_retryable());
        assert!(!StreamError::malformed("bad json").is_retryable());
        assert!(!StreamError::invalid_config("bad").is_retryable());
        assert!(!StreamError::ClientClosed.is_retryable());
    }

    #[test]
    fn recovery_suggestions_are_descriptive() {
        let errors = [
            StreamError::connection_failed("test"),
            StreamError::malformed("test"),
            StreamError::ClientClosed,
        ];
        for error in &errors {
            let suggestions = error.recovery_suggestions();
            assert!(!suggestions.is_empty());
            for suggestion in suggestions {
                assert!(suggestion.len() > 5);
            }
        }
    }

    #[test]
    fn from_conversions_work() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: StreamError = json_err.into();
        assert!(matches!(err, StreamError::MalformedMessage { .. }));

        let yaml_err = serde_yaml_ng::from_str::<u32>("[1, 2").unwrap_err();
        let err: StreamError = yaml_err.into();
        assert!(matches!(err, StreamError::Config { .. }));

        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        match StreamError::from(io_err) {
            StreamError::File { source, .. } => assert_eq!(source.to_string(), "missing"),
            other => panic!("Expected File error variant, got {other:?}"),
        }
    }
}
