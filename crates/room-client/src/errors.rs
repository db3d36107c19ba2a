//! Room client error types.
//!
//! Transport-level failures are recoverable: the connection manager retries
//! them with backoff. [`SessionError::Closed`] is terminal; every API call
//! on a closed session returns it.

use signal_proto::CodecError;
use thiserror::Error;

/// Room client error type.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Network-level failure on the signaling transport.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The session is between connection attempts; the request was not
    /// sent and was not queued.
    #[error("Not connected")]
    NotConnected,

    /// A frame could not be encoded or decoded.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Invalid session configuration.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The session was closed deliberately and will not reconnect.
    #[error("Session closed")]
    Closed,

    /// The server never sent a join response on a fresh connection.
    #[error("Timed out waiting for join response")]
    JoinTimeout,
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for SessionError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        SessionError::Transport(err.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_errors_convert() {
        let codec_err = signal_proto::CodecError::UnknownMessageKind("simulate".to_string());
        let err: SessionError = codec_err.into();
        assert!(matches!(err, SessionError::Codec(_)));
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            format!("{}", SessionError::Transport("connection reset".to_string())),
            "Transport error: connection reset"
        );
        assert_eq!(format!("{}", SessionError::NotConnected), "Not connected");
        assert_eq!(format!("{}", SessionError::Closed), "Session closed");
    }
}
