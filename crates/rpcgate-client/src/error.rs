//! Error types for rpcgate client operations

use rpcgate_json_rpc::{DecodeError, EncodeError, FrameError, RpcError};
use thiserror::Error;

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Error type for client operations
#[derive(Error, Debug)]
pub enum ClientError {
    /// The dial itself failed; callers may retry
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    /// End of stream or a protocol close frame
    #[error("Transport closed")]
    TransportClosed,

    /// Any other transport-level failure
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Request cancelled")]
    Cancelled,

    #[error("Request timed out")]
    Timeout,

    /// The server answered with a status other than 200
    #[error("Abnormal response {status}: {body}")]
    AbnormalResponse { status: u16, body: String },

    /// The server answered the call with a JSON-RPC error
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(RpcError),

    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Invalid message: {0}")]
    InvalidMessage(&'static str),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClientError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Whether the dial failed before any session existed
    pub fn is_connect_failed(&self) -> bool {
        matches!(self, Self::ConnectFailed(_))
    }

    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ConnectFailed(_) | Self::TransportClosed | Self::Timeout => true,
            Self::Rpc(err) => matches!(
                err.code,
                rpcgate_json_rpc::error_codes::SERVER_ERROR_START
                    ..=rpcgate_json_rpc::error_codes::SERVER_ERROR_END
            ),
            _ => false,
        }
    }

    /// The JSON-RPC error code, if the server answered with one
    pub fn error_code(&self) -> Option<i64> {
        match self {
            Self::Rpc(err) => Some(err.code),
            _ => None,
        }
    }
}

impl From<RpcError> for ClientError {
    fn from(err: RpcError) -> Self {
        Self::Rpc(err)
    }
}

impl From<FrameError> for ClientError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Io(e) if is_closed_io(&e) => Self::TransportClosed,
            FrameError::Decode(e) => Self::Decode(e),
            FrameError::Encode(e) => Self::Encode(e),
            other => Self::Transport(other.to_string()),
        }
    }
}

/// I/O errors that mean the peer went away
pub(crate) fn is_closed_io(err: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    matches!(
        err.kind(),
        ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(ClientError::ConnectFailed("refused".into()).is_connect_failed());
        assert!(ClientError::ConnectFailed("refused".into()).is_retryable());
        assert!(ClientError::TransportClosed.is_retryable());
        assert!(!ClientError::TransportClosed.is_connect_failed());
        assert!(!ClientError::Cancelled.is_retryable());

        let server = ClientError::from(RpcError::new(-32001, "busy", None));
        assert!(server.is_retryable());
        assert_eq!(server.error_code(), Some(-32001));
        assert!(!ClientError::from(RpcError::method_not_found()).is_retryable());
    }

    #[test]
    fn test_frame_errors_map_to_transport_closed() {
        let eof = std::io::Error::from(std::io::ErrorKind::UnexpectedEof);
        assert!(matches!(
            ClientError::from(FrameError::Io(eof)),
            ClientError::TransportClosed
        ));
        assert!(matches!(
            ClientError::from(FrameError::Compressed),
            ClientError::Transport(_)
        ));
    }
}
