//! # rpcgate Gateway
//!
//! Serves an [`Actor`](rpcgate_json_rpc::Actor) over four transports on a
//! single listener, optionally TLS-terminated:
//!
//! - **HTTP/1 unary**: one JSON-RPC message per POST body
//! - **HTTP/2 stream**: newline-delimited messages on a long-lived request
//! - **gRPC stream**: length-prefixed frames on `application/grpc` requests
//! - **WebSocket**: one message per text frame
//!
//! Each streaming session runs a receive loop and a send loop sharing one
//! cancellation token; the close handler runs when the session ends.

pub mod auth;
pub mod body;
pub mod gateway;
pub mod grpc;
pub mod h2_stream;
pub mod server;
pub mod session;
pub mod tls;
pub mod unary;
pub mod websocket;

#[cfg(test)]
mod tests;

// Re-export main types
pub use auth::Authenticator;
pub use body::GatewayBody;
pub use gateway::{Gateway, GatewayRoute};
pub use server::{GatewayServer, GatewayServerBuilder, ServerConfig};
pub use tls::TlsConfig;

// Re-export foundational types
pub use rpcgate_json_rpc::framing::GRPC_STREAM_PATH;
pub use rpcgate_json_rpc::{Actor, ConnectionContext, Message, RpcRequest, TransportKind};

/// Result type for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Gateway specific errors
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("invalid TLS material: {0}")]
    TlsMaterial(String),

    #[error("decode error: {0}")]
    Decode(#[from] rpcgate_json_rpc::DecodeError),

    #[error("frame error: {0}")]
    Frame(#[from] rpcgate_json_rpc::FrameError),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
