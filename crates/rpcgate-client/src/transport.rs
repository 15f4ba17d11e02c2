//! Transport layer for streaming clients

use std::fmt;

use async_trait::async_trait;
use http::HeaderMap;
use rpcgate_json_rpc::Message;
use url::Url;

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

pub mod h2;
pub mod websocket;

#[cfg(test)]
pub(crate) mod mock;

pub use h2::H2Transport;
pub use websocket::WebSocketTransport;

/// Transport type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportType {
    /// WebSocket text frames
    WebSocket,
    /// Newline-delimited JSON over one HTTP/2 request
    H2,
    /// gRPC bidirectional stream
    Grpc,
}

impl TransportType {
    /// Streaming transport selected by a URL scheme
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme {
            "ws" | "wss" => Some(TransportType::WebSocket),
            "h2" | "h2c" => Some(TransportType::H2),
            "grpc" | "grpcs" => Some(TransportType::Grpc),
            _ => None,
        }
    }
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportType::WebSocket => write!(f, "websocket"),
            TransportType::H2 => write!(f, "h2"),
            TransportType::Grpc => write!(f, "grpc"),
        }
    }
}

/// One bidirectional message connection.
///
/// Reads and writes happen concurrently from separate tasks, so both take
/// `&self`. End of stream and protocol close frames surface as
/// [`ClientError::TransportClosed`]; a failed dial as
/// [`ClientError::ConnectFailed`].
#[async_trait]
pub trait Transport: Send + Sync {
    fn transport_type(&self) -> TransportType;

    async fn connect(&self, url: &Url, headers: &HeaderMap) -> ClientResult<()>;

    async fn write_message(&self, msg: Message) -> ClientResult<()>;

    /// Next inbound message; `Ok(None)` for frames that carry none
    async fn read_message(&self) -> ClientResult<Option<Message>>;

    async fn close(&self);

    fn is_connected(&self) -> bool;
}

/// Type alias for a boxed transport
pub type BoxedTransport = Box<dyn Transport>;

/// Fresh, unconnected transport for the URL's scheme
pub fn transport_for(url: &Url, config: &ClientConfig) -> ClientResult<BoxedTransport> {
    match TransportType::from_scheme(url.scheme()) {
        Some(TransportType::WebSocket) => Ok(Box::new(WebSocketTransport::new(config.clone()))),
        Some(TransportType::H2) => Ok(Box::new(H2Transport::ndjson(config.clone()))),
        Some(TransportType::Grpc) => Ok(Box::new(H2Transport::grpc(config.clone()))),
        None => Err(ClientError::UnsupportedScheme(url.scheme().to_string())),
    }
}

/// Host and port of a URL, with the scheme's default port
pub(crate) fn host_port(url: &Url, default_port: u16) -> ClientResult<(String, u16)> {
    let host = url
        .host_str()
        .ok_or_else(|| ClientError::config(format!("no host in {}", url)))?;
    // bracketed IPv6 literals dial without the brackets
    let host = host.trim_start_matches('[').trim_end_matches(']').to_string();
    Ok((host, url.port().unwrap_or(default_port)))
}
