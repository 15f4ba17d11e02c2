use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use http::HeaderMap;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::message::Message;
use crate::types::Params;
use crate::util::new_uuid;

/// Transport a connection was accepted on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Http,
    Http2,
    WebSocket,
    Grpc,
}

impl TransportKind {
    pub fn is_streaming(&self) -> bool {
        !matches!(self, TransportKind::Http)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportKind::Http => "http",
            TransportKind::Http2 => "h2",
            TransportKind::WebSocket => "websocket",
            TransportKind::Grpc => "grpc",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Error)]
#[error("session closed")]
pub struct SessionClosed;

/// Pushes messages to the peer of a streaming session
#[derive(Debug, Clone)]
pub struct SessionSender {
    tx: mpsc::Sender<Message>,
}

impl SessionSender {
    pub fn new(tx: mpsc::Sender<Message>) -> Self {
        Self { tx }
    }

    /// Queue a message on the session's outbound queue
    pub async fn send(&self, msg: Message) -> Result<(), SessionClosed> {
        self.tx.send(msg).await.map_err(|_| SessionClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Per-connection state handed to every handler invocation
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub stream_id: String,
    pub transport: TransportKind,
    pub remote_addr: Option<SocketAddr>,
    pub headers: HeaderMap,
    /// Identity established by the auth collaborator
    pub identity: Option<String>,
    session: Option<SessionSender>,
}

impl ConnectionContext {
    pub fn new(transport: TransportKind) -> Self {
        Self {
            stream_id: new_uuid(),
            transport,
            remote_addr: None,
            headers: HeaderMap::new(),
            identity: None,
            session: None,
        }
    }

    pub fn with_remote_addr(mut self, addr: Option<SocketAddr>) -> Self {
        self.remote_addr = addr;
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_identity(mut self, identity: Option<String>) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_session(mut self, session: SessionSender) -> Self {
        self.session = Some(session);
        self
    }

    /// Outbound handle of the streaming session; `None` on unary HTTP
    pub fn session(&self) -> Option<&SessionSender> {
        self.session.as_ref()
    }
}

impl Default for ConnectionContext {
    fn default() -> Self {
        Self::new(TransportKind::Http)
    }
}

/// A message being dispatched together with its connection context
#[derive(Debug, Clone)]
pub struct RpcRequest {
    pub msg: Message,
    pub conn: Arc<ConnectionContext>,
}

impl RpcRequest {
    pub fn new(msg: Message, conn: Arc<ConnectionContext>) -> Self {
        Self { msg, conn }
    }

    /// Request not bound to any connection, mostly for tests and in-process calls
    pub fn detached(msg: Message) -> Self {
        Self::new(msg, Arc::new(ConnectionContext::default()))
    }

    pub fn method(&self) -> Option<&str> {
        self.msg.method()
    }

    pub fn params(&self) -> Vec<Value> {
        self.msg.params().map(Params::to_list).unwrap_or_default()
    }

    pub fn trace_id(&self) -> &str {
        self.msg.trace_id()
    }

    pub fn identity(&self) -> Option<&str> {
        self.conn.identity.as_deref()
    }

    /// Push a message to the peer; fails on unary connections
    pub async fn push(&self, msg: Message) -> Result<(), SessionClosed> {
        match self.conn.session() {
            Some(session) => session.send(msg).await,
            None => Err(SessionClosed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_push_through_session() {
        let (tx, mut rx) = mpsc::channel(4);
        let conn = ConnectionContext::new(TransportKind::WebSocket).with_session(SessionSender::new(tx));
        let req = RpcRequest::new(Message::notify("sub", Params::default()), Arc::new(conn));

        req.push(Message::notify("event", vec![json!(1)])).await.unwrap();
        let pushed = rx.recv().await.unwrap();
        assert_eq!(pushed.must_method(), "event");
    }

    #[tokio::test]
    async fn test_push_without_session_fails() {
        let req = RpcRequest::detached(Message::notify("sub", Params::default()));
        assert!(req.push(Message::notify("event", Params::default())).await.is_err());
    }

    #[test]
    fn test_stream_ids_are_unique() {
        let a = ConnectionContext::new(TransportKind::Grpc);
        let b = ConnectionContext::new(TransportKind::Grpc);
        assert_ne!(a.stream_id, b.stream_id);
        assert!(a.transport.is_streaming());
        assert!(!TransportKind::Http.is_streaming());
    }
}
