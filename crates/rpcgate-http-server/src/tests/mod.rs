//! Test modules for rpcgate-http-server crate
//!
//! Requests are driven straight through [`Gateway::handle`] with in-memory
//! bodies, so every session kind except the WebSocket upgrade is covered
//! without opening a socket.


use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use http_body::Frame;
use http_body_util::StreamBody;
use rpcgate_json_rpc::{Actor, HandlerOptions, Message, RpcError, RpcRequest};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::auth::Authenticator;
use crate::gateway::Gateway;
use crate::server::ServerConfig;

pub(crate) type FrameSender = mpsc::Sender<Result<Frame<Bytes>, Infallible>>;
pub(crate) type ChannelBody = StreamBody<ReceiverStream<Result<Frame<Bytes>, Infallible>>>;

/// Request body fed from a channel, open until the sender is dropped
pub(crate) fn channel_body() -> (FrameSender, ChannelBody) {
    let (tx, rx) = mpsc::channel(16);
    (tx, StreamBody::new(ReceiverStream::new(rx)))
}

pub(crate) fn test_actor() -> Actor {
    let mut actor = Actor::new();
    actor
        .register_typed(
            "echoAny",
            |_req: RpcRequest, first: Value, _second: Value| async move { Ok::<_, RpcError>(first) },
            HandlerOptions::new(),
        )
        .unwrap();
    actor
        .register_typed(
            "subscribe",
            |req: RpcRequest, topic: String| async move {
                req.push(Message::notify("event", vec![Value::from(topic)]))
                    .await?;
                Ok::<_, rpcgate_json_rpc::HandlerError>("subscribed")
            },
            HandlerOptions::new(),
        )
        .unwrap();
    actor
}

pub(crate) fn gateway_with(actor: Actor, config: ServerConfig, auth: Option<Arc<dyn Authenticator>>) -> (Gateway, CancellationToken) {
    let shutdown = CancellationToken::new();
    let gateway = Gateway::new(Arc::new(actor), Arc::new(config), auth, shutdown.clone());
    (gateway, shutdown)
}

pub(crate) fn test_gateway() -> Gateway {
    gateway_with(test_actor(), ServerConfig::default(), None).0
}
