//! Common client interface and the scheme-based factory

use async_trait::async_trait;
use http::HeaderMap;
use rpcgate_json_rpc::Message;
use serde::de::DeserializeOwned;
use url::Url;

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::h1::H1Client;
use crate::streaming::StreamingClient;

/// What every rpcgate client can do, whatever its transport
#[async_trait]
pub trait RpcClient: Send + Sync {
    /// Send a request and wait for its Result or Error
    async fn call(&self, request: Message) -> ClientResult<Message>;

    /// [`call`](Self::call) with extra headers: added to the POST on unary
    /// clients, sent on the connect a streaming client makes for this call
    async fn call_with_headers(&self, request: Message, headers: &HeaderMap) -> ClientResult<Message>;

    /// Send without waiting for an answer
    async fn send(&self, msg: Message) -> ClientResult<()>;

    fn set_extra_headers(&self, headers: HeaderMap);

    fn is_streaming(&self) -> bool;

    fn server_url(&self) -> &Url;
}

/// Typed convenience on top of [`RpcClient::call`]
#[async_trait]
pub trait RpcClientExt: RpcClient {
    async fn unwrap_call<T: DeserializeOwned>(&self, request: Message) -> ClientResult<T> {
        unwrap_result(self.call(request).await?)
    }
}

impl<C: RpcClient + ?Sized> RpcClientExt for C {}

/// Decode a Result's value, or turn an Error answer into [`ClientError::Rpc`]
pub fn unwrap_result<T: DeserializeOwned>(msg: Message) -> ClientResult<T> {
    match msg {
        Message::Result(result) => Ok(serde_json::from_value(result.result)?),
        Message::Error(error) => Err(ClientError::Rpc(error.error)),
        _ => Err(ClientError::InvalidMessage("expected a result or error")),
    }
}

#[async_trait]
impl RpcClient for H1Client {
    async fn call(&self, request: Message) -> ClientResult<Message> {
        H1Client::call(self, request).await
    }

    async fn call_with_headers(&self, request: Message, headers: &HeaderMap) -> ClientResult<Message> {
        H1Client::call_with_headers(self, request, headers).await
    }

    async fn send(&self, msg: Message) -> ClientResult<()> {
        H1Client::send(self, msg).await
    }

    fn set_extra_headers(&self, headers: HeaderMap) {
        H1Client::set_extra_headers(self, headers)
    }

    fn is_streaming(&self) -> bool {
        false
    }

    fn server_url(&self) -> &Url {
        H1Client::server_url(self)
    }
}

#[async_trait]
impl RpcClient for StreamingClient {
    async fn call(&self, request: Message) -> ClientResult<Message> {
        StreamingClient::call(self, request).await
    }

    async fn call_with_headers(&self, request: Message, headers: &HeaderMap) -> ClientResult<Message> {
        StreamingClient::call_with_headers(self, request, headers).await
    }

    async fn send(&self, msg: Message) -> ClientResult<()> {
        StreamingClient::send(self, msg).await
    }

    fn set_extra_headers(&self, headers: HeaderMap) {
        StreamingClient::set_extra_headers(self, headers)
    }

    fn is_streaming(&self) -> bool {
        true
    }

    fn server_url(&self) -> &Url {
        StreamingClient::server_url(self)
    }
}

/// Client for `url`, chosen by scheme: `http(s)` unary, `ws(s)`, `h2`/`h2c`
/// and `grpc(s)` streaming
pub fn new_client(url: &str, config: ClientConfig) -> ClientResult<Box<dyn RpcClient>> {
    let parsed = Url::parse(url)?;
    match parsed.scheme() {
        "http" | "https" => Ok(Box::new(H1Client::new(url, config)?)),
        "ws" | "wss" | "h2" | "h2c" | "grpc" | "grpcs" => {
            Ok(Box::new(StreamingClient::new(url, config)?))
        }
        other => Err(ClientError::UnsupportedScheme(other.to_string())),
    }
}
