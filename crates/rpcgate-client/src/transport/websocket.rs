//! WebSocket transport: one JSON message per text frame

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use http::HeaderMap;
use rpcgate_json_rpc::{Message, encode, parse};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult, is_closed_io};
use crate::tls::{self, ALPN_HTTP11};
use crate::transport::{Transport, TransportType};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport for `ws://` and `wss://` URLs
pub struct WebSocketTransport {
    config: ClientConfig,
    sink: Mutex<Option<SplitSink<WsStream, WsMessage>>>,
    stream: Mutex<Option<SplitStream<WsStream>>>,
    connected: AtomicBool,
}

impl WebSocketTransport {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            sink: Mutex::new(None),
            stream: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::WebSocket
    }

    async fn connect(&self, url: &Url, headers: &HeaderMap) -> ClientResult<()> {
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| ClientError::config(format!("websocket request: {}", e)))?;
        request.headers_mut().extend(headers.clone());

        let connector = match url.scheme() {
            "wss" => Some(Connector::Rustls(tls::client_config(
                &self.config,
                &[ALPN_HTTP11],
            )?)),
            _ => None,
        };

        let (ws, response) =
            tokio_tungstenite::connect_async_tls_with_config(request, None, false, connector)
                .await
                .map_err(connect_error)?;
        debug!(status = %response.status(), "websocket handshake complete");

        let (sink, stream) = ws.split();
        *self.sink.lock().await = Some(sink);
        *self.stream.lock().await = Some(stream);
        self.connected.store(true, Ordering::SeqCst);
        info!(url = %url, "websocket connected");
        Ok(())
    }

    async fn write_message(&self, msg: Message) -> ClientResult<()> {
        let text = String::from_utf8(encode(&msg)?)
            .map_err(|e| ClientError::transport(format!("non utf-8 message: {}", e)))?;
        let mut sink = self.sink.lock().await;
        let sink = sink.as_mut().ok_or(ClientError::NotConnected)?;
        sink.send(WsMessage::text(text)).await.map_err(stream_error)
    }

    async fn read_message(&self) -> ClientResult<Option<Message>> {
        let mut stream = self.stream.lock().await;
        let stream = stream.as_mut().ok_or(ClientError::NotConnected)?;
        match stream.next().await {
            None => Err(ClientError::TransportClosed),
            Some(Err(err)) => Err(stream_error(err)),
            Some(Ok(WsMessage::Text(text))) => Ok(Some(parse(text.as_bytes()).inspect_err(|e| {
                warn!(error = %e, "bad jsonrpc message");
            })?)),
            Some(Ok(WsMessage::Binary(data))) => Ok(Some(parse(&data)?)),
            Some(Ok(WsMessage::Close(frame))) => {
                info!(frame = ?frame, "websocket closed by peer");
                Err(ClientError::TransportClosed)
            }
            Some(Ok(_)) => Ok(None),
        }
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(mut sink) = self.sink.lock().await.take() {
            if let Err(err) = sink.close().await {
                debug!(error = %err, "websocket close");
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

fn connect_error(err: WsError) -> ClientError {
    match err {
        WsError::Io(e) => tls::handshake_error("websocket connect", e),
        WsError::Tls(e) => ClientError::transport(format!("websocket tls: {}", e)),
        WsError::Http(response) => ClientError::AbnormalResponse {
            status: response.status().as_u16(),
            body: response
                .body()
                .as_deref()
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .unwrap_or_default(),
        },
        other => ClientError::transport(other.to_string()),
    }
}

fn stream_error(err: WsError) -> ClientError {
    match err {
        WsError::ConnectionClosed
        | WsError::AlreadyClosed
        | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
            ClientError::TransportClosed
        }
        WsError::Io(e) if is_closed_io(&e) => ClientError::TransportClosed,
        WsError::Io(e) => ClientError::transport(e.to_string()),
        other => {
            warn!(error = %other, "websocket error");
            ClientError::transport(other.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    #[test]
    fn test_close_conditions_map_to_transport_closed() {
        assert!(matches!(
            stream_error(WsError::ConnectionClosed),
            ClientError::TransportClosed
        ));
        assert!(matches!(
            stream_error(WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake)),
            ClientError::TransportClosed
        ));
        assert!(matches!(
            stream_error(WsError::Io(io::ErrorKind::UnexpectedEof.into())),
            ClientError::TransportClosed
        ));
        assert!(matches!(
            stream_error(WsError::Io(io::ErrorKind::PermissionDenied.into())),
            ClientError::Transport(_)
        ));
    }

    #[test]
    fn test_refused_dial_is_connect_failed() {
        let err = connect_error(WsError::Io(io::ErrorKind::ConnectionRefused.into()));
        assert!(err.is_connect_failed());
    }

    #[test]
    fn test_untrusted_certificate_is_not_retried() {
        let rejected = io::Error::new(
            io::ErrorKind::InvalidData,
            rustls::Error::InvalidCertificate(rustls::CertificateError::UnknownIssuer),
        );
        let err = connect_error(WsError::Io(rejected));
        assert!(matches!(err, ClientError::Transport(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_unconnected_transport() {
        let transport = WebSocketTransport::new(ClientConfig::default());
        assert!(!transport.is_connected());
        assert!(matches!(
            transport.read_message().await,
            Err(ClientError::NotConnected)
        ));
    }
}
