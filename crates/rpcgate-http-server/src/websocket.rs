//! WebSocket session: HTTP/1.1 upgrade, then one JSON-RPC message per text
//! frame in both directions.

use std::io::ErrorKind;
use std::sync::Arc;

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt, future};
use http::header::{CONNECTION, HeaderValue, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, UPGRADE};
use http::{Request, Response, StatusCode};
use hyper::upgrade::Upgraded;
use hyper_util::rt::TokioIo;
use rpcgate_json_rpc::{ConnectionContext, Message, encode, parse};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::GatewayError;
use crate::body::{GatewayBody, empty_response, text_response};
use crate::gateway::GatewayContext;
use crate::session::Session;

type WsStream = WebSocketStream<TokioIo<Upgraded>>;

pub(crate) fn serve<B>(ctx: &Arc<GatewayContext>, mut req: Request<B>, conn: ConnectionContext) -> Response<GatewayBody> {
    let Some(key) = req.headers().get(SEC_WEBSOCKET_KEY) else {
        return text_response(StatusCode::BAD_REQUEST, "Bad request");
    };
    let Ok(accept) = HeaderValue::from_str(&derive_accept_key(key.as_bytes())) else {
        return text_response(StatusCode::BAD_REQUEST, "Bad request");
    };

    let on_upgrade = hyper::upgrade::on(&mut req);
    let ctx = Arc::clone(ctx);
    tokio::spawn(async move {
        match on_upgrade.await {
            Ok(upgraded) => {
                let ws = WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None).await;
                run(ctx, ws, conn).await;
            }
            Err(err) => warn!("WebSocket upgrade failed: {}", err),
        }
    });

    let mut response = empty_response(StatusCode::SWITCHING_PROTOCOLS);
    let headers = response.headers_mut();
    headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
    headers.insert(CONNECTION, HeaderValue::from_static("Upgrade"));
    headers.insert(SEC_WEBSOCKET_ACCEPT, accept);
    response
}

async fn run(ctx: Arc<GatewayContext>, ws: WsStream, conn: ConnectionContext) {
    let (session, rx) = Session::open(&ctx, conn);
    let (sink, stream) = ws.split();
    let send_task = tokio::spawn(send_loop(sink, rx, session.cancel.clone()));

    let inbound = stream
        .take_while(|item| future::ready(!is_stream_end(item)))
        .filter_map(|item| {
            future::ready(match item {
                Ok(WsMessage::Text(text)) => Some(parse(text.as_bytes()).map_err(GatewayError::from)),
                Ok(WsMessage::Binary(data)) => Some(parse(&data).map_err(GatewayError::from)),
                Ok(_) => None,
                Err(err) => Some(Err(GatewayError::from(err))),
            })
        });

    // a close frame means the peer stops reading too
    let _ = session.recv_loop(inbound).await;
    session.close(false).await;
    if let Err(err) = send_task.await {
        warn!(stream_id = %session.stream_id(), "send loop failed: {}", err);
    }
}

/// Close frames and abrupt EOF all mean the peer is gone
fn is_stream_end(item: &Result<WsMessage, WsError>) -> bool {
    match item {
        Ok(WsMessage::Close(_)) => true,
        Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => true,
        Err(WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake)) => true,
        Err(WsError::Io(err)) => matches!(
            err.kind(),
            ErrorKind::UnexpectedEof | ErrorKind::ConnectionReset | ErrorKind::BrokenPipe
        ),
        _ => false,
    }
}

async fn send_loop(
    mut sink: SplitSink<WsStream, WsMessage>,
    mut rx: mpsc::Receiver<Message>,
    cancel: CancellationToken,
) {
    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => break,
            msg = rx.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };
        let text = match encode(&msg).map(String::from_utf8) {
            Ok(Ok(text)) => text,
            Ok(Err(err)) => {
                warn!(error = %err, "dropping non-UTF-8 message");
                continue;
            }
            Err(err) => {
                warn!(error = %err, "dropping unencodable message");
                continue;
            }
        };
        if let Err(err) = sink.send(WsMessage::text(text)).await {
            debug!(error = %err, "WebSocket write failed");
            cancel.cancel();
            break;
        }
    }

    let _ = sink.send(WsMessage::Close(None)).await;
    let _ = sink.close().await;
}
