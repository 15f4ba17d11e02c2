//! HTTP/1 unary session: one message per POST body, one response per body.

use std::sync::Arc;

use bytes::Bytes;
use http::header::HeaderValue;
use http::{Method, Request, Response, StatusCode};
use http_body::Body;
use http_body_util::{BodyExt, Limited};
use rpcgate_json_rpc::{ConnectionContext, EncodeError, Message, RpcError, RpcRequest, TRACE_ID_HEADER, encode, parse};
use tracing::{debug, warn};

use crate::body::{GatewayBody, empty_response, json_response, text_response};
use crate::gateway::GatewayContext;

pub(crate) async fn serve<B>(ctx: &Arc<GatewayContext>, req: Request<B>, conn: ConnectionContext) -> Response<GatewayBody>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    if req.method() != Method::POST {
        return text_response(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed");
    }

    let header_trace_id = req
        .headers()
        .get(TRACE_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let body = match Limited::new(req.into_body(), ctx.config.max_body_size)
        .collect()
        .await
    {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            warn!(stream_id = %conn.stream_id, "failed to read request body: {}", err);
            return text_response(StatusCode::BAD_REQUEST, "Bad request");
        }
    };

    let mut msg = match parse(&body) {
        Ok(msg) => msg,
        Err(err) => {
            warn!(stream_id = %conn.stream_id, "undecodable request body: {}", err);
            return text_response(StatusCode::BAD_REQUEST, "Bad request");
        }
    };
    if !msg.is_request_or_notify() {
        return text_response(StatusCode::BAD_REQUEST, "Only request or notify is accepted");
    }
    if msg.trace_id().is_empty() {
        if let Some(trace_id) = header_trace_id {
            msg.set_trace_id(trace_id);
        }
    }

    let conn = Arc::new(conn);
    let result = ctx.actor.feed(RpcRequest::new(msg, Arc::clone(&conn))).await;
    ctx.actor.handle_close(&conn);

    match result {
        Ok(Some(mut response)) => {
            // the trace id travels in the header, not the body
            let trace_id = response.trace_id().to_string();
            response.set_trace_id(String::new());
            match reply_body(&response, encode) {
                Ok(bytes) => {
                    let mut http_response = json_response(bytes);
                    if !trace_id.is_empty() {
                        if let Ok(value) = HeaderValue::from_str(&trace_id) {
                            http_response.headers_mut().insert(TRACE_ID_HEADER, value);
                        }
                    }
                    http_response
                }
                Err(err) => {
                    warn!(stream_id = %conn.stream_id, "failed to encode response: {}", err);
                    text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
                }
            }
        }
        Ok(None) => empty_response(StatusCode::OK),
        Err(err) => {
            debug!(stream_id = %conn.stream_id, error = %err, "notify not answered");
            empty_response(StatusCode::OK)
        }
    }
}

/// Encoded `response`, or an internal error for the same id when the
/// response itself cannot be encoded
pub(crate) fn reply_body<F>(response: &Message, encode: F) -> Result<Vec<u8>, EncodeError>
where
    F: Fn(&Message) -> Result<Vec<u8>, EncodeError>,
{
    encode(response).or_else(|err| {
        let Some(id) = response.id() else {
            return Err(err);
        };
        warn!(id = %id, "failed to encode response, answering with internal error: {}", err);
        encode(&RpcError::internal_error().to_message_from_id(id.clone()))
    })
}
