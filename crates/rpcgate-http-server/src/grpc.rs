//! gRPC streaming session.
//!
//! A bidirectional stream on [`GRPC_STREAM_PATH`](crate::GRPC_STREAM_PATH)
//! whose messages each carry one JSON-RPC message in a `bytes body = 1`
//! field. The response ends with `grpc-status` trailers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use futures::{StreamExt, future, stream};
use http::header::{CONTENT_TYPE, HeaderValue};
use http::{HeaderMap, Request, Response};
use http_body::{Body, Frame};
use http_body_util::{BodyExt, StreamBody};
use rpcgate_json_rpc::framing::encode_grpc_frame;
use rpcgate_json_rpc::{ConnectionContext, GrpcFrameCodec};
use tokio_util::codec::FramedRead;
use tracing::{debug, warn};

use crate::GRPC_STREAM_PATH;
use crate::body::{GatewayBody, empty_body};
use crate::gateway::GatewayContext;
use crate::session::{Session, body_reader, outbound_messages};

const GRPC_OK: &str = "0";
const GRPC_INTERNAL: &str = "13";
const GRPC_UNIMPLEMENTED: &str = "12";

fn grpc_response(body: GatewayBody) -> Response<GatewayBody> {
    let mut response = Response::new(body);
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/grpc"));
    response
}

fn status_trailers(status: &'static str, message: Option<&'static str>) -> HeaderMap {
    let mut trailers = HeaderMap::new();
    trailers.insert("grpc-status", HeaderValue::from_static(status));
    if let Some(message) = message {
        trailers.insert("grpc-message", HeaderValue::from_static(message));
    }
    trailers
}

pub(crate) fn serve<B>(ctx: &Arc<GatewayContext>, req: Request<B>, conn: ConnectionContext) -> Response<GatewayBody>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    if req.uri().path() != GRPC_STREAM_PATH {
        debug!(path = %req.uri().path(), "unknown gRPC method");
        // trailers-only response
        let mut response = grpc_response(empty_body());
        response.headers_mut().extend(status_trailers(
            GRPC_UNIMPLEMENTED,
            Some("unknown method"),
        ));
        return response;
    }

    let (session, rx) = Session::open(ctx, conn);
    let cancel = session.cancel.clone();
    let drained = session.drained.clone();
    let failed = Arc::new(AtomicBool::new(false));

    let inbound = FramedRead::new(
        body_reader(req.into_body()),
        GrpcFrameCodec::with_max_frame_size(ctx.config.max_frame_size),
    );
    let recv_failed = Arc::clone(&failed);
    tokio::spawn(async move {
        let clean = session.recv_loop(inbound).await.is_ok();
        if !clean {
            recv_failed.store(true, Ordering::SeqCst);
        }
        session.close(clean).await;
    });

    let frames = outbound_messages(rx, cancel, drained)
        .filter_map(|msg| {
            future::ready(match encode_grpc_frame(&msg) {
                Ok(frame) => Some(Frame::data(frame)),
                Err(err) => {
                    warn!(error = %err, "dropping unencodable message");
                    None
                }
            })
        })
        .chain(stream::once(async move {
            if failed.load(Ordering::SeqCst) {
                Frame::trailers(status_trailers(GRPC_INTERNAL, Some("bad frame")))
            } else {
                Frame::trailers(status_trailers(GRPC_OK, None))
            }
        }))
        .map(Ok::<_, hyper::Error>);

    grpc_response(StreamBody::new(frames).boxed_unsync())
}
