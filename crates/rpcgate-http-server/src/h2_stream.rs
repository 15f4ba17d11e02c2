//! HTTP/2 streaming session: newline-delimited JSON in both directions on
//! one long-lived request.

use std::sync::Arc;

use bytes::Bytes;
use futures::{StreamExt, future, stream};
use http::header::{CACHE_CONTROL, CONTENT_TYPE, HeaderValue};
use http::{Request, Response};
use http_body::{Body, Frame};
use http_body_util::{BodyExt, StreamBody};
use rpcgate_json_rpc::framing::encode_line;
use rpcgate_json_rpc::{ConnectionContext, MessageLineCodec};
use tokio_util::codec::FramedRead;
use tracing::warn;

use crate::body::GatewayBody;
use crate::gateway::GatewayContext;
use crate::session::{Session, body_reader, outbound_messages};

/// First frame written on every HTTP/2 stream
pub const GREETING: &[u8] = b"{\"method\":\"hello\",\"params\":[]}\n";

pub(crate) fn serve<B>(ctx: &Arc<GatewayContext>, req: Request<B>, conn: ConnectionContext) -> Response<GatewayBody>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (session, rx) = Session::open(ctx, conn);
    let cancel = session.cancel.clone();
    let drained = session.drained.clone();

    let inbound = FramedRead::new(
        body_reader(req.into_body()),
        MessageLineCodec::with_max_length(ctx.config.max_frame_size),
    );
    tokio::spawn(async move {
        let clean = session.recv_loop(inbound).await.is_ok();
        session.close(clean).await;
    });

    let greeting = ctx
        .config
        .greeting
        .then(|| Bytes::from_static(GREETING));
    let frames = outbound_messages(rx, cancel, drained).filter_map(|msg| {
        future::ready(match encode_line(&msg) {
            Ok(line) => Some(line),
            Err(err) => {
                warn!(error = %err, "dropping unencodable message");
                None
            }
        })
    });
    let frames = stream::iter(greeting)
        .chain(frames)
        .map(|data| Ok::<_, hyper::Error>(Frame::data(data)));

    let mut response = Response::new(StreamBody::new(frames).boxed_unsync());
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/x-ndjson"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}
