//! Response body helpers

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderValue};
use http::{Response, StatusCode};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full};

/// Body type of every gateway response, unary or streaming
pub type GatewayBody = UnsyncBoxBody<Bytes, hyper::Error>;

pub fn full_body(data: impl Into<Bytes>) -> GatewayBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

pub fn empty_body() -> GatewayBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed_unsync()
}

/// Plain-text response, used before a JSON-RPC message exists
pub fn text_response(status: StatusCode, text: &'static str) -> Response<GatewayBody> {
    let mut response = Response::new(full_body(text));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

/// 200 response carrying an encoded JSON-RPC message
pub fn json_response(data: Vec<u8>) -> Response<GatewayBody> {
    let mut response = Response::new(full_body(data));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

pub fn empty_response(status: StatusCode) -> Response<GatewayBody> {
    let mut response = Response::new(empty_body());
    *response.status_mut() = status;
    response
}
