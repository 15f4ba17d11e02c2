//! Per-request protocol detection and routing.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, UPGRADE};
use http::{Method, Request, Response, StatusCode, Version};
use http_body::Body;
use rpcgate_json_rpc::{Actor, ConnectionContext, TransportKind};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::auth::Authenticator;
use crate::body::{GatewayBody, text_response};
use crate::server::ServerConfig;
use crate::{grpc, h2_stream, unary, websocket};

/// Which session a request is served by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayRoute {
    Unary,
    H2Stream,
    Grpc,
    WebSocket,
}

impl GatewayRoute {
    /// Pick the session kind for a request.
    ///
    /// WebSocket upgrade headers win; on HTTP/2 a gRPC content type selects
    /// the gRPC session and a POST whose body is still open with no declared
    /// length selects the newline-delimited stream; everything else is unary.
    pub fn detect<B: Body>(req: &Request<B>) -> Self {
        if is_websocket_upgrade(req) {
            return GatewayRoute::WebSocket;
        }
        if req.version() == Version::HTTP_2 {
            if is_grpc(req) {
                return GatewayRoute::Grpc;
            }
            if req.method() == Method::POST
                && !req.headers().contains_key(CONTENT_LENGTH)
                && !req.body().is_end_stream()
            {
                return GatewayRoute::H2Stream;
            }
        }
        GatewayRoute::Unary
    }

    pub fn transport(&self) -> TransportKind {
        match self {
            GatewayRoute::Unary => TransportKind::Http,
            GatewayRoute::H2Stream => TransportKind::Http2,
            GatewayRoute::Grpc => TransportKind::Grpc,
            GatewayRoute::WebSocket => TransportKind::WebSocket,
        }
    }
}

fn header_has_token<B>(req: &Request<B>, name: http::header::HeaderName, token: &str) -> bool {
    req.headers().get_all(name).iter().any(|value| {
        value
            .to_str()
            .map(|s| s.split(',').any(|t| t.trim().eq_ignore_ascii_case(token)))
            .unwrap_or(false)
    })
}

fn is_websocket_upgrade<B>(req: &Request<B>) -> bool {
    req.method() == Method::GET
        && header_has_token(req, CONNECTION, "upgrade")
        && header_has_token(req, UPGRADE, "websocket")
}

fn is_grpc<B>(req: &Request<B>) -> bool {
    req.headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("application/grpc"))
        .unwrap_or(false)
}

/// Shared state of every session served by one gateway
pub(crate) struct GatewayContext {
    pub(crate) actor: Arc<Actor>,
    pub(crate) config: Arc<ServerConfig>,
    pub(crate) shutdown: CancellationToken,
}

/// The request router; cheap to clone, one per connection task
#[derive(Clone)]
pub struct Gateway {
    ctx: Arc<GatewayContext>,
    authenticator: Option<Arc<dyn Authenticator>>,
}

impl Gateway {
    pub fn new(
        actor: Arc<Actor>,
        config: Arc<ServerConfig>,
        authenticator: Option<Arc<dyn Authenticator>>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            ctx: Arc::new(GatewayContext {
                actor,
                config,
                shutdown,
            }),
            authenticator,
        }
    }

    pub fn actor(&self) -> &Arc<Actor> {
        &self.ctx.actor
    }

    /// Serve one HTTP request, whatever transport it turns out to carry
    pub async fn handle<B>(&self, req: Request<B>, remote_addr: Option<SocketAddr>) -> Response<GatewayBody>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let identity = match &self.authenticator {
            Some(auth) => match auth.try_auth(req.headers(), remote_addr) {
                Some(identity) => Some(identity),
                None => {
                    warn!(remote = ?remote_addr, "authentication failed");
                    return text_response(StatusCode::UNAUTHORIZED, "auth failed!");
                }
            },
            None => None,
        };

        let route = GatewayRoute::detect(&req);
        let conn = ConnectionContext::new(route.transport())
            .with_remote_addr(remote_addr)
            .with_headers(req.headers().clone())
            .with_identity(identity);
        debug!(
            stream_id = %conn.stream_id,
            transport = %conn.transport,
            "{} {}",
            req.method(),
            req.uri().path()
        );

        match route {
            GatewayRoute::Unary => unary::serve(&self.ctx, req, conn).await,
            GatewayRoute::H2Stream => h2_stream::serve(&self.ctx, req, conn),
            GatewayRoute::Grpc => grpc::serve(&self.ctx, req, conn),
            GatewayRoute::WebSocket => websocket::serve(&self.ctx, req, conn),
        }
    }
}
