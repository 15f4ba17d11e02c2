//! Authentication seam.
//!
//! The gateway runs the authenticator before any routing. A rejected request
//! gets `401 auth failed!` and never reaches the dispatcher; an accepted one
//! carries the returned identity in its [`ConnectionContext`].
//!
//! [`ConnectionContext`]: rpcgate_json_rpc::ConnectionContext

use std::net::SocketAddr;

use http::HeaderMap;

pub trait Authenticator: Send + Sync {
    /// `Some(identity)` when the request is authorized
    fn try_auth(&self, headers: &HeaderMap, remote_addr: Option<SocketAddr>) -> Option<String>;
}

impl<F> Authenticator for F
where
    F: Fn(&HeaderMap, Option<SocketAddr>) -> Option<String> + Send + Sync,
{
    fn try_auth(&self, headers: &HeaderMap, remote_addr: Option<SocketAddr>) -> Option<String> {
        self(headers, remote_addr)
    }
}
