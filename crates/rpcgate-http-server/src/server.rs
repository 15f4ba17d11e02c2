//! Gateway listener: accept loop, TLS termination and per-connection
//! HTTP/1.1 + HTTP/2 serving.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::Request;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use rpcgate_json_rpc::Actor;
use rpcgate_json_rpc::framing::DEFAULT_MAX_FRAME_SIZE;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::auth::Authenticator;
use crate::gateway::Gateway;
use crate::tls::TlsConfig;
use crate::Result;

/// Configuration for the gateway server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_address: SocketAddr,
    /// Maximum unary request body size
    pub max_body_size: usize,
    /// Maximum size of a single streaming frame
    pub max_frame_size: usize,
    /// Capacity of each streaming session's outbound queue
    pub queue_size: usize,
    /// Dispatch each inbound streaming message on its own task
    pub spawn_per_message: bool,
    /// Send the `hello` greeting first on HTTP/2 streams
    pub greeting: bool,
    /// Terminate TLS on the listener
    pub tls: Option<TlsConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 8000)),
            max_body_size: 1024 * 1024, // 1MB
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            queue_size: 100,
            spawn_per_message: false,
            greeting: true,
            tls: None,
        }
    }
}

/// Builder for the gateway server
pub struct GatewayServerBuilder {
    config: ServerConfig,
    actor: Actor,
    authenticator: Option<Arc<dyn Authenticator>>,
}

impl GatewayServerBuilder {
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            actor: Actor::new(),
            authenticator: None,
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the bind address
    pub fn bind_address(mut self, addr: SocketAddr) -> Self {
        self.config.bind_address = addr;
        self
    }

    /// Set maximum request body size
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.config.max_body_size = size;
        self
    }

    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.config.max_frame_size = size;
        self
    }

    /// Set the outbound queue capacity of streaming sessions
    pub fn queue_size(mut self, size: usize) -> Self {
        self.config.queue_size = size.max(1);
        self
    }

    pub fn spawn_per_message(mut self, enable: bool) -> Self {
        self.config.spawn_per_message = enable;
        self
    }

    pub fn greeting(mut self, enable: bool) -> Self {
        self.config.greeting = enable;
        self
    }

    /// Terminate TLS with the given certificate material
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.config.tls = Some(tls);
        self
    }

    /// Serve this dispatcher; its registry is frozen from here on
    pub fn actor(mut self, actor: Actor) -> Self {
        self.actor = actor;
        self
    }

    pub fn authenticator(mut self, authenticator: impl Authenticator + 'static) -> Self {
        self.authenticator = Some(Arc::new(authenticator));
        self
    }

    /// Build the gateway server
    pub fn build(self) -> GatewayServer {
        let shutdown = CancellationToken::new();
        let config = Arc::new(self.config);
        let gateway = Gateway::new(
            Arc::new(self.actor),
            Arc::clone(&config),
            self.authenticator,
            shutdown.clone(),
        );
        GatewayServer {
            config,
            gateway,
            shutdown,
        }
    }
}

impl Default for GatewayServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Gateway server multiplexing every transport on one listener
#[derive(Clone)]
pub struct GatewayServer {
    config: Arc<ServerConfig>,
    gateway: Gateway,
    shutdown: CancellationToken,
}

impl GatewayServer {
    pub fn builder() -> GatewayServerBuilder {
        GatewayServerBuilder::new()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The per-request router, usable without a listener
    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    /// Token that stops the accept loop and every live session
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Bind the configured address and serve until shutdown
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_address).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener until shutdown
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let acceptor = match &self.config.tls {
            Some(tls) => Some(tls.acceptor()?),
            None => None,
        };
        let local_addr = listener.local_addr()?;
        info!(
            "Gateway listening on {} ({})",
            local_addr,
            if acceptor.is_some() { "tls" } else { "cleartext" }
        );

        loop {
            let (stream, peer_addr) = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        error!("Failed to accept connection: {}", err);
                        continue;
                    }
                },
            };
            debug!("New connection from {}", peer_addr);

            let gateway = self.gateway.clone();
            let acceptor = acceptor.clone();
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move {
                match acceptor {
                    Some(acceptor) => match acceptor.accept(stream).await {
                        Ok(tls_stream) => {
                            serve_connection(tls_stream, peer_addr, gateway, shutdown).await
                        }
                        Err(err) => warn!("TLS handshake with {} failed: {}", peer_addr, err),
                    },
                    None => serve_connection(stream, peer_addr, gateway, shutdown).await,
                }
            });
        }

        info!("Gateway on {} stopped accepting", local_addr);
        Ok(())
    }
}

async fn serve_connection<I>(io: I, peer_addr: SocketAddr, gateway: Gateway, shutdown: CancellationToken)
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = service_fn(move |req: Request<Incoming>| {
        let gateway = gateway.clone();
        async move { Ok::<_, Infallible>(gateway.handle(req, Some(peer_addr)).await) }
    });

    let builder = auto::Builder::new(TokioExecutor::new());
    let conn = builder.serve_connection_with_upgrades(TokioIo::new(io), service);
    tokio::pin!(conn);

    let mut draining = false;
    let result = loop {
        tokio::select! {
            result = conn.as_mut() => break result,
            _ = shutdown.cancelled(), if !draining => {
                draining = true;
                conn.as_mut().graceful_shutdown();
            }
        }
    };

    if let Err(err) = result {
        // Filter out common client disconnection errors that aren't actual problems
        let err_str = err.to_string();
        if err_str.contains("connection closed") || err_str.contains("connection reset") {
            debug!("Client {} disconnected: {}", peer_addr, err);
        } else {
            error!("Error serving connection from {}: {}", peer_addr, err);
        }
    }
}
