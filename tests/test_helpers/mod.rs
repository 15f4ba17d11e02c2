//! Shared fixtures for the gateway integration tests
//!
//! Every test starts a real [`GatewayServer`] on an ephemeral port and talks
//! to it through the public client crate.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rpcgate_client::ClientConfig;
use rpcgate_http_server::{GatewayServer, GatewayServerBuilder, TlsConfig};
use rpcgate_json_rpc::{
    Actor, ConnectionContext, ErrorPosition, HandlerError, HandlerOptions, Message, RpcError, RpcRequest,
};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Rejects the first param that is not an integer
pub fn integers_validator(_schema: &Value, msg: &Message) -> Option<ErrorPosition> {
    msg.must_params()
        .to_list()
        .iter()
        .position(|p| p.as_i64().is_none())
        .map(|i| ErrorPosition::new(format!(".params[{}]", i), "data is not integer"))
}

/// Actor with the methods the tests call; `closed` counts finished sessions
pub fn test_actor(closed: Arc<AtomicUsize>) -> Actor {
    let mut actor = Actor::new().with_validator(integers_validator);
    actor
        .register_typed(
            "echoAny",
            |_req: RpcRequest, first: Value, _second: Value| async move { Ok::<_, RpcError>(first) },
            HandlerOptions::new(),
        )
        .unwrap();
    actor
        .register_typed(
            "add",
            |_req: RpcRequest, a: i64, b: i64| async move { Ok::<_, RpcError>(a + b) },
            HandlerOptions::new(),
        )
        .unwrap();
    actor
        .register_typed(
            "checkedAdd",
            |_req: RpcRequest, a: i64, b: i64| async move { Ok::<_, RpcError>(a + b) },
            HandlerOptions::new().schema(json!({"type": "method", "params": ["integer", "integer"]})),
        )
        .unwrap();
    actor
        .register_typed(
            "subscribe",
            |req: RpcRequest, topic: String| async move {
                for seq in 0..3 {
                    req.push(Message::notify("event", vec![Value::from(topic.clone()), Value::from(seq)]))
                        .await?;
                }
                Ok::<_, HandlerError>("subscribed")
            },
            HandlerOptions::new(),
        )
        .unwrap();
    actor
        .register_typed(
            "sleep",
            |_req: RpcRequest, millis: u64| async move {
                tokio::time::sleep(Duration::from_millis(millis)).await;
                Ok::<_, RpcError>(millis)
            },
            HandlerOptions::new(),
        )
        .unwrap();
    actor
        .register_typed(
            "whoami",
            |req: RpcRequest| async move { Ok::<_, RpcError>(req.identity().map(str::to_string)) },
            HandlerOptions::new(),
        )
        .unwrap();
    actor
        .register_close(move |_conn: &ConnectionContext| {
            closed.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    actor
}

/// Self-signed certificate for `localhost`
pub struct TestCert {
    pub cert_pem: String,
    pub key_pem: String,
}

impl TestCert {
    pub fn localhost() -> Self {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        Self {
            cert_pem: certified.cert.pem(),
            key_pem: certified.key_pair.serialize_pem(),
        }
    }
}

/// A gateway serving on `127.0.0.1` with an OS-assigned port
pub struct TestServer {
    pub addr: SocketAddr,
    pub server: GatewayServer,
    pub closed: Arc<AtomicUsize>,
    cert: Option<TestCert>,
    task: JoinHandle<()>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(|builder| builder, false).await
    }

    pub async fn start_tls() -> Self {
        Self::start_with(|builder| builder, true).await
    }

    /// Start with extra builder settings, optionally terminating TLS
    pub async fn start_with<F>(customize: F, tls: bool) -> Self
    where
        F: FnOnce(GatewayServerBuilder) -> GatewayServerBuilder,
    {
        init_tracing();
        let closed = Arc::new(AtomicUsize::new(0));
        let cert = tls.then(TestCert::localhost);

        let mut builder = GatewayServer::builder().actor(test_actor(Arc::clone(&closed)));
        if let Some(cert) = &cert {
            builder = builder.tls(TlsConfig::from_pem(cert.cert_pem.clone(), cert.key_pem.clone()));
        }
        let server = customize(builder).build();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let serving = server.clone();
        let task = tokio::spawn(async move {
            serving.serve(listener).await.unwrap();
        });

        Self {
            addr,
            server,
            closed,
            cert,
            task,
        }
    }

    /// Base URL for `scheme`; TLS servers are addressed as `localhost` so
    /// the certificate name matches
    pub fn url(&self, scheme: &str) -> String {
        let host = if self.cert.is_some() { "localhost" } else { "127.0.0.1" };
        format!("{}://{}:{}", scheme, host, self.addr.port())
    }

    /// Client settings trusting this server's certificate
    pub fn client_config(&self) -> ClientConfig {
        let config = ClientConfig::default();
        match &self.cert {
            Some(cert) => config.with_root_certificate_pem(cert.cert_pem.as_bytes()).unwrap(),
            None => config,
        }
    }

    /// Number of sessions whose close handler has run
    pub fn closed_sessions(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop accepting and end live sessions, waiting for the accept loop
    pub async fn stop(self) {
        self.server.shutdown();
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("server stops in time")
            .unwrap();
    }
}

/// Poll `cond` until it holds or five seconds pass
pub async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cond()
}

/// Messages captured by a client's `on_message` callback
#[derive(Clone, Default)]
pub struct Collected(Arc<Mutex<Vec<Message>>>);

impl Collected {
    pub fn push(&self, msg: Message) {
        self.0.lock().unwrap().push(msg);
    }

    pub fn methods(&self) -> Vec<String> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter_map(|msg| msg.method().map(str::to_string))
            .collect()
    }

    pub fn with_method(&self, method: &str) -> Vec<Message> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|msg| msg.method() == Some(method))
            .cloned()
            .collect()
    }
}
