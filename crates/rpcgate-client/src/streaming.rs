//! Transport-agnostic streaming client.
//!
//! A [`StreamingClient`] owns at most one live connection at a time. Each
//! connection runs a receive task, which resolves pending calls or hands
//! unmatched messages to the [`on_message`](StreamingClient::on_message)
//! callback, and a send task draining a bounded outbound queue. Either task
//! ending cancels the other; every call still waiting then fails with
//! [`ClientError::TransportClosed`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use http::HeaderMap;
use parking_lot::{Mutex, RwLock};
use rpcgate_json_rpc::{Message, RequestId, new_uuid};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::transport::{BoxedTransport, Transport, transport_for};

/// Callback for messages that match no pending call
pub type MessageCallback = Arc<dyn Fn(Message) + Send + Sync>;

/// Creates a fresh, unconnected transport for every (re)connect
pub type TransportFactory = Arc<dyn Fn() -> ClientResult<BoxedTransport> + Send + Sync>;

/// Reconnecting JSON-RPC client over a streaming [`Transport`]
#[derive(Clone)]
pub struct StreamingClient {
    inner: Arc<Inner>,
}

struct Inner {
    url: Url,
    config: ClientConfig,
    factory: TransportFactory,
    extra_headers: RwLock<HeaderMap>,
    connection: tokio::sync::Mutex<Option<Connection>>,
    live: RwLock<Option<CancellationToken>>,
    pending: Arc<PendingCalls>,
    on_message: Arc<RwLock<Option<MessageCallback>>>,
}

struct Connection {
    outbound: mpsc::Sender<Message>,
    cancel: CancellationToken,
    done: Option<JoinHandle<ClientResult<()>>>,
}

impl Connection {
    fn is_alive(&self) -> bool {
        !self.cancel.is_cancelled()
    }
}

impl StreamingClient {
    /// Client for a `ws(s)://`, `h2(c)://` or `grpc(s)://` URL
    pub fn new(url: &str, config: ClientConfig) -> ClientResult<Self> {
        let url = Url::parse(url)?;
        // fail on unsupported schemes now rather than on first connect
        transport_for(&url, &config)?;
        let factory_url = url.clone();
        let factory_config = config.clone();
        let factory: TransportFactory = Arc::new(move || transport_for(&factory_url, &factory_config));
        Self::with_factory(url, config, factory)
    }

    /// Client whose transports come from `factory`
    pub fn with_factory(url: Url, config: ClientConfig, factory: TransportFactory) -> ClientResult<Self> {
        let extra_headers = config.header_map()?;
        Ok(Self {
            inner: Arc::new(Inner {
                url,
                config,
                factory,
                extra_headers: RwLock::new(extra_headers),
                connection: tokio::sync::Mutex::new(None),
                live: RwLock::new(None),
                pending: Arc::new(PendingCalls::default()),
                on_message: Arc::new(RwLock::new(None)),
            }),
        })
    }

    pub fn server_url(&self) -> &Url {
        &self.inner.url
    }

    /// Replace the headers sent on the next connect
    pub fn set_extra_headers(&self, headers: HeaderMap) {
        *self.inner.extra_headers.write() = headers;
    }

    /// Register the handler for server pushes and unmatched responses.
    ///
    /// It runs on the receive task, so it must not block.
    pub fn on_message<F>(&self, callback: F)
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        *self.inner.on_message.write() = Some(Arc::new(callback));
    }

    /// Whether the current connection is up; never waits on a connect in progress
    pub fn is_connected(&self) -> bool {
        self.inner
            .live
            .read()
            .as_ref()
            .is_some_and(|cancel| !cancel.is_cancelled())
    }

    /// Connect unless a live connection exists
    pub async fn connect(&self) -> ClientResult<()> {
        self.ensure_connected(None).await.map(|_| ())
    }

    /// [`connect`](Self::connect) sending `headers` on top of the extra
    /// headers; they win on conflicts and are not kept for later connects
    pub async fn connect_with_headers(&self, headers: &HeaderMap) -> ClientResult<()> {
        self.ensure_connected(Some(headers)).await.map(|_| ())
    }

    async fn ensure_connected(
        &self,
        call_headers: Option<&HeaderMap>,
    ) -> ClientResult<(mpsc::Sender<Message>, CancellationToken)> {
        let mut slot = self.inner.connection.lock().await;
        if let Some(conn) = slot.as_ref().filter(|conn| conn.is_alive()) {
            return Ok((conn.outbound.clone(), conn.cancel.clone()));
        }

        let transport: Arc<dyn Transport> = Arc::from((self.inner.factory)()?);
        let mut headers = self.inner.extra_headers.read().clone();
        if let Some(call_headers) = call_headers {
            for (name, value) in call_headers {
                headers.insert(name.clone(), value.clone());
            }
        }
        let url = &self.inner.url;
        match tokio::time::timeout(
            self.inner.config.timeouts.connect,
            transport.connect(url, &headers),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(ClientError::ConnectFailed(format!(
                    "timed out connecting to {}",
                    url
                )));
            }
        }
        info!(url = %url, transport = %transport.transport_type(), "connected");

        let conn = self.start(transport);
        let handles = (conn.outbound.clone(), conn.cancel.clone());
        *self.inner.live.write() = Some(conn.cancel.clone());
        *slot = Some(conn);
        Ok(handles)
    }

    fn start(&self, transport: Arc<dyn Transport>) -> Connection {
        let (outbound, rx) = mpsc::channel(self.inner.config.queue_size.max(1));
        let cancel = CancellationToken::new();
        let failure = Arc::new(Mutex::new(None));

        let send_task = tokio::spawn(send_loop(
            Arc::clone(&transport),
            rx,
            cancel.clone(),
            Arc::clone(&failure),
        ));
        let done = tokio::spawn(recv_loop(
            transport,
            Arc::clone(&self.inner.pending),
            Arc::clone(&self.inner.on_message),
            cancel.clone(),
            failure,
            send_task,
        ));

        Connection {
            outbound,
            cancel,
            done: Some(done),
        }
    }

    /// Send a request and wait for its Result or Error
    pub async fn call(&self, request: Message) -> ClientResult<Message> {
        self.call_inner(request, None, &CancellationToken::new()).await
    }

    /// [`call`](Self::call) whose lazy connect, if one happens, also sends
    /// `headers`. An already live connection is reused unchanged.
    pub async fn call_with_headers(&self, request: Message, headers: &HeaderMap) -> ClientResult<Message> {
        self.call_inner(request, Some(headers), &CancellationToken::new()).await
    }

    /// [`call`](Self::call) that gives up with [`ClientError::Cancelled`]
    /// once `cancel` fires
    pub async fn call_with_cancel(&self, request: Message, cancel: &CancellationToken) -> ClientResult<Message> {
        self.call_inner(request, None, cancel).await
    }

    /// The request travels under a fresh wire id so that callers reusing an
    /// id never share a pending entry; the response gets the caller's id back.
    async fn call_inner(
        &self,
        request: Message,
        headers: Option<&HeaderMap>,
        cancel: &CancellationToken,
    ) -> ClientResult<Message> {
        let request = with_request_id(request)?;
        let (outbound, conn_cancel) = self.ensure_connected(headers).await?;

        let wire_id = RequestId::String(new_uuid());
        let key = wire_id.key();
        let method = request.must_method().to_string();
        let rx = self.inner.pending.insert(key.clone(), request.must_id().clone());
        debug!(method = %method, id = %request.must_id(), wire_id = %wire_id, "call");
        let request = request.replace_id(wire_id);

        let exchange = async {
            tokio::select! {
                _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                _ = conn_cancel.cancelled() => return Err(ClientError::TransportClosed),
                sent = outbound.send(request) => sent.map_err(|_| ClientError::TransportClosed)?,
            }
            tokio::select! {
                biased;
                response = rx => response.map_err(|_| ClientError::TransportClosed),
                _ = cancel.cancelled() => Err(ClientError::Cancelled),
                _ = conn_cancel.cancelled() => Err(ClientError::TransportClosed),
            }
        };

        let result = match tokio::time::timeout(self.inner.config.timeouts.request, exchange).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout),
        };
        if let Err(err) = &result {
            self.inner.pending.remove(&key);
            debug!(method = %method, error = %err, "call failed");
        }
        result
    }

    /// Fire-and-forget send, typically a Notify
    pub async fn send(&self, msg: Message) -> ClientResult<()> {
        let (outbound, conn_cancel) = self.ensure_connected(None).await?;
        tokio::select! {
            _ = conn_cancel.cancelled() => Err(ClientError::TransportClosed),
            sent = outbound.send(msg) => sent.map_err(|_| ClientError::TransportClosed),
        }
    }

    /// Block until the current connection's receive loop exits.
    ///
    /// `Ok(())` after [`close`](Self::close); the terminal error otherwise,
    /// [`ClientError::TransportClosed`] when the peer ended the stream. Only
    /// one waiter per connection observes the outcome.
    pub async fn wait(&self) -> ClientResult<()> {
        let handle = {
            let mut slot = self.inner.connection.lock().await;
            slot.as_mut().and_then(|conn| conn.done.take())
        };
        match handle {
            Some(handle) => handle
                .await
                .map_err(|e| ClientError::transport(format!("receive task failed: {}", e)))?,
            None => Err(ClientError::NotConnected),
        }
    }

    /// Stop the current connection; pending calls fail with `TransportClosed`
    pub async fn close(&self) {
        if let Some(conn) = self.inner.connection.lock().await.as_ref() {
            conn.cancel.cancel();
        }
    }

    #[cfg(test)]
    pub(crate) fn pending_len(&self) -> usize {
        self.inner.pending.len()
    }
}

impl fmt::Debug for StreamingClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingClient")
            .field("url", &self.inner.url.as_str())
            .field("pending", &self.inner.pending.len())
            .finish_non_exhaustive()
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(conn) = self.connection.get_mut() {
            conn.cancel.cancel();
        }
    }
}

/// Requests without a usable id get a fresh uuid
fn with_request_id(request: Message) -> ClientResult<Message> {
    let needs_id = match request.id() {
        _ if !request.is_request() => {
            return Err(ClientError::InvalidMessage("call requires a request message"));
        }
        Some(RequestId::Null) => true,
        Some(RequestId::String(s)) => s.is_empty(),
        _ => false,
    };
    if needs_id {
        Ok(request.replace_id(RequestId::String(new_uuid())))
    } else {
        Ok(request)
    }
}

async fn send_loop(
    transport: Arc<dyn Transport>,
    mut rx: mpsc::Receiver<Message>,
    cancel: CancellationToken,
    failure: Arc<Mutex<Option<ClientError>>>,
) {
    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => break,
            msg = rx.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };
        if let Err(err) = transport.write_message(msg).await {
            warn!(error = %err, "write failed, closing connection");
            failure.lock().get_or_insert(err);
            cancel.cancel();
            break;
        }
    }
}

async fn recv_loop(
    transport: Arc<dyn Transport>,
    pending: Arc<PendingCalls>,
    on_message: Arc<RwLock<Option<MessageCallback>>>,
    cancel: CancellationToken,
    failure: Arc<Mutex<Option<ClientError>>>,
    send_task: JoinHandle<()>,
) -> ClientResult<()> {
    let outcome = loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => break Ok(()),
            read = transport.read_message() => read,
        };
        match read {
            Ok(Some(msg)) => deliver(&pending, &on_message, msg),
            Ok(None) => {}
            Err(ClientError::TransportClosed) => {
                info!("transport closed by peer");
                break Err(ClientError::TransportClosed);
            }
            Err(err) => {
                warn!(error = %err, "read failed, closing connection");
                break Err(err);
            }
        }
    };

    cancel.cancel();
    let failed = pending.fail_all();
    if failed > 0 {
        debug!(failed, "pending calls failed on close");
    }
    if let Err(err) = send_task.await {
        warn!(error = %err, "send task failed");
    }
    transport.close().await;

    match failure.lock().take() {
        Some(err) => Err(err),
        None => outcome,
    }
}

fn deliver(pending: &PendingCalls, on_message: &RwLock<Option<MessageCallback>>, msg: Message) {
    let msg = if msg.is_result_or_error() {
        match pending.resolve(msg) {
            None => return,
            Some(unmatched) => {
                debug!(id = %unmatched.must_id(), "response matches no pending call");
                unmatched
            }
        }
    } else {
        msg
    };

    let callback = on_message.read().clone();
    match callback {
        Some(callback) => callback(msg),
        None => debug!(kind = msg.kind(), "no message callback, dropped"),
    }
}

/// Callers waiting on a response, keyed by wire id
#[derive(Default)]
struct PendingCalls {
    calls: Mutex<HashMap<String, Waiter>>,
}

struct Waiter {
    caller_id: RequestId,
    tx: oneshot::Sender<Message>,
}

impl PendingCalls {
    /// `key` must be unique per call
    fn insert(&self, key: String, caller_id: RequestId) -> oneshot::Receiver<Message> {
        let (tx, rx) = oneshot::channel();
        self.calls.lock().insert(key, Waiter { caller_id, tx });
        rx
    }

    fn remove(&self, key: &str) {
        self.calls.lock().remove(key);
    }

    /// Hand `msg` to its caller under the caller's id; gives it back when
    /// nobody waits for it
    fn resolve(&self, msg: Message) -> Option<Message> {
        let waiter = msg.id().and_then(|id| self.calls.lock().remove(&id.key()));
        match waiter {
            Some(waiter) => {
                let msg = msg.replace_id(waiter.caller_id);
                waiter.tx.send(msg).err()
            }
            None => Some(msg),
        }
    }

    /// Drop every waiter; their receivers observe a closed channel
    fn fail_all(&self) -> usize {
        let mut calls = self.calls.lock();
        let count = calls.len();
        calls.clear();
        count
    }

    fn len(&self) -> usize {
        self.calls.lock().len()
    }
}
