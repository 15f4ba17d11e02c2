//! In-memory transport for client tests

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use http::HeaderMap;
use parking_lot::Mutex;
use rpcgate_json_rpc::Message;
use tokio::sync::mpsc;
use url::Url;

use crate::error::{ClientError, ClientResult};
use crate::streaming::TransportFactory;
use crate::transport::{BoxedTransport, Transport, TransportType};

/// Transport whose far end is a [`MockPeer`]; without one it refuses to connect
pub(crate) struct MockTransport {
    link: Option<(mpsc::UnboundedSender<Message>, tokio::sync::Mutex<mpsc::UnboundedReceiver<Message>>)>,
    attempts: Arc<AtomicUsize>,
    headers: Arc<Mutex<Vec<HeaderMap>>>,
    connected: AtomicBool,
}

/// The server side of one mock connection
pub(crate) struct MockPeer {
    from_client: mpsc::UnboundedReceiver<Message>,
    to_client: mpsc::UnboundedSender<Message>,
}

impl MockPeer {
    pub(crate) async fn recv(&mut self) -> Option<Message> {
        self.from_client.recv().await
    }

    pub(crate) fn push(&self, msg: Message) {
        let _ = self.to_client.send(msg);
    }
}

/// Queue of connections handed out by the factory, in order
pub(crate) struct MockPeers {
    queue: Arc<Mutex<VecDeque<MockTransport>>>,
    attempts: Arc<AtomicUsize>,
    headers: Arc<Mutex<Vec<HeaderMap>>>,
}

impl MockPeers {
    /// Make the next connect succeed, returning its server side
    pub(crate) fn take_next(&mut self) -> MockPeer {
        let (client_tx, from_client) = mpsc::unbounded_channel();
        let (to_client, client_rx) = mpsc::unbounded_channel();
        self.queue.lock().push_back(MockTransport {
            link: Some((client_tx, tokio::sync::Mutex::new(client_rx))),
            attempts: Arc::clone(&self.attempts),
            headers: Arc::clone(&self.headers),
            connected: AtomicBool::new(false),
        });
        MockPeer {
            from_client,
            to_client,
        }
    }

    /// Connect attempts so far, refused ones included
    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Headers of every connect attempt, in order
    pub(crate) fn connect_headers(&self) -> Vec<HeaderMap> {
        self.headers.lock().clone()
    }
}

pub(crate) fn mock_factory() -> (TransportFactory, MockPeers) {
    let queue: Arc<Mutex<VecDeque<MockTransport>>> = Arc::default();
    let attempts = Arc::new(AtomicUsize::new(0));
    let headers: Arc<Mutex<Vec<HeaderMap>>> = Arc::default();
    let factory_queue = Arc::clone(&queue);
    let factory_attempts = Arc::clone(&attempts);
    let factory_headers = Arc::clone(&headers);
    let factory: TransportFactory = Arc::new(move || {
        let transport = factory_queue
            .lock()
            .pop_front()
            .unwrap_or_else(|| MockTransport {
                link: None,
                attempts: Arc::clone(&factory_attempts),
                headers: Arc::clone(&factory_headers),
                connected: AtomicBool::new(false),
            });
        Ok(Box::new(transport) as BoxedTransport)
    });
    (factory, MockPeers { queue, attempts, headers })
}

#[async_trait]
impl Transport for MockTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::WebSocket
    }

    async fn connect(&self, url: &Url, headers: &HeaderMap) -> ClientResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.headers.lock().push(headers.clone());
        if self.link.is_none() {
            return Err(ClientError::ConnectFailed(format!("{} refused", url)));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn write_message(&self, msg: Message) -> ClientResult<()> {
        let (tx, _) = self.link.as_ref().ok_or(ClientError::NotConnected)?;
        tx.send(msg).map_err(|_| ClientError::TransportClosed)
    }

    async fn read_message(&self) -> ClientResult<Option<Message>> {
        let (_, rx) = self.link.as_ref().ok_or(ClientError::NotConnected)?;
        match rx.lock().await.recv().await {
            Some(msg) => Ok(Some(msg)),
            None => Err(ClientError::TransportClosed),
        }
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
