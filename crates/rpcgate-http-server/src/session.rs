//! The receive half shared by every streaming session, plus the plumbing
//! that turns a session's outbound queue into a response body.

use std::fmt::Display;
use std::io;
use std::pin::pin;
use std::sync::Arc;

use bytes::Bytes;
use futures::{Stream, StreamExt, stream};
use http_body::Body;
use http_body_util::BodyExt;
use rpcgate_json_rpc::{Actor, ConnectionContext, Message, RpcRequest, SessionSender};
use tokio::sync::mpsc;
use tokio_util::io::StreamReader;
use tokio_util::sync::{CancellationToken, DropGuard};
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::gateway::GatewayContext;

/// One accepted streaming connection.
///
/// `cancel` stops both halves at once. `drained` is the gentler end after a
/// clean end of input: every answer already queued still goes out.
pub(crate) struct Session {
    pub(crate) ctx: Arc<GatewayContext>,
    pub(crate) conn: Arc<ConnectionContext>,
    pub(crate) outbound: mpsc::Sender<Message>,
    pub(crate) cancel: CancellationToken,
    pub(crate) drained: CancellationToken,
    tasks: TaskTracker,
}

impl Session {
    /// Create the session and hand back the receiving end of its outbound queue
    pub(crate) fn open(ctx: &Arc<GatewayContext>, conn: ConnectionContext) -> (Self, mpsc::Receiver<Message>) {
        let (outbound, rx) = mpsc::channel(ctx.config.queue_size.max(1));
        let conn = Arc::new(conn.with_session(SessionSender::new(outbound.clone())));
        info!(
            stream_id = %conn.stream_id,
            transport = %conn.transport,
            "session opened"
        );
        let session = Self {
            ctx: Arc::clone(ctx),
            conn,
            outbound,
            cancel: ctx.shutdown.child_token(),
            drained: CancellationToken::new(),
            tasks: TaskTracker::new(),
        };
        (session, rx)
    }

    pub(crate) fn stream_id(&self) -> &str {
        &self.conn.stream_id
    }

    /// Feed inbound messages to the actor until the stream ends, the session
    /// is cancelled, or a frame fails to decode (returned as `Err`).
    ///
    /// `Ok` is a clean end; pass it on to [`close`](Self::close).
    pub(crate) async fn recv_loop<S, E>(&self, inbound: S) -> Result<(), E>
    where
        S: Stream<Item = Result<Message, E>>,
        E: Display,
    {
        let mut inbound = pin!(inbound);
        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                next = inbound.next() => next,
            };
            match next {
                None => {
                    debug!(stream_id = %self.stream_id(), "stream ended");
                    return Ok(());
                }
                Some(Err(err)) => {
                    warn!(stream_id = %self.stream_id(), error = %err, "bad frame, closing session");
                    return Err(err);
                }
                Some(Ok(msg)) => self.dispatch(msg).await,
            }
        }
    }

    async fn dispatch(&self, msg: Message) {
        let req = RpcRequest::new(msg, Arc::clone(&self.conn));
        let task = feed_and_queue(
            Arc::clone(&self.ctx.actor),
            req,
            self.outbound.clone(),
            self.cancel.clone(),
        );
        if self.ctx.config.spawn_per_message {
            self.tasks.spawn(task);
        } else {
            task.await;
        }
    }

    /// Run the close handler and end the outbound half.
    ///
    /// A clean close first waits for in-flight handlers, then lets the
    /// outbound stream flush what they queued. Otherwise both halves stop
    /// at once and queued answers are dropped.
    pub(crate) async fn close(&self, clean: bool) {
        if clean {
            self.tasks.close();
            tokio::select! {
                _ = self.cancel.cancelled() => {}
                _ = self.tasks.wait() => {}
            }
        }
        self.ctx.actor.handle_close(&self.conn);
        if clean {
            self.drained.cancel();
        } else {
            self.cancel.cancel();
        }
        info!(stream_id = %self.stream_id(), clean, "session closed");
    }
}

async fn feed_and_queue(
    actor: Arc<Actor>,
    req: RpcRequest,
    outbound: mpsc::Sender<Message>,
    cancel: CancellationToken,
) {
    let stream_id = req.conn.stream_id.clone();
    match actor.feed(req).await {
        Ok(Some(response)) => {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(stream_id = %stream_id, "session cancelled, response dropped");
                }
                sent = outbound.send(response) => {
                    if sent.is_err() {
                        debug!(stream_id = %stream_id, "outbound queue closed, response dropped");
                    }
                }
            }
        }
        Ok(None) => {}
        Err(err) => debug!(stream_id = %stream_id, error = %err, "message not answered"),
    }
}

/// Read a request body as a byte stream
pub(crate) fn body_reader<B>(body: B) -> StreamReader<impl Stream<Item = io::Result<Bytes>> + Send, Bytes>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    StreamReader::new(
        body.into_data_stream()
            .map(|chunk| chunk.map_err(io::Error::other)),
    )
}

/// Messages taken from the outbound queue until the session is cancelled,
/// or until the queue runs empty once `drained` has fired.
///
/// Dropping the returned stream (the peer went away and hyper dropped the
/// response body) cancels the session, and so does the stream ending.
pub(crate) fn outbound_messages(
    rx: mpsc::Receiver<Message>,
    cancel: CancellationToken,
    drained: CancellationToken,
) -> impl Stream<Item = Message> + Send + 'static {
    let state = Outbound {
        _guard: cancel.clone().drop_guard(),
        rx,
        cancel,
        drained,
    };
    stream::unfold(state, |mut state| async move {
        let next = tokio::select! {
            biased;
            _ = state.cancel.cancelled() => Next::Stop,
            msg = state.rx.recv() => Next::Queued(msg),
            _ = state.drained.cancelled() => Next::Drain,
        };
        let msg = match next {
            Next::Queued(msg) => msg,
            Next::Drain => state.rx.try_recv().ok(),
            Next::Stop => None,
        }?;
        Some((msg, state))
    })
}

struct Outbound {
    rx: mpsc::Receiver<Message>,
    cancel: CancellationToken,
    drained: CancellationToken,
    _guard: DropGuard,
}

enum Next {
    Queued(Option<Message>),
    Drain,
    Stop,
}
