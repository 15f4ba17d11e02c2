//! HTTP/2 stream transports.
//!
//! Both flavors carry the whole session on one long-lived POST whose request
//! body streams outbound messages and whose response body streams inbound
//! ones: newline-delimited JSON for `h2://`/`h2c://` URLs, gRPC frames on the
//! gateway's stream method for `grpcs://`/`grpc://`.

use std::convert::Infallible;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::BoxStream;
use futures::{StreamExt, future};
use http::header::{CONTENT_TYPE, TE};
use http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode};
use http_body::Frame;
use http_body_util::{BodyExt, BodyStream, StreamBody};
use hyper::body::Incoming;
use hyper::client::conn::http2;
use hyper_util::rt::{TokioExecutor, TokioIo};
use rpcgate_json_rpc::framing::{GRPC_STREAM_PATH, encode_grpc_frame, encode_line};
use rpcgate_json_rpc::{FrameError, GrpcFrameCodec, Message, MessageLineCodec};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::codec::{Decoder, FramedRead};
use tokio_util::io::StreamReader;
use tracing::{debug, info, warn};
use url::{Position, Url};

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::tls::{self, ALPN_H2};
use crate::transport::{Transport, TransportType, host_port};

type FrameSender = mpsc::Sender<Result<Frame<Bytes>, Infallible>>;
type RequestBody = StreamBody<ReceiverStream<Result<Frame<Bytes>, Infallible>>>;
type Inbound = FramedRead<StreamReader<BoxStream<'static, io::Result<Bytes>>, Bytes>, StreamCodec>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flavor {
    Ndjson,
    Grpc,
}

/// HTTP/2 stream transport, newline-delimited JSON or gRPC framed
pub struct H2Transport {
    flavor: Flavor,
    config: ClientConfig,
    outbound: parking_lot::Mutex<Option<FrameSender>>,
    inbound: Mutex<Option<Inbound>>,
    // hyper tears the connection down once every sender is gone
    sender: parking_lot::Mutex<Option<http2::SendRequest<RequestBody>>>,
    connected: AtomicBool,
}

impl H2Transport {
    /// Newline-delimited JSON over `h2://` (TLS) or `h2c://` (cleartext)
    pub fn ndjson(config: ClientConfig) -> Self {
        Self::with_flavor(Flavor::Ndjson, config)
    }

    /// gRPC bidirectional stream over `grpcs://` (TLS) or `grpc://` (cleartext)
    pub fn grpc(config: ClientConfig) -> Self {
        Self::with_flavor(Flavor::Grpc, config)
    }

    fn with_flavor(flavor: Flavor, config: ClientConfig) -> Self {
        Self {
            flavor,
            config,
            outbound: parking_lot::Mutex::new(None),
            inbound: Mutex::new(None),
            sender: parking_lot::Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    fn is_secure(&self, url: &Url) -> ClientResult<bool> {
        match (self.flavor, url.scheme()) {
            (Flavor::Ndjson, "h2") | (Flavor::Grpc, "grpcs") => Ok(true),
            (Flavor::Ndjson, "h2c") | (Flavor::Grpc, "grpc") => Ok(false),
            (_, scheme) => Err(ClientError::UnsupportedScheme(scheme.to_string())),
        }
    }

    fn build_request(&self, url: &Url, secure: bool, headers: &HeaderMap, body: RequestBody) -> ClientResult<Request<RequestBody>> {
        let path = match self.flavor {
            Flavor::Ndjson => &url[Position::BeforePath..Position::AfterQuery],
            Flavor::Grpc => GRPC_STREAM_PATH,
        };
        let path = if path.is_empty() { "/" } else { path };
        let scheme = if secure { "https" } else { "http" };
        let uri = format!(
            "{}://{}{}",
            scheme,
            &url[Position::BeforeHost..Position::AfterPort],
            path
        );

        let mut request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .body(body)
            .map_err(|e| ClientError::config(format!("stream request: {}", e)))?;
        request.headers_mut().extend(headers.clone());
        let content_type = match self.flavor {
            Flavor::Ndjson => "application/x-ndjson",
            Flavor::Grpc => "application/grpc",
        };
        request
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        if self.flavor == Flavor::Grpc {
            request
                .headers_mut()
                .insert(TE, HeaderValue::from_static("trailers"));
        }
        Ok(request)
    }

    fn codec(&self) -> StreamCodec {
        match self.flavor {
            Flavor::Ndjson => {
                StreamCodec::Lines(MessageLineCodec::with_max_length(self.config.max_frame_size))
            }
            Flavor::Grpc => {
                StreamCodec::Grpc(GrpcFrameCodec::with_max_frame_size(self.config.max_frame_size))
            }
        }
    }
}

#[async_trait]
impl Transport for H2Transport {
    fn transport_type(&self) -> TransportType {
        match self.flavor {
            Flavor::Ndjson => TransportType::H2,
            Flavor::Grpc => TransportType::Grpc,
        }
    }

    async fn connect(&self, url: &Url, headers: &HeaderMap) -> ClientResult<()> {
        let secure = self.is_secure(url)?;
        let (host, port) = host_port(url, if secure { 443 } else { 80 })?;

        let tcp = TcpStream::connect((host.as_str(), port))
            .await
            .map_err(|e| ClientError::ConnectFailed(format!("{}:{}: {}", host, port, e)))?;
        if let Err(err) = tcp.set_nodelay(true) {
            debug!(error = %err, "set_nodelay failed");
        }

        let mut sender = if secure {
            let tls_config = tls::client_config(&self.config, &[ALPN_H2])?;
            let stream = tls::handshake(tls_config, &host, tcp).await?;
            handshake(TokioIo::new(stream)).await?
        } else {
            handshake(TokioIo::new(tcp)).await?
        };

        let (tx, rx) = mpsc::channel(self.config.queue_size.max(1));
        let body = StreamBody::new(ReceiverStream::new(rx));
        let request = self.build_request(url, secure, headers, body)?;

        let response = sender
            .send_request(request)
            .await
            .map_err(|e| ClientError::transport(format!("open stream: {}", e)))?;
        let response = check_response(self.flavor, response).await?;

        let data = BodyStream::new(response.into_body())
            .filter_map(|frame| {
                future::ready(match frame {
                    Ok(frame) => match frame.into_data() {
                        Ok(data) => Some(Ok(data)),
                        Err(frame) => frame.trailers_ref().and_then(trailer_error).map(Err),
                    },
                    Err(err) => Some(Err(io::Error::other(err))),
                })
            })
            .boxed();

        *self.inbound.lock().await = Some(FramedRead::new(StreamReader::new(data), self.codec()));
        *self.outbound.lock() = Some(tx);
        *self.sender.lock() = Some(sender);
        self.connected.store(true, Ordering::SeqCst);
        info!(url = %url, transport = %self.transport_type(), "stream opened");
        Ok(())
    }

    async fn write_message(&self, msg: Message) -> ClientResult<()> {
        let frame = match self.flavor {
            Flavor::Ndjson => encode_line(&msg)?,
            Flavor::Grpc => encode_grpc_frame(&msg)?,
        };
        let tx = self.outbound.lock().clone().ok_or(ClientError::NotConnected)?;
        tx.send(Ok(Frame::data(frame)))
            .await
            .map_err(|_| ClientError::TransportClosed)
    }

    async fn read_message(&self) -> ClientResult<Option<Message>> {
        let mut inbound = self.inbound.lock().await;
        let inbound = inbound.as_mut().ok_or(ClientError::NotConnected)?;
        match inbound.next().await {
            None => Err(ClientError::TransportClosed),
            Some(Ok(msg)) => Ok(Some(msg)),
            Some(Err(err)) => {
                warn!(error = %err, "stream read failed");
                Err(err.into())
            }
        }
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        // ending the request body ends the session on the server
        self.outbound.lock().take();
        self.sender.lock().take();
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

async fn handshake<IO>(io: IO) -> ClientResult<http2::SendRequest<RequestBody>>
where
    IO: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
{
    let (sender, conn) = http2::handshake(TokioExecutor::new(), io)
        .await
        .map_err(|e| ClientError::ConnectFailed(format!("http2 handshake: {}", e)))?;
    tokio::spawn(async move {
        if let Err(err) = conn.await {
            debug!(error = %err, "http2 connection ended");
        }
    });
    Ok(sender)
}

async fn check_response(flavor: Flavor, response: Response<Incoming>) -> ClientResult<Response<Incoming>> {
    let status = response.status();
    if status != StatusCode::OK {
        let body = response
            .into_body()
            .collect()
            .await
            .map(|collected| String::from_utf8_lossy(&collected.to_bytes()).into_owned())
            .unwrap_or_default();
        return Err(ClientError::AbnormalResponse {
            status: status.as_u16(),
            body,
        });
    }
    // a trailers-only gRPC answer carries its status in the headers
    if flavor == Flavor::Grpc {
        if let Some(err) = trailer_error(response.headers()) {
            return Err(ClientError::transport(err.to_string()));
        }
    }
    Ok(response)
}

fn trailer_error(trailers: &HeaderMap) -> Option<io::Error> {
    let status = trailers.get("grpc-status")?.to_str().ok()?;
    if status == "0" {
        return None;
    }
    let message = trailers
        .get("grpc-message")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    Some(io::Error::other(format!("grpc-status {} {}", status, message)))
}

/// Decoder for either stream flavor
#[derive(Debug)]
enum StreamCodec {
    Lines(MessageLineCodec),
    Grpc(GrpcFrameCodec),
}

impl Decoder for StreamCodec {
    type Item = Message;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, FrameError> {
        match self {
            StreamCodec::Lines(codec) => codec.decode(src),
            StreamCodec::Grpc(codec) => codec.decode(src),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Message>, FrameError> {
        match self {
            StreamCodec::Lines(codec) => codec.decode_eof(src),
            StreamCodec::Grpc(codec) => codec.decode_eof(src),
        }
    }
}
