//! Unary HTTP client: one POST per message

use http::header::{ACCEPT, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue, StatusCode};
use parking_lot::RwLock;
use rpcgate_json_rpc::{Message, TRACE_ID_HEADER, encode, parse};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use crate::client::unwrap_result;
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

/// JSON-RPC over plain `http://` or `https://` POSTs
#[derive(Debug)]
pub struct H1Client {
    url: Url,
    http: reqwest::Client,
    extra_headers: RwLock<HeaderMap>,
}

impl H1Client {
    pub fn new(url: &str, config: ClientConfig) -> ClientResult<Self> {
        let url = Url::parse(url)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ClientError::UnsupportedScheme(url.scheme().to_string()));
        }

        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(config.timeouts.request)
            .connect_timeout(config.timeouts.connect);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.as_str());
        }
        for cert in &config.root_certificates {
            builder = builder.add_root_certificate(reqwest::Certificate::from_der(cert.as_ref())?);
        }

        Ok(Self {
            url,
            http: builder.build()?,
            extra_headers: RwLock::new(config.header_map()?),
        })
    }

    pub fn server_url(&self) -> &Url {
        &self.url
    }

    pub fn set_extra_headers(&self, headers: HeaderMap) {
        *self.extra_headers.write() = headers;
    }

    /// POST a request and return the Result or Error it produced.
    ///
    /// The trace id travels in the `X-Trace-Id` header and is put back on
    /// the returned message.
    pub async fn call(&self, request: Message) -> ClientResult<Message> {
        self.call_with_headers(request, &HeaderMap::new()).await
    }

    /// [`call`](Self::call) with `headers` added to this POST only
    pub async fn call_with_headers(&self, request: Message, headers: &HeaderMap) -> ClientResult<Message> {
        if !request.is_request() {
            return Err(ClientError::InvalidMessage("call requires a request message"));
        }
        let trace_id = request.trace_id().to_string();
        let response = self.post(request, headers).await?;

        let reply_trace = response
            .headers()
            .get(TRACE_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await.map_err(map_reqwest)?;
        let mut msg = parse(&body)?;
        msg.set_trace_id(reply_trace.unwrap_or(trace_id));
        Ok(msg)
    }

    /// POST a message without expecting a JSON-RPC answer
    pub async fn send(&self, msg: Message) -> ClientResult<()> {
        self.post(msg, &HeaderMap::new()).await.map(|_| ())
    }

    /// Call and decode the result into `T`; an Error answer becomes
    /// [`ClientError::Rpc`]
    pub async fn unwrap_call<T: DeserializeOwned>(&self, request: Message) -> ClientResult<T> {
        unwrap_result(self.call(request).await?)
    }

    async fn post(&self, mut msg: Message, call_headers: &HeaderMap) -> ClientResult<reqwest::Response> {
        let trace_id = msg.trace_id().to_string();
        msg.set_trace_id(String::new());
        let body = encode(&msg)?;

        let mut request = self
            .http
            .post(self.url.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .headers(self.extra_headers.read().clone())
            .headers(call_headers.clone())
            .body(body);
        if !trace_id.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&trace_id) {
                request = request.header(TRACE_ID_HEADER, value);
            }
        }

        debug!(url = %self.url, kind = msg.kind(), "post");
        let response = request.send().await.map_err(map_reqwest)?;
        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, "abnormal response");
            return Err(ClientError::AbnormalResponse {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

fn map_reqwest(err: reqwest::Error) -> ClientError {
    if err.is_timeout() {
        ClientError::Timeout
    } else if err.is_connect() {
        ClientError::ConnectFailed(err.to_string())
    } else {
        ClientError::Http(err)
    }
}
