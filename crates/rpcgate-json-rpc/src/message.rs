//! The four JSON-RPC message kinds.
//!
//! Every kind carries a trace id (empty means absent) and, when it came off
//! the wire, the decoded JSON object it was parsed from so non-standard
//! fields stay reachable.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::RpcError;
use crate::types::{Params, RequestId};

type RawObject = Option<Arc<Map<String, Value>>>;

#[derive(Debug, Clone)]
pub struct RequestMessage {
    pub id: RequestId,
    pub method: String,
    pub params: Params,
    pub trace_id: String,
    pub(crate) raw: RawObject,
}

impl RequestMessage {
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: impl Into<Params>) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params: params.into(),
            trace_id: String::new(),
            raw: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NotifyMessage {
    pub method: String,
    pub params: Params,
    pub trace_id: String,
    pub(crate) raw: RawObject,
}

impl NotifyMessage {
    pub fn new(method: impl Into<String>, params: impl Into<Params>) -> Self {
        Self {
            method: method.into(),
            params: params.into(),
            trace_id: String::new(),
            raw: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResultMessage {
    pub id: RequestId,
    pub result: Value,
    pub trace_id: String,
    pub(crate) raw: RawObject,
}

impl ResultMessage {
    pub fn new(id: RequestId, result: Value) -> Self {
        Self {
            id,
            result,
            trace_id: String::new(),
            raw: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ErrorMessage {
    pub id: RequestId,
    pub error: RpcError,
    pub trace_id: String,
    pub(crate) raw: RawObject,
}

impl ErrorMessage {
    pub fn new(id: RequestId, error: RpcError) -> Self {
        Self {
            id,
            error,
            trace_id: String::new(),
            raw: None,
        }
    }
}

/// A JSON-RPC 2.0 message
#[derive(Debug, Clone)]
pub enum Message {
    Request(RequestMessage),
    Notify(NotifyMessage),
    Result(ResultMessage),
    Error(ErrorMessage),
}

impl Message {
    pub fn request(
        id: impl Into<RequestId>,
        method: impl Into<String>,
        params: impl Into<Params>,
    ) -> Self {
        Message::Request(RequestMessage::new(id, method, params))
    }

    pub fn notify(method: impl Into<String>, params: impl Into<Params>) -> Self {
        Message::Notify(NotifyMessage::new(method, params))
    }

    pub fn result(id: impl Into<RequestId>, result: Value) -> Self {
        Message::Result(ResultMessage::new(id.into(), result))
    }

    pub fn error(id: impl Into<RequestId>, error: RpcError) -> Self {
        Message::Error(ErrorMessage::new(id.into(), error))
    }

    /// Result answering `request`; the trace id is carried over
    pub fn result_for(request: &RequestMessage, result: Value) -> Self {
        let mut msg = ResultMessage::new(request.id.clone(), result);
        msg.trace_id = request.trace_id.clone();
        Message::Result(msg)
    }

    /// Error answering `request`; the trace id is carried over
    pub fn error_for(request: &RequestMessage, error: RpcError) -> Self {
        error.to_message(request)
    }

    pub fn is_request(&self) -> bool {
        matches!(self, Message::Request(_))
    }

    pub fn is_notify(&self) -> bool {
        matches!(self, Message::Notify(_))
    }

    pub fn is_result(&self) -> bool {
        matches!(self, Message::Result(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Message::Error(_))
    }

    pub fn is_request_or_notify(&self) -> bool {
        self.is_request() || self.is_notify()
    }

    pub fn is_result_or_error(&self) -> bool {
        self.is_result() || self.is_error()
    }

    /// Id of a Request, Result or Error; `None` for a Notify
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Message::Request(m) => Some(&m.id),
            Message::Result(m) => Some(&m.id),
            Message::Error(m) => Some(&m.id),
            Message::Notify(_) => None,
        }
    }

    /// Method of a Request or Notify
    pub fn method(&self) -> Option<&str> {
        match self {
            Message::Request(m) => Some(&m.method),
            Message::Notify(m) => Some(&m.method),
            _ => None,
        }
    }

    /// Params of a Request or Notify
    pub fn params(&self) -> Option<&Params> {
        match self {
            Message::Request(m) => Some(&m.params),
            Message::Notify(m) => Some(&m.params),
            _ => None,
        }
    }

    /// # Panics
    /// Panics when called on a Notify.
    pub fn must_id(&self) -> &RequestId {
        match self.id() {
            Some(id) => id,
            None => panic!("message is not a request, result or error"),
        }
    }

    /// # Panics
    /// Panics unless the message is a Request or Notify.
    pub fn must_method(&self) -> &str {
        match self.method() {
            Some(method) => method,
            None => panic!("message is not a request or notify"),
        }
    }

    /// # Panics
    /// Panics unless the message is a Request or Notify.
    pub fn must_params(&self) -> &Params {
        match self.params() {
            Some(params) => params,
            None => panic!("message is not a request or notify"),
        }
    }

    /// # Panics
    /// Panics unless the message is a Result.
    pub fn must_result(&self) -> &Value {
        match self {
            Message::Result(m) => &m.result,
            _ => panic!("message is not a result"),
        }
    }

    /// # Panics
    /// Panics unless the message is an Error.
    pub fn must_error(&self) -> &RpcError {
        match self {
            Message::Error(m) => &m.error,
            _ => panic!("message is not an error"),
        }
    }

    /// Copy of this message with a different id; a Notify is returned as is
    pub fn replace_id(&self, id: RequestId) -> Message {
        let mut msg = self.clone();
        match &mut msg {
            Message::Request(m) => m.id = id,
            Message::Result(m) => m.id = id,
            Message::Error(m) => m.id = id,
            Message::Notify(_) => {}
        }
        msg
    }

    pub fn trace_id(&self) -> &str {
        match self {
            Message::Request(m) => &m.trace_id,
            Message::Notify(m) => &m.trace_id,
            Message::Result(m) => &m.trace_id,
            Message::Error(m) => &m.trace_id,
        }
    }

    pub fn set_trace_id(&mut self, trace_id: impl Into<String>) {
        let trace_id = trace_id.into();
        match self {
            Message::Request(m) => m.trace_id = trace_id,
            Message::Notify(m) => m.trace_id = trace_id,
            Message::Result(m) => m.trace_id = trace_id,
            Message::Error(m) => m.trace_id = trace_id,
        }
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.set_trace_id(trace_id);
        self
    }

    /// The JSON object this message was decoded from, if it came off the wire
    pub fn raw(&self) -> Option<&Map<String, Value>> {
        let raw = match self {
            Message::Request(m) => &m.raw,
            Message::Notify(m) => &m.raw,
            Message::Result(m) => &m.raw,
            Message::Error(m) => &m.raw,
        };
        raw.as_deref()
    }

    /// Look up a non-standard top-level field of the decoded payload
    pub fn raw_field(&self, key: &str) -> Option<&Value> {
        self.raw().and_then(|raw| raw.get(key))
    }

    pub(crate) fn set_raw(&mut self, object: Arc<Map<String, Value>>) {
        let raw = Some(object);
        match self {
            Message::Request(m) => m.raw = raw,
            Message::Notify(m) => m.raw = raw,
            Message::Result(m) => m.raw = raw,
            Message::Error(m) => m.raw = raw,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Message::Request(_) => "request",
            Message::Notify(_) => "notify",
            Message::Result(_) => "result",
            Message::Error(_) => "error",
        }
    }
}

// Equality covers the wire-visible fields except the trace id.
impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Message::Request(a), Message::Request(b)) => {
                a.id == b.id && a.method == b.method && a.params == b.params
            }
            (Message::Notify(a), Message::Notify(b)) => {
                a.method == b.method && a.params == b.params
            }
            (Message::Result(a), Message::Result(b)) => a.id == b.id && a.result == b.result,
            (Message::Error(a), Message::Error(b)) => a.id == b.id && a.error == b.error,
            _ => false,
        }
    }
}

impl From<RequestMessage> for Message {
    fn from(msg: RequestMessage) -> Self {
        Message::Request(msg)
    }
}

impl From<NotifyMessage> for Message {
    fn from(msg: NotifyMessage) -> Self {
        Message::Notify(msg)
    }
}

impl From<ResultMessage> for Message {
    fn from(msg: ResultMessage) -> Self {
        Message::Result(msg)
    }
}

impl From<ErrorMessage> for Message {
    fn from(msg: ErrorMessage) -> Self {
        Message::Error(msg)
    }
}
