use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::error_codes;
use crate::message::{ErrorMessage, Message, RequestMessage};
use crate::types::RequestId;

/// JSON-RPC error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonRpcErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    InvalidSchema,
}

impl JsonRpcErrorCode {
    pub fn code(&self) -> i64 {
        match self {
            JsonRpcErrorCode::ParseError => error_codes::PARSE_ERROR,
            JsonRpcErrorCode::InvalidRequest => error_codes::INVALID_REQUEST,
            JsonRpcErrorCode::MethodNotFound => error_codes::METHOD_NOT_FOUND,
            JsonRpcErrorCode::InvalidParams => error_codes::INVALID_PARAMS,
            JsonRpcErrorCode::InternalError => error_codes::INTERNAL_ERROR,
            JsonRpcErrorCode::InvalidSchema => error_codes::INVALID_SCHEMA,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            JsonRpcErrorCode::ParseError => "parse error",
            JsonRpcErrorCode::InvalidRequest => "invalid request",
            JsonRpcErrorCode::MethodNotFound => "method not found",
            JsonRpcErrorCode::InvalidParams => "invalid params",
            JsonRpcErrorCode::InternalError => "internal error",
            JsonRpcErrorCode::InvalidSchema => "invalid schema",
        }
    }
}

impl fmt::Display for JsonRpcErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code(), self.message())
    }
}

/// The `error` object of a JSON-RPC error response.
///
/// Also the recognized error shape for handlers: returning an `RpcError`
/// from a handler puts its code, message and data on the wire verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            code,
            message: message.into(),
            data,
        }
    }

    pub fn from_code(code: JsonRpcErrorCode) -> Self {
        Self::new(code.code(), code.message(), None)
    }

    pub fn method_not_found() -> Self {
        Self::from_code(JsonRpcErrorCode::MethodNotFound)
    }

    /// Parameter arity or type mismatch (-32602)
    pub fn params_error(message: impl Into<String>) -> Self {
        Self::new(error_codes::INVALID_PARAMS, message, None)
    }

    pub fn internal_error() -> Self {
        Self::from_code(JsonRpcErrorCode::InternalError)
    }

    pub fn invalid_schema(message: impl Into<String>) -> Self {
        Self::new(error_codes::INVALID_SCHEMA, message, None)
    }

    /// Error response answering `request`, carrying its trace id
    pub fn to_message(&self, request: &RequestMessage) -> Message {
        let mut msg = self.to_message_from_id(request.id.clone());
        msg.set_trace_id(request.trace_id.clone());
        msg
    }

    pub fn to_message_from_id(&self, id: RequestId) -> Message {
        Message::Error(ErrorMessage::new(id, self.clone()))
    }

    pub fn to_value(&self) -> Value {
        let mut map = serde_json::Map::new();
        map.insert("code".to_string(), Value::from(self.code));
        map.insert("message".to_string(), Value::from(self.message.clone()));
        if let Some(data) = &self.data {
            map.insert("data".to_string(), data.clone());
        }
        Value::Object(map)
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for RpcError {}

/// Malformed wire bytes; the message is rejected before dispatch
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("message is not a JSON object")]
    NotObject,

    #[error("method must be a string")]
    InvalidMethod,

    #[error("id must be a number, string or null")]
    InvalidId,

    #[error("params must be an array or an object")]
    InvalidParams,

    #[error("error field must be an object with an integer code")]
    InvalidErrorObject,

    #[error("message has neither method nor result/error")]
    MissingFields,
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("JSON encode error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Registration-time failures; these stop startup
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("handler for method {0} already exist")]
    DuplicateHandler(String),

    #[error("{0} handler already exist")]
    AlreadyRegistered(&'static str),
}

/// Failures surfaced by `Actor::feed` that are never put on the wire
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("notify {method} failed: {message}")]
    Notify { method: String, message: String },

    #[error("notify {method} rejected by schema: {message}")]
    NotifySchema { method: String, message: String },

    #[error("handler for {method} panicked")]
    Panicked { method: String },
}

/// Error returned by a method handler.
///
/// Any error type converts into it with `?`. When the wrapped error is an
/// [`RpcError`] the dispatcher puts it on the wire as is; every other error
/// folds into a generic internal error.
pub struct HandlerError(Box<dyn std::error::Error + Send + Sync + 'static>);

impl HandlerError {
    pub fn msg(message: impl Into<String>) -> Self {
        Self(message.into().into())
    }

    /// The recognized RPC error carried by this error, if any
    pub fn as_rpc_error(&self) -> Option<&RpcError> {
        self.0.downcast_ref::<RpcError>()
    }

    pub fn into_inner(self) -> Box<dyn std::error::Error + Send + Sync + 'static> {
        self.0
    }
}

impl<E> From<E> for HandlerError
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(err: E) -> Self {
        Self(Box::new(err))
    }
}

impl fmt::Debug for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_codes() {
        assert_eq!(JsonRpcErrorCode::ParseError.code(), -32700);
        assert_eq!(JsonRpcErrorCode::MethodNotFound.code(), -32601);
        assert_eq!(JsonRpcErrorCode::InvalidSchema.code(), -32633);
    }

    #[test]
    fn test_any_code_builds_without_panicking() {
        // codes inside and outside the -32099..=-32000 server range alike
        for code in [-32000, -32099, -31999, -32100, 42] {
            let err = RpcError::new(code, "custom", None);
            assert_eq!(err.code, code);
            assert_eq!(err.to_value()["code"], json!(code));
        }
        let internal = RpcError::internal_error();
        assert_eq!(internal.code, error_codes::INTERNAL_ERROR);
        assert_eq!(internal.message, "internal error");
    }

    #[test]
    fn test_handler_error_recognizes_rpc_error() {
        let err: HandlerError = RpcError::new(1000, "custom", Some(json!({"k": 1}))).into();
        let rpc = err.as_rpc_error().unwrap();
        assert_eq!(rpc.code, 1000);
        assert_eq!(rpc.data, Some(json!({"k": 1})));

        let io = std::io::Error::other("disk on fire");
        let err: HandlerError = io.into();
        assert!(err.as_rpc_error().is_none());
    }

    #[test]
    fn test_error_object_value() {
        let value = RpcError::params_error("different params size").to_value();
        assert_eq!(
            value,
            json!({"code": -32602, "message": "different params size"})
        );
    }
}
