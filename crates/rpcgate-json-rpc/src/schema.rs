//! Schema validation seam.
//!
//! The dispatcher does not know any schema language; it hands the attached
//! schema and the inbound message to a [`SchemaValidator`] and turns the
//! reported [`ErrorPosition`] into an `InvalidSchema` error.

use std::fmt;

use serde_json::Value;

use crate::error::RpcError;
use crate::message::{Message, RequestMessage};

/// Location and reason of a validation failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorPosition {
    /// Path into the message, e.g. `.params[0]`
    pub path: String,
    pub hint: String,
}

impl ErrorPosition {
    pub fn new(path: impl Into<String>, hint: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            hint: hint.into(),
        }
    }

    pub fn to_rpc_error(&self) -> RpcError {
        RpcError::invalid_schema(format!("Validation Error: {} {}", self.path, self.hint))
    }

    /// Error response for `request` describing this failure
    pub fn to_message(&self, request: &RequestMessage) -> Message {
        self.to_rpc_error().to_message(request)
    }
}

impl fmt::Display for ErrorPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.path, self.hint)
    }
}

pub trait SchemaValidator: Send + Sync {
    /// `None` when `msg` conforms to `schema`
    fn validate(&self, schema: &Value, msg: &Message) -> Option<ErrorPosition>;
}

impl<F> SchemaValidator for F
where
    F: Fn(&Value, &Message) -> Option<ErrorPosition> + Send + Sync,
{
    fn validate(&self, schema: &Value, msg: &Message) -> Option<ErrorPosition> {
        self(schema, msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Params;

    #[test]
    fn test_error_position_message() {
        let req = RequestMessage::new(9i64, "add", Params::default());
        let msg = ErrorPosition::new(".params[0]", "data is not integer").to_message(&req);

        let err = msg.must_error();
        assert_eq!(err.code, -32633);
        assert_eq!(err.message, "Validation Error: .params[0] data is not integer");
        assert_eq!(msg.must_id(), &req.id);
    }
}
