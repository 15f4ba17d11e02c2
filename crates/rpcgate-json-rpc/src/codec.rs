//! Wire encoding and decoding of [`Message`].

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::JSONRPC_VERSION;
use crate::error::{DecodeError, EncodeError, RpcError};
use crate::message::{ErrorMessage, Message, NotifyMessage, RequestMessage, ResultMessage};
use crate::types::{Params, RequestId};

/// Decode one message from raw JSON bytes
pub fn parse(bytes: &[u8]) -> Result<Message, DecodeError> {
    let value: Value = serde_json::from_slice(bytes)?;
    parse_value(value)
}

/// Decode one message from an already parsed JSON value
pub fn parse_value(value: Value) -> Result<Message, DecodeError> {
    let Value::Object(object) = value else {
        return Err(DecodeError::NotObject);
    };

    let trace_id = match object.get("traceid") {
        Some(Value::String(s)) => s.clone(),
        _ => String::new(),
    };

    let mut msg = match object.get("method") {
        Some(Value::String(method)) => {
            let params = decode_params(object.get("params"))?;
            match object.get("id") {
                Some(id) => {
                    let id = RequestId::from_value(id).ok_or(DecodeError::InvalidId)?;
                    Message::Request(RequestMessage::new(id, method.clone(), params))
                }
                None => Message::Notify(NotifyMessage::new(method.clone(), params)),
            }
        }
        Some(_) => return Err(DecodeError::InvalidMethod),
        None => {
            let id = match object.get("id") {
                Some(id) => RequestId::from_value(id).ok_or(DecodeError::InvalidId)?,
                None => return Err(DecodeError::MissingFields),
            };
            if let Some(result) = object.get("result") {
                Message::Result(ResultMessage::new(id, result.clone()))
            } else if let Some(error) = object.get("error") {
                Message::Error(ErrorMessage::new(id, decode_error_object(error)?))
            } else {
                return Err(DecodeError::MissingFields);
            }
        }
    };

    msg.set_trace_id(trace_id);
    msg.set_raw(Arc::new(object));
    Ok(msg)
}

fn decode_params(value: Option<&Value>) -> Result<Params, DecodeError> {
    match value {
        None | Some(Value::Null) => Ok(Params::default()),
        Some(Value::Array(items)) => Ok(Params::Array(items.clone())),
        Some(Value::Object(map)) => Ok(Params::Object(map.clone())),
        Some(_) => Err(DecodeError::InvalidParams),
    }
}

fn decode_error_object(value: &Value) -> Result<RpcError, DecodeError> {
    let Value::Object(object) = value else {
        return Err(DecodeError::InvalidErrorObject);
    };
    let code = object
        .get("code")
        .and_then(Value::as_i64)
        .ok_or(DecodeError::InvalidErrorObject)?;
    let message = object
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let data = object.get("data").cloned();
    Ok(RpcError::new(code, message, data))
}

/// The JSON object form of a message, `jsonrpc` and `traceid` included
pub fn to_value(msg: &Message) -> Value {
    let mut object = Map::new();
    object.insert("jsonrpc".to_string(), Value::from(JSONRPC_VERSION));

    match msg {
        Message::Request(m) => {
            object.insert("id".to_string(), m.id.to_value());
            object.insert("method".to_string(), Value::from(m.method.clone()));
            object.insert("params".to_string(), m.params.to_value());
        }
        Message::Notify(m) => {
            object.insert("method".to_string(), Value::from(m.method.clone()));
            object.insert("params".to_string(), m.params.to_value());
        }
        Message::Result(m) => {
            object.insert("id".to_string(), m.id.to_value());
            object.insert("result".to_string(), m.result.clone());
        }
        Message::Error(m) => {
            object.insert("id".to_string(), m.id.to_value());
            object.insert("error".to_string(), m.error.to_value());
        }
    }

    if !msg.trace_id().is_empty() {
        object.insert("traceid".to_string(), Value::from(msg.trace_id()));
    }
    Value::Object(object)
}

/// Encode a message as compact JSON bytes
pub fn encode(msg: &Message) -> Result<Vec<u8>, EncodeError> {
    Ok(serde_json::to_vec(&to_value(msg))?)
}

pub fn encode_pretty(msg: &Message) -> Result<Vec<u8>, EncodeError> {
    Ok(serde_json::to_vec_pretty(&to_value(msg))?)
}
