//! # JSON-RPC 2.0 Runtime Core
//!
//! The transport-agnostic half of rpcgate: the message model with its wire
//! encoding contract, and the [`Actor`] dispatcher that routes messages to
//! registered handlers.
//!
//! ## Features
//! - Closed [`Message`] type covering Request, Notify, Result and Error
//! - Lossless number decoding, present-but-null ids kept as requests
//! - Trace-id propagation across transport hops
//! - Plain and strongly-typed handlers, schema gating, panic containment
//! - Line and gRPC framing shared by the streaming transports

pub mod actor;
pub mod codec;
pub mod context;
pub mod error;
pub mod framing;
pub mod message;
pub mod prelude;
pub mod schema;
pub mod typed;
pub mod types;
pub mod util;

// Re-export main types
pub use actor::{
    Actor, CloseCallback, FnHandler, HandlerOptions, MissingCallback, Reply, RpcHandler,
};
pub use codec::{encode, encode_pretty, parse, parse_value};
pub use context::{ConnectionContext, RpcRequest, SessionClosed, SessionSender, TransportKind};
pub use error::{
    DecodeError, DispatchError, EncodeError, HandlerError, JsonRpcErrorCode, RegistrationError,
    RpcError,
};
pub use framing::{FrameError, GrpcFrameCodec, MessageLineCodec};
pub use message::{ErrorMessage, Message, NotifyMessage, RequestMessage, ResultMessage};
pub use schema::{ErrorPosition, SchemaValidator};
pub use typed::{HandlerShape, TypedHandler};
pub use types::{Params, RequestId};
pub use util::{decode_params, guess_json, new_uuid};

/// JSON-RPC 2.0 version constant
pub const JSONRPC_VERSION: &str = "2.0";

/// Header carrying the trace id out-of-band on HTTP transports (`X-Trace-Id`)
pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// Standard JSON-RPC 2.0 error codes
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;

    /// Raised when a message fails schema validation
    pub const INVALID_SCHEMA: i64 = -32633;

    // Server error range: -32099 to -32000
    pub const SERVER_ERROR_START: i64 = -32099;
    pub const SERVER_ERROR_END: i64 = -32000;
}
