//! # JSON-RPC Runtime Prelude
//!
//! Convenient re-exports of the most commonly used types.
//!
//! ```rust
//! use rpcgate_json_rpc::prelude::*;
//! ```

// Message model
pub use crate::error::{HandlerError, JsonRpcErrorCode, RpcError};
pub use crate::message::{Message, RequestMessage};
pub use crate::types::{Params, RequestId};

// Dispatcher
pub use crate::actor::{Actor, HandlerOptions, Reply, RpcHandler};
pub use crate::context::{ConnectionContext, RpcRequest, TransportKind};
pub use crate::schema::{ErrorPosition, SchemaValidator};

// Standard error codes
pub use crate::error_codes::*;
