//! # rpcgate Client Prelude
//!
//! ```rust
//! use rpcgate_client::prelude::*;
//! ```

// Core client types
pub use crate::client::{RpcClient, RpcClientExt, new_client, unwrap_result};
pub use crate::config::{ClientConfig, RetryConfig, TimeoutConfig};
pub use crate::error::{ClientError, ClientResult};
pub use crate::h1::H1Client;
pub use crate::streaming::StreamingClient;
pub use crate::watch::watch;

// Transport types
pub use crate::transport::{Transport, TransportType};

// Message model
pub use rpcgate_json_rpc::{Message, RequestId, RpcError};

pub use std::time::Duration;
