//! # rpcgate Client Library
//!
//! JSON-RPC clients for the rpcgate gateway. A unary [`H1Client`] posts one
//! message per HTTP request; a [`StreamingClient`] keeps one connection open
//! over WebSocket, HTTP/2 or gRPC, matches responses to pending calls and
//! hands server pushes to a callback.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rpcgate_client::{ClientConfig, RpcClientExt, new_client};
//! use rpcgate_json_rpc::Message;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = new_client("ws://127.0.0.1:8000", ClientConfig::default())?;
//!     let echoed: i64 = client
//!         .unwrap_call(Message::request(1i64, "echoAny", vec![json!(1991), json!(1992)]))
//!         .await?;
//!     assert_eq!(echoed, 1991);
//!     Ok(())
//! }
//! ```
//!
//! ## URL schemes
//!
//! | scheme | client | transport |
//! |---|---|---|
//! | `http`, `https` | [`H1Client`] | one POST per message |
//! | `ws`, `wss` | [`StreamingClient`] | WebSocket text frames |
//! | `h2c`, `h2` | [`StreamingClient`] | newline-delimited JSON on one HTTP/2 stream |
//! | `grpc`, `grpcs` | [`StreamingClient`] | gRPC bidirectional stream |

pub mod client;
pub mod config;
pub mod error;
pub mod h1;
pub mod prelude;
pub mod streaming;
pub mod transport;
pub mod watch;

mod tls;

// Re-export main types
pub use client::{RpcClient, RpcClientExt, new_client, unwrap_result};
pub use config::{ClientConfig, RetryConfig, TimeoutConfig};
pub use error::{ClientError, ClientResult};
pub use h1::H1Client;
pub use streaming::{MessageCallback, StreamingClient, TransportFactory};
pub use watch::watch;

// Re-export transport types
pub use transport::{Transport, TransportType};
