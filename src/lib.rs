//! # jsonrpc-engine

//! A transport-agnostic JSON-RPC 2.0 message engine: request and batch
//! validation, dispatch through a method registry, and response envelopes
//! with the standard error taxonomy.
//!
//! ```
//! use jsonrpc_engine::{method::typed, ServerBuilder};
//! use serde_json::{json, Value};
//! use std::convert::Infallible;
//!
//! fn add(numbers: Vec<i64>) -> Result<i64, Infallible> {
//!     Ok(numbers.into_iter().sum())
//! }
//!
//! let server = ServerBuilder::new().method("add", typed(add)).build();
//! let reply = server
//!     .handle(r#"{"jsonrpc": "2.0", "method": "add", "params": [1, 2], "id": 1}"#)
//!     .unwrap();
//! let reply: Value = serde_json::from_str(&reply).unwrap();
//! assert_eq!(reply, json!({"jsonrpc": "2.0", "result": 3, "id": 1}));
//! ```

pub mod batch;
pub mod codec;
pub mod config;
pub mod error;
pub mod manager;
pub mod method;
pub mod registry;
pub mod request;
pub mod response;
pub mod server;

/// The protocol version every envelope carries in its `jsonrpc` member.
pub const JSONRPC_VERSION: &str = "2.0";

pub use batch::{BatchRequest, BatchResponse};
pub use codec::{Codec, JsonCodec};
pub use config::Config;
pub use error::{Error, ErrorCode, ErrorObject};
pub use manager::ResponseManager;
pub use method::{Arguments, Method, MethodError};
pub use registry::{Dispatch, MethodRegistry};
pub use request::{Params, Request, RequestId};
pub use response::{Reply, Response};
pub use server::{Server, ServerBuilder};
