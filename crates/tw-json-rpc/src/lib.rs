//! # JSON-RPC 2.0 Message Types
//!
//! Transport-agnostic JSON-RPC 2.0 envelope types used by the TW client.
//! This crate carries no I/O and no dispatch logic; it defines the wire
//! shapes (requests, notifications, responses, error objects) and the
//! standard error-code constants, leaving framing and routing to the
//! transport layer built on top of it.
//!
//! The TW wire dialect narrows the JSON-RPC 2.0 grammar in two ways:
//! request ids are always integers, and `params` may additionally be a
//! single bare value next to the standard by-position and by-name shapes.

pub mod error;
pub mod message;
pub mod notification;
pub mod request;
pub mod response;
pub mod types;

pub use error::{ErrorObject, JsonRpcErrorCode, JsonRpcErrorResponse};
pub use message::JsonRpcMessage;
pub use notification::JsonRpcNotification;
pub use request::{JsonRpcRequest, RequestParams};
pub use response::JsonRpcResponse;
pub use types::{JsonRpcVersion, RequestId};

/// JSON-RPC 2.0 version constant
pub const JSONRPC_VERSION: &str = "2.0";

/// Standard JSON-RPC 2.0 error codes
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;

    /// Connection-level failure reported to callers of an interrupted call.
    pub const SERVER_ERROR: i64 = -32000;

    // Server error range: -32099 to -32000
    pub const SERVER_ERROR_START: i64 = -32099;
    pub const SERVER_ERROR_END: i64 = -32000;
}
