//! Error taxonomy for TW client operations.
//!
//! Every kind carries a JSON-RPC numeric code: the five standard codes,
//! the -32000 connection-loss code, -32701 for subscription state
//! violations, and a library-defined band (-32801..) for client-side
//! misuse that never reaches the wire.

use serde_json::Value;
use thiserror::Error;
use tw_json_rpc::{error_codes, ErrorObject};

/// Result type for TW client operations
pub type TwResult<T> = Result<T, TwError>;

/// Comprehensive error type for TW client operations
#[derive(Error, Debug)]
pub enum TwError {
    /// TCP connect failed (endpoint refused or unreachable)
    #[error("connect error: {0}")]
    Connect(#[source] std::io::Error),

    /// The connection closed while a call was outstanding, or an
    /// operation was attempted on a torn-down engine.
    #[error("Connection to server lost.")]
    Disconnected,

    /// `call`/`notify` before `start()`
    #[error("RPC engine not started")]
    NotStarted,

    /// Bytes on the wire were not valid JSON, or a result failed to decode
    #[error("parse error: {0}")]
    Parse(String),

    /// Request envelope malformed
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Unknown method / missing handler
    #[error("method not found: {0}")]
    MethodNotFound(String),

    /// Params fail to decode to the handler signature
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// Library-internal decoding failure
    #[error("internal error: {0}")]
    Internal(String),

    /// Error reported by the server for a call
    #[error("server error {code}: {message}")]
    Server {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    /// Batch/active subscription invariant violated
    #[error("subscription error: {0}")]
    Subscription(String),

    /// Prepared-query parameter value has an unacceptable runtime type
    #[error("parameter '{name}' does not accept this value (expects {expects})")]
    ParamType { name: String, expects: String },

    /// Prepared-query parameter name not present in the input signature
    #[error("unknown parameter: {0}")]
    UnknownParam(String),

    /// Prepared-query executed before every slot was set
    #[error("not all parameters have been instantiated")]
    IncompleteParams,

    /// Calendar schedule failed validation
    #[error("invalid schedule: {0}")]
    Schedule(String),

    /// Result-set invariant violated, or a fetch failed mid-stream
    #[error("result set error: {0}")]
    ResultSet(Box<TwError>),

    /// Operation on a disposed object
    #[error("{0} has been disposed")]
    Disposed(&'static str),

    /// Operation requires a server-side handle that was never assigned
    #[error("object is not registered with the server")]
    NotRegistered,

    /// Operation not supported by this object
    #[error("{0} is not supported")]
    NotSupported(&'static str),

    /// The server rejected a query during validation
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// A locally applied deadline expired before the response arrived
    #[error("operation timed out")]
    Timeout,
}

/// Library-defined error codes, outside the JSON-RPC reserved range.
pub mod client_codes {
    pub const SUBSCRIPTION_ERROR: i64 = -32701;
    pub const PARAM_TYPE: i64 = -32801;
    pub const UNKNOWN_PARAM: i64 = -32802;
    pub const INCOMPLETE_PARAMS: i64 = -32803;
    pub const SCHEDULE_ERROR: i64 = -32804;
    pub const RESULT_SET_ERROR: i64 = -32805;
    pub const DISPOSED: i64 = -32806;
    pub const NOT_STARTED: i64 = -32807;
    pub const NOT_REGISTERED: i64 = -32808;
    pub const NOT_SUPPORTED: i64 = -32809;
    pub const INVALID_QUERY: i64 = -32810;
    pub const CONNECT_ERROR: i64 = -32811;
    pub const TIMEOUT: i64 = -32812;
}

impl TwError {
    /// The JSON-RPC numeric code for this error kind.
    pub fn code(&self) -> i64 {
        match self {
            TwError::Connect(_) => client_codes::CONNECT_ERROR,
            TwError::Disconnected => error_codes::SERVER_ERROR,
            TwError::NotStarted => client_codes::NOT_STARTED,
            TwError::Parse(_) => error_codes::PARSE_ERROR,
            TwError::InvalidRequest(_) => error_codes::INVALID_REQUEST,
            TwError::MethodNotFound(_) => error_codes::METHOD_NOT_FOUND,
            TwError::InvalidParams(_) => error_codes::INVALID_PARAMS,
            TwError::Internal(_) => error_codes::INTERNAL_ERROR,
            TwError::Server { code, .. } => *code,
            TwError::Subscription(_) => client_codes::SUBSCRIPTION_ERROR,
            TwError::ParamType { .. } => client_codes::PARAM_TYPE,
            TwError::UnknownParam(_) => client_codes::UNKNOWN_PARAM,
            TwError::IncompleteParams => client_codes::INCOMPLETE_PARAMS,
            TwError::Schedule(_) => client_codes::SCHEDULE_ERROR,
            TwError::ResultSet(_) => client_codes::RESULT_SET_ERROR,
            TwError::Disposed(_) => client_codes::DISPOSED,
            TwError::NotRegistered => client_codes::NOT_REGISTERED,
            TwError::NotSupported(_) => client_codes::NOT_SUPPORTED,
            TwError::InvalidQuery(_) => client_codes::INVALID_QUERY,
            TwError::Timeout => client_codes::TIMEOUT,
        }
    }

    /// Rebuild the client-side kind for an error object received in a
    /// response, matching on the standard codes.
    pub fn from_error_object(error: ErrorObject) -> Self {
        match error.code {
            error_codes::PARSE_ERROR => TwError::Parse(error.message),
            error_codes::INVALID_REQUEST => TwError::InvalidRequest(error.message),
            error_codes::METHOD_NOT_FOUND => TwError::MethodNotFound(error.message),
            error_codes::INVALID_PARAMS => TwError::InvalidParams(error.message),
            error_codes::INTERNAL_ERROR => TwError::Internal(error.message),
            client_codes::SUBSCRIPTION_ERROR => TwError::Subscription(error.message),
            code => TwError::Server {
                code,
                message: error.message,
                data: error.data,
            },
        }
    }

    /// Render this error as a JSON-RPC error object, for responses to
    /// inbound requests whose handler failed.
    pub fn to_error_object(&self) -> ErrorObject {
        let data = match self {
            TwError::Server { data, .. } => data.clone(),
            _ => None,
        };
        ErrorObject::with_code(self.code(), self.to_string(), data)
    }

    /// True when the error means the connection is gone for good.
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, TwError::Disconnected | TwError::Connect(_))
    }
}

impl From<serde_json::Error> for TwError {
    fn from(error: serde_json::Error) -> Self {
        TwError::Parse(error.to_string())
    }
}
