use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{JsonRpcVersion, RequestId};

/// A successful JSON-RPC response.
///
/// `result` is always present on the wire, even when it is `null` (a void
/// method such as `noop` replies `{"jsonrpc":"2.0","id":0,"result":null}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(rename = "jsonrpc")]
    pub version: JsonRpcVersion,
    pub id: RequestId,
    pub result: Value,
}

impl JsonRpcResponse {
    pub fn new(id: RequestId, result: Value) -> Self {
        Self {
            version: JsonRpcVersion::V2_0,
            id,
            result,
        }
    }

    pub fn null(id: RequestId) -> Self {
        Self::new(id, Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{from_str, json, to_string};

    #[test]
    fn response_round_trip() {
        let response = JsonRpcResponse::new(RequestId(5), json!({"handle": 42}));
        let parsed: JsonRpcResponse = from_str(&to_string(&response).unwrap()).unwrap();
        assert_eq!(parsed, response);
    }

    #[test]
    fn null_result_is_kept_on_the_wire() {
        let response = JsonRpcResponse::null(RequestId(0));
        let json = to_string(&response).unwrap();
        assert_eq!(json, r#"{"jsonrpc":"2.0","id":0,"result":null}"#);
    }
}
