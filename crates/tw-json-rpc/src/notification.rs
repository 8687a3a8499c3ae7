use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::request::RequestParams;
use crate::types::JsonRpcVersion;

/// A JSON-RPC notification (a request without an id; no response follows)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    #[serde(rename = "jsonrpc")]
    pub version: JsonRpcVersion,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<RequestParams>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<RequestParams>) -> Self {
        Self {
            version: JsonRpcVersion::V2_0,
            method: method.into(),
            params,
        }
    }

    pub fn with_array_params(method: impl Into<String>, params: Vec<Value>) -> Self {
        Self::new(method, Some(RequestParams::Array(params)))
    }

    pub fn with_object_params(method: impl Into<String>, params: Map<String, Value>) -> Self {
        Self::new(method, Some(RequestParams::Object(params)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{from_str, to_string};

    #[test]
    fn notification_has_no_id() {
        let notification = JsonRpcNotification::new("heartbeat", None);
        let json = to_string(&notification).unwrap();
        assert!(!json.contains("\"id\""));
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"method\":\"heartbeat\""));
    }

    #[test]
    fn notification_round_trip() {
        let mut params = Map::new();
        params.insert("added".into(), serde_json::json!([[7]]));
        let notification = JsonRpcNotification::with_object_params("poll0", params);
        let parsed: JsonRpcNotification = from_str(&to_string(&notification).unwrap()).unwrap();
        assert_eq!(parsed, notification);
    }
}
