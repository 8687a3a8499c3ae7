use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{JsonRpcVersion, RequestId};

/// Parameters for a JSON-RPC request or notification.
///
/// The TW server produces and accepts three shapes: by-position arrays,
/// by-name objects, and a single bare value transmitted as given. The
/// variants are tried in declaration order during deserialization, so the
/// catch-all `Single` shape must stay last.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RequestParams {
    /// Positional parameters as an array
    Array(Vec<Value>),
    /// Named parameters as an object
    Object(Map<String, Value>),
    /// A single bare value
    Single(Value),
}

impl RequestParams {
    /// Get a parameter by name (for object params)
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            RequestParams::Object(map) => map.get(key),
            _ => None,
        }
    }

    /// Get a parameter by index (for array params)
    pub fn get_index(&self, index: usize) -> Option<&Value> {
        match self {
            RequestParams::Array(vec) => vec.get(index),
            _ => None,
        }
    }

    /// Number of carried parameters (1 for a bare value)
    pub fn len(&self) -> usize {
        match self {
            RequestParams::Array(vec) => vec.len(),
            RequestParams::Object(map) => map.len(),
            RequestParams::Single(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            RequestParams::Array(vec) => vec.is_empty(),
            RequestParams::Object(map) => map.is_empty(),
            RequestParams::Single(_) => false,
        }
    }

    /// View the parameters as one JSON value, whatever their shape.
    pub fn to_value(&self) -> Value {
        match self {
            RequestParams::Array(vec) => Value::Array(vec.clone()),
            RequestParams::Object(map) => Value::Object(map.clone()),
            RequestParams::Single(value) => value.clone(),
        }
    }
}

impl From<Vec<Value>> for RequestParams {
    fn from(vec: Vec<Value>) -> Self {
        RequestParams::Array(vec)
    }
}

impl From<Map<String, Value>> for RequestParams {
    fn from(map: Map<String, Value>) -> Self {
        RequestParams::Object(map)
    }
}

impl From<Value> for RequestParams {
    fn from(value: Value) -> Self {
        match value {
            Value::Array(vec) => RequestParams::Array(vec),
            Value::Object(map) => RequestParams::Object(map),
            other => RequestParams::Single(other),
        }
    }
}

/// A JSON-RPC request (carries an id and expects a response)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(rename = "jsonrpc")]
    pub version: JsonRpcVersion,
    pub id: RequestId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<RequestParams>,
}

impl JsonRpcRequest {
    pub fn new(id: RequestId, method: impl Into<String>, params: Option<RequestParams>) -> Self {
        Self {
            version: JsonRpcVersion::V2_0,
            id,
            method: method.into(),
            params,
        }
    }

    /// Create a request with positional parameters
    pub fn with_array_params(id: RequestId, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self::new(id, method, Some(RequestParams::Array(params)))
    }

    /// Create a request with named parameters
    pub fn with_object_params(
        id: RequestId,
        method: impl Into<String>,
        params: Map<String, Value>,
    ) -> Self {
        Self::new(id, method, Some(RequestParams::Object(params)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{from_str, json, to_string};

    #[test]
    fn request_round_trip() {
        let request = JsonRpcRequest::with_array_params(RequestId(0), "noop", vec![]);
        let json = to_string(&request).unwrap();
        assert_eq!(json, r#"{"jsonrpc":"2.0","id":0,"method":"noop","params":[]}"#);
        let parsed: JsonRpcRequest = from_str(&json).unwrap();
        assert_eq!(parsed, request);
    }

    #[test]
    fn absent_params_are_omitted() {
        let request = JsonRpcRequest::new(RequestId(3), "runtime", None);
        let json = to_string(&request).unwrap();
        assert!(!json.contains("params"));
        assert!(!json.contains("null"));
    }

    #[test]
    fn params_shapes_deserialize_distinctly() {
        let array: RequestParams = from_str("[1,2]").unwrap();
        assert!(matches!(array, RequestParams::Array(_)));

        let object: RequestParams = from_str(r#"{"a":1}"#).unwrap();
        assert!(matches!(object, RequestParams::Object(_)));

        let single: RequestParams = from_str("17").unwrap();
        assert_eq!(single, RequestParams::Single(json!(17)));
    }

    #[test]
    fn params_accessors() {
        let params: RequestParams = from_str(r#"{"limit":10}"#).unwrap();
        assert_eq!(params.get("limit"), Some(&json!(10)));
        assert_eq!(params.get_index(0), None);

        let params: RequestParams = from_str(r#"[42,null]"#).unwrap();
        assert_eq!(params.get_index(0), Some(&json!(42)));
        assert_eq!(params.len(), 2);
    }
}
