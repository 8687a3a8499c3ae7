//! Wire payload types exchanged with the TW server, and the mapping from
//! server type names to local type categories.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

/// Query language accepted by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryLanguage {
    Sql,
    Fol,
}

impl fmt::Display for QueryLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryLanguage::Sql => f.write_str("sql"),
            QueryLanguage::Fol => f.write_str("fol"),
        }
    }
}

/// A query: text, language, and the namespace (schema) it runs against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    pub text: String,
    pub language: QueryLanguage,
    pub namespace: String,
}

impl QuerySpec {
    pub fn new(
        text: impl Into<String>,
        language: QueryLanguage,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            text: text.into(),
            language,
            namespace: namespace.into(),
        }
    }

    pub fn sql(text: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self::new(text, QueryLanguage::Sql, namespace)
    }

    pub fn fol(text: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self::new(text, QueryLanguage::Fol, namespace)
    }

    /// The by-name params common to every query-bearing request:
    /// `query`, `language`, `namespace`.
    pub(crate) fn wire_params(&self) -> serde_json::Map<String, Value> {
        let mut params = serde_json::Map::new();
        params.insert("query".into(), Value::String(self.text.clone()));
        params.insert("language".into(), Value::String(self.language.to_string()));
        params.insert("namespace".into(), Value::String(self.namespace.clone()));
        params
    }
}

/// Optional per-query resource restriction: row limit and server-side
/// time limit (seconds).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Restriction {
    pub limit: Option<i64>,
    pub timelimit: Option<i64>,
}

impl Restriction {
    pub fn limit(limit: i64) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    pub fn with_timelimit(mut self, timelimit: i64) -> Self {
        self.timelimit = Some(timelimit);
        self
    }
}

/// Local type categories a server column or parameter maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TwType {
    /// 64-bit signed integer
    Integer,
    /// 64-bit float (also accepts 32-bit)
    Double,
    /// Any numeric
    Number,
    Boolean,
    Text,
    DateTime,
    Interval,
    /// Unknown or unconstrained
    Any,
}

impl TwType {
    /// Map a server signature type name to its local category. Empty and
    /// unrecognized names map to `Any`.
    pub fn from_server_name(name: &str) -> TwType {
        match name {
            "integer" => TwType::Integer,
            "double" => TwType::Double,
            "number" => TwType::Number,
            "boolean" => TwType::Boolean,
            "stringcase" | "stringnocase" | "stringagnostic" => TwType::Text,
            "date" | "time" | "timestamp" => TwType::DateTime,
            "interval" => TwType::Interval,
            _ => TwType::Any,
        }
    }

    /// Whether a JSON value is acceptable for this category.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            TwType::Integer => value.as_i64().is_some() || value.as_u64().is_some(),
            TwType::Double => value.as_f64().is_some() && value.as_i64().is_none(),
            TwType::Number => value.is_number(),
            TwType::Boolean => value.is_boolean(),
            TwType::Text => value.is_string(),
            TwType::DateTime => value.is_string(),
            TwType::Interval => value.is_string() || value.is_number(),
            TwType::Any => true,
        }
    }
}

impl fmt::Display for TwType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TwType::Integer => "integer",
            TwType::Double => "double",
            TwType::Number => "number",
            TwType::Boolean => "boolean",
            TwType::Text => "string",
            TwType::DateTime => "date-time",
            TwType::Interval => "interval",
            TwType::Any => "any",
        };
        f.write_str(name)
    }
}

/// One column of a query signature: `[name, serverType]` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureElement(pub String, pub String);

impl SignatureElement {
    pub fn name(&self) -> &str {
        &self.0
    }

    pub fn server_type(&self) -> &str {
        &self.1
    }

    pub fn local_type(&self) -> TwType {
        TwType::from_server_name(&self.1)
    }
}

/// Result of `execute-query`, `create-resultset` and
/// `next-resultset-batch`: one batch of rows plus streaming state.
///
/// `handle` is absent when the whole result fit in this batch.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", bound = "T: DeserializeOwned")]
pub struct ExecuteQueryResult<T> {
    #[serde(default)]
    pub handle: Option<i64>,
    #[serde(default = "Vec::new")]
    pub tuples: Vec<T>,
    #[serde(default)]
    pub exhausted: bool,
    #[serde(default)]
    pub signature: Vec<SignatureElement>,
}

/// Input half of a prepared query's signature: slot names plus, per slot,
/// the server type names the slot accepts.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InputSignature {
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub types: Vec<Vec<String>>,
}

/// Result of `prepare-query`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreparedQueryRegistration {
    pub handle: i64,
    #[serde(default)]
    pub input_signature: InputSignature,
    #[serde(default)]
    pub output_signature: Vec<SignatureElement>,
    #[serde(default)]
    pub uses_named_parameters: bool,
}

/// Result of `create-polled-query`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolledQueryRegistration {
    pub handle: i64,
}

/// A server-detected change between successive polls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowsDelta<T> {
    #[serde(default = "Vec::new")]
    pub added: Vec<T>,
    #[serde(default = "Vec::new")]
    pub deleted: Vec<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl<T> Default for RowsDelta<T> {
    fn default() -> Self {
        Self {
            added: Vec::new(),
            deleted: Vec::new(),
            timestamp: None,
        }
    }
}

/// An error notification for a polled query (a scheduled poll failed or
/// was skipped because the prior one had not completed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollFailure {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// A coalesced batch-subscription notification: one server-side
/// transaction's matches, grouped per member label.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchUpdate {
    #[serde(rename = "update#", default)]
    pub update: u64,
    #[serde(default)]
    pub matches: Vec<BatchMatch>,
}

/// The tuples one member produced within a batch update.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchMatch {
    pub label: String,
    #[serde(default)]
    pub tuples: Vec<Value>,
}

/// Server runtime statistics, `[runTime, gcTime, bytes]` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeMeasure {
    pub run_time: i64,
    pub gc_time: i64,
    pub bytes: i64,
}

impl Serialize for RuntimeMeasure {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (self.run_time, self.gc_time, self.bytes).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for RuntimeMeasure {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // A tuple deserializer rejects arrays of any other length.
        let (run_time, gc_time, bytes) = <(i64, i64, i64)>::deserialize(deserializer)?;
        Ok(Self {
            run_time,
            gc_time,
            bytes,
        })
    }
}

/// One group of related tables: `[name, symbol, [element...]]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelDataGroup(pub String, pub String, pub Vec<RelDataElement>);

impl RelDataGroup {
    pub fn name(&self) -> &str {
        &self.0
    }

    pub fn symbol(&self) -> &str {
        &self.1
    }

    pub fn elements(&self) -> &[RelDataElement] {
        &self.2
    }
}

/// One table description:
/// `[name, signatureNames[], signatureTypes[], usage, extra[], description]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelDataElement(
    pub String,
    pub Vec<String>,
    pub Vec<String>,
    pub Value,
    pub Vec<Value>,
    pub String,
);

impl RelDataElement {
    pub fn name(&self) -> &str {
        &self.0
    }

    pub fn signature_names(&self) -> &[String] {
        &self.1
    }

    pub fn signature_types(&self) -> &[String] {
        &self.2
    }

    pub fn description(&self) -> &str {
        &self.5
    }
}
