//! Process-local method registry.
//!
//! Maps a method name to a handler descriptor: the declared parameter
//! shape plus a thunk that decodes incoming params and produces a result.
//! Used both for application methods and for the notification labels that
//! polled queries, subscriptions and batches reserve on construction.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tw_json_rpc::RequestParams;

use crate::error::{TwError, TwResult};
use crate::protocol::TwType;

/// A declared parameter: name plus the local type category its values
/// must fall into (`Any` disables the check).
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    pub ty: TwType,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, ty: TwType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }

    pub fn any(name: impl Into<String>) -> Self {
        Self::new(name, TwType::Any)
    }
}

/// A registered method handler.
///
/// `invoke` receives the raw params so label handlers can decode whole
/// payload objects; handlers built from plain closures go through
/// [`bind_params`] first.
///
/// Handlers run on the connection's reader task, in wire order. They must
/// not do long work there and must not call back into the same connection
/// (the response could never be read); hand such work to a separate task.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    /// The declared parameter list, in call order.
    fn parameters(&self) -> &[ParamSpec];

    /// Decode the params and produce a result.
    async fn invoke(&self, params: Option<RequestParams>) -> TwResult<Value>;
}

/// Decode incoming params against a declared parameter list.
///
/// By-name objects are read per declared name; arrays are read
/// positionally and must match the declared arity; a single bare value
/// requires exactly one declared parameter.
pub fn bind_params(spec: &[ParamSpec], params: Option<RequestParams>) -> TwResult<Vec<Value>> {
    let args = match params {
        None => {
            if !spec.is_empty() {
                return Err(TwError::InvalidParams(format!(
                    "expected {} parameter(s), got none",
                    spec.len()
                )));
            }
            Vec::new()
        }
        Some(RequestParams::Object(map)) => {
            let mut args = Vec::with_capacity(spec.len());
            for param in spec {
                let value = map.get(&param.name).cloned().ok_or_else(|| {
                    TwError::InvalidParams(format!("missing parameter '{}'", param.name))
                })?;
                args.push(value);
            }
            args
        }
        Some(RequestParams::Array(values)) => {
            if values.len() != spec.len() {
                return Err(TwError::InvalidParams(format!(
                    "expected {} parameter(s), got {}",
                    spec.len(),
                    values.len()
                )));
            }
            values
        }
        Some(RequestParams::Single(value)) => {
            if spec.len() != 1 {
                return Err(TwError::InvalidParams(format!(
                    "expected {} parameter(s), got a single value",
                    spec.len()
                )));
            }
            vec![value]
        }
    };

    for (param, value) in spec.iter().zip(&args) {
        if !param.ty.accepts(value) {
            return Err(TwError::InvalidParams(format!(
                "parameter '{}' does not accept {}",
                param.name, value
            )));
        }
    }
    Ok(args)
}

/// A handler built from a plain closure over decoded arguments.
pub struct FnHandler<F> {
    parameters: Vec<ParamSpec>,
    f: F,
}

impl<F> FnHandler<F>
where
    F: Fn(Vec<Value>) -> TwResult<Value> + Send + Sync,
{
    pub fn new(parameters: Vec<ParamSpec>, f: F) -> Self {
        Self { parameters, f }
    }
}

#[async_trait]
impl<F> MethodHandler for FnHandler<F>
where
    F: Fn(Vec<Value>) -> TwResult<Value> + Send + Sync,
{
    fn parameters(&self) -> &[ParamSpec] {
        &self.parameters
    }

    async fn invoke(&self, params: Option<RequestParams>) -> TwResult<Value> {
        let args = bind_params(&self.parameters, params)?;
        (self.f)(args)
    }
}

/// Thread-safe name → handler table. Registration, lookup and removal may
/// race with dispatch on the reader task.
#[derive(Default)]
pub struct MethodRegistry {
    handlers: Mutex<HashMap<String, Arc<dyn MethodHandler>>>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a handler; returns `false` if the name is already taken.
    pub fn register(&self, name: impl Into<String>, handler: Arc<dyn MethodHandler>) -> bool {
        let name = name.into();
        let mut handlers = self.handlers.lock();
        if handlers.contains_key(&name) {
            return false;
        }
        handlers.insert(name, handler);
        true
    }

    /// Remove a handler; returns `false` if the name was absent.
    pub fn unregister(&self, name: &str) -> bool {
        self.handlers.lock().remove(name).is_some()
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<dyn MethodHandler>> {
        self.handlers.lock().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.lock().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.handlers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo_handler() -> Arc<dyn MethodHandler> {
        Arc::new(FnHandler::new(vec![ParamSpec::any("value")], |mut args| {
            Ok(args.pop().unwrap_or(Value::Null))
        }))
    }

    #[test]
    fn duplicate_registration_fails() {
        let registry = MethodRegistry::new();
        assert!(registry.register("echo", echo_handler()));
        assert!(!registry.register("echo", echo_handler()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn register_then_unregister_leaves_registry_unchanged() {
        let registry = MethodRegistry::new();
        assert!(registry.register("echo", echo_handler()));
        assert!(registry.unregister("echo"));
        assert!(!registry.unregister("echo"));
        assert!(registry.is_empty());
    }

    #[test]
    fn binds_object_params_by_declared_name() {
        let spec = vec![ParamSpec::any("query"), ParamSpec::any("language")];
        let params = serde_json::from_str(r#"{"language":"sql","query":"select 1"}"#).unwrap();
        let args = bind_params(&spec, Some(params)).unwrap();
        assert_eq!(args, vec![json!("select 1"), json!("sql")]);
    }

    #[test]
    fn binds_array_params_positionally() {
        let spec = vec![ParamSpec::any("handle"), ParamSpec::any("limit")];
        let args = bind_params(&spec, Some(RequestParams::Array(vec![json!(42), json!(10)])))
            .unwrap();
        assert_eq!(args, vec![json!(42), json!(10)]);
    }

    #[test]
    fn arity_mismatch_is_invalid_params() {
        let spec = vec![ParamSpec::any("handle")];
        let result = bind_params(&spec, Some(RequestParams::Array(vec![])));
        assert!(matches!(result, Err(TwError::InvalidParams(_))));
    }

    #[test]
    fn single_value_binds_to_a_single_parameter() {
        let spec = vec![ParamSpec::any("value")];
        let args = bind_params(&spec, Some(RequestParams::Single(json!(5)))).unwrap();
        assert_eq!(args, vec![json!(5)]);
    }

    #[test]
    fn typed_parameter_rejects_wrong_runtime_type() {
        let spec = vec![ParamSpec::new("count", TwType::Integer)];
        let result = bind_params(&spec, Some(RequestParams::Array(vec![json!("11")])));
        assert!(matches!(result, Err(TwError::InvalidParams(_))));
    }

    #[tokio::test]
    async fn fn_handler_invokes_thunk() {
        let handler = echo_handler();
        let result = handler
            .invoke(Some(RequestParams::Single(json!("ping"))))
            .await
            .unwrap();
        assert_eq!(result, json!("ping"));
    }
}
