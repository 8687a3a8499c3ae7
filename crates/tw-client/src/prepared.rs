//! Parameterized server-side queries.
//!
//! `prepare-query` registers the statement and returns its input
//! signature; parameter slots start out unset and every slot must be set
//! before `create-resultset` may run. Result sets produced here are
//! tracked so disposing the prepared query disposes them too.

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::marker::PhantomData;
use std::sync::{Arc, Weak};
use tracing::debug;
use tw_json_rpc::RequestParams;

use crate::client::TwClient;
use crate::error::{TwError, TwResult};
use crate::protocol::{
    ExecuteQueryResult, PreparedQueryRegistration, QueryLanguage, QuerySpec, SignatureElement,
    TwType,
};
use crate::resultset::{ResultSet, ResultSetShared};

/// One input slot: its declared name, the type categories it accepts,
/// and the currently bound value (unset until `set`).
struct ParamSlot {
    name: String,
    accepts: Vec<TwType>,
    value: Option<Value>,
}

impl ParamSlot {
    fn accepts_value(&self, value: &Value) -> bool {
        self.accepts.is_empty() || self.accepts.iter().any(|ty| ty.accepts(value))
    }

    fn expects(&self) -> String {
        if self.accepts.is_empty() {
            "any".to_string()
        } else {
            self.accepts
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" | ")
        }
    }
}

struct PreparedState {
    handle: Option<i64>,
    slots: Vec<ParamSlot>,
    uses_named_parameters: bool,
    output_signature: Vec<SignatureElement>,
    fetch_size: i64,
    timelimit: Option<i64>,
    outstanding: Vec<Weak<ResultSetShared>>,
    disposed: bool,
}

/// A prepared, parameterized query whose executions stream rows of `T`.
pub struct PreparedQuery<T> {
    client: Arc<TwClient>,
    query: QuerySpec,
    state: Mutex<PreparedState>,
    _row: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> PreparedQuery<T> {
    /// Register the statement on the server and build the local slots.
    pub(crate) async fn register(client: Arc<TwClient>, query: QuerySpec) -> TwResult<Self> {
        let params = RequestParams::Object(query.wire_params());
        let registration: PreparedQueryRegistration =
            client.call("prepare-query", Some(params)).await?;

        let PreparedQueryRegistration {
            handle,
            input_signature,
            output_signature,
            uses_named_parameters,
        } = registration;

        let mut types = input_signature.types.into_iter();
        let slots = input_signature
            .names
            .into_iter()
            .map(|name| ParamSlot {
                name,
                accepts: types
                    .next()
                    .unwrap_or_default()
                    .iter()
                    .map(|ty| TwType::from_server_name(ty))
                    .collect(),
                value: None,
            })
            .collect();

        client.track_prepared(handle);
        debug!(handle, query = %query.text, "prepared query registered");

        Ok(Self {
            client: client.clone(),
            query,
            state: Mutex::new(PreparedState {
                handle: Some(handle),
                slots,
                uses_named_parameters,
                output_signature,
                fetch_size: client.default_fetch_size(),
                timelimit: client.default_timelimit(),
                outstanding: Vec::new(),
                disposed: false,
            }),
            _row: PhantomData,
        })
    }

    /// Bind a named parameter. Name lookup is case-insensitive. Only
    /// valid when the statement uses named parameters.
    pub fn set(&self, name: &str, value: impl Serialize) -> TwResult<()> {
        let value = to_wire_value(value)?;
        let mut state = self.state.lock();
        if state.disposed {
            return Err(TwError::Disposed("prepared query"));
        }
        if !state.uses_named_parameters {
            return Err(TwError::NotSupported(
                "named parameters on a positional statement",
            ));
        }
        let language = self.query.language;
        let slot = state
            .slots
            .iter_mut()
            .find(|slot| slot.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| TwError::UnknownParam(name.to_string()))?;
        bind_slot(slot, value, language)
    }

    /// Bind a positional parameter. Indices are 1-based: `set_index(1, …)`
    /// binds the first slot. Only valid when the statement is positional.
    pub fn set_index(&self, index: usize, value: impl Serialize) -> TwResult<()> {
        let value = to_wire_value(value)?;
        let mut state = self.state.lock();
        if state.disposed {
            return Err(TwError::Disposed("prepared query"));
        }
        if state.uses_named_parameters {
            return Err(TwError::NotSupported(
                "positional parameters on a named statement",
            ));
        }
        if index == 0 || index > state.slots.len() {
            return Err(TwError::UnknownParam(format!("position {index}")));
        }
        let language = self.query.language;
        let slot = &mut state.slots[index - 1];
        bind_slot(slot, value, language)
    }

    /// Reset every slot to unset.
    pub fn clear(&self) -> TwResult<()> {
        let mut state = self.state.lock();
        if state.disposed {
            return Err(TwError::Disposed("prepared query"));
        }
        for slot in &mut state.slots {
            slot.value = None;
        }
        Ok(())
    }

    /// True once every slot has been set at least once.
    pub fn fully_instantiated(&self) -> bool {
        let state = self.state.lock();
        state.slots.iter().all(|slot| slot.value.is_some())
    }

    pub fn uses_named_parameters(&self) -> bool {
        self.state.lock().uses_named_parameters
    }

    pub fn parameter_names(&self) -> Vec<String> {
        self.state
            .lock()
            .slots
            .iter()
            .map(|slot| slot.name.clone())
            .collect()
    }

    pub fn output_signature(&self) -> Vec<SignatureElement> {
        self.state.lock().output_signature.clone()
    }

    pub fn handle(&self) -> Option<i64> {
        self.state.lock().handle
    }

    /// Rows fetched per batch by result sets produced from this query.
    pub fn set_fetch_size(&self, fetch_size: i64) {
        self.state.lock().fetch_size = fetch_size;
    }

    pub fn set_timelimit(&self, timelimit: Option<i64>) {
        self.state.lock().timelimit = timelimit;
    }

    /// Run the statement with the currently bound parameters.
    pub async fn execute(&self) -> TwResult<ResultSet<T>> {
        let (handle, inputs, fetch_size, timelimit) = {
            let state = self.state.lock();
            if state.disposed {
                return Err(TwError::Disposed("prepared query"));
            }
            let handle = state.handle.ok_or(TwError::NotRegistered)?;
            if !state.slots.iter().all(|slot| slot.value.is_some()) {
                return Err(TwError::IncompleteParams);
            }
            let inputs: Vec<Value> = state
                .slots
                .iter()
                .map(|slot| slot.value.clone().unwrap_or(Value::Null))
                .collect();
            (handle, inputs, state.fetch_size, state.timelimit)
        };

        let mut params = serde_json::Map::new();
        params.insert("handle".into(), json!(handle));
        params.insert("inputs".into(), Value::Array(inputs));
        params.insert("limit".into(), json!(fetch_size));
        if let Some(timelimit) = timelimit {
            params.insert("timelimit".into(), json!(timelimit));
        }
        params.insert("check-update".into(), Value::Bool(false));

        let result = self
            .client
            .call::<ExecuteQueryResult<Value>>(
                "create-resultset",
                Some(RequestParams::Object(params)),
            )
            .await?;
        let result_set = ResultSet::new(self.client.clone(), result, fetch_size, timelimit);

        let raced_disposal = {
            let mut state = self.state.lock();
            if state.disposed {
                true
            } else {
                state.outstanding.retain(|weak| weak.strong_count() > 0);
                state.outstanding.push(Arc::downgrade(result_set.shared()));
                false
            }
        };
        if raced_disposal {
            result_set.dispose().await;
            return Err(TwError::Disposed("prepared query"));
        }
        Ok(result_set)
    }

    /// Copy the parameter vector onto a freshly registered statement with
    /// its own handle.
    pub async fn duplicate(&self) -> TwResult<PreparedQuery<T>> {
        let (values, fetch_size, timelimit) = {
            let state = self.state.lock();
            if state.disposed {
                return Err(TwError::Disposed("prepared query"));
            }
            let values: Vec<Option<Value>> =
                state.slots.iter().map(|slot| slot.value.clone()).collect();
            (values, state.fetch_size, state.timelimit)
        };

        let copy = Self::register(self.client.clone(), self.query.clone()).await?;
        {
            let mut state = copy.state.lock();
            for (slot, value) in state.slots.iter_mut().zip(values) {
                slot.value = value;
            }
            state.fetch_size = fetch_size;
            state.timelimit = timelimit;
        }
        Ok(copy)
    }

    /// Dispose outstanding result sets, release the statement handle,
    /// and drop this query from the client's live set. Idempotent.
    pub async fn dispose(&self) {
        let (handle, outstanding) = {
            let mut state = self.state.lock();
            if state.disposed {
                return;
            }
            state.disposed = true;
            (state.handle.take(), std::mem::take(&mut state.outstanding))
        };

        for weak in outstanding {
            if let Some(shared) = weak.upgrade() {
                shared.dispose().await;
            }
        }

        if let Some(handle) = handle {
            let params = RequestParams::Array(vec![json!(handle)]);
            if let Err(error) = self.client.call::<Value>("release-query", Some(params)).await {
                debug!(handle, error = %error, "release-query failed during dispose");
            }
            self.client.untrack_prepared(handle);
        }
    }
}

fn to_wire_value(value: impl Serialize) -> TwResult<Value> {
    serde_json::to_value(value)
        .map_err(|e| TwError::Internal(format!("failed to serialize parameter: {e}")))
}

fn bind_slot(slot: &mut ParamSlot, value: Value, language: QueryLanguage) -> TwResult<()> {
    // Type checking applies to "sql" only; "fol" slots take anything.
    if language == QueryLanguage::Sql && !slot.accepts_value(&value) {
        return Err(TwError::ParamType {
            name: slot.name.clone(),
            expects: slot.expects(),
        });
    }
    slot.value = Some(value);
    Ok(())
}
