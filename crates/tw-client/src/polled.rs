//! Server-scheduled queries.
//!
//! A polled query reserves a unique notification label, registers a
//! handler under it, and asks the server to run the query on a schedule.
//! The server pushes a `RowsDelta` notification on every observed change;
//! poll errors arrive under the same label and are told apart by payload
//! shape (`added`/`deleted` vs `message`).

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::marker::PhantomData;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};
use tw_json_rpc::RequestParams;

use crate::client::TwClient;
use crate::error::{TwError, TwResult};
use crate::protocol::{PollFailure, PolledQueryRegistration, QuerySpec, RowsDelta};
use crate::registry::{MethodHandler, ParamSpec};
use crate::schedule::Schedule;

/// Consumer of polled-query notifications. Both methods default to
/// logging; implementors override what they care about.
#[async_trait]
pub trait PollObserver<T: Send + 'static>: Send + Sync {
    /// A poll observed added and/or deleted rows.
    async fn rows_changed(&self, delta: RowsDelta<T>) {
        info!(
            added = delta.added.len(),
            deleted = delta.deleted.len(),
            timestamp = delta.timestamp.as_deref().unwrap_or(""),
            "polled query reported changes"
        );
    }

    /// A scheduled poll failed, or fired while the prior one was still
    /// running and was skipped.
    async fn poll_failed(&self, failure: PollFailure) {
        warn!(message = %failure.message, "polled query reported an error");
    }
}

/// Control parameters sent with `create-polled-query`.
#[derive(Debug, Clone, Default)]
pub struct PolledQueryOptions {
    pub schedule: Option<Schedule>,
    pub report_initial: Option<bool>,
    pub report_unchanged: Option<bool>,
    pub delay_schedule: Option<i64>,
}

struct PolledState {
    handle: Option<i64>,
    disposed: bool,
}

pub(crate) struct PolledShared {
    state: Mutex<PolledState>,
}

/// A handle to a server-scheduled query pushing deltas of `T`.
pub struct PolledQuery<T> {
    client: Arc<TwClient>,
    label: String,
    query: QuerySpec,
    options: PolledQueryOptions,
    shared: Arc<PolledShared>,
    _row: PhantomData<fn() -> T>,
}

impl<T> PolledQuery<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    pub(crate) async fn register(
        client: Arc<TwClient>,
        query: QuerySpec,
        options: PolledQueryOptions,
        observer: Arc<dyn PollObserver<T>>,
    ) -> TwResult<Self> {
        if let Some(schedule) = &options.schedule {
            schedule.validate()?;
        }

        let label = client.next_poll_label();
        let shared = Arc::new(PolledShared {
            state: Mutex::new(PolledState {
                handle: None,
                disposed: false,
            }),
        });

        let mut params = query.wire_params();
        params.insert("method".into(), Value::String(label.clone()));
        if let Some(schedule) = &options.schedule {
            params.insert("schedule".into(), serde_json::to_value(schedule)?);
        }
        if let Some(report_initial) = options.report_initial {
            params.insert("report-initial".into(), Value::Bool(report_initial));
        }
        if let Some(report_unchanged) = options.report_unchanged {
            params.insert("report-unchanged".into(), Value::Bool(report_unchanged));
        }
        if let Some(delay_schedule) = options.delay_schedule {
            params.insert("delay-schedule".into(), json!(delay_schedule));
        }

        // Register ahead of the call so a report-initial notification
        // racing the response still finds its handler.
        let handler = Arc::new(PollDispatch {
            shared: Arc::downgrade(&shared),
            observer,
            parameters: vec![ParamSpec::any("update")],
        });
        if !client.engine().registry().register(label.clone(), handler) {
            return Err(TwError::Internal(format!(
                "notification label '{label}' already registered"
            )));
        }

        let registration = client
            .call::<PolledQueryRegistration>(
                "create-polled-query",
                Some(RequestParams::Object(params)),
            )
            .await;
        let registration = match registration {
            Ok(registration) => registration,
            Err(error) => {
                client.engine().registry().unregister(&label);
                return Err(error);
            }
        };

        shared.state.lock().handle = Some(registration.handle);
        debug!(handle = registration.handle, label = %label, "polled query registered");

        Ok(Self {
            client,
            label,
            query,
            options,
            shared,
            _row: PhantomData,
        })
    }

    /// The notification label reserved for this query.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn query(&self) -> &QuerySpec {
        &self.query
    }

    /// The control parameters this query was registered with.
    pub fn options(&self) -> &PolledQueryOptions {
        &self.options
    }

    pub fn handle(&self) -> Option<i64> {
        self.shared.state.lock().handle
    }

    /// Force an on-demand poll via `poll-now`.
    pub async fn poll(&self, timeout: Option<i64>) -> TwResult<()> {
        let handle = {
            let state = self.shared.state.lock();
            if state.disposed {
                return Err(TwError::Disposed("polled query"));
            }
            state.handle.ok_or(TwError::NotRegistered)?
        };
        let mut params = vec![json!(handle)];
        if let Some(timeout) = timeout {
            params.push(json!(timeout));
        }
        self.client
            .call::<Value>("poll-now", Some(RequestParams::Array(params)))
            .await?;
        Ok(())
    }

    /// Close the server-side query and drop the label handler; later
    /// notifications for the label are silently discarded. Idempotent.
    pub async fn dispose(&self) {
        let handle = {
            let mut state = self.shared.state.lock();
            if state.disposed {
                return;
            }
            state.disposed = true;
            state.handle.take()
        };

        self.client.engine().registry().unregister(&self.label);

        if let Some(handle) = handle {
            let params = RequestParams::Array(vec![json!(handle)]);
            if let Err(error) = self
                .client
                .call::<Value>("close-polled-query", Some(params))
                .await
            {
                debug!(handle, error = %error, "close-polled-query failed during dispose");
            }
        }
    }
}

/// Label handler: routes a notification payload to the observer, telling
/// success and error payloads apart by shape.
struct PollDispatch<T> {
    shared: Weak<PolledShared>,
    observer: Arc<dyn PollObserver<T>>,
    parameters: Vec<ParamSpec>,
}

#[async_trait]
impl<T> MethodHandler for PollDispatch<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    fn parameters(&self) -> &[ParamSpec] {
        &self.parameters
    }

    async fn invoke(&self, params: Option<RequestParams>) -> TwResult<Value> {
        let Some(shared) = self.shared.upgrade() else {
            return Ok(Value::Null);
        };
        if shared.state.lock().disposed {
            debug!("dropping notification for a disposed polled query");
            return Ok(Value::Null);
        }

        let payload = params.map(|p| p.to_value()).unwrap_or(Value::Null);
        if payload.get("added").is_some() || payload.get("deleted").is_some() {
            let delta: RowsDelta<T> = serde_json::from_value(payload)
                .map_err(|e| TwError::InvalidParams(format!("bad rows delta: {e}")))?;
            self.observer.rows_changed(delta).await;
        } else if payload.get("message").is_some() {
            let failure: PollFailure = serde_json::from_value(payload)
                .map_err(|e| TwError::InvalidParams(format!("bad poll failure: {e}")))?;
            self.observer.poll_failed(failure).await;
        } else {
            return Err(TwError::InvalidParams(
                "unrecognized polled-query payload".into(),
            ));
        }
        Ok(Value::Null)
    }
}
