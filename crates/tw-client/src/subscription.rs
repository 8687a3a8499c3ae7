//! Subscriptions: standing interest in a triggering condition, standalone
//! or grouped into a batch that coalesces notifications from a single
//! server-side transaction.
//!
//! A subscription is never simultaneously active and batch-owned. The
//! server addresses a standalone subscription by its own label; a batched
//! one shares the batch's method, and the batch handler fans tuples out
//! to members by label.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};
use tw_json_rpc::RequestParams;

use crate::client::TwClient;
use crate::error::{TwError, TwResult};
use crate::protocol::{BatchUpdate, QuerySpec};
use crate::registry::{MethodHandler, ParamSpec};

/// Consumer of subscription notifications: one call per matched tuple,
/// in wire order.
#[async_trait]
pub trait SubscriptionObserver<T>: Send + Sync {
    async fn notify(&self, row: T);
}

struct SubState {
    active: bool,
    batch: Option<Weak<BatchShared>>,
    disposed: bool,
}

struct SubscriptionInner<T> {
    client: Arc<TwClient>,
    label: String,
    query: QuerySpec,
    observer: Arc<dyn SubscriptionObserver<T>>,
    state: Mutex<SubState>,
    // Serializes observer invocations across standalone and batch paths.
    dispatch: tokio::sync::Mutex<()>,
}

impl<T> SubscriptionInner<T> {
    /// Params for `subscribe`/`unsubscribe`: the query triple plus this
    /// subscription's label, the routing method, and the combine flag.
    fn wire_params(&self, method: &str, combine: bool) -> Map<String, Value> {
        let mut params = self.query.wire_params();
        params.insert("label".into(), Value::String(self.label.clone()));
        params.insert("method".into(), Value::String(method.to_string()));
        params.insert("combine".into(), Value::Bool(combine));
        params
    }
}

impl<T> SubscriptionInner<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    async fn deliver(&self, tuples: Vec<Value>) {
        let _serialized = self.dispatch.lock().await;
        for tuple in tuples {
            match serde_json::from_value::<T>(tuple) {
                Ok(row) => self.observer.notify(row).await,
                Err(error) => warn!(
                    label = %self.label,
                    error = %error,
                    "failed to decode subscription tuple"
                ),
            }
        }
    }
}

/// The batch-facing face of a subscription, with the row type erased.
#[async_trait]
trait BatchMember: Send + Sync {
    fn member_label(&self) -> &str;
    fn unsubscribe_params(&self, batch_method: &str) -> Map<String, Value>;
    fn clear_batch(&self);
    async fn deliver_tuples(&self, tuples: Vec<Value>);
}

#[async_trait]
impl<T> BatchMember for SubscriptionInner<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    fn member_label(&self) -> &str {
        &self.label
    }

    fn unsubscribe_params(&self, batch_method: &str) -> Map<String, Value> {
        self.wire_params(batch_method, true)
    }

    fn clear_batch(&self) {
        self.state.lock().batch = None;
    }

    async fn deliver_tuples(&self, tuples: Vec<Value>) {
        self.deliver(tuples).await;
    }
}

/// A standing interest in a triggering condition, notifying with rows of
/// type `T`.
pub struct Subscription<T> {
    inner: Arc<SubscriptionInner<T>>,
}

impl<T> Subscription<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    /// Reserve a label on the client; no server interaction yet.
    pub(crate) fn new(
        client: Arc<TwClient>,
        query: QuerySpec,
        observer: Arc<dyn SubscriptionObserver<T>>,
    ) -> Self {
        let label = client.next_sub_label();
        Self {
            inner: Arc::new(SubscriptionInner {
                client,
                label,
                query,
                observer,
                state: Mutex::new(SubState {
                    active: false,
                    batch: None,
                    disposed: false,
                }),
                dispatch: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn query(&self) -> &QuerySpec {
        &self.inner.query
    }

    pub fn is_active(&self) -> bool {
        self.inner.state.lock().active
    }

    pub fn is_batched(&self) -> bool {
        self.inner.state.lock().batch.is_some()
    }

    /// Activate standalone: `subscribe` with this subscription's own
    /// label as the routing method, `combine:false`.
    pub async fn activate(&self) -> TwResult<()> {
        {
            let mut state = self.inner.state.lock();
            if state.disposed {
                return Err(TwError::Disposed("subscription"));
            }
            if state.active {
                return Err(TwError::Subscription("already active".into()));
            }
            if state.batch.is_some() {
                return Err(TwError::Subscription("owned by a batch".into()));
            }
            state.active = true;
        }

        let registry = self.inner.client.engine().registry();
        let handler = Arc::new(SubscriptionDispatch {
            inner: Arc::downgrade(&self.inner),
            parameters: vec![ParamSpec::any("tuple")],
        });
        if !registry.register(self.inner.label.clone(), handler) {
            self.inner.state.lock().active = false;
            return Err(TwError::Subscription(format!(
                "label '{}' already registered",
                self.inner.label
            )));
        }

        let params = self.inner.wire_params(&self.inner.label, false);
        match self
            .inner
            .client
            .call::<Value>("subscribe", Some(RequestParams::Object(params)))
            .await
        {
            Ok(_) => Ok(()),
            Err(error) => {
                registry.unregister(&self.inner.label);
                self.inner.state.lock().active = false;
                Err(error)
            }
        }
    }

    /// Deactivate a standalone subscription.
    pub async fn deactivate(&self) -> TwResult<()> {
        {
            let state = self.inner.state.lock();
            if state.disposed {
                return Err(TwError::Disposed("subscription"));
            }
            if !state.active {
                return Err(TwError::Subscription("not active".into()));
            }
        }

        let params = self.inner.wire_params(&self.inner.label, false);
        self.inner
            .client
            .call::<Value>("unsubscribe", Some(RequestParams::Object(params)))
            .await?;

        self.inner
            .client
            .engine()
            .registry()
            .unregister(&self.inner.label);
        self.inner.state.lock().active = false;
        Ok(())
    }

    /// Deactivate or leave the owning batch as needed, then drop the
    /// label handler. Idempotent; server failures are logged.
    pub async fn dispose(&self) {
        enum Cleanup {
            Nothing,
            Active,
            Batched(Arc<BatchShared>),
        }

        let cleanup = {
            let mut state = self.inner.state.lock();
            if state.disposed {
                return;
            }
            state.disposed = true;
            if state.active {
                state.active = false;
                Cleanup::Active
            } else if let Some(batch) = state.batch.take() {
                match batch.upgrade() {
                    Some(batch) => Cleanup::Batched(batch),
                    None => Cleanup::Nothing,
                }
            } else {
                Cleanup::Nothing
            }
        };

        match cleanup {
            Cleanup::Nothing => {}
            Cleanup::Active => {
                let params = self.inner.wire_params(&self.inner.label, false);
                if let Err(error) = self
                    .inner
                    .client
                    .call::<Value>("unsubscribe", Some(RequestParams::Object(params)))
                    .await
                {
                    debug!(label = %self.inner.label, error = %error, "unsubscribe failed during dispose");
                }
                self.inner
                    .client
                    .engine()
                    .registry()
                    .unregister(&self.inner.label);
            }
            Cleanup::Batched(batch) => {
                batch.release_member(self.inner.as_ref()).await;
            }
        }
    }
}

/// Label handler for a standalone subscription: the params are one
/// matched tuple.
struct SubscriptionDispatch<T> {
    inner: Weak<SubscriptionInner<T>>,
    parameters: Vec<ParamSpec>,
}

#[async_trait]
impl<T> MethodHandler for SubscriptionDispatch<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    fn parameters(&self) -> &[ParamSpec] {
        &self.parameters
    }

    async fn invoke(&self, params: Option<RequestParams>) -> TwResult<Value> {
        let Some(inner) = self.inner.upgrade() else {
            return Ok(Value::Null);
        };
        {
            let state = inner.state.lock();
            if state.disposed || !state.active {
                debug!(label = %inner.label, "dropping notification for an inactive subscription");
                return Ok(Value::Null);
            }
        }
        let tuple = params.map(|p| p.to_value()).unwrap_or(Value::Null);
        inner.deliver(vec![tuple]).await;
        Ok(Value::Null)
    }
}

struct MemberTable {
    members: HashMap<String, Arc<dyn BatchMember>>,
    disposed: bool,
}

pub(crate) struct BatchShared {
    client: Arc<TwClient>,
    method: String,
    table: Mutex<MemberTable>,
}

impl BatchShared {
    /// Unsubscribe one member on the server and clear its back-link.
    /// Used by member-initiated disposal.
    async fn release_member(&self, member: &dyn BatchMember) {
        let removed = self
            .table
            .lock()
            .members
            .remove(member.member_label())
            .is_some();
        if !removed {
            return;
        }
        let params = member.unsubscribe_params(&self.method);
        if let Err(error) = self
            .client
            .call::<Value>("unsubscribe", Some(RequestParams::Object(params)))
            .await
        {
            debug!(
                label = %member.member_label(),
                error = %error,
                "unsubscribe failed while releasing a batch member"
            );
        }
        member.clear_batch();
    }
}

/// A coalescing group of subscriptions sharing one notification method.
pub struct BatchSubscription {
    shared: Arc<BatchShared>,
}

impl BatchSubscription {
    /// Reserve a batch method label and register its fan-out handler.
    pub(crate) fn new(client: Arc<TwClient>) -> TwResult<Self> {
        let method = client.next_batch_label();
        let shared = Arc::new(BatchShared {
            client: client.clone(),
            method: method.clone(),
            table: Mutex::new(MemberTable {
                members: HashMap::new(),
                disposed: false,
            }),
        });
        let handler = Arc::new(BatchDispatch {
            shared: Arc::downgrade(&shared),
            parameters: vec![ParamSpec::any("update")],
        });
        if !client.engine().registry().register(method.clone(), handler) {
            return Err(TwError::Internal(format!(
                "notification label '{method}' already registered"
            )));
        }
        Ok(Self { shared })
    }

    /// The method name the server uses to address this batch.
    pub fn method(&self) -> &str {
        &self.shared.method
    }

    pub fn len(&self) -> usize {
        self.shared.table.lock().members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.table.lock().members.is_empty()
    }

    /// Add a subscription: it must belong to the same client and be
    /// neither active nor already batched.
    pub async fn add<T>(&self, subscription: &Subscription<T>) -> TwResult<()>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        let inner = &subscription.inner;
        if !Arc::ptr_eq(&inner.client, &self.shared.client) {
            return Err(TwError::Subscription(
                "subscription belongs to a different client".into(),
            ));
        }
        {
            let table = self.shared.table.lock();
            if table.disposed {
                return Err(TwError::Disposed("batch subscription"));
            }
        }
        {
            let mut state = inner.state.lock();
            if state.disposed {
                return Err(TwError::Disposed("subscription"));
            }
            if state.active {
                return Err(TwError::Subscription(
                    "cannot batch an active subscription".into(),
                ));
            }
            if state.batch.is_some() {
                return Err(TwError::Subscription("already owned by a batch".into()));
            }
            state.batch = Some(Arc::downgrade(&self.shared));
        }
        self.shared
            .table
            .lock()
            .members
            .insert(inner.label.clone(), inner.clone() as Arc<dyn BatchMember>);

        let params = inner.wire_params(&self.shared.method, true);
        match self
            .shared
            .client
            .call::<Value>("subscribe", Some(RequestParams::Object(params)))
            .await
        {
            Ok(_) => Ok(()),
            Err(error) => {
                self.shared.table.lock().members.remove(&inner.label);
                inner.state.lock().batch = None;
                Err(error)
            }
        }
    }

    /// Remove a member, unsubscribing it on the server.
    pub async fn remove<T>(&self, subscription: &Subscription<T>) -> TwResult<()>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        let inner = &subscription.inner;
        if !self.shared.table.lock().members.contains_key(&inner.label) {
            return Err(TwError::Subscription(
                "subscription is not a member of this batch".into(),
            ));
        }

        let params = inner.wire_params(&self.shared.method, true);
        self.shared
            .client
            .call::<Value>("unsubscribe", Some(RequestParams::Object(params)))
            .await?;

        self.shared.table.lock().members.remove(&inner.label);
        inner.state.lock().batch = None;
        Ok(())
    }

    /// Drop the batch handler and deactivate every member, one
    /// `unsubscribe` each. The server offers no atomic multi-unsubscribe,
    /// so a transaction firing mid-disposal may still notify the members
    /// not yet removed. Idempotent.
    pub async fn dispose(&self) {
        let members: Vec<Arc<dyn BatchMember>> = {
            let mut table = self.shared.table.lock();
            if table.disposed {
                return;
            }
            table.disposed = true;
            table.members.drain().map(|(_, member)| member).collect()
        };

        self.shared
            .client
            .engine()
            .registry()
            .unregister(&self.shared.method);

        for member in members {
            let params = member.unsubscribe_params(&self.shared.method);
            if let Err(error) = self
                .shared
                .client
                .call::<Value>("unsubscribe", Some(RequestParams::Object(params)))
                .await
            {
                debug!(
                    label = %member.member_label(),
                    error = %error,
                    "unsubscribe failed during batch dispose"
                );
            }
            member.clear_batch();
        }
    }
}

/// Batch method handler: decodes `{update#, matches}` and fans tuples
/// out to members by label.
struct BatchDispatch {
    shared: Weak<BatchShared>,
    parameters: Vec<ParamSpec>,
}

#[async_trait]
impl MethodHandler for BatchDispatch {
    fn parameters(&self) -> &[ParamSpec] {
        &self.parameters
    }

    async fn invoke(&self, params: Option<RequestParams>) -> TwResult<Value> {
        let Some(shared) = self.shared.upgrade() else {
            return Ok(Value::Null);
        };
        let payload = params.map(|p| p.to_value()).unwrap_or(Value::Null);
        let update: BatchUpdate = serde_json::from_value(payload)
            .map_err(|e| TwError::InvalidParams(format!("bad batch update: {e}")))?;

        for matched in update.matches {
            let member = shared.table.lock().members.get(&matched.label).cloned();
            match member {
                Some(member) => member.deliver_tuples(matched.tuples).await,
                None => debug!(
                    label = %matched.label,
                    update = update.update,
                    "batch update for an unknown member"
                ),
            }
        }
        Ok(Value::Null)
    }
}
