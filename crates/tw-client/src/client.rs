//! The TW client facade.
//!
//! Owns the RPC engine and the per-client label counters, and provides
//! the entry points for queries, prepared queries, polled queries,
//! subscriptions and the small server utility calls. One client maps to
//! one TCP connection; connection loss is terminal.

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::ToSocketAddrs;
use tracing::{debug, info};
use tw_json_rpc::RequestParams;

use crate::config::ClientConfig;
use crate::engine::{EngineStatistics, RpcEngine};
use crate::error::{TwError, TwResult};
use crate::polled::{PollObserver, PolledQuery, PolledQueryOptions};
use crate::prepared::PreparedQuery;
use crate::protocol::{QuerySpec, RelDataGroup, Restriction, RuntimeMeasure};
use crate::registry::{MethodHandler, MethodRegistry};
use crate::resultset::ResultSet;
use crate::subscription::{BatchSubscription, Subscription, SubscriptionObserver};
use crate::transport::FrameTransport;
use crate::view::View;

/// A connected TW client.
pub struct TwClient {
    engine: Arc<RpcEngine>,
    config: ClientConfig,
    poll_labels: AtomicU64,
    sub_labels: AtomicU64,
    batch_labels: AtomicU64,
    prepared: Mutex<HashSet<i64>>,
}

impl TwClient {
    /// Connect with the default configuration.
    pub async fn connect(addr: impl ToSocketAddrs) -> TwResult<Arc<Self>> {
        Self::builder().connect(addr).await
    }

    pub fn builder() -> TwClientBuilder {
        TwClientBuilder::new()
    }

    /// Issue a call on this client's connection, applying the configured
    /// local deadline if one is set. Expiry does not cancel the
    /// server-side work; it only releases the caller.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<RequestParams>,
    ) -> TwResult<T> {
        match self.config.timeouts.call {
            Some(deadline) => tokio::time::timeout(deadline, self.engine.call(method, params))
                .await
                .map_err(|_| TwError::Timeout)?,
            None => self.engine.call(method, params).await,
        }
    }

    /// Send a notification; never waits on the server.
    pub fn notify(&self, method: &str, params: Option<RequestParams>) -> TwResult<()> {
        self.engine.notify(method, params)
    }

    /// A stateless view over a query.
    pub fn view<T: DeserializeOwned>(self: &Arc<Self>, query: QuerySpec) -> View<T> {
        View::new(self.clone(), query)
    }

    /// Execute a query and stream its rows.
    pub async fn execute_query<T: DeserializeOwned>(
        self: &Arc<Self>,
        query: QuerySpec,
    ) -> TwResult<ResultSet<T>> {
        self.view(query).execute().await
    }

    /// Execute a query under an explicit resource restriction.
    pub async fn execute_query_restricted<T: DeserializeOwned>(
        self: &Arc<Self>,
        query: QuerySpec,
        restriction: Restriction,
    ) -> TwResult<ResultSet<T>> {
        self.view(query).with_restriction(restriction).execute().await
    }

    /// Ask the server to validate a query without running it. A rejection
    /// surfaces as an invalid-query error; internal and connection-level
    /// failures pass through unchanged.
    pub async fn validate_query(&self, query: &QuerySpec) -> TwResult<String> {
        let params = RequestParams::Array(vec![
            Value::String(query.text.clone()),
            Value::String(query.language.to_string()),
            Value::String(query.namespace.clone()),
        ]);
        match self.call::<String>("validate", Some(params)).await {
            Ok(verdict) => Ok(verdict),
            Err(error) => match error {
                TwError::Internal(_)
                | TwError::Disconnected
                | TwError::NotStarted
                | TwError::Timeout => Err(error),
                TwError::Server { code: -32000, .. } => Err(error),
                TwError::Server { message, .. } => Err(TwError::InvalidQuery(message)),
                other => Err(TwError::InvalidQuery(other.to_string())),
            },
        }
    }

    /// A round trip that does nothing; useful as a liveness probe.
    pub async fn noop(&self) -> TwResult<()> {
        self.call::<Option<Value>>("noop", Some(RequestParams::Array(vec![])))
            .await?;
        Ok(())
    }

    /// Server runtime statistics.
    pub async fn runtime_measure(&self) -> TwResult<RuntimeMeasure> {
        self.call("runtime", Some(RequestParams::Array(vec![])))
            .await
    }

    /// The server's table catalog, grouped.
    pub async fn rel_data(&self) -> TwResult<Vec<RelDataGroup>> {
        self.call("reldata2017", Some(RequestParams::Array(vec![])))
            .await
    }

    /// Register an application method the server may invoke. Returns
    /// `false` if the name is already registered.
    pub fn add_method(&self, name: impl Into<String>, handler: Arc<dyn MethodHandler>) -> bool {
        self.engine.registry().register(name, handler)
    }

    /// Remove an application method. Returns `false` if it was absent.
    pub fn remove_method(&self, name: &str) -> bool {
        self.engine.registry().unregister(name)
    }

    /// Prepare a parameterized query.
    pub async fn prepare<T: DeserializeOwned>(
        self: &Arc<Self>,
        query: QuerySpec,
    ) -> TwResult<PreparedQuery<T>> {
        PreparedQuery::register(self.clone(), query).await
    }

    /// Create a server-scheduled query delivering deltas to `observer`.
    pub async fn polled_query<T>(
        self: &Arc<Self>,
        query: QuerySpec,
        options: PolledQueryOptions,
        observer: Arc<dyn PollObserver<T>>,
    ) -> TwResult<PolledQuery<T>>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        PolledQuery::register(self.clone(), query, options, observer).await
    }

    /// Create an inactive subscription; activate it or add it to a batch.
    pub fn subscription<T>(
        self: &Arc<Self>,
        query: QuerySpec,
        observer: Arc<dyn SubscriptionObserver<T>>,
    ) -> Subscription<T>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        Subscription::new(self.clone(), query, observer)
    }

    /// Create an empty batch subscription.
    pub fn batch_subscription(self: &Arc<Self>) -> TwResult<BatchSubscription> {
        BatchSubscription::new(self.clone())
    }

    pub fn default_fetch_size(&self) -> i64 {
        self.config.fetch_size
    }

    pub fn default_timelimit(&self) -> Option<i64> {
        self.config.timelimit
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.engine.is_started() && !self.engine.is_closed()
    }

    pub fn statistics(&self) -> EngineStatistics {
        self.engine.statistics()
    }

    /// Tear the connection down. Every outstanding call completes with a
    /// connection-lost error; further calls are refused. Idempotent.
    pub fn close(&self) {
        info!("closing TW client");
        self.engine.shutdown();
    }

    pub(crate) fn engine(&self) -> &Arc<RpcEngine> {
        &self.engine
    }

    pub(crate) fn next_poll_label(&self) -> String {
        format!("poll{}", self.poll_labels.fetch_add(1, Ordering::SeqCst))
    }

    pub(crate) fn next_sub_label(&self) -> String {
        format!("sub{}", self.sub_labels.fetch_add(1, Ordering::SeqCst))
    }

    pub(crate) fn next_batch_label(&self) -> String {
        format!("batch{}", self.batch_labels.fetch_add(1, Ordering::SeqCst))
    }

    pub(crate) fn track_prepared(&self, handle: i64) {
        self.prepared.lock().insert(handle);
    }

    pub(crate) fn untrack_prepared(&self, handle: i64) {
        self.prepared.lock().remove(&handle);
    }

    /// Handles of prepared queries not yet disposed.
    pub fn live_prepared_handles(&self) -> Vec<i64> {
        let mut handles: Vec<i64> = self.prepared.lock().iter().copied().collect();
        handles.sort_unstable();
        handles
    }
}

impl Drop for TwClient {
    fn drop(&mut self) {
        debug!("TW client dropped, shutting the engine down");
        self.engine.shutdown();
    }
}

/// Builder for [`TwClient`].
pub struct TwClientBuilder {
    config: ClientConfig,
}

impl TwClientBuilder {
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Rows fetched per result-set batch.
    pub fn fetch_size(mut self, fetch_size: i64) -> Self {
        self.config.fetch_size = fetch_size;
        self
    }

    /// Server-side time limit (seconds) attached to queries by default.
    pub fn timelimit(mut self, timelimit: i64) -> Self {
        self.config.timelimit = Some(timelimit);
        self
    }

    /// Local deadline applied to every call.
    pub fn call_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.config.timeouts.call = Some(timeout);
        self
    }

    /// Open the TCP connection and start the engine workers.
    pub async fn connect(self, addr: impl ToSocketAddrs) -> TwResult<Arc<TwClient>> {
        let (reader, writer) =
            tokio::time::timeout(self.config.timeouts.connect, FrameTransport::connect(addr))
                .await
                .map_err(|_| TwError::Timeout)??;

        let registry = Arc::new(MethodRegistry::new());
        let engine = RpcEngine::new(registry);
        engine.start(reader, writer)?;
        info!("connected to TW server");

        Ok(Arc::new(TwClient {
            engine,
            config: self.config,
            poll_labels: AtomicU64::new(0),
            sub_labels: AtomicU64::new(0),
            batch_labels: AtomicU64::new(0),
            prepared: Mutex::new(HashSet::new()),
        }))
    }
}

impl Default for TwClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_to_a_refusing_endpoint_fails() {
        // Port 1 on localhost is essentially never listening.
        let result = TwClient::connect(("127.0.0.1", 1)).await;
        match result {
            Err(TwError::Connect(_)) | Err(TwError::Timeout) => {}
            other => panic!("expected connect failure, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn builder_overrides_config() {
        let builder = TwClient::builder()
            .fetch_size(250)
            .timelimit(30)
            .call_timeout(std::time::Duration::from_secs(5));
        assert_eq!(builder.config.fetch_size, 250);
        assert_eq!(builder.config.timelimit, Some(30));
        assert!(builder.config.timeouts.call.is_some());
    }
}
