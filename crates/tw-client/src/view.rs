//! A stateless, handle-less view over a query.

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::marker::PhantomData;
use std::sync::Arc;
use tw_json_rpc::RequestParams;

use crate::client::TwClient;
use crate::error::TwResult;
use crate::protocol::{ExecuteQueryResult, QuerySpec, Restriction};
use crate::resultset::ResultSet;

/// A (query, language, namespace) tuple plus an optional resource
/// restriction. Executing a view produces a fresh [`ResultSet`]; the view
/// itself holds no server-side state.
pub struct View<T> {
    client: Arc<TwClient>,
    query: QuerySpec,
    restriction: Option<Restriction>,
    _row: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> View<T> {
    pub fn new(client: Arc<TwClient>, query: QuerySpec) -> Self {
        Self {
            client,
            query,
            restriction: None,
            _row: PhantomData,
        }
    }

    pub fn with_restriction(mut self, restriction: Restriction) -> Self {
        self.restriction = Some(restriction);
        self
    }

    pub fn query(&self) -> &QuerySpec {
        &self.query
    }

    /// Issue `execute-query` with the view's own restriction.
    pub async fn execute(&self) -> TwResult<ResultSet<T>> {
        self.execute_restricted(self.restriction).await
    }

    /// Issue `execute-query`, overriding the stored restriction.
    pub async fn execute_restricted(
        &self,
        restriction: Option<Restriction>,
    ) -> TwResult<ResultSet<T>> {
        let mut params = self.query.wire_params();
        if let Some(restriction) = &restriction {
            if let Some(limit) = restriction.limit {
                params.insert("limit".into(), json!(limit));
            }
            if let Some(timelimit) = restriction.timelimit {
                params.insert("timelimit".into(), json!(timelimit));
            }
        }
        params.insert("check-update".into(), Value::Bool(false));

        let result = self
            .client
            .call::<ExecuteQueryResult<Value>>("execute-query", Some(RequestParams::Object(params)))
            .await?;

        let fetch_size = restriction
            .and_then(|r| r.limit)
            .unwrap_or_else(|| self.client.default_fetch_size());
        let timelimit = restriction
            .and_then(|r| r.timelimit)
            .or_else(|| self.client.default_timelimit());
        Ok(ResultSet::new(
            self.client.clone(),
            result,
            fetch_size,
            timelimit,
        ))
    }
}
