//! Forward-only result-set cursor with a bounded row cache.
//!
//! Rows arrive in batches: the constructor seeds the cache from the
//! initial `execute-query` (or `create-resultset`) reply, and `move_next`
//! issues `next-resultset-batch` on demand once the cache drains. A
//! result set whose entire payload fit in the first batch never holds a
//! handle and never fetches.

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;
use tw_json_rpc::RequestParams;

use crate::client::TwClient;
use crate::error::{TwError, TwResult};
use crate::protocol::{ExecuteQueryResult, SignatureElement};

/// A forward-only cursor over rows of type `T`.
pub struct ResultSet<T> {
    shared: Arc<ResultSetShared>,
    _row: PhantomData<fn() -> T>,
}

/// Untyped cursor state, shared so an owning prepared query can cascade
/// disposal without borrowing the typed handle.
pub(crate) struct ResultSetShared {
    client: Arc<TwClient>,
    state: Mutex<CursorState>,
}

struct CursorState {
    handle: Option<i64>,
    exhausted: bool,
    past_end: bool,
    cache: VecDeque<Value>,
    current: Option<Value>,
    row_number: u64,
    fetch_size: i64,
    timelimit: Option<i64>,
    signature: Vec<SignatureElement>,
    disposed: bool,
}

impl<T: DeserializeOwned> ResultSet<T> {
    pub(crate) fn new(
        client: Arc<TwClient>,
        result: ExecuteQueryResult<Value>,
        fetch_size: i64,
        timelimit: Option<i64>,
    ) -> Self {
        // No handle means the whole result fit in this one batch.
        let exhausted = result.exhausted || result.handle.is_none();
        let shared = Arc::new(ResultSetShared {
            client,
            state: Mutex::new(CursorState {
                handle: result.handle,
                exhausted,
                past_end: false,
                cache: result.tuples.into(),
                current: None,
                row_number: 0,
                fetch_size,
                timelimit,
                signature: result.signature,
                disposed: false,
            }),
        });
        Self {
            shared,
            _row: PhantomData,
        }
    }

    pub(crate) fn shared(&self) -> &Arc<ResultSetShared> {
        &self.shared
    }

    /// Advance to the next row. Returns `false` once the result set is
    /// exhausted; after that it keeps returning `false` without I/O.
    pub async fn move_next(&self) -> TwResult<bool> {
        self.shared.move_next().await
    }

    /// The last row produced by `move_next`.
    pub async fn current(&self) -> TwResult<T> {
        let state = self.shared.state.lock().await;
        if state.disposed {
            return Err(TwError::Disposed("result set"));
        }
        let row = state
            .current
            .clone()
            .ok_or_else(|| TwError::ResultSet(Box::new(TwError::Internal("no current row".into()))))?;
        drop(state);
        serde_json::from_value(row)
            .map_err(|e| TwError::Parse(format!("failed to decode row: {e}")))
    }

    /// Advance at most `n` times, collecting the rows produced.
    pub async fn pull(&self, n: usize) -> TwResult<Vec<T>> {
        let mut rows = Vec::with_capacity(n);
        for _ in 0..n {
            if !self.move_next().await? {
                break;
            }
            rows.push(self.current().await?);
        }
        Ok(rows)
    }

    /// A decoded copy of the rows currently cached, without advancing.
    pub async fn cache_snapshot(&self) -> TwResult<Vec<T>> {
        let state = self.shared.state.lock().await;
        if state.disposed {
            return Err(TwError::Disposed("result set"));
        }
        state
            .cache
            .iter()
            .map(|row| {
                serde_json::from_value(row.clone())
                    .map_err(|e| TwError::Parse(format!("failed to decode cached row: {e}")))
            })
            .collect()
    }

    /// Forward-only cursors cannot rewind.
    pub fn reset(&self) -> TwResult<()> {
        Err(TwError::NotSupported("resetting a result set"))
    }

    /// Number of rows produced so far.
    pub async fn row_number(&self) -> u64 {
        self.shared.state.lock().await.row_number
    }

    pub async fn is_exhausted(&self) -> bool {
        self.shared.state.lock().await.exhausted
    }

    /// The output signature reported with the first batch.
    pub async fn signature(&self) -> Vec<SignatureElement> {
        self.shared.state.lock().await.signature.clone()
    }

    pub async fn handle(&self) -> Option<i64> {
        self.shared.state.lock().await.handle
    }

    /// Release the server-side cursor. Idempotent; failures during this
    /// best-effort cleanup are logged and swallowed.
    pub async fn dispose(&self) {
        self.shared.dispose().await;
    }
}

impl ResultSetShared {
    async fn move_next(&self) -> TwResult<bool> {
        let mut state = self.state.lock().await;
        if state.disposed {
            return Err(TwError::Disposed("result set"));
        }

        if let Some(row) = state.cache.pop_front() {
            state.current = Some(row);
            state.row_number += 1;
            return Ok(true);
        }

        if state.exhausted {
            state.past_end = true;
            state.current = None;
            return Ok(false);
        }

        let handle = state.handle.ok_or(TwError::NotRegistered)?;
        let params = RequestParams::Array(vec![
            json!(handle),
            json!(state.fetch_size),
            json!(state.timelimit),
        ]);
        let batch = match self
            .client
            .call::<ExecuteQueryResult<Value>>("next-resultset-batch", Some(params))
            .await
        {
            Ok(batch) => batch,
            Err(error) => {
                // A failed fetch poisons the cursor: release and re-raise.
                state.disposed = true;
                let handle = state.handle.take();
                drop(state);
                if let Some(handle) = handle {
                    self.close_handle(handle).await;
                }
                return Err(TwError::ResultSet(Box::new(error)));
            }
        };

        state.cache = batch.tuples.into();
        state.exhausted = batch.exhausted;

        match state.cache.pop_front() {
            Some(row) => {
                state.current = Some(row);
                state.row_number += 1;
                Ok(true)
            }
            None => {
                // An empty batch ends the stream and releases the cursor.
                state.exhausted = true;
                state.past_end = true;
                state.current = None;
                let handle = state.handle.take();
                drop(state);
                if let Some(handle) = handle {
                    self.close_handle(handle).await;
                }
                Ok(false)
            }
        }
    }

    pub(crate) async fn dispose(&self) {
        let handle = {
            let mut state = self.state.lock().await;
            if state.disposed {
                return;
            }
            state.disposed = true;
            state.handle.take()
        };
        if let Some(handle) = handle {
            self.close_handle(handle).await;
        }
    }

    async fn close_handle(&self, handle: i64) {
        let params = RequestParams::Array(vec![json!(handle)]);
        if let Err(error) = self
            .client
            .call::<Value>("close-resultset", Some(params))
            .await
        {
            debug!(handle, error = %error, "close-resultset failed during cleanup");
        }
    }
}
