//! The full-duplex JSON-RPC 2.0 engine.
//!
//! Two background workers share one connection: the reader pulls messages
//! off the socket and either wakes the caller waiting on a response id or
//! dispatches an inbound request/notification to the method registry; the
//! writer drains a FIFO queue so no two outbound messages interleave on
//! the wire. Callers of [`RpcEngine::call`] suspend on a oneshot until
//! their response arrives or the connection is torn down.

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use tw_json_rpc::{
    JsonRpcErrorResponse, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    RequestId, RequestParams,
};

use crate::error::{TwError, TwResult};
use crate::registry::MethodRegistry;
use crate::transport::{FrameReader, FrameWriter};

type Waiter = oneshot::Sender<TwResult<Value>>;

/// Counters exposed for connection introspection.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineStatistics {
    pub requests_sent: u64,
    pub notifications_dispatched: u64,
    pub inbound_requests: u64,
}

/// The JSON-RPC engine: id allocation, response correlation, inbound
/// dispatch, and the single outbound serialization point.
pub struct RpcEngine {
    registry: Arc<MethodRegistry>,
    pending: Mutex<HashMap<i64, Waiter>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<JsonRpcMessage>>>,
    workers: Mutex<Option<(JoinHandle<()>, JoinHandle<()>)>>,
    next_id: AtomicI64,
    started: AtomicBool,
    closed: AtomicBool,
    requests_sent: AtomicU64,
    notifications_dispatched: AtomicU64,
    inbound_requests: AtomicU64,
}

impl RpcEngine {
    pub fn new(registry: Arc<MethodRegistry>) -> Arc<Self> {
        Arc::new(Self {
            registry,
            pending: Mutex::new(HashMap::new()),
            outbound: Mutex::new(None),
            workers: Mutex::new(None),
            next_id: AtomicI64::new(0),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            requests_sent: AtomicU64::new(0),
            notifications_dispatched: AtomicU64::new(0),
            inbound_requests: AtomicU64::new(0),
        })
    }

    pub fn registry(&self) -> &Arc<MethodRegistry> {
        &self.registry
    }

    /// Spawn the reader and writer workers over a connected transport.
    pub fn start<R, W>(
        self: &Arc<Self>,
        mut reader: FrameReader<R>,
        mut writer: FrameWriter<W>,
    ) -> TwResult<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(TwError::Internal("engine already started".into()));
        }

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<JsonRpcMessage>();
        *self.outbound.lock() = Some(outbound_tx);

        let engine = Arc::clone(self);
        let writer_worker = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                if let Err(error) = writer.write_message(&message).await {
                    warn!(error = %error, "write failed, tearing down connection");
                    break;
                }
            }
            writer.close().await;
            engine.teardown();
        });

        let engine = Arc::clone(self);
        let reader_worker = tokio::spawn(async move {
            loop {
                match reader.read_message().await {
                    Ok(Some(value)) => engine.dispatch(value).await,
                    Ok(None) => {
                        debug!("server closed the connection");
                        break;
                    }
                    Err(error) => {
                        warn!(error = %error, "read failed, tearing down connection");
                        break;
                    }
                }
            }
            engine.teardown();
        });

        *self.workers.lock() = Some((reader_worker, writer_worker));
        Ok(())
    }

    /// Send a request and await the correlated response, decoding its
    /// result into `T`.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<RequestParams>,
    ) -> TwResult<T> {
        let receiver = self.send_request(method, params)?;
        let result = match receiver.await {
            Ok(result) => result?,
            // The waiter was dropped without a verdict: torn down.
            Err(_) => return Err(TwError::Disconnected),
        };
        serde_json::from_value(result)
            .map_err(|e| TwError::Parse(format!("failed to decode '{method}' result: {e}")))
    }

    fn send_request(
        &self,
        method: &str,
        params: Option<RequestParams>,
    ) -> TwResult<oneshot::Receiver<TwResult<Value>>> {
        self.check_open()?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (waiter, receiver) = oneshot::channel();
        self.pending.lock().insert(id, waiter);

        let request = JsonRpcRequest::new(RequestId(id), method, params);
        if !self.enqueue(request.into()) {
            self.pending.lock().remove(&id);
            return Err(TwError::Disconnected);
        }
        self.requests_sent.fetch_add(1, Ordering::Relaxed);
        debug!(method, id, "request sent");
        Ok(receiver)
    }

    /// Send a notification; never waits on the peer.
    pub fn notify(&self, method: &str, params: Option<RequestParams>) -> TwResult<()> {
        self.check_open()?;
        let notification = JsonRpcNotification::new(method, params);
        if !self.enqueue(notification.into()) {
            return Err(TwError::Disconnected);
        }
        debug!(method, "notification sent");
        Ok(())
    }

    fn check_open(&self) -> TwResult<()> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(TwError::NotStarted);
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(TwError::Disconnected);
        }
        Ok(())
    }

    fn enqueue(&self, message: JsonRpcMessage) -> bool {
        let outbound = self.outbound.lock();
        match outbound.as_ref() {
            Some(sender) => sender.send(message).is_ok(),
            None => false,
        }
    }

    /// Route one inbound message: response, request, or notification.
    async fn dispatch(&self, value: Value) {
        let message: JsonRpcMessage = match serde_json::from_value(value.clone()) {
            Ok(message) => message,
            Err(_) => {
                warn!("received a structurally invalid message");
                let id = value.get("id").and_then(Value::as_i64).map(RequestId);
                if id.is_some() {
                    self.enqueue(JsonRpcErrorResponse::invalid_request(id).into());
                }
                return;
            }
        };

        match message {
            JsonRpcMessage::Response(response) => self.complete(response.id, Ok(response.result)),
            JsonRpcMessage::Error(error) => match error.id {
                Some(id) => self.complete(id, Err(TwError::from_error_object(error.error))),
                None => warn!(
                    code = error.error.code,
                    message = %error.error.message,
                    "server reported an error without an id"
                ),
            },
            JsonRpcMessage::Request(request) => self.dispatch_request(request).await,
            JsonRpcMessage::Notification(notification) => {
                self.dispatch_notification(notification).await
            }
        }
    }

    async fn dispatch_request(&self, request: JsonRpcRequest) {
        self.inbound_requests.fetch_add(1, Ordering::Relaxed);
        let reply: JsonRpcMessage = match self.registry.lookup(&request.method) {
            None => {
                debug!(method = %request.method, "inbound request for unknown method");
                JsonRpcErrorResponse::method_not_found(request.id, &request.method).into()
            }
            Some(handler) => match handler.invoke(request.params).await {
                Ok(result) => JsonRpcResponse::new(request.id, result).into(),
                Err(error) => {
                    debug!(method = %request.method, error = %error, "inbound request handler failed");
                    JsonRpcErrorResponse::new(Some(request.id), error.to_error_object()).into()
                }
            },
        };
        self.enqueue(reply);
    }

    async fn dispatch_notification(&self, notification: JsonRpcNotification) {
        self.notifications_dispatched.fetch_add(1, Ordering::Relaxed);
        match self.registry.lookup(&notification.method) {
            None => debug!(
                method = %notification.method,
                "dropping notification without a handler"
            ),
            Some(handler) => {
                if let Err(error) = handler.invoke(notification.params).await {
                    warn!(
                        method = %notification.method,
                        error = %error,
                        "notification handler failed"
                    );
                }
            }
        }
    }

    fn complete(&self, id: RequestId, result: TwResult<Value>) {
        match self.pending.lock().remove(&id.0) {
            Some(waiter) => {
                let _ = waiter.send(result);
            }
            None => debug!(id = id.0, "dropping response for unknown id"),
        }
    }

    /// Mark the connection dead and fail every outstanding call.
    /// Idempotent; safe to call from either worker or from disposal.
    pub fn teardown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // Dropping the sender lets the writer drain its queue and exit.
        self.outbound.lock().take();
        let waiters: Vec<Waiter> = {
            let mut pending = self.pending.lock();
            pending.drain().map(|(_, waiter)| waiter).collect()
        };
        let outstanding = waiters.len();
        for waiter in waiters {
            let _ = waiter.send(Err(TwError::Disconnected));
        }
        debug!(outstanding, "engine torn down");
    }

    /// Tear down and stop the reader worker. The writer exits on its own
    /// once its queue drains.
    pub fn shutdown(&self) {
        self.teardown();
        if let Some((reader_worker, _writer_worker)) = self.workers.lock().take() {
            reader_worker.abort();
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn statistics(&self) -> EngineStatistics {
        EngineStatistics {
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            notifications_dispatched: self.notifications_dispatched.load(Ordering::Relaxed),
            inbound_requests: self.inbound_requests.load(Ordering::Relaxed),
        }
    }

    pub fn pending_calls(&self) -> usize {
        self.pending.lock().len()
    }
}

impl Drop for RpcEngine {
    fn drop(&mut self) {
        self.teardown();
    }
}
