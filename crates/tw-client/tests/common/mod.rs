//! In-process mock TW server for integration tests.
//!
//! Accepts one connection, records every message the client sends, and
//! lets each test script the replies. Unsolicited notifications and
//! requests are injected with [`MockServer::push`].

#![allow(dead_code)]

use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tw_client::transport::FrameReader;

/// What the scripted responder wants done with an inbound message.
pub enum Reply {
    /// Write these messages back, in order.
    Send(Vec<Value>),
    /// Say nothing.
    None,
    /// Drop the connection.
    Close,
}

pub type Responder = Box<dyn FnMut(&Value) -> Reply + Send>;

pub struct MockServer {
    pub addr: SocketAddr,
    push_tx: mpsc::UnboundedSender<Value>,
    seen: Arc<Mutex<Vec<Value>>>,
}

impl MockServer {
    pub async fn spawn(mut respond: Responder) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock server");
        let addr = listener.local_addr().expect("mock server address");
        let (push_tx, mut push_rx) = mpsc::unbounded_channel::<Value>();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_in_task = seen.clone();
        tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let _ = stream.set_nodelay(true);
            let (read_half, mut write_half) = stream.into_split();
            let mut reader = FrameReader::new(read_half);

            loop {
                tokio::select! {
                    inbound = reader.read_message() => {
                        let Ok(Some(message)) = inbound else { break };
                        seen_in_task.lock().unwrap().push(message.clone());
                        match respond(&message) {
                            Reply::Send(replies) => {
                                for reply in replies {
                                    let payload = reply.to_string();
                                    if write_half.write_all(payload.as_bytes()).await.is_err() {
                                        return;
                                    }
                                }
                            }
                            Reply::None => {}
                            Reply::Close => break,
                        }
                    }
                    Some(message) = push_rx.recv() => {
                        let payload = message.to_string();
                        if write_half.write_all(payload.as_bytes()).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });

        Self {
            addr,
            push_tx,
            seen,
        }
    }

    /// Inject a server-initiated message (notification or request).
    pub fn push(&self, message: Value) {
        let _ = self.push_tx.send(message);
    }

    /// Everything the client has sent so far.
    pub fn seen(&self) -> Vec<Value> {
        self.seen.lock().unwrap().clone()
    }

    /// The messages the client sent for one method.
    pub fn seen_for(&self, method: &str) -> Vec<Value> {
        self.seen()
            .into_iter()
            .filter(|m| method_of(m) == method)
            .collect()
    }
}

pub fn method_of(message: &Value) -> &str {
    message.get("method").and_then(Value::as_str).unwrap_or("")
}

/// A success response echoing the request's id.
pub fn result_for(request: &Value, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": request["id"], "result": result})
}

/// An error response echoing the request's id.
pub fn error_for(request: &Value, code: i64, message: &str) -> Value {
    json!({"jsonrpc": "2.0", "id": request["id"], "error": {"code": code, "message": message}})
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Wait until `probe` returns true or the deadline passes.
pub async fn eventually(mut probe: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if probe() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    false
}
