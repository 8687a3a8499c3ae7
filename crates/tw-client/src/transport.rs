//! Frame transport: a raw TCP byte stream carrying concatenated top-level
//! JSON values, with no framing bytes.
//!
//! The reader pulls bytes into a growing buffer and trial-parses one JSON
//! value at a time from its head: a single value may span many socket
//! reads, and a single read may deliver more than one value. A prefix that
//! can never parse fails the connection; nothing is skipped.

use bytes::{Buf, BytesMut};
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::trace;

use crate::error::{TwError, TwResult};

const READ_CHUNK: usize = 8 * 1024;

/// Connects the two halves of a frame transport over TCP.
pub struct FrameTransport;

impl FrameTransport {
    /// Open a stream socket to the endpoint and split it into reader and
    /// writer halves. Fails with a connect error if the endpoint refuses
    /// or is unreachable.
    pub async fn connect(
        addr: impl ToSocketAddrs,
    ) -> TwResult<(FrameReader<OwnedReadHalf>, FrameWriter<OwnedWriteHalf>)> {
        let stream = TcpStream::connect(addr).await.map_err(TwError::Connect)?;
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();
        Ok((FrameReader::new(read_half), FrameWriter::new(write_half)))
    }
}

/// The read half: owns the receive buffer and the trial-parse loop.
pub struct FrameReader<R> {
    inner: R,
    buf: BytesMut,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(READ_CHUNK),
        }
    }

    /// Read the next complete top-level JSON value, or `None` at a clean
    /// end of stream.
    pub async fn read_message(&mut self) -> TwResult<Option<Value>> {
        loop {
            if let Some(value) = self.take_buffered_value()? {
                return Ok(Some(value));
            }

            self.buf.reserve(READ_CHUNK);
            let n = self
                .inner
                .read_buf(&mut self.buf)
                .await
                .map_err(|_| TwError::Disconnected)?;
            if n == 0 {
                return if self.buf.iter().all(u8::is_ascii_whitespace) {
                    Ok(None)
                } else {
                    // The peer closed mid-value; the fragment can never parse.
                    Err(TwError::Parse("connection closed inside a JSON value".into()))
                };
            }
            trace!(bytes = n, buffered = self.buf.len(), "transport read");
        }
    }

    /// Attempt to parse one value from the head of the buffer, consuming
    /// exactly the bytes it occupied. `None` means more bytes are needed.
    fn take_buffered_value(&mut self) -> TwResult<Option<Value>> {
        let (parsed, consumed) = {
            let mut stream = serde_json::Deserializer::from_slice(&self.buf).into_iter::<Value>();
            let parsed = stream.next();
            (parsed, stream.byte_offset())
        };

        match parsed {
            None => Ok(None),
            Some(Ok(value)) => {
                self.buf.advance(consumed);
                Ok(Some(value))
            }
            Some(Err(error)) if error.is_eof() => Ok(None),
            Some(Err(error)) => Err(TwError::Parse(error.to_string())),
        }
    }
}

/// The write half. Writers are serialized by the engine's single writer
/// task, so each message lands on the wire whole.
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Serialize and write one message in full.
    pub async fn write_message<M: Serialize>(&mut self, message: &M) -> TwResult<()> {
        let payload = serde_json::to_vec(message)
            .map_err(|e| TwError::Internal(format!("failed to serialize message: {e}")))?;
        self.inner
            .write_all(&payload)
            .await
            .map_err(|_| TwError::Disconnected)?;
        self.inner.flush().await.map_err(|_| TwError::Disconnected)
    }

    /// Shut the write direction down; idempotent.
    pub async fn close(&mut self) {
        let _ = self.inner.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn one_value_split_across_many_reads() {
        let (mut tx, rx) = tokio::io::duplex(16);
        let mut reader = FrameReader::new(rx);

        let read = tokio::spawn(async move { reader.read_message().await });

        tx.write_all(b"{\"jsonrpc\":\"2.0\",\"id\"").await.unwrap();
        tokio::task::yield_now().await;
        tx.write_all(b":0,\"result\":null}").await.unwrap();

        let value = read.await.unwrap().unwrap().unwrap();
        assert_eq!(value, json!({"jsonrpc": "2.0", "id": 0, "result": null}));
    }

    #[tokio::test]
    async fn many_values_in_one_read() {
        let (mut tx, rx) = tokio::io::duplex(256);
        let mut reader = FrameReader::new(rx);

        tx.write_all(b"{\"a\":1}{\"b\":2} 3 ").await.unwrap();

        assert_eq!(reader.read_message().await.unwrap(), Some(json!({"a": 1})));
        assert_eq!(reader.read_message().await.unwrap(), Some(json!({"b": 2})));
        assert_eq!(reader.read_message().await.unwrap(), Some(json!(3)));
    }

    #[tokio::test]
    async fn clean_eof_yields_none() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(rx);

        tx.write_all(b"{\"a\":1} ").await.unwrap();
        tx.shutdown().await.unwrap();
        drop(tx);

        assert_eq!(reader.read_message().await.unwrap(), Some(json!({"a": 1})));
        assert_eq!(reader.read_message().await.unwrap(), None);
    }

    #[tokio::test]
    async fn eof_inside_a_value_is_a_parse_error() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(rx);

        tx.write_all(b"{\"a\":").await.unwrap();
        drop(tx);

        match reader.read_message().await {
            Err(TwError::Parse(_)) => {}
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn malformed_prefix_fails_the_connection() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(rx);

        tx.write_all(b"}}garbage{{").await.unwrap();

        match reader.read_message().await {
            Err(TwError::Parse(_)) => {}
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn writer_emits_whole_messages() {
        let (tx, mut rx) = tokio::io::duplex(256);
        let mut writer = FrameWriter::new(tx);

        writer.write_message(&json!({"jsonrpc": "2.0", "id": 1, "method": "noop"}))
            .await
            .unwrap();

        let mut reader = FrameReader::new(&mut rx);
        let value = reader.read_message().await.unwrap().unwrap();
        assert_eq!(value["method"], "noop");
    }
}
