//! Handle to a live client connection.
//!
//! Cloned freely: the registry, the read loop and every in-flight response
//! hold one. All of them funnel complete frames into the same outbound
//! queue, which a single writer drains, so frames never interleave on the
//! wire.

use super::{ConnectionId, ConnectionState};
use crate::error::ConnectionError;
use crate::json::{Map, Value};
use crate::messaging::response::RESPONSE_TOO_LARGE;
use crate::messaging::Responder;
use crate::protocol::{self, Opcode};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};

/// Items consumed by the connection writer.
#[derive(Debug)]
pub(crate) enum Outbound {
    /// A fully encoded frame.
    Frame(Vec<u8>),
    /// Flush what is queued, then shut the socket's write side.
    Shutdown,
}

/// Represents an individual client connection to the server.
///
/// # Fields
///
/// * `id` - Registry key, unique for the server's lifetime
/// * `remote_addr` - The network address of the client
/// * `connected_at` - When the handshake completed
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    remote_addr: SocketAddr,
    connected_at: SystemTime,
    outbound: mpsc::UnboundedSender<Outbound>,
    close_signal: Arc<Notify>,
    state: Arc<AtomicU8>,
}

impl ConnectionHandle {
    /// Creates a handle in the `Handshaken` state plus the receiving end of
    /// its outbound queue.
    pub(crate) fn new(id: ConnectionId, remote_addr: SocketAddr) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (outbound, receiver) = mpsc::unbounded_channel();
        let handle = Self {
            id,
            remote_addr,
            connected_at: SystemTime::now(),
            outbound,
            close_signal: Arc::new(Notify::new()),
            state: Arc::new(AtomicU8::new(ConnectionState::Handshaken as u8)),
        };
        (handle, receiver)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn connected_at(&self) -> SystemTime {
        self.connected_at
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Queues a text frame carrying `text`.
    ///
    /// # Errors
    ///
    /// * [`ConnectionError::Closed`] once the connection is closing or its
    ///   writer has gone
    /// * [`ConnectionError::Protocol`] if `text` does not fit in one frame
    pub fn send_text(&self, text: &str) -> Result<(), ConnectionError> {
        let frame = protocol::build_frame(Opcode::Text, text.as_bytes())?;
        self.send_encoded(frame)
    }

    /// Queues an already encoded frame, used to share one encoding across a
    /// broadcast.
    pub(crate) fn send_encoded(&self, frame: Vec<u8>) -> Result<(), ConnectionError> {
        if self.state() >= ConnectionState::Closing {
            return Err(ConnectionError::Closed);
        }
        self.enqueue(Outbound::Frame(frame))
    }

    /// Queues a control frame regardless of state; the read loop uses this
    /// for pongs and the closing handshake.
    pub(crate) fn send_control(&self, opcode: Opcode, payload: &[u8]) -> Result<(), ConnectionError> {
        let frame = protocol::build_frame(opcode, payload)?;
        self.enqueue(Outbound::Frame(frame))
    }

    /// Tells the writer to finish once the queue before it is flushed.
    pub(crate) fn finish(&self) {
        // The writer may already be gone after a write failure.
        let _ = self.enqueue(Outbound::Shutdown);
    }

    fn enqueue(&self, item: Outbound) -> Result<(), ConnectionError> {
        self.outbound.send(item).map_err(|_| ConnectionError::Closed)
    }

    /// Asks the read loop to send a Close frame and end the connection.
    ///
    /// The request is remembered if the read loop is not waiting yet.
    pub fn close(&self) {
        self.close_signal.notify_one();
    }

    /// Resolves when [`close`](Self::close) has been called.
    pub(crate) async fn close_requested(&self) {
        self.close_signal.notified().await
    }
}

impl Responder for ConnectionHandle {
    /// Queues `response`. A reply too large for one frame is replaced by a
    /// compact error carrying only its `type`.
    fn respond(&self, response: Value) {
        let result = match self.send_text(&response.to_string()) {
            Err(ConnectionError::Protocol(e)) => {
                warn!("⚠️ Response for connection {} not sent: {}", self.id, e);
                self.send_text(&oversized_reply(&response).to_string())
            }
            other => other,
        };
        if let Err(e) = result {
            debug!("📪 Dropped response for connection {}: {}", self.id, e);
        }
    }
}

fn oversized_reply(response: &Value) -> Value {
    let mut reply = Map::new();
    reply.insert("status", "error");
    reply.insert("error", RESPONSE_TOO_LARGE);
    if let Some(kind @ Value::String(_)) = response.get("type") {
        reply.insert("type", kind.clone());
    }
    Value::Object(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json;
    use crate::messaging::response::failure;
    use crate::messaging::RequestKind;

    fn handle() -> (ConnectionHandle, mpsc::UnboundedReceiver<Outbound>) {
        ConnectionHandle::new(7, "127.0.0.1:40000".parse().unwrap())
    }

    fn next_text(outbound: &mut mpsc::UnboundedReceiver<Outbound>) -> Value {
        match outbound.try_recv() {
            Ok(Outbound::Frame(bytes)) => match protocol::parse_frame(&bytes) {
                protocol::Decoded::Frame(frame, _) => {
                    assert_eq!(frame.opcode, Opcode::Text);
                    json::parse(&String::from_utf8(frame.payload).unwrap()).unwrap()
                }
                other => panic!("undecodable frame: {other:?}"),
            },
            other => panic!("unexpected outbound item: {other:?}"),
        }
    }

    #[test]
    fn test_respond_queues_text_frame() {
        let (handle, mut outbound) = handle();
        handle.respond(failure(Some(RequestKind::Command), "boom", Map::new()));
        let reply = next_text(&mut outbound);
        assert_eq!(reply.get("error").and_then(Value::as_str), Some("boom"));
    }

    #[test]
    fn test_oversized_response_gets_compact_error() {
        let (handle, mut outbound) = handle();
        let mut extra = Map::new();
        extra.insert("command", "x".repeat(65_600));
        handle.respond(failure(Some(RequestKind::Command), "Unknown command", extra));

        let reply = next_text(&mut outbound);
        assert_eq!(reply.get("status").and_then(Value::as_str), Some("error"));
        assert_eq!(reply.get("error").and_then(Value::as_str), Some(RESPONSE_TOO_LARGE));
        assert_eq!(reply.get("type").and_then(Value::as_str), Some("command"));
        assert!(reply.get("command").is_none());
        assert_eq!(handle.state(), ConnectionState::Handshaken);
    }

    #[test]
    fn test_respond_after_close_is_dropped() {
        let (handle, mut outbound) = handle();
        handle.set_state(ConnectionState::Closing);
        handle.respond(failure(None, "late", Map::new()));
        assert!(outbound.try_recv().is_err());
    }
}
