//! The per-connection read loop and outbound writer.

use super::client::{ConnectionHandle, Outbound};
use super::ConnectionState;
use crate::executor::HostExecutor;
use crate::messaging;
use crate::protocol::{self, Decoded, Frame, Opcode};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

const READ_CHUNK: usize = 4096;

/// Runs an upgraded connection to completion.
///
/// The read loop and the writer run concurrently inside the caller's task,
/// so aborting that task tears down both halves.
pub(crate) async fn serve<R, W>(
    reader: R,
    writer: W,
    handle: ConnectionHandle,
    outbound: mpsc::UnboundedReceiver<Outbound>,
    executor: HostExecutor,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    tokio::join!(
        read_loop(reader, &handle, &executor),
        write_loop(writer, outbound, &handle),
    );
    handle.set_state(ConnectionState::Closed);
}

enum Flow {
    Continue,
    Close,
}

async fn read_loop<R>(mut reader: R, handle: &ConnectionHandle, executor: &HostExecutor)
where
    R: AsyncRead + Unpin,
{
    handle.set_state(ConnectionState::Open);
    let mut buffer: Vec<u8> = Vec::with_capacity(READ_CHUNK);
    let mut chunk = [0u8; READ_CHUNK];

    'read: loop {
        loop {
            match protocol::parse_frame(&buffer) {
                Decoded::Incomplete => break,
                Decoded::Unsupported { opcode, consumed } => {
                    warn!(
                        "⚠️ Connection {} sent unsupported opcode {:#x}, skipping {} bytes",
                        handle.id(),
                        opcode,
                        consumed
                    );
                    buffer.drain(..consumed);
                }
                Decoded::Frame(frame, consumed) => {
                    buffer.drain(..consumed);
                    if let Flow::Close = handle_frame(frame, handle, executor) {
                        break 'read;
                    }
                }
            }
        }

        let read = tokio::select! {
            read = reader.read(&mut chunk) => read,
            _ = handle.close_requested() => {
                debug!("🔌 Closing connection {} on server request", handle.id());
                begin_close(handle);
                break 'read;
            }
        };

        match read {
            Ok(0) => {
                debug!("🔌 Connection {} reached end of stream", handle.id());
                break;
            }
            Ok(n) => buffer.extend_from_slice(&chunk[..n]),
            Err(e) => {
                debug!("🔌 Read failed on connection {}: {}", handle.id(), e);
                break;
            }
        }
    }

    handle.finish();
}

fn handle_frame(frame: Frame, handle: &ConnectionHandle, executor: &HostExecutor) -> Flow {
    match frame.opcode {
        Opcode::Text => {
            let text = String::from_utf8_lossy(&frame.payload);
            debug!("📨 Connection {} received: {}", handle.id(), text);
            messaging::dispatch(&text, executor, Arc::new(handle.clone()));
            Flow::Continue
        }
        Opcode::Close => {
            debug!("👋 Connection {} sent Close", handle.id());
            begin_close(handle);
            Flow::Close
        }
        Opcode::Ping => {
            if let Err(e) = handle.send_control(Opcode::Pong, &frame.payload) {
                debug!("📪 Pong not sent on connection {}: {}", handle.id(), e);
            }
            Flow::Continue
        }
        Opcode::Pong => Flow::Continue,
    }
}

fn begin_close(handle: &ConnectionHandle) {
    handle.set_state(ConnectionState::Closing);
    if let Err(e) = handle.send_control(Opcode::Close, &[]) {
        debug!("📪 Close frame not sent on connection {}: {}", handle.id(), e);
    }
}

async fn write_loop<W>(mut writer: W, mut outbound: mpsc::UnboundedReceiver<Outbound>, handle: &ConnectionHandle)
where
    W: AsyncWrite + Unpin,
{
    while let Some(item) = outbound.recv().await {
        match item {
            Outbound::Frame(bytes) => {
                if let Err(e) = writer.write_all(&bytes).await {
                    debug!("🔌 Write failed on connection {}: {}", handle.id(), e);
                    handle.close();
                    break;
                }
            }
            Outbound::Shutdown => break,
        }
    }
    // Later sends fail with `Closed`.
    outbound.close();
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{BackendError, EffectInstance, HostBackend};
    use crate::protocol::build_client_frame;
    use tokio::io::duplex;

    const MASK: [u8; 4] = [1, 2, 3, 4];

    struct NullBackend;

    impl HostBackend for NullBackend {
        fn broadcast_chat(&mut self, _line: &str) {}

        fn execute_command(&mut self, _command: &str) -> Result<i32, BackendError> {
            Ok(1)
        }

        fn active_effects(&self, _player: &str) -> Result<Option<Vec<EffectInstance>>, BackendError> {
            Ok(None)
        }
    }

    /// Feeds `input` to a connection and returns everything it wrote.
    async fn run_session(input: Vec<u8>) -> (Vec<u8>, ConnectionHandle) {
        let (executor, queue) = HostExecutor::channel();
        let host = std::thread::spawn(move || queue.run(NullBackend));

        let (handle, outbound) = ConnectionHandle::new(1, "127.0.0.1:1".parse().unwrap());
        let (server_out, mut client_in) = duplex(64 * 1024);
        serve(&input[..], server_out, handle.clone(), outbound, executor).await;

        let mut written = Vec::new();
        client_in.read_to_end(&mut written).await.unwrap();
        host.join().unwrap();
        (written, handle)
    }

    #[tokio::test]
    async fn test_ping_gets_pong_then_close_is_echoed() {
        let mut input = build_client_frame(Opcode::Ping, b"are you there", MASK).unwrap();
        input.extend(build_client_frame(Opcode::Close, &[], MASK).unwrap());
        // Anything after the Close is never read.
        input.extend(build_client_frame(Opcode::Ping, b"late", MASK).unwrap());

        let (written, handle) = run_session(input).await;
        let mut expected = protocol::build_frame(Opcode::Pong, b"are you there").unwrap();
        expected.extend(protocol::build_frame(Opcode::Close, &[]).unwrap());
        assert_eq!(written, expected);
        assert_eq!(handle.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_end_of_stream_closes_without_close_frame() {
        let input = build_client_frame(Opcode::Pong, b"", MASK).unwrap();
        let (written, handle) = run_session(input).await;
        assert!(written.is_empty());
        assert_eq!(handle.state(), ConnectionState::Closed);
        assert!(handle.send_text("late").is_err());
    }

    #[tokio::test]
    async fn test_unsupported_opcode_is_skipped() {
        let mut input = vec![0x82, 0x82];
        input.extend_from_slice(&MASK);
        input.extend_from_slice(&[9, 9]);
        input.extend(build_client_frame(Opcode::Ping, b"x", MASK).unwrap());

        let (written, _) = run_session(input).await;
        assert_eq!(written, protocol::build_frame(Opcode::Pong, b"x").unwrap());
    }

    #[tokio::test]
    async fn test_text_is_dispatched() {
        let input = build_client_frame(Opcode::Text, br#"{"nothing":"here"}"#, MASK).unwrap();
        let (written, _) = run_session(input).await;
        let expected = protocol::build_frame(
            Opcode::Text,
            br#"{"status":"error","error":"Unknown message type. Use 'message', 'command', or 'getEffects' fields."}"#,
        )
        .unwrap();
        assert_eq!(written, expected);
    }

    #[tokio::test]
    async fn test_close_request_sends_close_frame() {
        let (executor, _queue) = HostExecutor::channel();
        let (handle, outbound) = ConnectionHandle::new(7, "127.0.0.1:1".parse().unwrap());
        let (server_out, mut client_in) = duplex(1024);
        // The peer stays silent; only the close request ends the session.
        let (_peer, server_in) = duplex(1024);

        handle.close();
        serve(server_in, server_out, handle.clone(), outbound, executor).await;

        let mut written = Vec::new();
        client_in.read_to_end(&mut written).await.unwrap();
        assert_eq!(written, [0x88, 0x00]);
        assert_eq!(handle.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_write_failure_ends_session() {
        let (executor, _queue) = HostExecutor::channel();
        let (handle, outbound) = ConnectionHandle::new(9, "127.0.0.1:1".parse().unwrap());
        let (server_out, client_in) = duplex(1024);
        drop(client_in);
        // The peer keeps its side open, so only the failed write can end the session.
        let (mut peer, server_in) = duplex(1024);
        peer.write_all(&build_client_frame(Opcode::Ping, b"x", MASK).unwrap())
            .await
            .unwrap();

        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            serve(server_in, server_out, handle.clone(), outbound, executor),
        )
        .await
        .expect("session outlived its writer");
        assert_eq!(handle.state(), ConnectionState::Closed);
        drop(peer);
    }
}
