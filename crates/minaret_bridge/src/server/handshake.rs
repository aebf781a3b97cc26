//! Per-socket HTTP handling up to the WebSocket upgrade.

use crate::config::Credentials;
use crate::connection::{session, ConnectionHandle, ConnectionRegistry};
use crate::executor::HostExecutor;
use crate::protocol;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// How long a fresh socket may take to send its request head.
const HEAD_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// State shared by every connection task of one server run.
#[derive(Debug)]
pub(crate) struct ConnectionContext {
    pub executor: HostExecutor,
    pub registry: Arc<ConnectionRegistry>,
    pub credentials: Option<Credentials>,
}

impl ConnectionContext {
    fn is_authorized(&self, headers: &HashMap<String, String>) -> bool {
        let Some(credentials) = &self.credentials else {
            return true;
        };
        headers
            .get("authorization")
            .and_then(|value| protocol::parse_basic_auth(value))
            .is_some_and(|(username, password)| credentials.matches(&username, &password))
    }
}

/// Handles one accepted socket for its whole lifetime.
///
/// # Flow
///
/// 1. Read the request head; anything but a `GET` is closed silently, as is
///    a socket that sends no head within [`HEAD_READ_TIMEOUT`] or before the
///    server shuts down
/// 2. Plain HTTP requests get the informational 200 response
/// 3. With authentication enabled, a missing or wrong `Authorization`
///    header gets a 401
/// 4. Otherwise answer 101, register the connection and serve it until it
///    closes
pub(crate) async fn handle_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    context: Arc<ConnectionContext>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let head = tokio::select! {
        head = timeout(HEAD_READ_TIMEOUT, protocol::read_http_headers(&mut reader)) => head,
        _ = shutdown.recv() => {
            debug!("🚪 Dropping {remote_addr} before its handshake, server is stopping");
            return;
        }
    };
    drop(shutdown);
    let headers = match head {
        Ok(Ok(Some(headers))) => headers,
        Ok(Ok(None)) => {
            debug!("🚪 Closing non-GET request from {remote_addr}");
            return;
        }
        Ok(Err(e)) => {
            debug!("🚪 Failed to read request from {remote_addr}: {e}");
            return;
        }
        Err(_) => {
            debug!("🚪 No request head from {remote_addr} within {HEAD_READ_TIMEOUT:?}");
            return;
        }
    };

    if !protocol::is_websocket_upgrade(&headers) {
        debug!("📄 Plain HTTP request from {remote_addr}");
        reply_and_close(&mut write_half, &protocol::informational(), remote_addr).await;
        return;
    }

    if !context.is_authorized(&headers) {
        warn!("🚫 Authentication failed from: {remote_addr}");
        reply_and_close(&mut write_half, &protocol::unauthorized(), remote_addr).await;
        return;
    }

    let Some(client_key) = headers.get("sec-websocket-key") else {
        return;
    };
    let accept_key = protocol::generate_accept_key(client_key);
    if let Err(e) = write_half
        .write_all(protocol::switching_protocols(&accept_key).as_bytes())
        .await
    {
        debug!("🚪 Failed to complete handshake with {remote_addr}: {e}");
        return;
    }

    let id = context.registry.next_id();
    let (handle, outbound) = ConnectionHandle::new(id, remote_addr);
    context.registry.insert(handle.clone());
    info!("🔗 Connection {id} opened from {remote_addr}");

    session::serve(reader, write_half, handle, outbound, context.executor.clone()).await;

    context.registry.remove(id);
    info!("🔌 Connection {id} closed ({remote_addr})");
}

async fn reply_and_close(writer: &mut OwnedWriteHalf, response: &str, remote_addr: SocketAddr) {
    let result = async {
        writer.write_all(response.as_bytes()).await?;
        writer.shutdown().await
    }
    .await;
    if let Err(e) = result {
        debug!("🚪 Failed to answer {remote_addr}: {e}");
    }
}
