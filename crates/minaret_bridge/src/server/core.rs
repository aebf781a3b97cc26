//! Core WebSocket server implementation.
//!
//! The server owns the listener, the connection registry and the lifecycle
//! of every connection task. Host code interacts with it through
//! [`WebSocketServer`] for start/stop and through a cloneable
//! [`Broadcaster`] for pushing events from the host thread.

use super::handshake::{handle_connection, ConnectionContext};
use crate::config::ServerConfig;
use crate::connection::ConnectionRegistry;
use crate::error::ServerError;
use crate::events::ServerEvent;
use crate::executor::HostExecutor;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

const LISTEN_BACKLOG: i32 = 1024;

/// The embeddable WebSocket server.
///
/// # Example
///
/// ```no_run
/// use minaret_bridge::{HostExecutor, ServerConfig, WebSocketServer};
///
/// # async fn run(executor: HostExecutor) -> Result<(), minaret_bridge::ServerError> {
/// let server = WebSocketServer::new(ServerConfig::from_url("localhost:8765").unwrap(), executor);
/// let address = server.start().await?;
/// println!("listening on {address}");
/// server.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct WebSocketServer {
    /// Server configuration parameters
    config: ServerConfig,

    /// Where dispatched requests are executed
    executor: HostExecutor,

    /// Live connections, shared with every connection task
    registry: Arc<ConnectionRegistry>,

    /// Channel for coordinating server shutdown
    shutdown_sender: broadcast::Sender<()>,

    /// Present while the accept loop runs
    running: Mutex<Option<Running>>,
}

struct Running {
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl WebSocketServer {
    /// Creates a new server; nothing is bound until [`start`](Self::start).
    pub fn new(config: ServerConfig, executor: HostExecutor) -> Self {
        let (shutdown_sender, _) = broadcast::channel(1);
        Self {
            config,
            executor,
            registry: Arc::new(ConnectionRegistry::new()),
            shutdown_sender,
            running: Mutex::new(None),
        }
    }

    /// Binds the listener and starts accepting connections.
    ///
    /// # Returns
    ///
    /// The bound address, which differs from the configured one when port
    /// 0 was requested.
    ///
    /// # Errors
    ///
    /// * [`ServerError::AlreadyRunning`] if the server was already started
    /// * [`ServerError::Network`] if the host does not resolve
    /// * [`ServerError::Bind`] if the address cannot be bound; binding is
    ///   not retried
    pub async fn start(&self) -> Result<SocketAddr, ServerError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(ServerError::AlreadyRunning);
        }

        let address = resolve(&self.config.bind_target()).await?;
        let listener = create_listener(address)?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::Network(format!("Failed to read local address: {e}")))?;

        let context = Arc::new(ConnectionContext {
            executor: self.executor.clone(),
            registry: Arc::clone(&self.registry),
            credentials: self.config.credentials.clone(),
        });
        let shutdown = self.shutdown_sender.subscribe();
        let accept_task = tokio::spawn(accept_loop(listener, context, shutdown, self.config.shutdown_grace));
        *running = Some(Running {
            local_addr,
            accept_task,
        });

        info!("🚀 WebSocket server started on {local_addr}");
        match &self.config.credentials {
            Some(credentials) => info!("🔐 Authentication enabled for user: {}", credentials.username),
            None => info!("🌐 No authentication required"),
        }
        Ok(local_addr)
    }

    /// Stops accepting, closes every connection and waits for their tasks.
    ///
    /// Connection tasks still running after the configured grace period are
    /// aborted. Calling `stop` on a stopped server does nothing.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };
        info!("🛑 Shutting down WebSocket server on {}", running.local_addr);
        let _ = self.shutdown_sender.send(());
        if let Err(e) = running.accept_task.await {
            error!("Accept loop ended abnormally: {e}");
        }
        info!("🛑 WebSocket server stopped");
    }

    /// Sends a text frame to every open connection.
    ///
    /// # Returns
    ///
    /// How many connections accepted the frame.
    pub fn broadcast(&self, text: &str) -> usize {
        self.broadcaster().broadcast(text)
    }

    /// Broadcasts `event` rendered as JSON; see [`broadcast`](Self::broadcast).
    pub fn broadcast_event(&self, event: &ServerEvent) -> usize {
        self.broadcaster().broadcast_event(event)
    }

    /// A cloneable handle for broadcasting from other threads.
    pub fn broadcaster(&self) -> Broadcaster {
        Broadcaster {
            registry: Arc::clone(&self.registry),
        }
    }

    /// Number of upgraded connections currently registered.
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// The bound address while the server is running.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|running| running.local_addr)
    }

    /// True between a successful [`start`](Self::start) and [`stop`](Self::stop).
    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }
}

/// Pushes text frames to every connection of a server.
#[derive(Clone, Debug)]
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl Broadcaster {
    /// Sends `text` to every open connection and returns how many accepted
    /// it. Text too large for a single frame is dropped with a warning.
    pub fn broadcast(&self, text: &str) -> usize {
        match self.registry.broadcast_text(text) {
            Ok(delivered) => {
                debug!("📢 Broadcast delivered to {delivered} connections");
                delivered
            }
            Err(e) => {
                warn!("⚠️ Broadcast dropped: {e}");
                0
            }
        }
    }

    /// Broadcasts `event` rendered as JSON.
    pub fn broadcast_event(&self, event: &ServerEvent) -> usize {
        self.broadcast(&event.to_json().to_string())
    }
}

async fn resolve(target: &str) -> Result<SocketAddr, ServerError> {
    let addresses: Vec<SocketAddr> = tokio::net::lookup_host(target)
        .await
        .map_err(|e| ServerError::Network(format!("Failed to resolve {target}: {e}")))?
        .collect();
    addresses
        .iter()
        .find(|address| address.is_ipv4())
        .or_else(|| addresses.first())
        .copied()
        .ok_or_else(|| ServerError::Network(format!("No addresses found for {target}")))
}

fn create_listener(address: SocketAddr) -> Result<TcpListener, ServerError> {
    let socket = Socket::new(Domain::for_address(address), Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| ServerError::Network(format!("Socket creation failed: {e}")))?;
    socket.set_reuse_address(true).ok();

    socket
        .bind(&address.into())
        .map_err(|source| ServerError::Bind { address, source })?;
    socket
        .listen(LISTEN_BACKLOG)
        .map_err(|e| ServerError::Network(format!("Listen failed: {e}")))?;

    let std_listener: StdTcpListener = socket.into();
    std_listener
        .set_nonblocking(true)
        .map_err(|e| ServerError::Network(format!("Failed to set non-blocking mode: {e}")))?;
    TcpListener::from_std(std_listener)
        .map_err(|e| ServerError::Network(format!("Tokio listener creation failed: {e}")))
}

async fn accept_loop(
    listener: TcpListener,
    context: Arc<ConnectionContext>,
    mut shutdown: broadcast::Receiver<()>,
    grace: Duration,
) {
    let mut connections = JoinSet::new();
    // Sockets still in their handshake are not registered yet and listen here.
    let handshake_shutdown = shutdown.resubscribe();

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, remote_addr)) => {
                    debug!("📥 Accepted socket from {remote_addr}");
                    connections.spawn(handle_connection(
                        stream,
                        remote_addr,
                        Arc::clone(&context),
                        handshake_shutdown.resubscribe(),
                    ));
                }
                Err(e) => error!("Failed to accept connection: {e}"),
            },
            Some(finished) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = finished {
                    error!("Connection task failed: {e}");
                }
            }
        }
    }

    drop(listener);
    let closing = context.registry.close_all();
    info!("🛑 Closing {closing} open connections");

    let drained = tokio::time::timeout(grace, async {
        while connections.join_next().await.is_some() {}
    })
    .await;

    if drained.is_err() {
        warn!(
            "⏱️ {} connection tasks still running after {:?}, aborting",
            connections.len(),
            grace
        );
        connections.abort_all();
        while connections.join_next().await.is_some() {}
        // Aborted tasks never deregistered themselves.
        context.registry.clear();
    }
}
