//! # Minaret Bridge - WebSocket access to a running game host
//!
//! An embeddable WebSocket server that lets external tools talk to a game
//! host with small JSON requests. The bridge handles networking, framing and
//! concurrency; all game behavior stays behind the host's [`HostBackend`].
//!
//! ## Design Philosophy
//!
//! The bridge contains **no game logic** - it only moves requests to the host
//! and replies back:
//!
//! * **Hand-rolled RFC 6455 transport** - Upgrade handshake, masking, control
//!   frames and 16-bit extended lengths, nothing more
//! * **Host thread affinity** - Every backend call runs on the host's own
//!   thread through the [`HostExecutor`]
//! * **Dependency-free JSON** - A small lenient codec in [`json`]
//! * **Optional Basic authentication** - Checked before the upgrade completes
//!
//! ## Architecture Overview
//!
//! ### Core Components
//!
//! * **Protocol codec** ([`protocol`]) - Pure handshake and frame functions
//! * **Dispatcher** ([`messaging`]) - Classifies requests and builds responses
//! * **Connections** ([`connection`]) - Read loop, single outbound writer and
//!   the live connection registry
//! * **Server** ([`server`]) - Listener, handshake, lifecycle and broadcast
//! * **Events** ([`events`]) - Host-originated notifications for all clients
//!
//! ### Message Flow
//!
//! 1. A client connects and upgrades with `GET` + `Upgrade: websocket`
//! 2. Each text frame is parsed into a flat JSON object
//! 3. The request kind (`message`, `command` or `getEffects`) is submitted to
//!    the host executor
//! 4. The host thread runs the backend call and builds the JSON response
//! 5. The response is queued on the connection's outbound writer
//!
//! ### Requests
//!
//! ```json
//! {"message": "Hello world!", "user": "alice", "chat": "global"}
//! {"command": "say Hello from WebSocket!"}
//! {"getEffects": "alice"}
//! ```
//!
//! ## Error Handling
//!
//! * **Startup errors** - [`ServerError`] from [`WebSocketServer::start`]
//! * **Transport and protocol errors** - Contained in the connection, which is
//!   closed and deregistered
//! * **Request errors** - Always answered with a `status: "error"` response
//!
//! ## Thread Safety
//!
//! * The connection registry is a `DashMap` shared by all connection tasks
//! * Each connection has exactly one writer; every sender queues whole frames
//! * The host executor runs one task at a time in submission order

pub use config::{ConfigError, Credentials, ServerConfig};
pub use error::{ConnectionError, ServerError};
pub use events::{HealAggregator, ServerEvent};
pub use executor::{BackendError, EffectInstance, HostBackend, HostExecutor, HostQueue};
pub use messaging::{dispatch, Responder};
pub use server::{Broadcaster, WebSocketServer};

pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod executor;
pub mod json;
pub mod messaging;
pub mod protocol;
pub mod server;
