//! Connection management for upgraded WebSocket clients.
//!
//! This module handles the lifecycle of a client connection after its
//! handshake: the read loop decoding frames, the single outbound writer, and
//! the registry the server keeps of live connections.

pub mod client;
pub mod registry;
pub(crate) mod session;

pub use client::ConnectionHandle;
pub use registry::ConnectionRegistry;

/// Type alias for connection identifiers.
///
/// Connection IDs are used to uniquely identify client connections
/// throughout their lifecycle on the server.
pub type ConnectionId = u64;

/// Lifecycle of a connection. States only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    /// The upgrade response has been sent.
    Handshaken = 0,
    /// The read loop is running.
    Open = 1,
    /// A Close frame has been queued; no further application data is sent.
    Closing = 2,
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ConnectionState::Handshaken,
            1 => ConnectionState::Open,
            2 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}
