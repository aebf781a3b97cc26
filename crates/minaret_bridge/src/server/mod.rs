//! Listener, handshake and server lifecycle.

mod core;
mod handshake;

pub use self::core::{Broadcaster, WebSocketServer};
