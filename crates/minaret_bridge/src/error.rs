//! Error types shared across the bridge.
//!
//! Each layer has its own enum. Transport and protocol failures stay inside
//! a connection, request failures become error responses, and only startup
//! problems surface as [`ServerError`] to the embedding host.

use crate::protocol::ProtocolError;
use std::net::SocketAddr;
use thiserror::Error;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("Server is already running")]
    AlreadyRunning,
    #[error("Host executor is no longer accepting work")]
    ExecutorClosed,
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised when queuing outbound frames on a connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Connection is closed")]
    Closed,
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}
