//! Socket Abstraction
//!
//! The router talks to peers through bidirectional text sockets. Sends are
//! fire-and-forget: the transport queues outgoing frames and reports any
//! later failure through the socket's listener.

mod websocket;

pub use websocket::WebSocket;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Close code for a normal, intentional close
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close code sent when a node goes away
pub const GOING_AWAY: u16 = 1001;

/// Close code reported when a connection drops without a close frame
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Process-unique socket identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId(u64);

impl SocketId {
    /// Allocate a fresh identifier
    pub fn next() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "socket-{}", self.0)
    }
}

/// Error reported to a [`SocketListener`] when a socket fails
#[derive(Debug, Clone)]
pub enum SocketError {
    /// Could not establish the connection
    Connect(String),
    /// The connection broke while in use
    Transport(String),
    /// The socket was cancelled locally
    Cancelled,
}

impl fmt::Display for SocketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketError::Connect(msg) => write!(f, "Connect failed: {}", msg),
            SocketError::Transport(msg) => write!(f, "Transport error: {}", msg),
            SocketError::Cancelled => write!(f, "Socket cancelled"),
        }
    }
}

impl std::error::Error for SocketError {}

/// A bidirectional text socket to another node
pub trait Socket: Send + Sync {
    /// Identity used to match sockets across registries
    fn id(&self) -> SocketId;

    /// Queue a text frame. Returns false if the socket is already closed.
    fn send(&self, text: &str) -> bool;

    /// Start a graceful close. Returns false if the socket is already closed.
    fn close(&self, code: u16, reason: &str) -> bool;

    /// Drop the connection immediately, discarding queued frames
    fn cancel(&self);
}

impl fmt::Debug for dyn Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

/// Shared handle to a socket
pub type SocketRef = Arc<dyn Socket>;

/// Receives inbound traffic and lifecycle events for a socket
pub trait SocketListener: Send + Sync {
    fn on_message(&self, socket: &SocketRef, text: &str);

    /// The remote side started closing the connection
    fn on_closing(&self, socket: &SocketRef, code: u16, reason: &str);

    /// The connection is fully closed
    fn on_closed(&self, socket: &SocketRef, code: u16, reason: &str);

    fn on_failure(&self, socket: &SocketRef, error: &SocketError);
}
