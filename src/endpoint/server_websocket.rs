//! Server side of an upgraded WebSocket.
//!
//! A [`ServerWebSocket`] is a [`WebSocket`] plus the handshake request.
//! The connect handler may call [`reject`](ServerWebSocket::reject) before
//! the upgrade completes; the transport then answers the handshake with an
//! error status instead of switching protocols.
//!
//! | Handshake | `reject()` |
//! |-----------|------------|
//! | pending | refuses the upgrade |
//! | rejected | no-op |
//! | accepted | `HandshakeAlreadyCompleted` |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::multimap::MultiMap;

use super::http_request::RequestTarget;
use super::websocket::WebSocket;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandshakeState {
    Pending,
    Accepted,
    Rejected,
}

struct ServerInner {
    uri: String,
    headers: MultiMap,
    target: OnceLock<RequestTarget>,
    handshake: Mutex<HandshakeState>,
}

// ============================================================================
// ServerWebSocket
// ============================================================================

/// WebSocket accepted by a server.
///
/// Dereferences to [`WebSocket`] for reading and writing.
#[derive(Clone)]
pub struct ServerWebSocket {
    socket: WebSocket,
    inner: Arc<ServerInner>,
}

impl ServerWebSocket {
    /// Wraps `socket` with the handshake request target and headers.
    pub fn new(socket: WebSocket, uri: impl Into<String>, headers: MultiMap) -> Self {
        Self {
            socket,
            inner: Arc::new(ServerInner {
                uri: uri.into(),
                headers,
                target: OnceLock::new(),
                handshake: Mutex::new(HandshakeState::Pending),
            }),
        }
    }

    /// The underlying socket.
    #[inline]
    #[must_use]
    pub fn as_websocket(&self) -> &WebSocket {
        &self.socket
    }

    /// Handshake request target.
    #[inline]
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.inner.uri
    }

    /// Path of the handshake request target.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.target().path
    }

    /// Query of the handshake request target.
    #[must_use]
    pub fn query(&self) -> Option<&str> {
        self.target().query.as_deref()
    }

    /// Handshake request headers.
    #[inline]
    #[must_use]
    pub fn headers(&self) -> &MultiMap {
        &self.inner.headers
    }

    fn target(&self) -> &RequestTarget {
        self.inner.target.get_or_init(|| {
            let host = self.inner.headers.get("host").unwrap_or("localhost");
            RequestTarget::parse(&self.inner.uri, host)
        })
    }

    /// Refuses the upgrade.
    ///
    /// # Errors
    ///
    /// [`Error::HandshakeAlreadyCompleted`] once the upgrade went through.
    pub fn reject(&self) -> Result<()> {
        let mut handshake = self.inner.handshake.lock();
        match *handshake {
            HandshakeState::Accepted => Err(Error::HandshakeAlreadyCompleted),
            HandshakeState::Pending | HandshakeState::Rejected => {
                *handshake = HandshakeState::Rejected;
                debug!(uri = %self.inner.uri, "WebSocket handshake rejected");
                Ok(())
            }
        }
    }

    /// Returns `true` if [`reject`](Self::reject) was called before the
    /// upgrade.
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        *self.inner.handshake.lock() == HandshakeState::Rejected
    }

    /// Completes the handshake. Returns `false` if it was rejected.
    pub(crate) fn accept_handshake(&self) -> bool {
        let mut handshake = self.inner.handshake.lock();
        match *handshake {
            HandshakeState::Rejected => false,
            HandshakeState::Pending | HandshakeState::Accepted => {
                *handshake = HandshakeState::Accepted;
                true
            }
        }
    }
}

impl Deref for ServerWebSocket {
    type Target = WebSocket;

    fn deref(&self) -> &WebSocket {
        &self.socket
    }
}

impl fmt::Debug for ServerWebSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerWebSocket")
            .field("uri", &self.inner.uri)
            .field("handshake", &*self.inner.handshake.lock())
            .field("socket", &self.socket)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
