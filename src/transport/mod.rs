//! Network transports.
//!
//! Drivers that connect endpoints to real sockets. Each connection gets its
//! own [`Context`](crate::Context) and a single tokio task that moves data
//! between the wire and the endpoint's queues.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   handle_*    ┌──────────────┐   callbacks   ┌──────────┐
//! │ driver task  │──────────────►│  endpoint    │──────────────►│ user code│
//! │ (tokio)      │◄──────────────│  (context)   │◄──────────────│          │
//! └──────────────┘ next_outbound └──────────────┘  write/close  └──────────┘
//! ```
//!
//! A paused endpoint stops its driver from reading, so TCP flow control
//! pushes back on the peer.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `net` | TCP `NetServer` / `NetClient` |
//! | `websocket` | tokio-tungstenite `WebSocketServer` / `connect` |

// ============================================================================
// Submodules
// ============================================================================

/// TCP transport.
pub mod net;

/// WebSocket transport.
pub mod websocket;

// ============================================================================
// Re-exports
// ============================================================================

pub use net::{DEFAULT_BIND_IP, NetClient, NetServer};
pub use websocket::{WebSocketServer, connect};
