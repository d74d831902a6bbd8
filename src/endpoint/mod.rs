//! Socket-like endpoints.
//!
//! Every endpoint composes the stream contract and is affined to one
//! [`Context`](crate::Context). Transports feed endpoints through their
//! `handle_*` methods and drain their outbound queues; user code only sees
//! the stream traits and the endpoint-specific operations.
//!
//! | Endpoint | Reads | Writes | Bus addresses |
//! |----------|-------|--------|---------------|
//! | [`NetSocket`] | `Buffer` | `Buffer` | write handler id |
//! | [`HttpServerRequest`] | `Buffer` (body) | - | - |
//! | [`HttpServerResponse`] | - | `Buffer` (body) | - |
//! | [`WebSocket`] | `Buffer` (per frame) | `Buffer` (binary message) | binary and text handler ids |
//! | [`ServerWebSocket`] | as `WebSocket` | as `WebSocket` | as `WebSocket` |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `http_request` | `HttpServerRequest`, `RequestHead` |
//! | `http_response` | `HttpServerResponse`, `ResponsePart` |
//! | `net_socket` | `NetSocket` |
//! | `options` | `NetSocketOptions`, `WebSocketOptions` |
//! | `server_websocket` | `ServerWebSocket` |
//! | `websocket` | `WebSocket` |
//! | `write_handler` | Bus address to endpoint bridge |

// ============================================================================
// Submodules
// ============================================================================

/// Server-side HTTP request.
pub mod http_request;

/// Server-side HTTP response.
pub mod http_response;

/// TCP socket endpoint.
pub mod net_socket;

/// Endpoint configuration.
pub mod options;

/// Server side of an upgraded WebSocket.
pub mod server_websocket;

/// WebSocket endpoint.
pub mod websocket;

/// Bus address to endpoint bridge.
pub mod write_handler;

// ============================================================================
// Re-exports
// ============================================================================

pub use http_request::{HttpServerRequest, HttpVersion, RequestHead};
pub use http_response::{HttpServerResponse, ResponseHead, ResponsePart};
pub use net_socket::NetSocket;
pub use options::{NetSocketOptions, WebSocketOptions};
pub use server_websocket::ServerWebSocket;
pub use websocket::WebSocket;
pub use write_handler::WriteHandlerRegistration;
