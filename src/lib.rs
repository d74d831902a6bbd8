//! Reactive Transport - Vert.x-style event-driven I/O substrate.
//!
//! This library provides byte buffers, backpressured streams, WebSocket
//! framing, socket-like endpoints and an addressable event bus, all driven
//! by single-threaded execution contexts on top of tokio.
//!
//! # Architecture
//!
//! Every endpoint is affined to one [`Context`]:
//!
//! - **Contexts**: a tokio task draining a FIFO of closures; callbacks of
//!   one endpoint never run concurrently
//! - **Streams**: push-based [`ReadStream`] / [`WriteStream`] with
//!   `pause`/`resume` and a byte watermark
//! - **Event bus**: the only way across contexts; sockets expose write
//!   handler ids that are bus addresses
//!
//! ```text
//! ┌──────────── ctx A ────────────┐        ┌──────────── ctx B ────────────┐
//! │ NetSocket ◄── transport task  │        │ consumer("jobs")              │
//! │    │ handler(buf)             │        │    │ msg.reply(..)            │
//! │    └─ bus.request("jobs") ────┼─ bus ─►│    └─ bus.send(sock.id, buf) ─┼─┐
//! │ NetSocket.write(buf) ◄────────┼────────┼───────────────────────────────┘ │
//! └───────────────────────────────┘        └─────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use reactive_transport::{EventBus, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let bus = EventBus::new();
//!
//!     bus.consumer_with_handler("greeter", |msg| {
//!         let name = msg.body().as_str().unwrap_or("stranger").to_string();
//!         msg.reply(format!("hello {name}"));
//!     });
//!
//!     let reply = bus.request("greeter", "ferris").await?;
//!     println!("{}", reply.body());
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`buffer`] | Growable random-access [`Buffer`] |
//! | [`context`] | Execution [`Context`] |
//! | [`endpoint`] | [`NetSocket`], HTTP request/response, [`WebSocket`] |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`eventbus`] | [`EventBus`], messages, consumers, producers |
//! | [`frame`] | WebSocket [`Frame`]s and reassembly |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`multimap`] | Case-insensitive [`MultiMap`] |
//! | [`stream`] | Stream traits, queues and [`Pump`] |
//! | [`transport`] | TCP and WebSocket drivers |

// ============================================================================
// Modules
// ============================================================================

/// Growable byte buffer.
pub mod buffer;

/// Single-threaded execution contexts.
pub mod context;

/// Socket-like endpoints.
///
/// Endpoints own no I/O; [`transport`] drivers or in-process code feed
/// them through their `handle_*` methods.
pub mod endpoint;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Addressable event bus.
pub mod eventbus;

/// WebSocket frames, reassembly and fragmentation.
pub mod frame;

/// Type-safe identifiers.
///
/// Newtype wrappers prevent mixing incompatible IDs at compile time.
pub mod identifiers;

/// Case-insensitive multi-valued map.
pub mod multimap;

/// Flow-controlled stream contract.
pub mod stream;

/// Network transports.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Core types
pub use buffer::Buffer;
pub use context::Context;
pub use multimap::MultiMap;

// Stream types
pub use stream::{Pump, ReadStream, StreamBase, StreamState, WriteStream};

// Frame types
pub use frame::{Frame, FrameAssembler, FrameKind, WebSocketMessage};

// Endpoint types
pub use endpoint::{
    HttpServerRequest, HttpServerResponse, HttpVersion, NetSocket, NetSocketOptions, RequestHead,
    ResponseHead, ResponsePart,
    ServerWebSocket, WebSocket, WebSocketOptions,
};

// Event bus types
pub use eventbus::{
    Body, DeliveryOptions, EventBus, EventBusOptions, Message, MessageCodec, MessageConsumer,
    MessageProducer,
};

// Transport types
pub use transport::{NetClient, NetServer, WebSocketServer};

// Error types
pub use error::{Error, ReplyFailure, Result};

// Identifier types
pub use identifiers::{ConsumerId, ContextId, HandlerId, ReplyAddress};
