//! Addressable event bus.
//!
//! Routes payloads between consumers registered on string addresses.
//!
//! | Operation | Receivers | Reply |
//! |-----------|-----------|-------|
//! | `send` | one, round robin | optional, via `request` / `send_with_reply_handler` |
//! | `publish` | every registered consumer | none |
//!
//! Reply failures are `NoHandlers`, `Timeout` or `RecipientFailure`; after
//! `close` every pending request fails with `BusClosed`.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `bus` | Registry, routing, reply correlation |
//! | `codec` | Payload codecs |
//! | `consumer` | `MessageConsumer` read stream |
//! | `message` | `Message` and `Body` |
//! | `options` | `DeliveryOptions`, `EventBusOptions` |
//! | `producer` | `MessageProducer` write stream |

// ============================================================================
// Submodules
// ============================================================================

/// Registry, routing, reply correlation.
pub mod bus;

/// Payload codecs.
pub mod codec;

/// Message consumers.
pub mod consumer;

/// Messages and payloads.
pub mod message;

/// Bus and delivery configuration.
pub mod options;

/// Message producers.
pub mod producer;

// ============================================================================
// Re-exports
// ============================================================================

pub use bus::{EventBus, ReplyFuture};
pub use codec::MessageCodec;
pub use consumer::MessageConsumer;
pub use message::{Body, Message};
pub use options::{DeliveryOptions, EventBusOptions};
pub use producer::MessageProducer;
