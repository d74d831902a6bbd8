//! Flow-controlled stream contract.
//!
//! Every endpoint in the crate speaks the same backpressure protocol:
//!
//! ```text
//!  producer ──► ReadStream ──handler──► user ──write──► WriteStream ──► sink
//!                  ▲                                        │
//!                  └──────── pause() when full ◄────────────┘
//!                  └──────── resume() on drain ◄────────────┘
//! ```
//!
//! - [`ReadStream`]: push-driven source with `pause`/`resume`.
//! - [`WriteStream`]: sink with a byte watermark and a drain signal.
//! - [`InboundQueue`] / [`OutboundQueue`]: the reusable state machines
//!   endpoints build on.
//! - [`Pump`]: wires a read stream to a write stream with backpressure.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `inbound` | Read-side state machine |
//! | `outbound` | Write-side queue with watermark |
//! | `pump` | Read-to-write pump |

// ============================================================================
// Submodules
// ============================================================================

/// Read-side state machine.
pub mod inbound;

/// Write-side queue with watermark.
pub mod outbound;

/// Read-to-write pump.
pub mod pump;

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use crate::buffer::Buffer;
use crate::error::{Error, Result};

// ============================================================================
// Re-exports
// ============================================================================

pub use inbound::InboundQueue;
pub use outbound::OutboundQueue;
pub use pump::Pump;

// ============================================================================
// Handler Types
// ============================================================================

/// Data callback.
pub type Handler<T> = Arc<dyn Fn(T) + Send + Sync>;

/// Callback with no payload (end, drain, close).
pub type VoidHandler = Arc<dyn Fn() + Send + Sync>;

/// Stream error callback.
pub type ExceptionHandler = Arc<dyn Fn(Error) + Send + Sync>;

// ============================================================================
// StreamState
// ============================================================================

/// Lifecycle state of a read stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamState {
    /// Data callbacks fire as data arrives.
    Flowing,
    /// Data is buffered, no callbacks fire.
    Paused,
    /// The source is exhausted or was closed.
    Ended,
    /// A stream error occurred.
    Errored,
}

impl StreamState {
    /// Returns `true` for `Ended` and `Errored`.
    #[inline]
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Ended | Self::Errored)
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Flowing => "flowing",
            Self::Paused => "paused",
            Self::Ended => "ended",
            Self::Errored => "errored",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Traits
// ============================================================================

/// Shared by both stream halves.
pub trait StreamBase {
    /// Sets the callback for stream errors, replacing any previous one.
    fn exception_handler<F>(&self, handler: F) -> &Self
    where
        F: Fn(Error) + Send + Sync + 'static;
}

/// Push-driven source of `T` values.
pub trait ReadStream<T>: StreamBase {
    /// Sets the data callback, replacing any previous one.
    fn handler<F>(&self, handler: F) -> &Self
    where
        F: Fn(T) + Send + Sync + 'static;

    /// Removes the data callback. Data arriving while flowing is discarded.
    fn remove_handler(&self) -> &Self;

    /// Stops data callbacks; the producer buffers instead.
    fn pause(&self) -> &Self;

    /// Restarts data callbacks, flushing buffered data first.
    fn resume(&self) -> &Self;

    /// Sets the callback fired once after the last data callback.
    fn end_handler<F>(&self, handler: F) -> &Self
    where
        F: Fn() + Send + Sync + 'static;
}

/// Sink of `T` values with a queue watermark.
pub trait WriteStream<T>: StreamBase {
    /// Queues `data` for delivery.
    ///
    /// A write to a closed sink returns `Ok(())` and reports
    /// [`Error::StreamClosed`] through the exception handler. `Err` is
    /// reserved for misuse that the caller can fix.
    fn write(&self, data: T) -> Result<()>;

    /// Sets the high watermark in bytes.
    fn set_write_queue_max_size(&self, max_size: usize) -> &Self;

    /// Returns `true` while queued-but-unsent bytes exceed the watermark.
    fn write_queue_full(&self) -> bool;

    /// Sets the callback fired when the queue drops back below the watermark.
    fn drain_handler<F>(&self, handler: F) -> &Self
    where
        F: Fn() + Send + Sync + 'static;
}

/// Byte weight of a queued item, used for watermark accounting.
pub trait Weighted {
    /// Number of bytes this item accounts for.
    fn weight(&self) -> usize;
}

impl Weighted for Buffer {
    fn weight(&self) -> usize {
        self.length()
    }
}

impl Weighted for Vec<u8> {
    fn weight(&self) -> usize {
        self.len()
    }
}
