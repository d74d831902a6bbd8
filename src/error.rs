//! Error types for the reactive transport.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use reactive_transport::{Buffer, Result};
//!
//! fn header_len(buffer: &Buffer) -> Result<i32> {
//!     buffer.get_int(0)
//! }
//! ```
//!
//! # Propagation Channels
//!
//! Errors travel on one of two channels, never both:
//!
//! - **Stream errors** are delivered once to the stream's exception handler
//!   and are terminal for that stream.
//! - **Operation errors** are returned (or passed to a one-shot completion
//!   handler) for exactly one call.
//!
//! Errors with no registered channel go to [`report_unhandled`].
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Buffer | [`Error::OutOfRange`], [`Error::UnsupportedEncoding`], [`Error::InvalidArgument`] |
//! | Stream | [`Error::StreamClosed`] |
//! | Frame | [`Error::UnexpectedContinuation`], [`Error::FrameInterleaving`] |
//! | Context | [`Error::TaskPanicked`] |
//! | Endpoint | [`Error::ResponseAlreadyEnded`], [`Error::NoLengthOrChunking`], [`Error::HeadAlreadyWritten`], [`Error::HandshakeAlreadyCompleted`] |
//! | Event bus | [`Error::NoHandlers`], [`Error::Timeout`], [`Error::RecipientFailure`], [`Error::BusClosed`], [`Error::UnknownCodec`], [`Error::TooManyPendingReplies`] |
//! | External | [`Error::Connection`], [`Error::Io`], [`Error::Json`], [`Error::WebSocket`], [`Error::ChannelClosed`] |

// ============================================================================
// Imports
// ============================================================================

use std::any::Any;
use std::io::Error as IoError;
use std::result::Result as StdResult;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;
use tokio_tungstenite::tungstenite::Error as WsError;
use tracing::error;

use crate::frame::FrameKind;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Buffer Errors
    // ========================================================================
    /// Read past the end of a buffer.
    ///
    /// Writes never produce this error, they zero-extend instead.
    #[error("Index out of range: {width} byte(s) at {position}, length is {length}")]
    OutOfRange {
        /// Requested start position.
        position: usize,
        /// Number of bytes requested.
        width: usize,
        /// Length of the buffer at the time of the read.
        length: usize,
    },

    /// Unknown character encoding name.
    #[error("Unsupported encoding: {name}")]
    UnsupportedEncoding {
        /// The encoding name as given by the caller.
        name: String,
    },

    /// Invalid argument passed to an operation.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    // ========================================================================
    // Stream Errors
    // ========================================================================
    /// Write to a sink that has already been closed.
    ///
    /// Delivered through the stream's exception handler, never returned
    /// from `write`.
    #[error("Stream closed")]
    StreamClosed,

    // ========================================================================
    // Frame Errors
    // ========================================================================
    /// Continuation frame with no message in progress.
    #[error("Unexpected continuation frame: no message in progress")]
    UnexpectedContinuation,

    /// New data frame while a fragmented message is still open.
    #[error("Frame interleaving: {kind} frame received while a message is open")]
    FrameInterleaving {
        /// Kind of the offending frame.
        kind: FrameKind,
    },

    // ========================================================================
    // Endpoint Errors
    // ========================================================================
    /// Write or end on a response that was already ended.
    #[error("Response has already been ended")]
    ResponseAlreadyEnded,

    /// Body write without chunked encoding or a content-length header.
    #[error("Set content-length header or enable chunked encoding before writing the body")]
    NoLengthOrChunking,

    /// Header or status change after the response head went out.
    #[error("Response head has already been written")]
    HeadAlreadyWritten,

    /// `reject()` on a WebSocket whose handshake already completed.
    #[error("WebSocket handshake already completed")]
    HandshakeAlreadyCompleted,

    // ========================================================================
    // Context Errors
    // ========================================================================
    /// A task queued on a context panicked.
    #[error("Context task panicked: {message}")]
    TaskPanicked {
        /// Panic payload, when it was a string.
        message: String,
    },

    // ========================================================================
    // Event Bus Errors
    // ========================================================================
    /// No consumer registered on the address at dispatch time.
    #[error("No handlers for address {address}")]
    NoHandlers {
        /// Destination address.
        address: String,
    },

    /// No reply received before the delivery deadline.
    #[error("Timed out after waiting {timeout_ms}ms for a reply on {address}")]
    Timeout {
        /// Destination address of the original send.
        address: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Recipient explicitly failed the message.
    #[error("Recipient failure ({code}): {message}")]
    RecipientFailure {
        /// Application failure code.
        code: i32,
        /// Failure description.
        message: String,
    },

    /// Event bus was closed before the operation completed.
    #[error("Event bus closed")]
    BusClosed,

    /// Delivery options name a codec that is not registered.
    #[error("No message codec registered under {name}")]
    UnknownCodec {
        /// Requested codec name.
        name: String,
    },

    /// Reply correlation table is at capacity.
    #[error("Too many pending replies: {pending}/{max}")]
    TooManyPendingReplies {
        /// Replies currently awaited.
        pending: usize,
        /// Configured maximum.
        max: usize,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// Transport connection failed.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Channel receive error.
    #[error("Channel closed")]
    ChannelClosed(#[from] RecvError),
}

// ============================================================================
// ReplyFailure
// ============================================================================

/// Failure kinds a send with a reply handler can end in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplyFailure {
    /// Address had no registered consumer.
    NoHandlers,
    /// Deadline passed without a reply.
    Timeout,
    /// Recipient called `fail`.
    RecipientFailure,
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates an out-of-range error.
    #[inline]
    pub fn out_of_range(position: usize, width: usize, length: usize) -> Self {
        Self::OutOfRange {
            position,
            width,
            length,
        }
    }

    /// Creates an unsupported encoding error.
    #[inline]
    pub fn unsupported_encoding(name: impl Into<String>) -> Self {
        Self::UnsupportedEncoding { name: name.into() }
    }

    /// Creates an invalid argument error.
    #[inline]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a frame interleaving error.
    #[inline]
    pub fn frame_interleaving(kind: FrameKind) -> Self {
        Self::FrameInterleaving { kind }
    }

    /// Creates a no-handlers error.
    #[inline]
    pub fn no_handlers(address: impl Into<String>) -> Self {
        Self::NoHandlers {
            address: address.into(),
        }
    }

    /// Creates a reply timeout error.
    #[inline]
    pub fn timeout(address: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            address: address.into(),
            timeout_ms,
        }
    }

    /// Creates a recipient failure error.
    #[inline]
    pub fn recipient_failure(code: i32, message: impl Into<String>) -> Self {
        Self::RecipientFailure {
            code,
            message: message.into(),
        }
    }

    /// Creates an unknown codec error.
    #[inline]
    pub fn unknown_codec(name: impl Into<String>) -> Self {
        Self::UnknownCodec { name: name.into() }
    }

    /// Creates a task panic error from a caught panic payload.
    pub fn task_panicked(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self::TaskPanicked { message }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns the reply failure kind, if this error ends a request/reply.
    #[inline]
    #[must_use]
    pub fn reply_failure(&self) -> Option<ReplyFailure> {
        match self {
            Self::NoHandlers { .. } => Some(ReplyFailure::NoHandlers),
            Self::Timeout { .. } => Some(ReplyFailure::Timeout),
            Self::RecipientFailure { .. } => Some(ReplyFailure::RecipientFailure),
            _ => None,
        }
    }

    /// Returns `true` if this is a reply timeout.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns `true` if this is a frame protocol violation.
    ///
    /// Protocol violations are fatal to the stream they occur on.
    #[inline]
    #[must_use]
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::UnexpectedContinuation | Self::FrameInterleaving { .. }
        )
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::StreamClosed | Self::Io(_) | Self::WebSocket(_)
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors affect a single call and leave other pending
    /// deliveries untouched.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NoHandlers { .. }
                | Self::Timeout { .. }
                | Self::RecipientFailure { .. }
                | Self::TooManyPendingReplies { .. }
        )
    }
}

// ============================================================================
// Unhandled Error Hook
// ============================================================================

/// Process-wide callback for errors with no registered failure channel.
pub type UnhandledErrorHook = Arc<dyn Fn(&Error) + Send + Sync>;

static UNHANDLED_HOOK: RwLock<Option<UnhandledErrorHook>> = RwLock::new(None);

/// Installs the process-wide unhandled-error hook, replacing any previous one.
pub fn set_unhandled_error_hook<F>(hook: F)
where
    F: Fn(&Error) + Send + Sync + 'static,
{
    *UNHANDLED_HOOK.write() = Some(Arc::new(hook));
}

/// Removes the process-wide unhandled-error hook.
pub fn clear_unhandled_error_hook() {
    *UNHANDLED_HOOK.write() = None;
}

/// Reports an error that no handler claimed.
///
/// Calls the installed hook, or logs at error level when none is set.
pub fn report_unhandled(err: &Error) {
    let hook = UNHANDLED_HOOK.read().clone();
    match hook {
        Some(hook) => hook(err),
        None => error!(error = %err, "Unhandled error"),
    }
}

/// Captures unhandled errors for one test at a time.
///
/// The hook is process-wide, so captures are serialized; dropping the
/// capture removes the hook.
#[cfg(test)]
pub(crate) struct UnhandledCapture {
    count: Arc<std::sync::atomic::AtomicUsize>,
    _serial: parking_lot::MutexGuard<'static, ()>,
}

#[cfg(test)]
static CAPTURE_SERIAL: parking_lot::Mutex<()> = parking_lot::Mutex::new(());

#[cfg(test)]
impl UnhandledCapture {
    /// Installs a hook counting errors that match `filter`.
    pub(crate) fn install(filter: fn(&Error) -> bool) -> Self {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let serial = CAPTURE_SERIAL.lock();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        set_unhandled_error_hook(move |err| {
            if filter(err) {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        });
        Self {
            count,
            _serial: serial,
        }
    }

    /// Matching errors reported so far.
    pub(crate) fn count(&self) -> usize {
        self.count.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Polls until at least `expected` matching errors were reported.
    pub(crate) async fn wait_for(&self, expected: usize) -> bool {
        for _ in 0..500 {
            if self.count() >= expected {
                return true;
            }
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        false
    }
}

#[cfg(test)]
impl Drop for UnhandledCapture {
    fn drop(&mut self) {
        clear_unhandled_error_hook();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_error_display() {
        let err = Error::no_handlers("orders.create");
        assert_eq!(err.to_string(), "No handlers for address orders.create");
    }

    #[test]
    fn test_out_of_range_display() {
        let err = Error::out_of_range(8, 4, 10);
        assert_eq!(
            err.to_string(),
            "Index out of range: 4 byte(s) at 8, length is 10"
        );
    }

    #[test]
    fn test_reply_failure_kinds() {
        assert_eq!(
            Error::no_handlers("a").reply_failure(),
            Some(ReplyFailure::NoHandlers)
        );
        assert_eq!(
            Error::timeout("a", 10).reply_failure(),
            Some(ReplyFailure::Timeout)
        );
        assert_eq!(
            Error::recipient_failure(3, "nope").reply_failure(),
            Some(ReplyFailure::RecipientFailure)
        );
        assert_eq!(Error::BusClosed.reply_failure(), None);
    }

    #[test]
    fn test_is_protocol_error() {
        assert!(Error::UnexpectedContinuation.is_protocol_error());
        assert!(Error::frame_interleaving(FrameKind::Text).is_protocol_error());
        assert!(!Error::StreamClosed.is_protocol_error());
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::timeout("a", 1000).is_recoverable());
        assert!(!Error::UnexpectedContinuation.is_recoverable());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.is_connection_error());
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_task_panicked_payloads() {
        let from_str: Box<dyn Any + Send> = Box::new("boom");
        let from_string: Box<dyn Any + Send> = Box::new(String::from("bang"));
        let opaque: Box<dyn Any + Send> = Box::new(7u8);

        assert_eq!(Error::task_panicked(&*from_str).to_string(), "Context task panicked: boom");
        assert!(matches!(Error::task_panicked(&*from_string), Error::TaskPanicked { message } if message == "bang"));
        assert!(matches!(Error::task_panicked(&*opaque), Error::TaskPanicked { .. }));
    }

    #[test]
    fn test_capture_counts_matching_errors() {
        let capture = UnhandledCapture::install(|err| matches!(err, Error::BusClosed));
        report_unhandled(&Error::BusClosed);
        report_unhandled(&Error::StreamClosed);
        assert_eq!(capture.count(), 1);
    }
}
