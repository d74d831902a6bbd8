//! Server-side HTTP response.
//!
//! Writes are turned into [`ResponsePart`]s on an outbound queue that the
//! transport drains:
//!
//! ```text
//! write / end ──► Head ──► Chunk* ──► End{trailers}
//! ```
//!
//! | Call | Precondition | Failure |
//! |------|--------------|---------|
//! | `write` | not ended, chunked or `content-length` set | `ResponseAlreadyEnded`, `NoLengthOrChunking` |
//! | `end*` | not ended | `ResponseAlreadyEnded` |
//! | status, headers, chunked | head not written | `HeadAlreadyWritten` |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_tungstenite::tungstenite::http::StatusCode;
use tracing::debug;

use crate::buffer::Buffer;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::multimap::MultiMap;
use crate::stream::{OutboundQueue, StreamBase, VoidHandler, Weighted, WriteStream};
use crate::stream::outbound::DEFAULT_WRITE_QUEUE_MAX_SIZE;

// ============================================================================
// Constants
// ============================================================================

const CONTENT_LENGTH: &str = "content-length";

const DEFAULT_STATUS_CODE: u16 = 200;

// ============================================================================
// ResponsePart
// ============================================================================

/// Status line and headers, sent before any body bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    /// Status code.
    pub status_code: u16,
    /// Reason phrase.
    pub status_message: String,
    /// Response headers.
    pub headers: MultiMap,
    /// Chunked transfer encoding.
    pub chunked: bool,
}

/// One unit of response output, in wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponsePart {
    /// Status line and headers.
    Head(ResponseHead),
    /// Body bytes.
    Chunk(Buffer),
    /// End of the response; trailers are only sent when chunked.
    End {
        /// Trailing headers.
        trailers: MultiMap,
    },
}

impl Weighted for ResponsePart {
    fn weight(&self) -> usize {
        match self {
            Self::Chunk(buffer) => buffer.length(),
            Self::Head(_) | Self::End { .. } => 0,
        }
    }
}

/// Standard reason phrase for `code`, or an empty string.
#[must_use]
pub fn reason_phrase(code: u16) -> &'static str {
    StatusCode::from_u16(code)
        .ok()
        .and_then(|status| status.canonical_reason())
        .unwrap_or("")
}

// ============================================================================
// HttpServerResponse
// ============================================================================

struct ResponseState {
    status_code: u16,
    status_message: Option<String>,
    headers: MultiMap,
    trailers: MultiMap,
    chunked: bool,
    head_written: bool,
    ended: bool,
    closed: bool,
    headers_end_handler: Option<VoidHandler>,
    body_end_handler: Option<VoidHandler>,
    close_handler: Option<VoidHandler>,
}

struct ResponseInner {
    context: Context,
    state: Mutex<ResponseState>,
    outbound: OutboundQueue<ResponsePart>,
}

/// Outgoing HTTP response on the server side.
///
/// Cloning yields another handle to the same response.
#[derive(Clone)]
pub struct HttpServerResponse {
    inner: Arc<ResponseInner>,
}

impl HttpServerResponse {
    /// Creates a `200` response affined to `context`.
    pub fn new(context: Context) -> Self {
        Self {
            inner: Arc::new(ResponseInner {
                outbound: OutboundQueue::new(DEFAULT_WRITE_QUEUE_MAX_SIZE)
                    .with_context(context.clone()),
                context,
                state: Mutex::new(ResponseState {
                    status_code: DEFAULT_STATUS_CODE,
                    status_message: None,
                    headers: MultiMap::new(),
                    trailers: MultiMap::new(),
                    chunked: false,
                    head_written: false,
                    ended: false,
                    closed: false,
                    headers_end_handler: None,
                    body_end_handler: None,
                    close_handler: None,
                }),
            }),
        }
    }

    // ========================================================================
    // Status and Headers
    // ========================================================================

    /// Status code, `200` unless set.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        self.inner.state.lock().status_code
    }

    /// Sets the status code.
    ///
    /// # Errors
    ///
    /// - [`Error::HeadAlreadyWritten`] once the head is out
    /// - [`Error::InvalidArgument`] outside `100..=999`
    pub fn set_status_code(&self, code: u16) -> Result<&Self> {
        if !(100..=999).contains(&code) {
            return Err(Error::invalid_argument(format!("invalid status code {code}")));
        }
        self.with_open_head(|state| state.status_code = code)?;
        Ok(self)
    }

    /// Reason phrase; defaults to the standard phrase for the status code.
    #[must_use]
    pub fn status_message(&self) -> String {
        let state = self.inner.state.lock();
        state
            .status_message
            .clone()
            .unwrap_or_else(|| reason_phrase(state.status_code).to_string())
    }

    /// Sets a custom reason phrase.
    ///
    /// # Errors
    ///
    /// [`Error::HeadAlreadyWritten`] once the head is out.
    pub fn set_status_message(&self, message: impl Into<String>) -> Result<&Self> {
        let message = message.into();
        self.with_open_head(|state| state.status_message = Some(message))?;
        Ok(self)
    }

    /// Returns `true` if chunked transfer encoding is on.
    #[must_use]
    pub fn is_chunked(&self) -> bool {
        self.inner.state.lock().chunked
    }

    /// Turns chunked transfer encoding on or off.
    ///
    /// # Errors
    ///
    /// [`Error::HeadAlreadyWritten`] once the head is out.
    pub fn set_chunked(&self, chunked: bool) -> Result<&Self> {
        self.with_open_head(|state| state.chunked = chunked)?;
        Ok(self)
    }

    /// Snapshot of the response headers.
    #[must_use]
    pub fn headers(&self) -> MultiMap {
        self.inner.state.lock().headers.clone()
    }

    /// Adds a header value.
    ///
    /// # Errors
    ///
    /// [`Error::HeadAlreadyWritten`] once the head is out.
    pub fn put_header(&self, name: impl Into<String>, value: impl Into<String>) -> Result<&Self> {
        let (name, value) = (name.into(), value.into());
        self.with_open_head(|state| {
            state.headers.add(name, value);
        })?;
        Ok(self)
    }

    /// Snapshot of the trailers.
    #[must_use]
    pub fn trailers(&self) -> MultiMap {
        self.inner.state.lock().trailers.clone()
    }

    /// Adds a trailer, sent with the end of a chunked response.
    ///
    /// # Errors
    ///
    /// [`Error::ResponseAlreadyEnded`] after end.
    pub fn put_trailer(&self, name: impl Into<String>, value: impl Into<String>) -> Result<&Self> {
        let mut state = self.inner.state.lock();
        if state.ended {
            return Err(Error::ResponseAlreadyEnded);
        }
        state.trailers.add(name, value);
        Ok(self)
    }

    fn with_open_head(&self, update: impl FnOnce(&mut ResponseState)) -> Result<()> {
        let mut state = self.inner.state.lock();
        if state.head_written {
            return Err(Error::HeadAlreadyWritten);
        }
        update(&mut state);
        Ok(())
    }

    // ========================================================================
    // Body
    // ========================================================================

    /// Writes a UTF-8 string.
    ///
    /// # Errors
    ///
    /// Same as [`WriteStream::write`].
    pub fn write_str(&self, text: &str) -> Result<()> {
        self.write(Buffer::from_string(text))
    }

    /// Ends the response with no further body.
    ///
    /// # Errors
    ///
    /// [`Error::ResponseAlreadyEnded`] on a second call.
    pub fn end(&self) -> Result<()> {
        self.end_with_buffer(Buffer::new())
    }

    /// Ends the response with a final string.
    ///
    /// # Errors
    ///
    /// [`Error::ResponseAlreadyEnded`] on a second call.
    pub fn end_with_str(&self, text: &str) -> Result<()> {
        self.end_with_buffer(Buffer::from_string(text))
    }

    /// Ends the response with a final chunk.
    ///
    /// Without chunking or an explicit `content-length`, the length header
    /// is set from `data`.
    ///
    /// # Errors
    ///
    /// [`Error::ResponseAlreadyEnded`] on a second call.
    pub fn end_with_buffer(&self, data: Buffer) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            if state.ended {
                return Err(Error::ResponseAlreadyEnded);
            }
            if !state.head_written && !state.chunked && !state.headers.contains(CONTENT_LENGTH) {
                state.headers.set(CONTENT_LENGTH, data.length().to_string());
            }
        }
        self.write_head();

        let (trailers, body_end_handler) = {
            let mut state = self.inner.state.lock();
            if state.ended {
                return Err(Error::ResponseAlreadyEnded);
            }
            state.ended = true;
            let trailers = if state.chunked {
                std::mem::take(&mut state.trailers)
            } else {
                MultiMap::new()
            };
            (trailers, state.body_end_handler.take())
        };

        if !data.is_empty() {
            self.inner.outbound.push(ResponsePart::Chunk(data));
        }
        self.inner.outbound.push(ResponsePart::End { trailers });
        self.inner.outbound.close();

        debug!(status = self.status_code(), "Response ended");

        if let Some(handler) = body_end_handler {
            self.inner.context.dispatch(move || handler());
        }
        Ok(())
    }

    /// Returns `true` after any `end*` call.
    #[must_use]
    pub fn ended(&self) -> bool {
        self.inner.state.lock().ended
    }

    /// Returns `true` once the head has been queued.
    #[must_use]
    pub fn head_written(&self) -> bool {
        self.inner.state.lock().head_written
    }

    /// Returns `true` once the connection is closed.
    #[must_use]
    pub fn closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Closes the underlying connection. Unsent parts are discarded.
    pub fn close(&self) {
        self.handle_closed();
    }

    // ========================================================================
    // Handlers
    // ========================================================================

    /// Called once, right before the head is written. Headers may still be
    /// changed from inside the callback.
    pub fn headers_end_handler<F>(&self, handler: F) -> &Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.state.lock().headers_end_handler = Some(Arc::new(handler));
        self
    }

    /// Called once after the last part is queued.
    pub fn body_end_handler<F>(&self, handler: F) -> &Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.state.lock().body_end_handler = Some(Arc::new(handler));
        self
    }

    /// Called once when the connection closes.
    pub fn close_handler<F>(&self, handler: F) -> &Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.state.lock().close_handler = Some(Arc::new(handler));
        self
    }

    // ========================================================================
    // Internal
    // ========================================================================

    fn write_head(&self) {
        let headers_end = {
            let mut state = self.inner.state.lock();
            if state.head_written {
                return;
            }
            state.headers_end_handler.take()
        };
        if let Some(handler) = headers_end {
            handler();
        }

        let head = {
            let mut state = self.inner.state.lock();
            if state.head_written {
                return;
            }
            state.head_written = true;
            ResponseHead {
                status_code: state.status_code,
                status_message: state
                    .status_message
                    .clone()
                    .unwrap_or_else(|| reason_phrase(state.status_code).to_string()),
                headers: state.headers.clone(),
                chunked: state.chunked,
            }
        };
        self.inner.outbound.push(ResponsePart::Head(head));
    }
}

// ============================================================================
// HttpServerResponse - Transport Side
// ============================================================================

impl HttpServerResponse {
    /// Waits for the next part. `None` once ended and drained.
    pub async fn next_part(&self) -> Option<ResponsePart> {
        self.inner.outbound.next().await
    }

    /// Takes every queued part without waiting.
    pub fn take_parts(&self) -> Vec<ResponsePart> {
        self.inner.outbound.pop_all()
    }

    /// Signals that the connection is gone. The close handler fires once.
    pub fn handle_closed(&self) {
        let handler = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.close_handler.take()
        };
        self.inner.outbound.abort();
        debug!("Response connection closed");

        if let Some(handler) = handler {
            self.inner.context.dispatch(move || handler());
        }
    }
}

// ============================================================================
// Stream Traits
// ============================================================================

impl StreamBase for HttpServerResponse {
    fn exception_handler<F>(&self, handler: F) -> &Self
    where
        F: Fn(Error) + Send + Sync + 'static,
    {
        self.inner.outbound.set_exception_handler(Arc::new(handler));
        self
    }
}

impl WriteStream<Buffer> for HttpServerResponse {
    /// Queues a body chunk, writing the head first if needed.
    ///
    /// # Errors
    ///
    /// - [`Error::ResponseAlreadyEnded`] after end
    /// - [`Error::NoLengthOrChunking`] if the head is not written yet and
    ///   neither chunking nor `content-length` is set
    fn write(&self, data: Buffer) -> Result<()> {
        {
            let state = self.inner.state.lock();
            if state.ended {
                return Err(Error::ResponseAlreadyEnded);
            }
            if !state.head_written && !state.chunked && !state.headers.contains(CONTENT_LENGTH) {
                return Err(Error::NoLengthOrChunking);
            }
        }
        self.write_head();
        self.inner.outbound.push(ResponsePart::Chunk(data));
        Ok(())
    }

    fn set_write_queue_max_size(&self, max_size: usize) -> &Self {
        self.inner.outbound.set_max_size(max_size);
        self
    }

    fn write_queue_full(&self) -> bool {
        self.inner.outbound.is_full()
    }

    fn drain_handler<F>(&self, handler: F) -> &Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.outbound.set_drain_handler(Arc::new(handler));
        self
    }
}

impl fmt::Debug for HttpServerResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("HttpServerResponse")
            .field("status_code", &state.status_code)
            .field("chunked", &state.chunked)
            .field("head_written", &state.head_written)
            .field("ended", &state.ended)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
