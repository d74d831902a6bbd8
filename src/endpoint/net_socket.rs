//! TCP socket endpoint.
//!
//! A [`NetSocket`] is a `ReadStream<Buffer>` of bytes received from the peer
//! and a `WriteStream<Buffer>` of bytes to send. It owns no I/O itself; a
//! transport driver feeds it through the `handle_*` methods and drains its
//! outbound queue.
//!
//! ```text
//! transport reader ──handle_data──► ctx ──► handler(buf)
//! write(buf) ──► OutboundQueue ──next_outbound──► transport writer
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use crate::buffer::Buffer;
use crate::context::Context;
use crate::error::{Error, Result, report_unhandled};
use crate::eventbus::{Body, EventBus};
use crate::identifiers::HandlerId;
use crate::stream::{
    InboundQueue, OutboundQueue, ReadStream, StreamBase, StreamState, VoidHandler, WriteStream,
};

use super::options::NetSocketOptions;
use super::write_handler::WriteHandlerRegistration;

// ============================================================================
// NetSocket
// ============================================================================

struct NetSocketInner {
    context: Context,
    options: NetSocketOptions,
    inbound: InboundQueue<Buffer>,
    outbound: OutboundQueue<Buffer>,
    local_address: Option<SocketAddr>,
    remote_address: Option<SocketAddr>,
    write_handler: WriteHandlerRegistration,
    closed: AtomicBool,
    finished: AtomicBool,
    close_handler: Mutex<Option<VoidHandler>>,
}

/// Bidirectional byte stream over one connection.
///
/// Cloning yields another handle to the same socket.
#[derive(Clone)]
pub struct NetSocket {
    inner: Arc<NetSocketInner>,
}

impl NetSocket {
    /// Creates a socket affined to `context`.
    ///
    /// Registers a write handler address on `bus`; payloads sent there are
    /// written to this socket.
    pub fn new(
        bus: &EventBus,
        context: Context,
        options: &NetSocketOptions,
        local_address: Option<SocketAddr>,
        remote_address: Option<SocketAddr>,
    ) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<NetSocketInner>| {
            let target = weak.clone();
            let write_handler = WriteHandlerRegistration::register(bus, &context, move |body| {
                if let Some(inner) = target.upgrade() {
                    NetSocket { inner }.write_body(body);
                }
            });

            NetSocketInner {
                options: *options,
                inbound: InboundQueue::new(),
                outbound: OutboundQueue::new(options.write_queue_max_size)
                    .with_context(context.clone()),
                context,
                local_address,
                remote_address,
                write_handler,
                closed: AtomicBool::new(false),
                finished: AtomicBool::new(false),
                close_handler: Mutex::new(None),
            }
        });

        debug!(
            handler_id = %inner.write_handler.id(),
            remote = ?remote_address,
            "NetSocket created"
        );

        Self { inner }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Bus address that writes to this socket from any context.
    #[inline]
    #[must_use]
    pub fn write_handler_id(&self) -> &HandlerId {
        self.inner.write_handler.id()
    }

    /// Local socket address, if connected over a real transport.
    #[inline]
    #[must_use]
    pub fn local_address(&self) -> Option<SocketAddr> {
        self.inner.local_address
    }

    /// Peer socket address, if connected over a real transport.
    #[inline]
    #[must_use]
    pub fn remote_address(&self) -> Option<SocketAddr> {
        self.inner.remote_address
    }

    /// Context all callbacks run on.
    #[inline]
    #[must_use]
    pub fn context(&self) -> &Context {
        &self.inner.context
    }

    /// Socket configuration.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &NetSocketOptions {
        &self.inner.options
    }

    /// Read side state.
    #[must_use]
    pub fn state(&self) -> StreamState {
        self.inner.inbound.state()
    }

    /// Returns `true` once [`close`](Self::close) was called or the peer
    /// went away.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    // ========================================================================
    // Writing
    // ========================================================================

    /// Writes a UTF-8 string.
    ///
    /// # Errors
    ///
    /// Never fails today; the signature matches the other write operations.
    pub fn write_str(&self, text: &str) -> Result<()> {
        self.write(Buffer::from_string(text))
    }

    /// Writes a string in the named encoding.
    ///
    /// # Errors
    ///
    /// [`Error::UnsupportedEncoding`] for unknown encoding names.
    pub fn write_str_with_encoding(&self, text: &str, encoding: &str) -> Result<()> {
        self.write(Buffer::from_string_with_encoding(text, encoding)?)
    }

    fn write_body(&self, body: Body) {
        let written = match body {
            Body::Buffer(buffer) => self.write(buffer),
            Body::String(text) => self.write_str(&text),
            other => Err(Error::invalid_argument(format!(
                "socket write handler expects a buffer or string, got {}",
                other.codec_name()
            ))),
        };
        if let Err(e) = written {
            report_unhandled(&e);
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Closes the socket.
    ///
    /// Queued outbound bytes are still flushed. Undelivered inbound data is
    /// dropped and the end handler fires. The close handler fires once the
    /// transport has shut the connection down.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.outbound.close();
        self.inner.inbound.close();
        self.inner.write_handler.unregister();
        debug!(handler_id = %self.inner.write_handler.id(), "NetSocket closed");
    }

    /// Sets the callback fired once when the connection is gone.
    pub fn close_handler<F>(&self, handler: F) -> &Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.inner.close_handler.lock() = Some(Arc::new(handler));
        self
    }
}

// ============================================================================
// NetSocket - Transport Side
// ============================================================================

impl NetSocket {
    /// Delivers bytes read from the peer. Callable from any thread.
    pub fn handle_data(&self, data: Buffer) {
        let inbound = self.inner.inbound.clone();
        self.inner.context.dispatch(move || {
            inbound.push(data);
        });
    }

    /// Signals that the peer closed its write half.
    pub fn handle_end(&self) {
        let inbound = self.inner.inbound.clone();
        self.inner.context.dispatch(move || inbound.end());
    }

    /// Fails both halves with a transport error.
    pub fn handle_error(&self, err: Error) {
        self.inner.outbound.abort();
        let inbound = self.inner.inbound.clone();
        self.inner.context.dispatch(move || inbound.fail(err));
    }

    /// Signals that the connection is fully closed.
    ///
    /// Unsent bytes are discarded and the close handler fires once.
    pub fn handle_closed(&self) {
        if self.inner.finished.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.closed.store(true, Ordering::Release);
        self.inner.outbound.abort();
        self.inner.write_handler.unregister();

        let handler = self.inner.close_handler.lock().take();
        if let Some(handler) = handler {
            self.inner.context.dispatch(move || handler());
        }
    }

    /// Waits for the next chunk to send. `None` once closed and flushed.
    pub async fn next_outbound(&self) -> Option<Buffer> {
        self.inner.outbound.next().await
    }

    /// Takes every queued chunk without waiting.
    pub fn take_outbound(&self) -> Vec<Buffer> {
        self.inner.outbound.pop_all()
    }

    /// Waits until the read side wants data. `false` once it never will.
    pub async fn wait_for_demand(&self) -> bool {
        self.inner.inbound.wait_for_demand().await
    }
}

// ============================================================================
// Stream Traits
// ============================================================================

impl StreamBase for NetSocket {
    fn exception_handler<F>(&self, handler: F) -> &Self
    where
        F: Fn(Error) + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        self.inner.inbound.set_exception_handler(handler.clone());
        self.inner.outbound.set_exception_handler(handler);
        self
    }
}

impl ReadStream<Buffer> for NetSocket {
    fn handler<F>(&self, handler: F) -> &Self
    where
        F: Fn(Buffer) + Send + Sync + 'static,
    {
        self.inner.inbound.set_handler(Arc::new(handler));
        self
    }

    fn remove_handler(&self) -> &Self {
        self.inner.inbound.clear_handler();
        self
    }

    fn pause(&self) -> &Self {
        self.inner.inbound.pause();
        self
    }

    fn resume(&self) -> &Self {
        let inbound = self.inner.inbound.clone();
        self.inner.context.dispatch(move || inbound.resume());
        self
    }

    fn end_handler<F>(&self, handler: F) -> &Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.inbound.set_end_handler(Arc::new(handler));
        self
    }
}

impl WriteStream<Buffer> for NetSocket {
    /// Queues bytes. Writes after close go to the exception handler.
    fn write(&self, data: Buffer) -> Result<()> {
        self.inner.outbound.push(data);
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

impl fmt::Debug for NetSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetSocket")
            .field("write_handler_id", self.write_handler_id())
            .field("local_address", &self.inner.local_address)
            .field("remote_address", &self.inner.remote_address)
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
