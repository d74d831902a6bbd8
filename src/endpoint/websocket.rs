//! WebSocket endpoint.
//!
//! Inbound frames flow through one router on the socket's context:
//!
//! ```text
//! handle_frame ──► InboundQueue<Frame> ──► FrameAssembler ──► frame_handler(frame)
//!                                              │          ──► handler(payload)
//!                                              │          ──► message_handler(msg)  (on final frame)
//!                                              └── protocol error ──► exception_handler, stream errored
//! ```
//!
//! Outbound frames are validated by a [`FrameSequencer`] so a socket never
//! interleaves two messages on the wire.
//!
//! Each socket registers two write handler addresses on the event bus:
//! buffers sent to the binary id go out as binary messages, strings sent to
//! the text id go out as text messages.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::buffer::Buffer;
use crate::context::Context;
use crate::error::{Error, Result, report_unhandled};
use crate::eventbus::{Body, EventBus};
use crate::frame::{Frame, FrameAssembler, FrameSequencer, WebSocketMessage, fragment};
use crate::identifiers::HandlerId;
use crate::stream::{
    Handler, InboundQueue, OutboundQueue, ReadStream, StreamBase, StreamState, VoidHandler,
    WriteStream,
};

use super::options::WebSocketOptions;
use super::write_handler::WriteHandlerRegistration;

// ============================================================================
// WebSocketInner
// ============================================================================

struct WebSocketInner {
    context: Context,
    options: WebSocketOptions,
    local_address: Option<SocketAddr>,
    remote_address: Option<SocketAddr>,

    inbound: InboundQueue<Frame>,
    assembler: Mutex<FrameAssembler>,
    frame_handler: Mutex<Option<Handler<Frame>>>,
    data_handler: Mutex<Option<Handler<Buffer>>>,
    message_handler: Mutex<Option<Handler<WebSocketMessage>>>,

    outbound: OutboundQueue<Frame>,
    sequencer: Mutex<FrameSequencer>,

    binary_handler: WriteHandlerRegistration,
    text_handler: WriteHandlerRegistration,

    closed: AtomicBool,
    finished: AtomicBool,
    close_handler: Mutex<Option<VoidHandler>>,
}

impl WebSocketInner {
    /// Routes one inbound frame. Runs on the socket's context.
    fn on_frame(&self, frame: Frame) {
        let frame_handler = self.frame_handler.lock().clone();
        let data_handler = self.data_handler.lock().clone();

        let assembled = self.assembler.lock().push(frame.clone());
        let message = match assembled {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Invalid inbound frame sequence");
                self.inbound.fail(e);
                return;
            }
        };

        if let Some(handler) = data_handler {
            handler(frame.binary_data().clone());
        }
        if let Some(handler) = frame_handler {
            handler(frame);
        }
        if let Some(message) = message {
            let handler = self.message_handler.lock().clone();
            if let Some(handler) = handler {
                handler(message);
            }
        }
    }
}

// ============================================================================
// WebSocket
// ============================================================================

/// One side of a WebSocket connection.
///
/// Cloning yields another handle to the same socket.
#[derive(Clone)]
pub struct WebSocket {
    inner: Arc<WebSocketInner>,
}

impl WebSocket {
    /// Creates a socket affined to `context` and registers its binary and
    /// text write handler addresses on `bus`.
    pub fn new(
        bus: &EventBus,
        context: Context,
        options: &WebSocketOptions,
        local_address: Option<SocketAddr>,
        remote_address: Option<SocketAddr>,
    ) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<WebSocketInner>| {
            let inbound = InboundQueue::new();
            let router = weak.clone();
            inbound.set_handler(Arc::new(move |frame| {
                if let Some(inner) = router.upgrade() {
                    inner.on_frame(frame);
                }
            }));

            let target = weak.clone();
            let binary_handler = WriteHandlerRegistration::register(bus, &context, move |body| {
                if let Some(inner) = target.upgrade() {
                    WebSocket { inner }.write_body(body, false);
                }
            });
            let target = weak.clone();
            let text_handler = WriteHandlerRegistration::register(bus, &context, move |body| {
                if let Some(inner) = target.upgrade() {
                    WebSocket { inner }.write_body(body, true);
                }
            });

            WebSocketInner {
                outbound: OutboundQueue::new(options.write_queue_max_size)
                    .with_context(context.clone()),
                context,
                options: *options,
                local_address,
                remote_address,
                inbound,
                assembler: Mutex::new(FrameAssembler::new()),
                frame_handler: Mutex::new(None),
                data_handler: Mutex::new(None),
                message_handler: Mutex::new(None),
                sequencer: Mutex::new(FrameSequencer::new()),
                binary_handler,
                text_handler,
                closed: AtomicBool::new(false),
                finished: AtomicBool::new(false),
                close_handler: Mutex::new(None),
            }
        });

        debug!(
            binary_handler_id = %inner.binary_handler.id(),
            text_handler_id = %inner.text_handler.id(),
            remote = ?remote_address,
            "WebSocket created"
        );

        Self { inner }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Bus address that writes buffers to this socket as binary messages.
    #[inline]
    #[must_use]
    pub fn binary_handler_id(&self) -> &HandlerId {
        self.inner.binary_handler.id()
    }

    /// Bus address that writes strings to this socket as text messages.
    #[inline]
    #[must_use]
    pub fn text_handler_id(&self) -> &HandlerId {
        self.inner.text_handler.id()
    }

    /// Local socket address.
    #[inline]
    #[must_use]
    pub fn local_address(&self) -> Option<SocketAddr> {
        self.inner.local_address
    }

    /// Peer socket address.
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
    pub fn options(&self) -> &WebSocketOptions {
        &self.inner.options
    }

    /// Read side state.
    #[must_use]
    pub fn state(&self) -> StreamState {
        self.inner.inbound.state()
    }

    /// Returns `true` once closed locally or by the peer.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    // ========================================================================
    // Inbound Handlers
    // ========================================================================

    /// Called with every inbound frame, before reassembly completes.
    pub fn frame_handler<F>(&self, handler: F) -> &Self
    where
        F: Fn(Frame) + Send + Sync + 'static,
    {
        *self.inner.frame_handler.lock() = Some(Arc::new(handler));
        self
    }

    /// Called with every complete message.
    pub fn message_handler<F>(&self, handler: F) -> &Self
    where
        F: Fn(WebSocketMessage) + Send + Sync + 'static,
    {
        *self.inner.message_handler.lock() = Some(Arc::new(handler));
        self
    }

    // ========================================================================
    // Writing
    // ========================================================================

    /// Queues one frame.
    ///
    /// # Errors
    ///
    /// - [`Error::UnexpectedContinuation`] for a continuation with no open message
    /// - [`Error::FrameInterleaving`] for a new message while one is open
    pub fn write_frame(&self, frame: Frame) -> Result<()> {
        self.inner.sequencer.lock().check(&frame)?;
        self.inner.outbound.push(frame);
        Ok(())
    }

    /// Queues a single final text frame.
    ///
    /// # Errors
    ///
    /// [`Error::FrameInterleaving`] while a fragmented message is open.
    pub fn write_final_text_frame(&self, text: &str) -> Result<()> {
        self.write_frame(Frame::text(text, true))
    }

    /// Queues a single final binary frame.
    ///
    /// # Errors
    ///
    /// [`Error::FrameInterleaving`] while a fragmented message is open.
    pub fn write_final_binary_frame(&self, data: Buffer) -> Result<()> {
        self.write_frame(Frame::binary(data, true))
    }

    /// Queues a binary message, fragmented by `max_frame_size`.
    ///
    /// # Errors
    ///
    /// [`Error::FrameInterleaving`] while a fragmented message is open.
    pub fn write_binary_message(&self, data: Buffer) -> Result<()> {
        self.write_message(&WebSocketMessage::binary(data))
    }

    /// Queues a text message, fragmented by `max_frame_size`.
    ///
    /// # Errors
    ///
    /// [`Error::FrameInterleaving`] while a fragmented message is open.
    pub fn write_text_message(&self, text: &str) -> Result<()> {
        self.write_message(&WebSocketMessage::text(text))
    }

    fn write_message(&self, message: &WebSocketMessage) -> Result<()> {
        let frames = fragment(message, self.inner.options.max_frame_size)?;
        {
            let mut sequencer = self.inner.sequencer.lock();
            for frame in &frames {
                sequencer.check(frame)?;
            }
        }
        for frame in frames {
            self.inner.outbound.push(frame);
        }
        Ok(())
    }

    fn write_body(&self, body: Body, text: bool) {
        let written = match (body, text) {
            (Body::Buffer(data), false) => self.write_binary_message(data),
            (Body::String(data), true) => self.write_text_message(&data),
            (other, _) => Err(Error::invalid_argument(format!(
                "{} write handler cannot take a {} payload",
                if text { "text" } else { "binary" },
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
    /// Queued frames are still flushed, undelivered inbound frames are
    /// dropped, and both write handler addresses are unregistered. The
    /// close handler fires once the transport reports the connection gone.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.outbound.close();
        self.inner.inbound.close();
        self.inner.binary_handler.unregister();
        self.inner.text_handler.unregister();
        debug!(binary_handler_id = %self.inner.binary_handler.id(), "WebSocket closed");
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
// WebSocket - Transport Side
// ============================================================================

impl WebSocket {
    /// Delivers one frame read from the peer. Callable from any thread.
    pub fn handle_frame(&self, frame: Frame) {
        let inbound = self.inner.inbound.clone();
        self.inner.context.dispatch(move || {
            inbound.push(frame);
        });
    }

    /// Signals that the peer sent a close frame.
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

    /// Signals that the connection is fully closed. The close handler
    /// fires once.
    pub fn handle_closed(&self) {
        if self.inner.finished.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.closed.store(true, Ordering::Release);
        self.inner.outbound.abort();
        self.inner.binary_handler.unregister();
        self.inner.text_handler.unregister();

        let handler = self.inner.close_handler.lock().take();
        if let Some(handler) = handler {
            self.inner.context.dispatch(move || handler());
        }
    }

    /// Waits for the next frame to send. `None` once closed and flushed.
    pub async fn next_outbound(&self) -> Option<Frame> {
        self.inner.outbound.next().await
    }

    /// Takes every queued frame without waiting.
    pub fn take_outbound(&self) -> Vec<Frame> {
        self.inner.outbound.pop_all()
    }

    /// Waits until the read side wants frames. `false` once it never will.
    pub async fn wait_for_demand(&self) -> bool {
        self.inner.inbound.wait_for_demand().await
    }
}

// ============================================================================
// Stream Traits
// ============================================================================

impl StreamBase for WebSocket {
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

impl ReadStream<Buffer> for WebSocket {
    /// Called with the payload of every inbound frame.
    fn handler<F>(&self, handler: F) -> &Self
    where
        F: Fn(Buffer) + Send + Sync + 'static,
    {
        *self.inner.data_handler.lock() = Some(Arc::new(handler));
        self
    }

    fn remove_handler(&self) -> &Self {
        *self.inner.data_handler.lock() = None;
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

impl WriteStream<Buffer> for WebSocket {
    /// Queues a binary message.
    fn write(&self, data: Buffer) -> Result<()> {
        self.write_binary_message(data)
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

impl fmt::Debug for WebSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocket")
            .field("binary_handler_id", self.binary_handler_id())
            .field("text_handler_id", self.text_handler_id())
            .field("remote_address", &self.inner.remote_address)
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::sync::mpsc;

    use crate::frame::FrameKind;

    fn websocket(bus: &EventBus, max_frame_size: usize) -> WebSocket {
        WebSocket::new(
            bus,
            Context::new(),
            &WebSocketOptions::new().with_max_frame_size(max_frame_size),
            None,
            None,
        )
    }

    #[tokio::test]
    async fn test_fragmented_message_reassembled() {
        let bus = EventBus::new();
        let ws = websocket(&bus, 1024);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let frames_tx = tx.clone();
        ws.frame_handler(move |frame| {
            let _ = frames_tx.send(format!("frame:{}", frame.text_data()));
        });
        ws.message_handler(move |message| {
            let _ = tx.send(format!("message:{}", message.text_data()));
        });

        ws.handle_frame(Frame::text("he", false));
        ws.handle_frame(Frame::continuation(Buffer::from("ll"), false));
        ws.handle_frame(Frame::continuation(Buffer::from("o"), true));

        assert_eq!(rx.recv().await.unwrap(), "frame:he");
        assert_eq!(rx.recv().await.unwrap(), "frame:ll");
        assert_eq!(rx.recv().await.unwrap(), "frame:o");
        assert_eq!(rx.recv().await.unwrap(), "message:hello");
    }

    #[tokio::test]
    async fn test_unexpected_continuation_errors_stream() {
        let bus = EventBus::new();
        let ws = websocket(&bus, 1024);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let error_tx = tx.clone();
        ws.exception_handler(move |err| {
            let _ = error_tx.send(Err(err));
        });
        ws.frame_handler(move |frame| {
            let _ = tx.send(Ok(frame));
        });

        ws.handle_frame(Frame::continuation(Buffer::from("x"), true));
        ws.handle_frame(Frame::text("after", true));

        assert!(matches!(
            rx.recv().await.unwrap(),
            Err(Error::UnexpectedContinuation)
        ));
        assert_eq!(ws.state(), StreamState::Errored);
        ws.handle_end();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_interleaving_errors_stream() {
        let bus = EventBus::new();
        let ws = websocket(&bus, 1024);
        let (tx, mut rx) = mpsc::unbounded_channel();
        ws.exception_handler(move |err| {
            let _ = tx.send(err);
        });

        ws.handle_frame(Frame::text("a", false));
        ws.handle_frame(Frame::binary(Buffer::from("b"), true));

        let err = rx.recv().await.unwrap();
        assert!(matches!(
            err,
            Error::FrameInterleaving {
                kind: FrameKind::Binary
            }
        ));
    }

    #[tokio::test]
    async fn test_write_message_fragments() {
        let bus = EventBus::new();
        let ws = websocket(&bus, 2);

        ws.write_text_message("abcde").unwrap();
        let frames = ws.take_outbound();

        assert_eq!(frames.len(), 3);
        assert!(frames[0].is_text() && !frames[0].is_final());
        assert!(frames[1].is_continuation() && !frames[1].is_final());
        assert!(frames[2].is_continuation() && frames[2].is_final());
        assert_eq!(frames[2].text_data(), "e");
    }

    #[tokio::test]
    async fn test_outbound_interleaving_rejected() {
        let bus = EventBus::new();
        let ws = websocket(&bus, 1024);

        ws.write_frame(Frame::binary(Buffer::from("a"), false)).unwrap();
        assert!(matches!(
            ws.write_final_text_frame("b"),
            Err(Error::FrameInterleaving { .. })
        ));
        ws.write_frame(Frame::continuation(Buffer::from("c"), true))
            .unwrap();
        assert!(matches!(
            ws.write_frame(Frame::continuation(Buffer::from("d"), true)),
            Err(Error::UnexpectedContinuation)
        ));
        assert_eq!(ws.take_outbound().len(), 2);
    }

    #[tokio::test]
    async fn test_handler_ids_forward_from_bus() {
        let bus = EventBus::new();
        let ws = websocket(&bus, 1024);
        assert_ne!(ws.binary_handler_id(), ws.text_handler_id());

        bus.send(ws.binary_handler_id().as_str(), Buffer::from("bin"))
            .unwrap();
        bus.send(ws.text_handler_id().as_str(), "txt").unwrap();

        let first = ws.next_outbound().await.unwrap();
        assert!(first.is_binary());
        assert_eq!(first.binary_data(), &Buffer::from("bin"));

        let second = ws.next_outbound().await.unwrap();
        assert!(second.is_text());
        assert_eq!(second.text_data(), "txt");
    }

    #[tokio::test]
    async fn test_close_unregisters_handler_ids() {
        let bus = EventBus::new();
        let ws = websocket(&bus, 1024);
        let binary = ws.binary_handler_id().as_str().to_string();
        let text = ws.text_handler_id().as_str().to_string();

        ws.close();

        assert!(matches!(bus.send(&binary, Buffer::new()), Err(Error::NoHandlers { .. })));
        assert!(matches!(bus.send(&text, "x"), Err(Error::NoHandlers { .. })));
    }

    #[tokio::test]
    async fn test_data_handler_gets_payloads() {
        let bus = EventBus::new();
        let ws = websocket(&bus, 1024);
        let (tx, mut rx) = mpsc::unbounded_channel();
        ws.handler(move |payload| {
            let _ = tx.send(payload);
        });

        ws.handle_frame(Frame::binary(Buffer::from("x"), true));
        assert_eq!(rx.recv().await.unwrap(), Buffer::from("x"));
    }

    #[tokio::test]
    async fn test_close_handler_fires_once() {
        let bus = EventBus::new();
        let ws = websocket(&bus, 1024);
        let (tx, mut rx) = mpsc::unbounded_channel();
        ws.close_handler(move || {
            let _ = tx.send(());
        });

        ws.handle_closed();
        ws.handle_closed();

        rx.recv().await.unwrap();
        assert!(ws.is_closed());
        assert!(rx.try_recv().is_err());
    }
}
