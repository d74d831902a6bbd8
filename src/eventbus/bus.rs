//! Event bus core: registry, routing and reply correlation.
//!
//! ```text
//! send(addr) ──► registry[addr] ──round robin──► consumer ctx ──► handler
//! publish(addr) ─► registry[addr] ──every one──► consumer ctx ──► handler
//! request(addr) ─► replies[__reply.<uuid>] ◄──── message.reply(..)
//! ```
//!
//! Every delivery is posted to the consumer's [`Context`]; the consumer's
//! registration is checked again when the task runs, and a send whose
//! consumer unregistered in between fails with `NoHandlers`.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::context::Context;
use crate::error::{Error, Result, report_unhandled};
use crate::identifiers::ReplyAddress;
use crate::stream::ReadStream;

use super::codec::{self, CodecRegistry, MessageCodec};
use super::consumer::{ConsumerInner, MessageConsumer};
use super::message::{Body, Message};
use super::options::{DeliveryOptions, EventBusOptions};
use super::producer::MessageProducer;

// ============================================================================
// Types
// ============================================================================

/// Future resolving to the reply of a request.
pub type ReplyFuture = BoxFuture<'static, Result<Message>>;

/// Map of reply address to reply channel.
type ReplyMap = FxHashMap<String, oneshot::Sender<Result<Message>>>;

/// Registrations on one address.
#[derive(Default)]
struct HandlerEntry {
    registrations: Vec<Arc<ConsumerInner>>,
    cursor: usize,
}

impl HandlerEntry {
    /// Next consumer in round-robin order.
    fn next(&mut self) -> Option<Arc<ConsumerInner>> {
        if self.registrations.is_empty() {
            return None;
        }
        let index = self.cursor % self.registrations.len();
        self.cursor = self.cursor.wrapping_add(1);
        Some(Arc::clone(&self.registrations[index]))
    }
}

// ============================================================================
// BusInner
// ============================================================================

/// Shared bus state.
pub(crate) struct BusInner {
    options: EventBusOptions,
    registry: Mutex<FxHashMap<String, HandlerEntry>>,
    replies: Mutex<ReplyMap>,
    codecs: RwLock<CodecRegistry>,
    context: Context,
    closed: AtomicBool,
}

impl BusInner {
    #[inline]
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn options(&self) -> &EventBusOptions {
        &self.options
    }

    /// Context of the caller, or the bus default outside any context.
    pub(crate) fn current_context(&self) -> Context {
        Context::current().unwrap_or_else(|| self.context.clone())
    }

    // ========================================================================
    // Registry
    // ========================================================================

    pub(crate) fn add_registration(&self, consumer: Arc<ConsumerInner>) -> Result<()> {
        if self.is_closed() {
            return Err(Error::BusClosed);
        }
        let mut registry = self.registry.lock();
        registry
            .entry(consumer.address().to_string())
            .or_default()
            .registrations
            .push(consumer);
        Ok(())
    }

    pub(crate) fn remove_registration(&self, consumer: &Arc<ConsumerInner>) {
        let mut registry = self.registry.lock();
        let Some(entry) = registry.get_mut(consumer.address()) else {
            return;
        };
        entry.registrations.retain(|c| !Arc::ptr_eq(c, consumer));
        if entry.registrations.is_empty() {
            registry.remove(consumer.address());
        }
    }

    fn select(&self, address: &str, send: bool) -> Vec<Arc<ConsumerInner>> {
        let mut registry = self.registry.lock();
        let Some(entry) = registry.get_mut(address) else {
            return Vec::new();
        };
        if send {
            entry.next().into_iter().collect()
        } else {
            entry.registrations.clone()
        }
    }

    // ========================================================================
    // Delivery
    // ========================================================================

    /// Routes one delivery. Reply addresses resolve the pending request.
    pub(crate) fn dispatch(
        self: &Arc<Self>,
        address: &str,
        body: Body,
        options: &DeliveryOptions,
        reply_address: Option<ReplyAddress>,
        send: bool,
    ) -> Result<()> {
        if self.is_closed() {
            return Err(Error::BusClosed);
        }
        let codec = self.codecs.read().resolve(options.codec_name.as_deref())?;

        if ReplyAddress::is_reply_address(address) {
            let body = codec::transform(codec.as_ref(), &body)?;
            let Some(reply_tx) = self.replies.lock().remove(address) else {
                warn!(address = %address, "Reply for unknown address");
                return Err(Error::no_handlers(address));
            };
            let message = self.message(address, options, body, reply_address, true);
            let _ = reply_tx.send(Ok(message));
            trace!(address = %address, "Reply delivered");
            return Ok(());
        }

        let targets = self.select(address, send);
        if targets.is_empty() {
            if send {
                debug!(address = %address, "No handlers for send");
                return Err(Error::no_handlers(address));
            }
            trace!(address = %address, "Publish with no consumers");
            return Ok(());
        }

        let body = codec::transform(codec.as_ref(), &body)?;
        for target in targets {
            let message = self.message(address, options, body.clone(), reply_address.clone(), send);
            target.enqueue(message);
        }
        Ok(())
    }

    fn message(
        self: &Arc<Self>,
        address: &str,
        options: &DeliveryOptions,
        body: Body,
        reply_address: Option<ReplyAddress>,
        send: bool,
    ) -> Message {
        Message {
            address: address.to_string(),
            headers: options.headers.clone(),
            body,
            reply_address,
            send,
            bus: Arc::downgrade(self),
        }
    }

    // ========================================================================
    // Reply Correlation
    // ========================================================================

    fn start_request(
        self: &Arc<Self>,
        address: &str,
        body: Body,
        options: &DeliveryOptions,
    ) -> Result<(ReplyAddress, oneshot::Receiver<Result<Message>>)> {
        if self.is_closed() {
            return Err(Error::BusClosed);
        }

        let reply_address = ReplyAddress::generate();
        let (reply_tx, reply_rx) = oneshot::channel();
        {
            let mut replies = self.replies.lock();
            let max = self.options.max_pending_replies;
            if replies.len() >= max {
                warn!(pending = replies.len(), max, "Too many pending replies");
                return Err(Error::TooManyPendingReplies {
                    pending: replies.len(),
                    max,
                });
            }
            replies.insert(reply_address.as_str().to_string(), reply_tx);
        }

        if let Err(e) = self.dispatch(address, body, options, Some(reply_address.clone()), true) {
            self.replies.lock().remove(reply_address.as_str());
            return Err(e);
        }
        Ok((reply_address, reply_rx))
    }

    /// Dispatches now; the returned future waits for the reply.
    pub(crate) fn request(
        self: &Arc<Self>,
        address: &str,
        body: Body,
        options: &DeliveryOptions,
    ) -> ReplyFuture {
        let bus = Arc::downgrade(self);
        let started = self
            .start_request(address, body, options)
            .map(|(reply_address, reply_rx)| (PendingReply { bus, reply_address }, reply_rx));
        let address = address.to_string();
        let timeout_ms = options.send_timeout_ms;

        async move {
            let (_pending, reply_rx) = started?;

            match timeout(Duration::from_millis(timeout_ms), reply_rx).await {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(Error::BusClosed),
                Err(_) => {
                    debug!(address = %address, timeout_ms, "Reply timed out");
                    Err(Error::timeout(address, timeout_ms))
                }
            }
        }
        .boxed()
    }

    /// Completes a pending request with a failure.
    pub(crate) fn fail_reply(&self, reply_address: &str, err: Error) {
        match self.replies.lock().remove(reply_address) {
            Some(reply_tx) => {
                let _ = reply_tx.send(Err(err));
            }
            None => debug!(address = %reply_address, "Failure for unknown reply address"),
        }
    }

    fn fail_pending_replies(&self) {
        let pending: Vec<_> = self.replies.lock().drain().map(|(_, tx)| tx).collect();
        let count = pending.len();
        for reply_tx in pending {
            let _ = reply_tx.send(Err(Error::BusClosed));
        }
        if count > 0 {
            debug!(count, "Failed pending replies on close");
        }
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }

        self.fail_pending_replies();

        let consumers: Vec<Arc<ConsumerInner>> = self
            .registry
            .lock()
            .drain()
            .flat_map(|(_, entry)| entry.registrations)
            .collect();
        for consumer in &consumers {
            consumer.close();
        }

        info!(consumers = consumers.len(), "Event bus closed");
        true
    }
}

/// Removes the correlation entry when a request future finishes or is dropped.
struct PendingReply {
    bus: Weak<BusInner>,
    reply_address: ReplyAddress,
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.replies.lock().remove(self.reply_address.as_str());
        }
    }
}

// ============================================================================
// EventBus
// ============================================================================

/// Addressable message router.
///
/// Cloning yields another handle to the same bus.
///
/// # Example
///
/// ```ignore
/// let bus = EventBus::new();
/// bus.consumer_with_handler("ping", |msg| msg.reply("pong"));
///
/// let reply = bus.request("ping", "hello").await?;
/// assert_eq!(reply.body(), &"pong");
/// ```
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Creates a bus with default options.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(EventBusOptions::new())
    }

    /// Creates a bus with the given options.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn with_options(options: EventBusOptions) -> Self {
        debug!(?options, "Event bus created");
        Self {
            inner: Arc::new(BusInner {
                options,
                registry: Mutex::new(FxHashMap::default()),
                replies: Mutex::new(ReplyMap::default()),
                codecs: RwLock::new(CodecRegistry::default()),
                context: Context::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Returns the bus options.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &EventBusOptions {
        self.inner.options()
    }

    fn default_options(&self) -> DeliveryOptions {
        self.inner.options.default_delivery_options()
    }
}

// ============================================================================
// EventBus - Consumers
// ============================================================================

impl EventBus {
    /// Creates an unregistered cluster-visible consumer.
    ///
    /// It registers when a handler is set.
    #[must_use]
    pub fn consumer(&self, address: impl Into<String>) -> MessageConsumer {
        MessageConsumer::new(&self.inner, address.into(), false)
    }

    /// Creates and registers a cluster-visible consumer.
    pub fn consumer_with_handler<F>(&self, address: impl Into<String>, handler: F) -> MessageConsumer
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        let consumer = self.consumer(address);
        consumer.handler(handler);
        consumer
    }

    /// Creates an unregistered consumer that is never advertised to other nodes.
    #[must_use]
    pub fn local_consumer(&self, address: impl Into<String>) -> MessageConsumer {
        MessageConsumer::new(&self.inner, address.into(), true)
    }

    /// Creates and registers a local-only consumer.
    pub fn local_consumer_with_handler<F>(
        &self,
        address: impl Into<String>,
        handler: F,
    ) -> MessageConsumer
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        let consumer = self.local_consumer(address);
        consumer.handler(handler);
        consumer
    }

    /// Addresses with at least one cluster-visible registration, sorted.
    #[must_use]
    pub fn cluster_visible_addresses(&self) -> Vec<String> {
        let registry = self.inner.registry.lock();
        let mut addresses: Vec<String> = registry
            .iter()
            .filter(|(_, entry)| entry.registrations.iter().any(|c| !c.is_local_only()))
            .map(|(address, _)| address.clone())
            .collect();
        addresses.sort();
        addresses
    }

    /// Number of registrations on `address`.
    #[must_use]
    pub fn consumer_count(&self, address: &str) -> usize {
        self.inner
            .registry
            .lock()
            .get(address)
            .map_or(0, |entry| entry.registrations.len())
    }
}

// ============================================================================
// EventBus - Send / Publish
// ============================================================================

impl EventBus {
    /// Sends to one consumer on `address`.
    ///
    /// # Errors
    ///
    /// - [`Error::NoHandlers`] if nothing is registered on `address`
    /// - [`Error::BusClosed`] after [`close`](Self::close)
    pub fn send(&self, address: &str, body: impl Into<Body>) -> Result<()> {
        self.send_with_options(address, body, &self.default_options())
    }

    /// Sends to one consumer with delivery options.
    ///
    /// # Errors
    ///
    /// As [`send`](Self::send), plus [`Error::UnknownCodec`].
    pub fn send_with_options(
        &self,
        address: &str,
        body: impl Into<Body>,
        options: &DeliveryOptions,
    ) -> Result<()> {
        trace!(address = %address, "Send");
        self.inner.dispatch(address, body.into(), options, None, true)
    }

    /// Sends to one consumer and waits for its reply.
    ///
    /// The message is dispatched before this returns; the future only waits.
    ///
    /// # Errors
    ///
    /// The future resolves to [`Error::NoHandlers`], [`Error::Timeout`],
    /// [`Error::RecipientFailure`] or [`Error::BusClosed`].
    pub fn request(&self, address: &str, body: impl Into<Body>) -> ReplyFuture {
        self.request_with_options(address, body, &self.default_options())
    }

    /// Sends with delivery options and waits for the reply.
    pub fn request_with_options(
        &self,
        address: &str,
        body: impl Into<Body>,
        options: &DeliveryOptions,
    ) -> ReplyFuture {
        self.inner.request(address, body.into(), options)
    }

    /// Sends and invokes `handler` exactly once with the reply or the failure.
    ///
    /// The handler runs on the caller's context, or the bus context when
    /// called from outside any context. If that context has closed by the
    /// time the reply arrives, a failure goes to [`report_unhandled`].
    pub fn send_with_reply_handler<F>(
        &self,
        address: &str,
        body: impl Into<Body>,
        options: &DeliveryOptions,
        handler: F,
    ) where
        F: FnOnce(Result<Message>) + Send + 'static,
    {
        let context = self.inner.current_context();
        let reply = self.request_with_options(address, body, options);
        tokio::spawn(async move {
            let outcome = Arc::new(Mutex::new(Some((handler, reply.await))));
            let task = Arc::clone(&outcome);
            let scheduled = context.execute(move || {
                if let Some((handler, result)) = task.lock().take() {
                    handler(result);
                }
            });
            if !scheduled && let Some((_, result)) = outcome.lock().take() {
                match result {
                    Err(e) => report_unhandled(&e),
                    Ok(_) => debug!("Reply dropped, caller context closed"),
                }
            }
        });
    }

    /// Delivers to every consumer on `address`.
    ///
    /// # Errors
    ///
    /// [`Error::BusClosed`] after [`close`](Self::close). No consumers is not an error.
    pub fn publish(&self, address: &str, body: impl Into<Body>) -> Result<()> {
        self.publish_with_options(address, body, &self.default_options())
    }

    /// Delivers to every consumer with delivery options.
    ///
    /// # Errors
    ///
    /// As [`publish`](Self::publish), plus [`Error::UnknownCodec`].
    pub fn publish_with_options(
        &self,
        address: &str,
        body: impl Into<Body>,
        options: &DeliveryOptions,
    ) -> Result<()> {
        trace!(address = %address, "Publish");
        self.inner.dispatch(address, body.into(), options, None, false)
    }
}

// ============================================================================
// EventBus - Producers
// ============================================================================

impl EventBus {
    /// Producer that sends every write to `address`.
    #[must_use]
    pub fn sender(&self, address: impl Into<String>) -> MessageProducer {
        self.sender_with_options(address, self.default_options())
    }

    /// Producer that sends every write to `address` with `options`.
    #[must_use]
    pub fn sender_with_options(
        &self,
        address: impl Into<String>,
        options: DeliveryOptions,
    ) -> MessageProducer {
        MessageProducer::new(self.clone(), address.into(), options, false)
    }

    /// Producer that publishes every write to `address`.
    #[must_use]
    pub fn publisher(&self, address: impl Into<String>) -> MessageProducer {
        self.publisher_with_options(address, self.default_options())
    }

    /// Producer that publishes every write to `address` with `options`.
    #[must_use]
    pub fn publisher_with_options(
        &self,
        address: impl Into<String>,
        options: DeliveryOptions,
    ) -> MessageProducer {
        MessageProducer::new(self.clone(), address.into(), options, true)
    }
}

// ============================================================================
// EventBus - Codecs
// ============================================================================

impl EventBus {
    /// Registers a custom codec.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the name is taken.
    pub fn register_codec<C: MessageCodec>(&self, codec: C) -> Result<()> {
        self.inner.codecs.write().register(Arc::new(codec))
    }

    /// Removes a custom codec. Returns `false` if it was not registered.
    pub fn unregister_codec(&self, name: &str) -> bool {
        self.inner.codecs.write().unregister(name)
    }
}

// ============================================================================
// EventBus - Lifecycle
// ============================================================================

impl EventBus {
    /// Replies currently awaited.
    #[inline]
    #[must_use]
    pub fn pending_replies(&self) -> usize {
        self.inner.replies.lock().len()
    }

    /// Returns `true` after [`close`](Self::close).
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Closes the bus.
    ///
    /// Pending requests fail with [`Error::BusClosed`] and every consumer is
    /// unregistered. Later calls do nothing.
    pub fn close(&self) {
        self.inner.close();
    }

    /// Closes the bus and invokes `handler` once on the caller's context.
    pub fn close_with_handler<F>(&self, handler: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.inner.close();
        let context = self.inner.current_context();
        if !context.execute(move || handler(Ok(()))) {
            debug!("Close handler dropped, context closed");
        }
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("options", &self.inner.options)
            .field("closed", &self.is_closed())
            .field("pending_replies", &self.pending_replies())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;

    use tokio::sync::mpsc;

    use crate::error::{ReplyFailure, UnhandledCapture};

    #[tokio::test]
    async fn test_request_reply() {
        let bus = EventBus::new();
        bus.consumer_with_handler("addr", |msg| {
            assert_eq!(msg.body(), &"ping");
            assert!(msg.is_send());
            msg.reply("pong");
        });

        let reply = bus.request("addr", "ping").await.unwrap();
        assert_eq!(reply.body(), &"pong");
        assert_eq!(bus.pending_replies(), 0);
    }

    #[tokio::test]
    async fn test_reply_handler_invoked_once() {
        let bus = EventBus::new();
        bus.consumer_with_handler("addr", |msg| msg.reply("pong"));

        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.send_with_reply_handler("addr", "ping", &DeliveryOptions::new(), move |result| {
            let _ = tx.send(result.map(|m| m.into_body()));
        });

        let body = rx.recv().await.unwrap().unwrap();
        assert_eq!(body, "pong");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_no_handlers() {
        let bus = EventBus::new();
        assert!(matches!(bus.send("nobody", "x"), Err(Error::NoHandlers { .. })));

        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.send_with_reply_handler("nobody", "x", &DeliveryOptions::new(), move |result| {
            let _ = tx.send(result.err().and_then(|e| e.reply_failure()));
        });
        assert_eq!(rx.recv().await.unwrap(), Some(ReplyFailure::NoHandlers));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_publish_reaches_every_consumer() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let (tx, mut rx) = mpsc::unbounded_channel();

        for _ in 0..3 {
            let hits = Arc::clone(&hits);
            let tx = tx.clone();
            bus.consumer_with_handler("news", move |msg| {
                assert!(!msg.is_send());
                hits.fetch_add(1, Ordering::SeqCst);
                let _ = tx.send(());
            });
        }

        bus.publish("news", "m").unwrap();
        for _ in 0..3 {
            rx.recv().await.unwrap();
        }
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_send_round_robin() {
        let bus = EventBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        for id in 0..3 {
            let tx = tx.clone();
            bus.consumer_with_handler("work", move |_| {
                let _ = tx.send(id);
            });
        }

        for _ in 0..6 {
            bus.send("work", "job").unwrap();
        }

        let mut counts = [0usize; 3];
        for _ in 0..6 {
            counts[rx.recv().await.unwrap()] += 1;
        }
        assert_eq!(counts, [2, 2, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_timeout() {
        let bus = EventBus::new();
        bus.consumer_with_handler("silent", |_| {});

        let options = DeliveryOptions::new().with_send_timeout_ms(100);
        let err = bus
            .request_with_options("silent", "x", &options)
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert_eq!(bus.pending_replies(), 0);
    }

    #[tokio::test]
    async fn test_recipient_failure() {
        let bus = EventBus::new();
        bus.consumer_with_handler("fails", |msg| msg.fail(42, "nope"));

        let err = bus.request("fails", "x").await.unwrap_err();
        assert!(matches!(
            err,
            Error::RecipientFailure { code: 42, ref message } if message == "nope"
        ));
    }

    #[tokio::test]
    async fn test_reply_and_request() {
        let bus = EventBus::new();
        bus.consumer_with_handler("chat", |msg| {
            let msg = msg.clone();
            tokio::spawn(async move {
                let second = msg.reply_and_request("hello").await.unwrap();
                second.reply(format!("{} back", second.body()));
            });
        });

        let first = bus.request("chat", "start").await.unwrap();
        assert_eq!(first.body(), &"hello");
        let last = first.reply_and_request("and").await.unwrap();
        assert_eq!(last.body(), &"and back");
    }

    #[tokio::test]
    async fn test_close_fails_pending_and_later_sends() {
        let bus = EventBus::new();
        bus.consumer_with_handler("slow", |_| {});

        let pending = bus.request("slow", "x");
        bus.close();
        bus.close();

        assert!(matches!(pending.await, Err(Error::BusClosed)));
        assert!(matches!(bus.send("slow", "x"), Err(Error::BusClosed)));
        assert_eq!(bus.consumer_count("slow"), 0);
        assert!(bus.is_closed());
    }

    #[tokio::test]
    async fn test_close_with_handler() {
        let bus = EventBus::new();
        let (tx, rx) = oneshot::channel();
        bus.close_with_handler(move |result| {
            let _ = tx.send(result.is_ok());
        });
        assert!(rx.await.unwrap());
    }

    #[tokio::test]
    async fn test_local_consumer_not_advertised() {
        let bus = EventBus::new();
        bus.local_consumer_with_handler("private", |_| {});
        bus.consumer_with_handler("public", |_| {});
        bus.local_consumer_with_handler("public", |_| {});

        assert_eq!(bus.cluster_visible_addresses(), vec!["public".to_string()]);
        assert_eq!(bus.consumer_count("public"), 2);
    }

    #[tokio::test]
    async fn test_too_many_pending_replies() {
        let bus = EventBus::with_options(EventBusOptions::new().with_max_pending_replies(1));
        bus.consumer_with_handler("hold", |_| {});

        let _first = bus.request("hold", "a");
        let err = bus.request("hold", "b").await.unwrap_err();
        assert!(matches!(err, Error::TooManyPendingReplies { max: 1, .. }));
    }

    #[tokio::test]
    async fn test_headers_travel_with_message() {
        let bus = EventBus::new();
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        bus.consumer_with_handler("h", move |msg| {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(msg.headers().get("trace").map(str::to_string));
            }
        });

        let options = DeliveryOptions::new().with_header("trace", "t-1");
        bus.send_with_options("h", "x", &options).unwrap();
        assert_eq!(rx.await.unwrap().as_deref(), Some("t-1"));
    }

    #[tokio::test]
    async fn test_reply_failure_reported_when_caller_context_closed() {
        let capture = UnhandledCapture::install(|err| {
            matches!(err, Error::NoHandlers { address } if address == "nobody.home")
        });
        let bus = EventBus::new();
        let caller = Context::new();
        let handled = Arc::new(AtomicUsize::new(0));

        let sender = bus.clone();
        let closing = caller.clone();
        let seen = Arc::clone(&handled);
        caller.execute(move || {
            sender.send_with_reply_handler("nobody.home", "x", &DeliveryOptions::new(), move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            });
            closing.close();
        });

        assert!(capture.wait_for(1).await);
        assert_eq!(capture.count(), 1);
        assert_eq!(handled.load(Ordering::SeqCst), 0);
    }

    struct OnceOnlyCodec {
        calls: AtomicUsize,
    }

    impl MessageCodec for OnceOnlyCodec {
        fn name(&self) -> &str {
            "once-only"
        }

        fn transform(&self, body: &Body) -> Result<Body> {
            if self.calls.fetch_add(1, Ordering::SeqCst) > 0 {
                return Err(Error::invalid_argument("codec already used"));
            }
            Ok(body.clone())
        }
    }

    #[tokio::test]
    async fn test_publish_transforms_once_for_all_consumers() {
        let bus = EventBus::new();
        bus.register_codec(OnceOnlyCodec {
            calls: AtomicUsize::new(0),
        })
        .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        for _ in 0..2 {
            let tx = tx.clone();
            bus.consumer_with_handler("fanout", move |msg| {
                let _ = tx.send(msg.body().to_string());
            });
        }

        let options = DeliveryOptions::new().with_codec_name("once-only");
        bus.publish_with_options("fanout", "shared", &options).unwrap();

        assert_eq!(rx.recv().await.unwrap(), "shared");
        assert_eq!(rx.recv().await.unwrap(), "shared");
    }
}
