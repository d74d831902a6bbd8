//! Message consumers.
//!
//! A consumer goes through `pending -> registered -> finished` exactly once.
//! It registers when a handler is set and finishes on
//! [`unregister`](MessageConsumer::unregister) or when the bus closes.
//! Registering twice on one address creates two independent consumers.

// ============================================================================
// Imports
// ============================================================================

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::context::Context;
use crate::error::{Error, report_unhandled};
use crate::identifiers::{ConsumerId, ReplyAddress};
use crate::stream::{InboundQueue, ReadStream, StreamBase, StreamState};

use super::bus::BusInner;
use super::message::Message;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Registration {
    Pending,
    Active,
    Finished,
}

/// State shared between a consumer handle and the bus registry.
pub(crate) struct ConsumerInner {
    id: ConsumerId,
    address: String,
    local_only: bool,
    registration: Mutex<Registration>,
    context: Mutex<Option<Context>>,
    queue: InboundQueue<Message>,
    bus: Weak<BusInner>,
}

impl ConsumerInner {
    #[inline]
    pub(crate) fn address(&self) -> &str {
        &self.address
    }

    #[inline]
    pub(crate) fn is_local_only(&self) -> bool {
        self.local_only
    }

    fn is_registered(&self) -> bool {
        *self.registration.lock() == Registration::Active
    }

    /// Posts a message onto the consumer's context.
    pub(crate) fn enqueue(self: &Arc<Self>, message: Message) {
        let Some(context) = self.context.lock().clone() else {
            self.reject(message.reply_address);
            return;
        };
        let reply_address = message.reply_address.clone();
        let consumer = Arc::clone(self);
        if !context.execute(move || consumer.accept(message)) {
            self.reject(reply_address);
        }
    }

    /// Runs on the consumer's context.
    fn accept(&self, message: Message) {
        if !self.is_registered() {
            debug!(address = %self.address, consumer = %self.id, "Consumer gone before delivery");
            self.reject(message.reply_address);
            return;
        }
        if !self.queue.push(message) {
            warn!(
                address = %self.address,
                consumer = %self.id,
                "Message dropped, consumer buffer full or no handler"
            );
        }
    }

    fn reject(&self, reply_address: Option<ReplyAddress>) {
        let err = Error::no_handlers(self.address.as_str());
        match (reply_address, self.bus.upgrade()) {
            (Some(reply_address), Some(bus)) => bus.fail_reply(reply_address.as_str(), err),
            _ => report_unhandled(&err),
        }
    }

    /// Finishes the consumer without touching the registry.
    pub(crate) fn close(&self) {
        *self.registration.lock() = Registration::Finished;
        self.queue.close();
    }
}

// ============================================================================
// MessageConsumer
// ============================================================================

/// Stream of messages arriving on one address.
///
/// Cloning yields another handle to the same consumer.
#[derive(Clone)]
pub struct MessageConsumer {
    inner: Arc<ConsumerInner>,
}

impl MessageConsumer {
    pub(crate) fn new(bus: &Arc<BusInner>, address: String, local_only: bool) -> Self {
        let queue = InboundQueue::bounded(bus.options().max_buffered_messages);
        Self {
            inner: Arc::new(ConsumerInner {
                id: ConsumerId::next(),
                address,
                local_only,
                registration: Mutex::new(Registration::Pending),
                context: Mutex::new(None),
                queue,
                bus: Arc::downgrade(bus),
            }),
        }
    }

    /// Address this consumer listens on.
    #[inline]
    #[must_use]
    pub fn address(&self) -> &str {
        &self.inner.address
    }

    /// Returns `true` while registered with the bus.
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.inner.is_registered()
    }

    /// Returns `true` for consumers never advertised to other nodes.
    #[inline]
    #[must_use]
    pub fn is_local_only(&self) -> bool {
        self.inner.local_only
    }

    /// Caps messages buffered while paused; extra messages are dropped.
    pub fn set_max_buffered_messages(&self, max: usize) -> &Self {
        self.inner.queue.set_max_buffered(Some(max));
        self
    }

    /// Current stream state.
    #[must_use]
    pub fn state(&self) -> StreamState {
        self.inner.queue.state()
    }

    /// Removes the registration. Undelivered messages are dropped and the
    /// end handler fires.
    pub fn unregister(&self) {
        let was = std::mem::replace(&mut *self.inner.registration.lock(), Registration::Finished);
        if was != Registration::Active {
            return;
        }
        if let Some(bus) = self.inner.bus.upgrade() {
            bus.remove_registration(&self.inner);
        }
        self.inner.queue.close();
        debug!(address = %self.inner.address, consumer = %self.inner.id, "Consumer unregistered");
    }

    fn register(&self) {
        let mut registration = self.inner.registration.lock();
        if *registration != Registration::Pending {
            return;
        }
        *registration = Registration::Finished;

        let Some(bus) = self.inner.bus.upgrade() else {
            return;
        };
        if self.inner.address.is_empty() {
            report_unhandled(&Error::invalid_argument("consumer address must not be empty"));
            return;
        }

        *self.inner.context.lock() = Some(bus.current_context());
        match bus.add_registration(Arc::clone(&self.inner)) {
            Ok(()) => {
                *registration = Registration::Active;
                debug!(
                    address = %self.inner.address,
                    consumer = %self.inner.id,
                    local = self.inner.local_only,
                    "Consumer registered"
                );
            }
            Err(e) => report_unhandled(&e),
        }
    }
}

impl StreamBase for MessageConsumer {
    fn exception_handler<F>(&self, handler: F) -> &Self
    where
        F: Fn(Error) + Send + Sync + 'static,
    {
        self.inner.queue.set_exception_handler(Arc::new(handler));
        self
    }
}

impl ReadStream<Message> for MessageConsumer {
    /// Sets the handler and registers the consumer on first call.
    fn handler<F>(&self, handler: F) -> &Self
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        self.inner.queue.set_handler(Arc::new(handler));
        self.register();
        self
    }

    fn remove_handler(&self) -> &Self {
        self.inner.queue.clear_handler();
        self
    }

    fn pause(&self) -> &Self {
        self.inner.queue.pause();
        self
    }

    /// Buffered messages are flushed on the consumer's context.
    fn resume(&self) -> &Self {
        let queue = self.inner.queue.clone();
        match self.inner.context.lock().clone() {
            Some(context) => {
                context.dispatch(move || queue.resume());
            }
            None => queue.resume(),
        }
        self
    }

    fn end_handler<F>(&self, handler: F) -> &Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.queue.set_end_handler(Arc::new(handler));
        self
    }
}

// ============================================================================
// Tests
// ============================================================================
