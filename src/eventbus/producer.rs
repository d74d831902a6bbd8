//! Message producers: a write stream bound to one address.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Error, Result, report_unhandled};
use crate::stream::{ExceptionHandler, StreamBase, WriteStream};

use super::bus::{EventBus, ReplyFuture};
use super::message::Body;
use super::options::DeliveryOptions;

// ============================================================================
// MessageProducer
// ============================================================================

struct ProducerInner {
    bus: EventBus,
    address: String,
    publish: bool,
    options: Mutex<DeliveryOptions>,
    closed: AtomicBool,
    exception_handler: Mutex<Option<ExceptionHandler>>,
}

/// Reusable sender or publisher for one address.
///
/// Writes are equivalent to repeated `send` or `publish` calls. Delivery
/// failures go to the exception handler.
#[derive(Clone)]
pub struct MessageProducer {
    inner: Arc<ProducerInner>,
}

impl MessageProducer {
    pub(crate) fn new(bus: EventBus, address: String, options: DeliveryOptions, publish: bool) -> Self {
        Self {
            inner: Arc::new(ProducerInner {
                bus,
                address,
                publish,
                options: Mutex::new(options),
                closed: AtomicBool::new(false),
                exception_handler: Mutex::new(None),
            }),
        }
    }

    /// Target address.
    #[inline]
    #[must_use]
    pub fn address(&self) -> &str {
        &self.inner.address
    }

    /// Returns `true` for publishers.
    #[inline]
    #[must_use]
    pub fn is_publisher(&self) -> bool {
        self.inner.publish
    }

    /// Replaces the delivery options used for later writes.
    pub fn delivery_options(&self, options: DeliveryOptions) -> &Self {
        *self.inner.options.lock() = options;
        self
    }

    /// Sends point-to-point, even from a publisher.
    ///
    /// # Errors
    ///
    /// Same as [`EventBus::send`], plus [`Error::StreamClosed`] after close.
    pub fn send(&self, body: impl Into<Body>) -> Result<()> {
        if self.is_closed() {
            return Err(Error::StreamClosed);
        }
        let options = self.inner.options.lock().clone();
        self.inner
            .bus
            .send_with_options(&self.inner.address, body, &options)
    }

    /// Sends point-to-point and waits for the reply.
    pub fn request(&self, body: impl Into<Body>) -> ReplyFuture {
        let options = self.inner.options.lock().clone();
        self.inner
            .bus
            .request_with_options(&self.inner.address, body, &options)
    }

    /// Stops the producer. Later writes report [`Error::StreamClosed`].
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            debug!(address = %self.inner.address, "Producer closed");
        }
    }

    /// Returns `true` after [`close`](Self::close).
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn report(&self, err: Error) {
        let handler = self.inner.exception_handler.lock().clone();
        match handler {
            Some(handler) => handler(err),
            None => report_unhandled(&err),
        }
    }
}

impl StreamBase for MessageProducer {
    fn exception_handler<F>(&self, handler: F) -> &Self
    where
        F: Fn(Error) + Send + Sync + 'static,
    {
        *self.inner.exception_handler.lock() = Some(Arc::new(handler));
        self
    }
}

impl WriteStream<Body> for MessageProducer {
    fn write(&self, data: Body) -> Result<()> {
        if self.is_closed() {
            self.report(Error::StreamClosed);
            return Ok(());
        }
        let options = self.inner.options.lock().clone();
        let delivered = if self.inner.publish {
            self.inner
                .bus
                .publish_with_options(&self.inner.address, data, &options)
        } else {
            self.inner
                .bus
                .send_with_options(&self.inner.address, data, &options)
        };
        if let Err(e) = delivered {
            self.report(e);
        }
        Ok(())
    }

    /// The bus never queues, so there is no watermark to set.
    fn set_write_queue_max_size(&self, _max_size: usize) -> &Self {
        self
    }

    fn write_queue_full(&self) -> bool {
        false
    }

    /// Never fires: the queue is never full.
    fn drain_handler<F>(&self, _handler: F) -> &Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self
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

    use crate::stream::ReadStream;

    #[tokio::test]
    async fn test_sender_writes_go_to_one_consumer() {
        let bus = EventBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.consumer_with_handler("out", move |msg| {
            let _ = tx.send(msg.into_body());
        });

        let sender = bus.sender("out");
        sender.write(Body::from("a")).unwrap();
        sender.write(Body::from(1)).unwrap();

        assert_eq!(rx.recv().await.unwrap(), "a");
        assert_eq!(rx.recv().await.unwrap().as_i64(), Some(1));
        assert!(!sender.is_publisher());
        assert!(!sender.write_queue_full());
    }

    #[tokio::test]
    async fn test_publisher_fans_out() {
        let bus = EventBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        for _ in 0..2 {
            let tx = tx.clone();
            bus.consumer("feed").handler(move |msg| {
                let _ = tx.send(msg.into_body());
            });
        }

        let publisher = bus.publisher_with_options(
            "feed",
            DeliveryOptions::new().with_header("k", "v"),
        );
        publisher.write(Body::from("x")).unwrap();

        assert_eq!(rx.recv().await.unwrap(), "x");
        assert_eq!(rx.recv().await.unwrap(), "x");
    }

    #[tokio::test]
    async fn test_failures_reach_exception_handler() {
        let bus = EventBus::new();
        let errors = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&errors);

        let sender = bus.sender("nobody");
        sender.exception_handler(move |err| {
            assert!(matches!(err, Error::NoHandlers { .. } | Error::StreamClosed));
            counter.fetch_add(1, Ordering::SeqCst);
        });

        sender.write(Body::from("x")).unwrap();
        sender.close();
        sender.write(Body::from("y")).unwrap();

        assert_eq!(errors.load(Ordering::SeqCst), 2);
        assert!(matches!(sender.send("z"), Err(Error::StreamClosed)));
    }

    #[tokio::test]
    async fn test_producer_request() {
        let bus = EventBus::new();
        bus.consumer_with_handler("echo", |msg| msg.reply(msg.body().clone()));

        let reply = bus.sender("echo").request("hi").await.unwrap();
        assert_eq!(reply.body(), &"hi");
    }
}
