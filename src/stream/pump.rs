//! Read-to-write pump.
//!
//! Copies every item from a [`ReadStream`] into a [`WriteStream`],
//! pausing the source whenever the sink reports a full queue and resuming
//! it from the sink's drain callback.

// ============================================================================
// Imports
// ============================================================================

use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tracing::debug;

use crate::error::report_unhandled;

use super::{ReadStream, WriteStream};

// ============================================================================
// Pump
// ============================================================================

/// Moves data from a read stream to a write stream with backpressure.
///
/// A new pump is stopped; call [`start`](Self::start).
pub struct Pump<T, R, W> {
    read: R,
    write: W,
    active: Arc<AtomicBool>,
    pumped: Arc<AtomicUsize>,
    _item: PhantomData<fn(T)>,
}

impl<T, R, W> Pump<T, R, W>
where
    T: Send + 'static,
    R: ReadStream<T> + Clone + Send + Sync + 'static,
    W: WriteStream<T> + Clone + Send + Sync + 'static,
{
    /// Creates a stopped pump.
    #[must_use]
    pub fn new(read: R, write: W) -> Self {
        Self {
            read,
            write,
            active: Arc::new(AtomicBool::new(false)),
            pumped: Arc::new(AtomicUsize::new(0)),
            _item: PhantomData,
        }
    }

    /// Creates a stopped pump and sets the sink's watermark.
    #[must_use]
    pub fn with_write_queue_max_size(read: R, write: W, max_size: usize) -> Self {
        write.set_write_queue_max_size(max_size);
        Self::new(read, write)
    }

    /// Sets the sink's watermark.
    pub fn set_write_queue_max_size(&self, max_size: usize) -> &Self {
        self.write.set_write_queue_max_size(max_size);
        self
    }

    /// Installs the data and drain callbacks.
    pub fn start(&self) -> &Self {
        if self.active.swap(true, Ordering::AcqRel) {
            return self;
        }

        let sink = self.write.clone();
        let source = self.read.clone();
        let active = Arc::clone(&self.active);
        let pumped = Arc::clone(&self.pumped);
        self.read.handler(move |data| {
            if !active.load(Ordering::Acquire) {
                return;
            }
            if let Err(err) = sink.write(data) {
                report_unhandled(&err);
                return;
            }
            pumped.fetch_add(1, Ordering::Relaxed);
            if sink.write_queue_full() {
                source.pause();
            }
        });

        let source = self.read.clone();
        let active = Arc::clone(&self.active);
        self.write.drain_handler(move || {
            if active.load(Ordering::Acquire) {
                source.resume();
            }
        });

        debug!("Pump started");
        self
    }

    /// Removes the data callback and resumes the source.
    pub fn stop(&self) -> &Self {
        if !self.active.swap(false, Ordering::AcqRel) {
            return self;
        }
        self.read.remove_handler();
        self.read.resume();
        debug!(pumped = self.number_pumped(), "Pump stopped");
        self
    }

    /// Items written to the sink since creation.
    #[inline]
    #[must_use]
    pub fn number_pumped(&self) -> usize {
        self.pumped.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::buffer::Buffer;
    use crate::error::{Error, Result};
    use crate::stream::{InboundQueue, OutboundQueue, StreamBase};

    #[derive(Clone)]
    struct Source(InboundQueue<Buffer>);

    impl StreamBase for Source {
        fn exception_handler<F>(&self, handler: F) -> &Self
        where
            F: Fn(Error) + Send + Sync + 'static,
        {
            self.0.set_exception_handler(Arc::new(handler));
            self
        }
    }

    impl ReadStream<Buffer> for Source {
        fn handler<F>(&self, handler: F) -> &Self
        where
            F: Fn(Buffer) + Send + Sync + 'static,
        {
            self.0.set_handler(Arc::new(handler));
            self
        }

        fn remove_handler(&self) -> &Self {
            self.0.clear_handler();
            self
        }

        fn pause(&self) -> &Self {
            self.0.pause();
            self
        }

        fn resume(&self) -> &Self {
            self.0.resume();
            self
        }

        fn end_handler<F>(&self, handler: F) -> &Self
        where
            F: Fn() + Send + Sync + 'static,
        {
            self.0.set_end_handler(Arc::new(handler));
            self
        }
    }

    #[derive(Clone)]
    struct Sink(OutboundQueue<Buffer>);

    impl StreamBase for Sink {
        fn exception_handler<F>(&self, handler: F) -> &Self
        where
            F: Fn(Error) + Send + Sync + 'static,
        {
            self.0.set_exception_handler(Arc::new(handler));
            self
        }
    }

    impl WriteStream<Buffer> for Sink {
        fn write(&self, data: Buffer) -> Result<()> {
            self.0.push(data);
            Ok(())
        }

        fn set_write_queue_max_size(&self, max_size: usize) -> &Self {
            self.0.set_max_size(max_size);
            self
        }

        fn write_queue_full(&self) -> bool {
            self.0.is_full()
        }

        fn drain_handler<F>(&self, handler: F) -> &Self
        where
            F: Fn() + Send + Sync + 'static,
        {
            self.0.set_drain_handler(Arc::new(handler));
            self
        }
    }

    #[test]
    fn test_pump_pauses_on_full_and_resumes_on_drain() {
        let source = Source(InboundQueue::new());
        let sink = Sink(OutboundQueue::new(4));
        let pump = Pump::new(source.clone(), sink.clone());
        pump.start();

        source.0.push(Buffer::from("abc"));
        assert!(!source.0.is_paused());
        source.0.push(Buffer::from("de"));
        assert!(source.0.is_paused());

        source.0.push(Buffer::from("f"));
        assert_eq!(pump.number_pumped(), 2);

        sink.0.pop();
        assert!(!source.0.is_paused());
        assert_eq!(pump.number_pumped(), 3);
        assert_eq!(sink.0.pop_all(), vec![Buffer::from("de"), Buffer::from("f")]);
    }

    #[test]
    fn test_pump_stop_detaches() {
        let source = Source(InboundQueue::new());
        let sink = Sink(OutboundQueue::new(1024));
        let pump = Pump::new(source.clone(), sink.clone());
        pump.start();

        source.0.push(Buffer::from("a"));
        pump.stop();
        source.0.push(Buffer::from("b"));

        assert_eq!(pump.number_pumped(), 1);
        assert_eq!(sink.0.len(), 1);
    }

    #[test]
    fn test_pump_sets_watermark() {
        let source = Source(InboundQueue::new());
        let sink = Sink(OutboundQueue::new(1024));
        let pump = Pump::with_write_queue_max_size(source.clone(), sink.clone(), 1);
        pump.start();

        source.0.push(Buffer::from("ab"));
        assert!(sink.write_queue_full());
        assert!(source.0.is_paused());
    }
}
