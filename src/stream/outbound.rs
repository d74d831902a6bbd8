//! Write-side queue with byte watermark.
//!
//! [`OutboundQueue`] sits between an endpoint's `write` and whatever drains
//! it, either a transport task awaiting [`OutboundQueue::next`] or an
//! in-process consumer calling [`OutboundQueue::pop`].
//!
//! | Condition | Effect |
//! |-----------|--------|
//! | queued bytes `>` max | `is_full()` is `true` |
//! | was full, queued bytes drop `<` max | drain callback fires once |
//! | write after `close()` | `StreamClosed` to the exception callback |

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::trace;

use crate::context::Context;
use crate::error::{Error, report_unhandled};

use super::{ExceptionHandler, VoidHandler, Weighted};

// ============================================================================
// Constants
// ============================================================================

/// Default high watermark in bytes.
pub const DEFAULT_WRITE_QUEUE_MAX_SIZE: usize = 64 * 1024;

// ============================================================================
// Types
// ============================================================================

struct OutboundState<T> {
    queue: VecDeque<T>,
    queued_bytes: usize,
    max_size: usize,
    drain_armed: bool,
    closed: bool,
    drain_handler: Option<VoidHandler>,
    exception_handler: Option<ExceptionHandler>,
}

// ============================================================================
// OutboundQueue
// ============================================================================

/// Byte-accounted write queue.
///
/// Cloning yields another handle to the same queue.
pub struct OutboundQueue<T> {
    inner: Arc<Mutex<OutboundState<T>>>,
    writable: Arc<Notify>,
    context: Option<Context>,
}

impl<T> Clone for OutboundQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            writable: Arc::clone(&self.writable),
            context: self.context.clone(),
        }
    }
}

impl<T: Weighted + Send + 'static> Default for OutboundQueue<T> {
    fn default() -> Self {
        Self::new(DEFAULT_WRITE_QUEUE_MAX_SIZE)
    }
}

impl<T: Weighted + Send + 'static> OutboundQueue<T> {
    /// Creates a queue with the given watermark. Callbacks run inline.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(OutboundState {
                queue: VecDeque::new(),
                queued_bytes: 0,
                max_size,
                drain_armed: false,
                closed: false,
                drain_handler: None,
                exception_handler: None,
            })),
            writable: Arc::new(Notify::new()),
            context: None,
        }
    }

    /// Runs drain and exception callbacks on `context`.
    #[must_use]
    pub fn with_context(mut self, context: Context) -> Self {
        self.context = Some(context);
        self
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    /// Sets the drain callback.
    pub fn set_drain_handler(&self, handler: VoidHandler) {
        self.inner.lock().drain_handler = Some(handler);
    }

    /// Sets the exception callback.
    pub fn set_exception_handler(&self, handler: ExceptionHandler) {
        self.inner.lock().exception_handler = Some(handler);
    }

    /// Changes the watermark. Lowering below the queued size makes the
    /// queue full; raising above it fires a pending drain.
    pub fn set_max_size(&self, max_size: usize) {
        let drain = {
            let mut state = self.inner.lock();
            state.max_size = max_size;
            Self::update_watermark(&mut state)
        };
        if let Some(handler) = drain {
            self.fire(move || handler());
        }
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Returns `true` while queued bytes exceed the watermark.
    #[must_use]
    pub fn is_full(&self) -> bool {
        let state = self.inner.lock();
        state.queued_bytes > state.max_size
    }

    /// Bytes queued and not yet taken.
    #[must_use]
    pub fn queued_bytes(&self) -> usize {
        self.inner.lock().queued_bytes
    }

    /// Items queued and not yet taken.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Returns `true` if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().queue.is_empty()
    }

    /// Returns `true` once closed or aborted.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    // ========================================================================
    // Writer Side
    // ========================================================================

    /// Queues an item. On a closed queue the item is dropped and
    /// [`Error::StreamClosed`] goes to the exception callback.
    pub fn push(&self, item: T) {
        {
            let mut state = self.inner.lock();
            if !state.closed {
                state.queued_bytes += item.weight();
                state.queue.push_back(item);
                if state.queued_bytes > state.max_size {
                    state.drain_armed = true;
                }
                drop(state);
                self.writable.notify_one();
                return;
            }
        }
        trace!("Write after close");
        self.report(Error::StreamClosed);
    }

    /// Stops accepting writes. Already queued items stay available.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.writable.notify_one();
    }

    /// Stops accepting writes and discards queued items.
    pub fn abort(&self) {
        {
            let mut state = self.inner.lock();
            state.closed = true;
            state.queue.clear();
            state.queued_bytes = 0;
            state.drain_armed = false;
        }
        self.writable.notify_one();
    }

    /// Aborts the queue and reports `err` to the exception callback.
    pub fn fail(&self, err: Error) {
        self.abort();
        self.report(err);
    }

    // ========================================================================
    // Reader Side
    // ========================================================================

    /// Takes the next item without waiting.
    pub fn pop(&self) -> Option<T> {
        let (item, drain) = {
            let mut state = self.inner.lock();
            let item = state.queue.pop_front()?;
            state.queued_bytes = state.queued_bytes.saturating_sub(item.weight());
            (item, Self::update_watermark(&mut state))
        };
        if let Some(handler) = drain {
            self.fire(move || handler());
        }
        Some(item)
    }

    /// Takes every queued item.
    pub fn pop_all(&self) -> Vec<T> {
        std::iter::from_fn(|| self.pop()).collect()
    }

    /// Waits for the next item. Returns `None` once closed and empty.
    pub async fn next(&self) -> Option<T> {
        loop {
            let writable = self.writable.notified();
            if let Some(item) = self.pop() {
                return Some(item);
            }
            if self.is_closed() {
                return None;
            }
            writable.await;
        }
    }

    // ========================================================================
    // Internal
    // ========================================================================

    /// Disarms and returns the drain callback once below the watermark.
    fn update_watermark(state: &mut OutboundState<T>) -> Option<VoidHandler> {
        if state.queued_bytes > state.max_size {
            state.drain_armed = true;
            return None;
        }
        if state.drain_armed && state.queued_bytes < state.max_size {
            state.drain_armed = false;
            return state.drain_handler.clone();
        }
        None
    }

    fn report(&self, err: Error) {
        let handler = self.inner.lock().exception_handler.clone();
        match handler {
            Some(handler) => self.fire(move || handler(err)),
            None => report_unhandled(&err),
        }
    }

    fn fire<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        match &self.context {
            Some(context) => {
                context.dispatch(callback);
            }
            None => callback(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
