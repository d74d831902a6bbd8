//! Read-side state machine.
//!
//! [`InboundQueue`] holds the handlers and buffered items of one read
//! stream and enforces the delivery rules:
//!
//! - no data callback while paused, ended or errored
//! - the end callback fires once, after every buffered item
//! - the exception callback fires once and the stream is dead afterwards
//! - `close()` drops undelivered items before they reach the handler
//!
//! Callbacks run on whichever thread calls `push`/`resume`/`end`, so
//! endpoints only call those from their own [`Context`](crate::Context).

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::trace;

use crate::error::{Error, report_unhandled};

use super::{ExceptionHandler, Handler, StreamState, VoidHandler};

// ============================================================================
// Types
// ============================================================================

struct InboundState<T> {
    state: StreamState,
    pending: VecDeque<T>,
    max_buffered: Option<usize>,
    end_pending: bool,
    delivering: bool,
    handler: Option<Handler<T>>,
    end_handler: Option<VoidHandler>,
    exception_handler: Option<ExceptionHandler>,
}

/// Next thing the delivery loop does.
enum Step<T> {
    Deliver(T, Option<Handler<T>>),
    End(Option<VoidHandler>),
    Stop,
}

// ============================================================================
// InboundQueue
// ============================================================================

/// Buffered, pausable source of `T` values.
///
/// Cloning yields another handle to the same queue.
pub struct InboundQueue<T> {
    inner: Arc<Mutex<InboundState<T>>>,
    resumed: Arc<Notify>,
}

impl<T> Clone for InboundQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            resumed: Arc::clone(&self.resumed),
        }
    }
}

impl<T: Send + 'static> Default for InboundQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> InboundQueue<T> {
    /// Creates a flowing queue with unbounded buffering.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(InboundState {
                state: StreamState::Flowing,
                pending: VecDeque::new(),
                max_buffered: None,
                end_pending: false,
                delivering: false,
                handler: None,
                end_handler: None,
                exception_handler: None,
            })),
            resumed: Arc::new(Notify::new()),
        }
    }

    /// Creates a flowing queue that buffers at most `max` items while paused.
    #[must_use]
    pub fn bounded(max: usize) -> Self {
        let queue = Self::new();
        queue.set_max_buffered(Some(max));
        queue
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    /// Sets the data callback and flushes anything buffered.
    pub fn set_handler(&self, handler: Handler<T>) {
        self.inner.lock().handler = Some(handler);
        self.drain();
    }

    /// Removes the data callback.
    pub fn clear_handler(&self) {
        self.inner.lock().handler = None;
    }

    /// Returns `true` if a data callback is set.
    #[must_use]
    pub fn has_handler(&self) -> bool {
        self.inner.lock().handler.is_some()
    }

    /// Sets the end callback.
    pub fn set_end_handler(&self, handler: VoidHandler) {
        self.inner.lock().end_handler = Some(handler);
    }

    /// Sets the exception callback.
    pub fn set_exception_handler(&self, handler: ExceptionHandler) {
        self.inner.lock().exception_handler = Some(handler);
    }

    /// Sets the maximum number of items buffered while paused.
    pub fn set_max_buffered(&self, max: Option<usize>) {
        self.inner.lock().max_buffered = max;
    }

    // ========================================================================
    // Flow Control
    // ========================================================================

    /// Stops data callbacks.
    pub fn pause(&self) {
        let mut state = self.inner.lock();
        if state.state == StreamState::Flowing {
            state.state = StreamState::Paused;
        }
    }

    /// Restarts data callbacks and flushes buffered items.
    pub fn resume(&self) {
        {
            let mut state = self.inner.lock();
            if state.state != StreamState::Paused {
                return;
            }
            state.state = StreamState::Flowing;
        }
        self.resumed.notify_waiters();
        self.drain();
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> StreamState {
        self.inner.lock().state
    }

    /// Returns `true` while paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.state() == StreamState::Paused
    }

    /// Number of buffered, undelivered items.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Waits until the stream is flowing.
    ///
    /// Returns `false` once the stream is ended or errored. Transports call
    /// this before reading so a paused stream stops pulling from the wire.
    pub async fn wait_for_demand(&self) -> bool {
        loop {
            let resumed = self.resumed.notified();
            match self.state() {
                StreamState::Flowing => return true,
                StreamState::Paused => resumed.await,
                StreamState::Ended | StreamState::Errored => return false,
            }
        }
    }

    // ========================================================================
    // Producer Side
    // ========================================================================

    /// Offers one item.
    ///
    /// Returns `false` if the item was dropped: the stream is terminal,
    /// the paused buffer is at capacity, or no handler is set.
    pub fn push(&self, item: T) -> bool {
        {
            let mut state = self.inner.lock();
            if state.state.is_terminal() || state.end_pending {
                trace!(state = %state.state, "Item dropped on finished stream");
                return false;
            }
            let buffering = state.state == StreamState::Paused || state.delivering;
            if buffering {
                if let Some(max) = state.max_buffered
                    && state.pending.len() >= max
                {
                    return false;
                }
            } else if state.handler.is_none() {
                trace!("Item dropped, no handler set");
                return false;
            }
            state.pending.push_back(item);
        }
        self.drain();
        true
    }

    /// Marks the source exhausted. The end callback fires after buffered items.
    pub fn end(&self) {
        {
            let mut state = self.inner.lock();
            if state.state.is_terminal() || state.end_pending {
                return;
            }
            state.end_pending = true;
        }
        self.drain();
    }

    /// Fails the stream. Buffered items are discarded.
    ///
    /// The exception callback fires once; without one the error goes to
    /// [`report_unhandled`].
    pub fn fail(&self, err: Error) {
        let handler = {
            let mut state = self.inner.lock();
            if state.state.is_terminal() {
                trace!(error = %err, "Error on finished stream ignored");
                return;
            }
            state.state = StreamState::Errored;
            state.pending.clear();
            state.end_pending = false;
            state.exception_handler.clone()
        };
        self.resumed.notify_waiters();

        match handler {
            Some(handler) => handler(err),
            None => report_unhandled(&err),
        }
    }

    /// Closes the stream: undelivered items are dropped and the end
    /// callback fires once if the stream had not finished.
    pub fn close(&self) {
        let end_handler = {
            let mut state = self.inner.lock();
            if state.state.is_terminal() {
                return;
            }
            state.state = StreamState::Ended;
            state.pending.clear();
            state.end_pending = false;
            state.end_handler.take()
        };
        self.resumed.notify_waiters();

        if let Some(handler) = end_handler {
            handler();
        }
    }

    // ========================================================================
    // Delivery
    // ========================================================================

    /// Delivers buffered items while flowing. Re-entrant calls return
    /// immediately; the outer loop picks up whatever they queued.
    fn drain(&self) {
        {
            let mut state = self.inner.lock();
            if state.delivering {
                return;
            }
            state.delivering = true;
        }
        let _guard = DeliveryGuard(&self.inner);

        loop {
            let step = {
                let mut state = self.inner.lock();
                if state.state != StreamState::Flowing {
                    Step::Stop
                } else if let Some(item) = state.pending.pop_front() {
                    Step::Deliver(item, state.handler.clone())
                } else if state.end_pending {
                    state.end_pending = false;
                    state.state = StreamState::Ended;
                    Step::End(state.end_handler.take())
                } else {
                    Step::Stop
                }
            };

            match step {
                Step::Deliver(item, Some(handler)) => handler(item),
                Step::Deliver(_, None) => trace!("Buffered item dropped, no handler set"),
                Step::End(handler) => {
                    self.resumed.notify_waiters();
                    if let Some(handler) = handler {
                        handler();
                    }
                    return;
                }
                Step::Stop => return,
            }
        }
    }
}

/// Clears the delivering flag even if a handler panics.
struct DeliveryGuard<'a, T>(&'a Mutex<InboundState<T>>);

impl<T> Drop for DeliveryGuard<'_, T> {
    fn drop(&mut self) {
        self.0.lock().delivering = false;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recorder() -> (Arc<Mutex<Vec<u32>>>, Handler<u32>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, Arc::new(move |v| sink.lock().push(v)))
    }

    #[test]
    fn test_flowing_delivers_immediately() {
        let queue = InboundQueue::new();
        let (seen, handler) = recorder();
        queue.set_handler(handler);

        assert!(queue.push(1));
        assert!(queue.push(2));
        assert_eq!(*seen.lock(), vec![1, 2]);
    }

    #[test]
    fn test_paused_buffers_then_flushes_in_order() {
        let queue = InboundQueue::new();
        let (seen, handler) = recorder();
        queue.set_handler(handler);

        queue.pause();
        queue.push(1);
        queue.push(2);
        assert!(seen.lock().is_empty());
        assert_eq!(queue.pending_len(), 2);

        queue.resume();
        assert_eq!(*seen.lock(), vec![1, 2]);
    }

    #[test]
    fn test_end_waits_for_buffered_items() {
        let queue = InboundQueue::new();
        let (seen, handler) = recorder();
        queue.set_handler(handler);

        let ends = Arc::new(AtomicUsize::new(0));
        let observed = Arc::clone(&seen);
        let counter = Arc::clone(&ends);
        queue.set_end_handler(Arc::new(move || {
            assert_eq!(observed.lock().len(), 2);
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        queue.pause();
        queue.push(1);
        queue.push(2);
        queue.end();
        assert_eq!(ends.load(Ordering::SeqCst), 0);

        queue.resume();
        queue.end();
        assert_eq!(ends.load(Ordering::SeqCst), 1);
        assert_eq!(queue.state(), StreamState::Ended);
        assert!(!queue.push(3));
    }

    #[test]
    fn test_fail_is_terminal() {
        let queue = InboundQueue::new();
        let (seen, handler) = recorder();
        queue.set_handler(handler);

        let errors = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&errors);
        queue.set_exception_handler(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let ends = Arc::new(AtomicUsize::new(0));
        let end_counter = Arc::clone(&ends);
        queue.set_end_handler(Arc::new(move || {
            end_counter.fetch_add(1, Ordering::SeqCst);
        }));

        queue.pause();
        queue.push(1);
        queue.fail(Error::UnexpectedContinuation);
        queue.fail(Error::UnexpectedContinuation);
        queue.resume();
        queue.end();

        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(ends.load(Ordering::SeqCst), 0);
        assert!(seen.lock().is_empty());
        assert_eq!(queue.state(), StreamState::Errored);
    }

    #[test]
    fn test_close_drops_undelivered_items() {
        let queue = InboundQueue::new();
        let (seen, handler) = recorder();
        queue.set_handler(handler);

        queue.pause();
        queue.push(1);
        queue.close();
        queue.resume();

        assert!(seen.lock().is_empty());
        assert_eq!(queue.state(), StreamState::Ended);
    }

    #[test]
    fn test_pause_inside_handler_stops_delivery() {
        let queue: InboundQueue<u32> = InboundQueue::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let control = queue.clone();
        queue.set_handler(Arc::new(move |v| {
            sink.lock().push(v);
            control.pause();
        }));

        queue.pause();
        queue.push(1);
        queue.push(2);
        queue.resume();
        assert_eq!(*seen.lock(), vec![1]);

        queue.resume();
        assert_eq!(*seen.lock(), vec![1, 2]);
    }

    #[test]
    fn test_bounded_drops_when_full() {
        let queue = InboundQueue::bounded(1);
        let (_seen, handler) = recorder();
        queue.set_handler(handler);

        queue.pause();
        assert!(queue.push(1));
        assert!(!queue.push(2));
    }

    #[test]
    fn test_no_handler_drops_while_flowing() {
        let queue: InboundQueue<u32> = InboundQueue::new();
        assert!(!queue.push(1));
        assert_eq!(queue.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_wait_for_demand() {
        let queue: InboundQueue<u32> = InboundQueue::new();
        assert!(queue.wait_for_demand().await);

        queue.pause();
        let waiter = queue.clone();
        let task = tokio::spawn(async move { waiter.wait_for_demand().await });
        tokio::task::yield_now().await;
        queue.resume();
        assert!(task.await.unwrap());

        queue.close();
        assert!(!queue.wait_for_demand().await);
    }
}
