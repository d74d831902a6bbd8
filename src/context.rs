//! Execution contexts.
//!
//! A [`Context`] is a single tokio task draining a FIFO of closures.
//! Every endpoint is affined to one context: its callbacks run there, in
//! submission order, never concurrently with each other.
//!
//! # Event Loop
//!
//! ```text
//! execute(f) ──► mpsc (unbounded) ──► task: run f, run g, run h, ...
//! ```
//!
//! The only way to touch an endpoint from another context is to submit a
//! closure to the endpoint's context, either directly with
//! [`Context::execute`] or by sending to the endpoint's write handler
//! address on the event bus.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::mpsc;
use tracing::{debug, error, trace};

use crate::error::{Error, report_unhandled};
use crate::identifiers::ContextId;

// ============================================================================
// Types
// ============================================================================

/// Unit of work submitted to a context.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

tokio::task_local! {
    static CURRENT: Weak<ContextInner>;
}

/// Internal commands for the event loop.
enum ContextCommand {
    /// Run a task.
    Run(Task),
    /// Stop the loop, dropping queued tasks.
    Shutdown,
}

// ============================================================================
// Context
// ============================================================================

/// Single-threaded execution context backed by a tokio task.
///
/// Cloning yields another handle to the same context.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    id: ContextId,
    command_tx: mpsc::UnboundedSender<ContextCommand>,
    closed: AtomicBool,
}

impl Context {
    /// Creates a context and spawns its event loop.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn new() -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(ContextInner {
            id: ContextId::next(),
            command_tx,
            closed: AtomicBool::new(false),
        });

        let id = inner.id;
        tokio::spawn(CURRENT.scope(
            Arc::downgrade(&inner),
            Self::run_event_loop(id, command_rx),
        ));

        debug!(context = %id, "Context started");

        Self { inner }
    }

    /// Returns the context whose task is currently running, if any.
    #[must_use]
    pub fn current() -> Option<Self> {
        CURRENT
            .try_with(Weak::upgrade)
            .ok()
            .flatten()
            .map(|inner| Self { inner })
    }

    /// Returns the context ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    /// Returns `true` if the caller is running on this context.
    #[must_use]
    pub fn is_current(&self) -> bool {
        CURRENT
            .try_with(|current| Weak::as_ptr(current) == Arc::as_ptr(&self.inner))
            .unwrap_or(false)
    }

    /// Returns `true` once [`close`](Self::close) was called.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Queues a task; it runs after every task queued before it.
    ///
    /// Returns `false` if the context is closed and the task was dropped.
    pub fn execute<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_closed() {
            trace!(context = %self.inner.id, "Task dropped on closed context");
            return false;
        }
        self.inner
            .command_tx
            .send(ContextCommand::Run(Box::new(task)))
            .is_ok()
    }

    /// Runs the task inline when already on this context, else queues it.
    pub fn dispatch<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_current() {
            task();
            true
        } else {
            self.execute(task)
        }
    }

    /// Runs `f` inline with this context marked current.
    ///
    /// Only for code that must run synchronously before the context has
    /// been handed any work, such as a handshake callback.
    pub fn enter<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        CURRENT.sync_scope(Arc::downgrade(&self.inner), f)
    }

    /// Stops the event loop. Tasks queued but not yet run are dropped.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.inner.command_tx.send(ContextCommand::Shutdown);
    }

    /// Event loop draining the task queue.
    async fn run_event_loop(id: ContextId, mut command_rx: mpsc::UnboundedReceiver<ContextCommand>) {
        while let Some(command) = command_rx.recv().await {
            match command {
                ContextCommand::Run(task) => {
                    if let Err(payload) = catch_unwind(AssertUnwindSafe(task)) {
                        let err = Error::task_panicked(&*payload);
                        error!(context = %id, error = %err, "Task panicked");
                        report_unhandled(&err);
                    }
                }
                ContextCommand::Shutdown => {
                    debug!(context = %id, "Shutdown command received");
                    break;
                }
            }
        }

        debug!(context = %id, "Context terminated");
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.inner.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Context {}

// ============================================================================
// Tests
// ============================================================================
