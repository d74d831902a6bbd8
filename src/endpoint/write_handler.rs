//! Cross-context write bridge.
//!
//! An endpoint registers a local-only bus consumer under a generated
//! [`HandlerId`]. Anything sent to that address is handed to the endpoint
//! on the endpoint's own context:
//!
//! ```text
//! other ctx ──bus.send(id, buf)──► consumer ──ctx.dispatch──► endpoint.write(buf)
//! ```
//!
//! The consumer closure holds only a weak reference to the endpoint, and
//! the registration is removed when the endpoint closes.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use tracing::trace;

use crate::context::Context;
use crate::eventbus::{Body, EventBus, MessageConsumer};
use crate::identifiers::HandlerId;

// ============================================================================
// WriteHandlerRegistration
// ============================================================================

/// A bus address that forwards payloads into one endpoint.
pub struct WriteHandlerRegistration {
    id: HandlerId,
    consumer: MessageConsumer,
}

impl WriteHandlerRegistration {
    /// Registers a fresh address. `handler` runs on `context`.
    pub fn register<F>(bus: &EventBus, context: &Context, handler: F) -> Self
    where
        F: Fn(Body) + Send + Sync + 'static,
    {
        let id = HandlerId::generate();
        let handler = Arc::new(handler);
        let context = context.clone();
        let consumer = bus.local_consumer_with_handler(id.as_str(), move |message| {
            let handler = Arc::clone(&handler);
            let body = message.into_body();
            if !context.dispatch(move || handler(body)) {
                trace!("Write handler payload dropped, context closed");
            }
        });
        Self { id, consumer }
    }

    /// The bus address.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &HandlerId {
        &self.id
    }

    /// Returns `true` until [`unregister`](Self::unregister).
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.consumer.is_registered()
    }

    /// Removes the address from the bus.
    pub fn unregister(&self) {
        self.consumer.unregister();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::sync::mpsc;

    use crate::error::Error;

    #[tokio::test]
    async fn test_forwards_on_context() {
        let bus = EventBus::new();
        let context = Context::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let observed = context.clone();
        let registration = WriteHandlerRegistration::register(&bus, &context, move |body| {
            let _ = tx.send((body, observed.is_current()));
        });

        bus.send(registration.id().as_str(), "payload").unwrap();
        let (body, on_context) = rx.recv().await.unwrap();
        assert_eq!(body, "payload");
        assert!(on_context);
        assert!(bus.cluster_visible_addresses().is_empty());
    }

    #[tokio::test]
    async fn test_unregister_removes_address() {
        let bus = EventBus::new();
        let registration = WriteHandlerRegistration::register(&bus, &Context::new(), |_| {});
        registration.unregister();

        assert!(!registration.is_registered());
        assert!(matches!(
            bus.send(registration.id().as_str(), "x"),
            Err(Error::NoHandlers { .. })
        ));
    }
}
