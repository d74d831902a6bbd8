//! Event bus and per-delivery configuration.
//!
//! # Example
//!
//! ```ignore
//! use reactive_transport::DeliveryOptions;
//!
//! let options = DeliveryOptions::new()
//!     .with_send_timeout_ms(500)
//!     .with_header("trace", "abc");
//!
//! let parsed = DeliveryOptions::from_json(&serde_json::json!({
//!     "timeout": 500,
//!     "headers": { "trace": "abc" }
//! }))?;
//! assert_eq!(options, parsed);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::multimap::MultiMap;

// ============================================================================
// Constants
// ============================================================================

/// Default reply timeout (30s).
pub const DEFAULT_SEND_TIMEOUT_MS: u64 = 30_000;

/// Default cap on replies awaited at once.
pub const DEFAULT_MAX_PENDING_REPLIES: usize = 1000;

/// Default number of messages a paused consumer buffers.
pub const DEFAULT_MAX_BUFFERED_MESSAGES: usize = 1000;

// ============================================================================
// DeliveryOptions
// ============================================================================

/// Per-send configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeliveryOptions {
    /// Reply wait limit in milliseconds.
    #[serde(rename = "sendTimeout", alias = "timeout")]
    pub send_timeout_ms: u64,

    /// Informational headers carried with the message.
    pub headers: MultiMap,

    /// Codec used for the payload instead of the body's default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codec_name: Option<String>,
}

impl Default for DeliveryOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl DeliveryOptions {
    /// Creates options with the default timeout and no headers.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            send_timeout_ms: DEFAULT_SEND_TIMEOUT_MS,
            headers: MultiMap::new(),
            codec_name: None,
        }
    }

    /// Parses options from a JSON object. Missing fields take defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`](crate::Error::Json) if a field has the wrong type.
    pub fn from_json(value: &Value) -> Result<Self> {
        Ok(serde_json::from_value(value.clone())?)
    }

    /// Serializes the options to JSON.
    #[must_use]
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Sets the reply timeout in milliseconds.
    #[inline]
    #[must_use]
    pub fn with_send_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.send_timeout_ms = timeout_ms;
        self
    }

    /// Adds a header.
    #[inline]
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.add(name, value);
        self
    }

    /// Selects a codec by name.
    #[inline]
    #[must_use]
    pub fn with_codec_name(mut self, name: impl Into<String>) -> Self {
        self.codec_name = Some(name.into());
        self
    }

    /// Reply timeout as a duration.
    #[inline]
    #[must_use]
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

// ============================================================================
// EventBusOptions
// ============================================================================

/// Bus-wide configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventBusOptions {
    /// Reply timeout for sends made without explicit options.
    pub default_send_timeout_ms: u64,

    /// Maximum replies awaited at once.
    pub max_pending_replies: usize,

    /// Messages a paused consumer buffers before dropping.
    pub max_buffered_messages: usize,
}

impl Default for EventBusOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBusOptions {
    /// Creates options with default limits.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            default_send_timeout_ms: DEFAULT_SEND_TIMEOUT_MS,
            max_pending_replies: DEFAULT_MAX_PENDING_REPLIES,
            max_buffered_messages: DEFAULT_MAX_BUFFERED_MESSAGES,
        }
    }

    /// Sets the default reply timeout.
    #[inline]
    #[must_use]
    pub fn with_default_send_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.default_send_timeout_ms = timeout_ms;
        self
    }

    /// Sets the pending reply cap.
    #[inline]
    #[must_use]
    pub fn with_max_pending_replies(mut self, max: usize) -> Self {
        self.max_pending_replies = max;
        self
    }

    /// Sets the consumer buffer size.
    #[inline]
    #[must_use]
    pub fn with_max_buffered_messages(mut self, max: usize) -> Self {
        self.max_buffered_messages = max;
        self
    }

    /// Delivery options used when a send passes none.
    #[must_use]
    pub fn default_delivery_options(&self) -> DeliveryOptions {
        DeliveryOptions::new().with_send_timeout_ms(self.default_send_timeout_ms)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_delivery_defaults() {
        let options = DeliveryOptions::default();
        assert_eq!(options.send_timeout_ms, 30_000);
        assert!(options.headers.is_empty());
        assert!(options.codec_name.is_none());
    }

    #[test]
    fn test_delivery_from_json_accepts_timeout_alias() {
        let options = DeliveryOptions::from_json(&json!({
            "timeout": 250,
            "headers": {"k": "v"},
            "codecName": "upper"
        }))
        .unwrap();

        assert_eq!(options.send_timeout(), Duration::from_millis(250));
        assert_eq!(options.headers.get("K"), Some("v"));
        assert_eq!(options.codec_name.as_deref(), Some("upper"));
    }

    #[test]
    fn test_delivery_from_json_rejects_bad_types() {
        assert!(DeliveryOptions::from_json(&json!({"timeout": "soon"})).is_err());
    }

    #[test]
    fn test_delivery_to_json() {
        let value = DeliveryOptions::new().with_send_timeout_ms(5).to_json();
        assert_eq!(value, json!({"sendTimeout": 5, "headers": {}}));
    }

    #[test]
    fn test_bus_options_builder() {
        let options = EventBusOptions::new()
            .with_default_send_timeout_ms(10)
            .with_max_pending_replies(2)
            .with_max_buffered_messages(3);
        assert_eq!(options.default_delivery_options().send_timeout_ms, 10);
        assert_eq!(options.max_pending_replies, 2);
        assert_eq!(options.max_buffered_messages, 3);
    }
}
