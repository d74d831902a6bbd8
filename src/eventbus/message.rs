//! Bus payloads and delivered messages.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Weak;

use futures_util::FutureExt;
use serde_json::Value;
use tracing::{debug, warn};

use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::identifiers::ReplyAddress;
use crate::multimap::MultiMap;

use super::bus::{BusInner, ReplyFuture};
use super::options::DeliveryOptions;

// ============================================================================
// Body
// ============================================================================

/// Message payload.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Body {
    /// No payload.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Double(f64),
    /// UTF-8 string.
    String(String),
    /// Raw bytes.
    Buffer(Buffer),
    /// JSON object or array.
    Json(Value),
}

impl Body {
    /// Name of the built-in codec for this payload.
    #[must_use]
    pub const fn codec_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Int(_) => "long",
            Self::Double(_) => "double",
            Self::String(_) => "string",
            Self::Buffer(_) => "buffer",
            Self::Json(_) => "json",
        }
    }

    /// Returns `true` for [`Body::Null`].
    #[inline]
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// String payload, if any.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Buffer payload, if any.
    #[must_use]
    pub fn as_buffer(&self) -> Option<&Buffer> {
        match self {
            Self::Buffer(b) => Some(b),
            _ => None,
        }
    }

    /// JSON payload, if any.
    #[must_use]
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(v) => Some(v),
            _ => None,
        }
    }

    /// Integer payload, if any.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Floating point payload, if any.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Boolean payload, if any.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<()> for Body {
    fn from((): ()) -> Self {
        Self::Null
    }
}

impl From<bool> for Body {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for Body {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<i64> for Body {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for Body {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<&str> for Body {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Body {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Buffer> for Body {
    fn from(value: Buffer) -> Self {
        Self::Buffer(value)
    }
}

impl From<Value> for Body {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl PartialEq<str> for Body {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == Some(other)
    }
}

impl PartialEq<&str> for Body {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == Some(*other)
    }
}

impl fmt::Display for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::String(v) => f.write_str(v),
            Self::Buffer(v) => write!(f, "{v}"),
            Self::Json(v) => write!(f, "{v}"),
        }
    }
}

// ============================================================================
// Message
// ============================================================================

/// A message delivered to a consumer or returned as a reply.
#[derive(Clone)]
pub struct Message {
    pub(crate) address: String,
    pub(crate) headers: MultiMap,
    pub(crate) body: Body,
    pub(crate) reply_address: Option<ReplyAddress>,
    pub(crate) send: bool,
    pub(crate) bus: Weak<BusInner>,
}

impl Message {
    /// Address the message was sent to.
    #[inline]
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Headers from the sender's delivery options.
    #[inline]
    #[must_use]
    pub fn headers(&self) -> &MultiMap {
        &self.headers
    }

    /// Payload.
    #[inline]
    #[must_use]
    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Consumes the message, returning its payload.
    #[must_use]
    pub fn into_body(self) -> Body {
        self.body
    }

    /// Address a reply goes to, if the sender expects one.
    #[must_use]
    pub fn reply_address(&self) -> Option<&str> {
        self.reply_address.as_ref().map(ReplyAddress::as_str)
    }

    /// `true` for point-to-point sends, `false` for publishes.
    #[inline]
    #[must_use]
    pub fn is_send(&self) -> bool {
        self.send
    }

    /// Replies to the sender. Does nothing if no reply is expected.
    pub fn reply(&self, body: impl Into<Body>) {
        self.reply_with_options(body, &DeliveryOptions::new());
    }

    /// Replies to the sender with delivery options.
    pub fn reply_with_options(&self, body: impl Into<Body>, options: &DeliveryOptions) {
        let Some(reply_address) = &self.reply_address else {
            debug!(address = %self.address, "Reply ignored, sender expects none");
            return;
        };
        let Some(bus) = self.bus.upgrade() else {
            return;
        };
        if let Err(e) = bus.dispatch(reply_address.as_str(), body.into(), options, None, true) {
            warn!(address = %self.address, error = %e, "Reply not delivered");
        }
    }

    /// Replies and waits for the sender to reply back.
    pub fn reply_and_request(&self, body: impl Into<Body>) -> ReplyFuture {
        self.reply_and_request_with_options(body, &DeliveryOptions::new())
    }

    /// Replies with delivery options and waits for the sender to reply back.
    pub fn reply_and_request_with_options(
        &self,
        body: impl Into<Body>,
        options: &DeliveryOptions,
    ) -> ReplyFuture {
        let started = match (&self.reply_address, self.bus.upgrade()) {
            (None, _) => Err(Error::invalid_argument("message has no reply address")),
            (Some(_), None) => Err(Error::BusClosed),
            (Some(reply_address), Some(bus)) => {
                Ok(bus.request(reply_address.as_str(), body.into(), options))
            }
        };
        async move { started?.await }.boxed()
    }

    /// Fails the exchange; the sender receives [`Error::RecipientFailure`].
    pub fn fail(&self, code: i32, message: impl Into<String>) {
        let Some(reply_address) = &self.reply_address else {
            debug!(address = %self.address, "Failure ignored, sender expects no reply");
            return;
        };
        if let Some(bus) = self.bus.upgrade() {
            bus.fail_reply(reply_address.as_str(), Error::recipient_failure(code, message));
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("address", &self.address)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("reply_address", &self.reply_address)
            .field("send", &self.send)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
