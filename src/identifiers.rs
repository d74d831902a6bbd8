//! Type-safe identifiers.
//!
//! Newtype wrappers keep context, consumer and address identifiers from
//! being mixed up at compile time.
//!
//! | Type | Backing | Source |
//! |------|---------|--------|
//! | [`ContextId`] | `u64` | process-wide counter |
//! | [`ConsumerId`] | `u64` | process-wide counter |
//! | [`ReplyAddress`] | `Uuid` | generated per request |
//! | [`HandlerId`] | `Uuid` | generated per endpoint write handler |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

// ============================================================================
// Constants
// ============================================================================

/// Prefix of generated reply addresses.
const REPLY_PREFIX: &str = "__reply.";

/// Prefix of generated write handler addresses.
const HANDLER_PREFIX: &str = "__write.";

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_CONSUMER_ID: AtomicU64 = AtomicU64::new(1);

// ============================================================================
// ContextId
// ============================================================================

/// Identifier of an execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    /// Allocates the next context ID.
    #[inline]
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

// ============================================================================
// ConsumerId
// ============================================================================

/// Identifier of one event bus registration.
///
/// Two registrations on the same address always have distinct IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsumerId(u64);

impl ConsumerId {
    /// Allocates the next consumer ID.
    #[inline]
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_CONSUMER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// ReplyAddress
// ============================================================================

/// One-shot temporary address allocated for a request/reply exchange.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReplyAddress(String);

impl ReplyAddress {
    /// Generates a fresh, unique reply address.
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("{REPLY_PREFIX}{}", Uuid::new_v4()))
    }

    /// Returns the address string.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if `address` has the shape of a generated reply address.
    #[inline]
    #[must_use]
    pub fn is_reply_address(address: &str) -> bool {
        address.starts_with(REPLY_PREFIX)
    }
}

impl fmt::Display for ReplyAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ReplyAddress {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// ============================================================================
// HandlerId
// ============================================================================

/// Bus address that routes writes into a specific endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HandlerId(String);

impl HandlerId {
    /// Generates a fresh, unique handler address.
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("{HANDLER_PREFIX}{}", Uuid::new_v4()))
    }

    /// Returns the address string.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================
