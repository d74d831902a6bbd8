//! WebSocket frames and messages.
//!
//! A message travels as one or more frames:
//!
//! ```text
//! text(final=false) ─► continuation(final=false) ─► continuation(final=true)
//! └──────────────────────── one message ─────────────────────────────────┘
//! ```
//!
//! The first frame carries the content kind, the last has `is_final` set.
//! Frames of different messages never interleave on one stream.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `assembler` | Inbound reassembly, outbound sequencing and fragmentation |

// ============================================================================
// Submodules
// ============================================================================

/// Frame reassembly, ordering and fragmentation.
pub mod assembler;

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use crate::buffer::Buffer;
use crate::stream::Weighted;

// ============================================================================
// Re-exports
// ============================================================================

pub use assembler::{FrameAssembler, FrameSequencer, fragment};

// ============================================================================
// FrameKind
// ============================================================================

/// Frame content kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// UTF-8 text.
    Text,
    /// Arbitrary bytes.
    Binary,
    /// Continues the open message.
    Continuation,
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Text => "text",
            Self::Binary => "binary",
            Self::Continuation => "continuation",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Frame
// ============================================================================

/// One WebSocket protocol unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    kind: FrameKind,
    payload: Buffer,
    is_final: bool,
}

impl Frame {
    /// Creates a frame of any kind.
    #[must_use]
    pub fn new(kind: FrameKind, payload: Buffer, is_final: bool) -> Self {
        Self {
            kind,
            payload,
            is_final,
        }
    }

    /// Creates a text frame.
    #[must_use]
    pub fn text(text: &str, is_final: bool) -> Self {
        Self::new(FrameKind::Text, Buffer::from_string(text), is_final)
    }

    /// Creates a binary frame.
    #[must_use]
    pub fn binary(payload: Buffer, is_final: bool) -> Self {
        Self::new(FrameKind::Binary, payload, is_final)
    }

    /// Creates a continuation frame.
    #[must_use]
    pub fn continuation(payload: Buffer, is_final: bool) -> Self {
        Self::new(FrameKind::Continuation, payload, is_final)
    }

    /// Returns the frame kind.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    /// Returns `true` for text frames.
    #[inline]
    #[must_use]
    pub fn is_text(&self) -> bool {
        self.kind == FrameKind::Text
    }

    /// Returns `true` for binary frames.
    #[inline]
    #[must_use]
    pub fn is_binary(&self) -> bool {
        self.kind == FrameKind::Binary
    }

    /// Returns `true` for continuation frames.
    #[inline]
    #[must_use]
    pub fn is_continuation(&self) -> bool {
        self.kind == FrameKind::Continuation
    }

    /// Returns `true` if this frame ends its message.
    #[inline]
    #[must_use]
    pub fn is_final(&self) -> bool {
        self.is_final
    }

    /// Payload decoded as UTF-8, lossily.
    #[must_use]
    pub fn text_data(&self) -> String {
        self.payload.to_string()
    }

    /// Payload bytes.
    #[inline]
    #[must_use]
    pub fn binary_data(&self) -> &Buffer {
        &self.payload
    }

    /// Consumes the frame, returning its payload.
    #[must_use]
    pub fn into_payload(self) -> Buffer {
        self.payload
    }
}

impl Weighted for Frame {
    fn weight(&self) -> usize {
        self.payload.length()
    }
}

// ============================================================================
// WebSocketMessage
// ============================================================================

/// A complete message: every frame's payload, concatenated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebSocketMessage {
    kind: FrameKind,
    payload: Buffer,
}

impl WebSocketMessage {
    /// Creates a text message.
    #[must_use]
    pub fn text(text: &str) -> Self {
        Self {
            kind: FrameKind::Text,
            payload: Buffer::from_string(text),
        }
    }

    /// Creates a binary message.
    #[must_use]
    pub fn binary(payload: Buffer) -> Self {
        Self {
            kind: FrameKind::Binary,
            payload,
        }
    }

    /// Kind of the first frame, `Text` or `Binary`.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    /// Returns `true` for text messages.
    #[inline]
    #[must_use]
    pub fn is_text(&self) -> bool {
        self.kind == FrameKind::Text
    }

    /// Concatenated payload.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &Buffer {
        &self.payload
    }

    /// Payload decoded as UTF-8, lossily.
    #[must_use]
    pub fn text_data(&self) -> String {
        self.payload.to_string()
    }

    /// Consumes the message, returning its payload.
    #[must_use]
    pub fn into_payload(self) -> Buffer {
        self.payload
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_accessors() {
        let frame = Frame::text("hi", false);
        assert!(frame.is_text());
        assert!(!frame.is_final());
        assert_eq!(frame.text_data(), "hi");
        assert_eq!(frame.weight(), 2);

        let frame = Frame::continuation(Buffer::from("!"), true);
        assert!(frame.is_continuation());
        assert!(frame.is_final());
        assert_eq!(frame.binary_data(), &Buffer::from("!"));
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(FrameKind::Continuation.to_string(), "continuation");
    }
}
