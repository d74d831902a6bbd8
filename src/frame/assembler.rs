//! Frame reassembly, ordering and fragmentation.
//!
//! Both directions share one ordering rule:
//!
//! | Incoming frame | No open message | Open message |
//! |----------------|-----------------|--------------|
//! | text / binary | opens (or completes if final) | `FrameInterleaving` |
//! | continuation | `UnexpectedContinuation` | appends (completes if final) |

// ============================================================================
// Imports
// ============================================================================

use tracing::trace;

use crate::buffer::Buffer;
use crate::error::{Error, Result};

use super::{Frame, FrameKind, WebSocketMessage};

// ============================================================================
// FrameSequencer
// ============================================================================

/// Tracks whether a message is open and rejects out-of-order frames.
#[derive(Debug, Default, Clone)]
pub struct FrameSequencer {
    open: Option<FrameKind>,
}

impl FrameSequencer {
    /// Creates a sequencer with no open message.
    #[must_use]
    pub const fn new() -> Self {
        Self { open: None }
    }

    /// Kind of the open message, if any.
    #[inline]
    #[must_use]
    pub fn open_kind(&self) -> Option<FrameKind> {
        self.open
    }

    /// Accepts or rejects `frame` and advances the state.
    ///
    /// A rejected frame leaves the state unchanged.
    ///
    /// # Errors
    ///
    /// - [`Error::UnexpectedContinuation`] for a continuation with no open message
    /// - [`Error::FrameInterleaving`] for a data frame while a message is open
    pub fn check(&mut self, frame: &Frame) -> Result<()> {
        let kind = match (frame.kind(), self.open) {
            (FrameKind::Continuation, None) => return Err(Error::UnexpectedContinuation),
            (FrameKind::Continuation, Some(open)) => open,
            (kind, Some(_)) => return Err(Error::frame_interleaving(kind)),
            (kind, None) => kind,
        };
        self.open = if frame.is_final() { None } else { Some(kind) };
        Ok(())
    }

    /// Forgets any open message.
    pub fn reset(&mut self) {
        self.open = None;
    }
}

// ============================================================================
// FrameAssembler
// ============================================================================

/// Turns an ordered sequence of frames into complete messages.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    sequencer: FrameSequencer,
    pending: Buffer,
}

impl FrameAssembler {
    /// Creates an assembler with no open message.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` while a fragmented message is open.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.sequencer.open_kind().is_some()
    }

    /// Feeds one frame. Returns the message it completes, if any.
    ///
    /// On error the partial message is discarded.
    ///
    /// # Errors
    ///
    /// Same as [`FrameSequencer::check`].
    pub fn push(&mut self, frame: Frame) -> Result<Option<WebSocketMessage>> {
        let kind = match frame.kind() {
            FrameKind::Continuation => self.sequencer.open_kind(),
            kind => Some(kind),
        };
        if let Err(err) = self.sequencer.check(&frame) {
            self.reset();
            return Err(err);
        }

        self.pending.append_buffer(frame.binary_data());
        if !frame.is_final() {
            trace!(buffered = self.pending.length(), "Frame buffered");
            return Ok(None);
        }

        let payload = std::mem::take(&mut self.pending);
        let message = match kind {
            Some(FrameKind::Text) => WebSocketMessage {
                kind: FrameKind::Text,
                payload,
            },
            _ => WebSocketMessage::binary(payload),
        };
        Ok(Some(message))
    }

    /// Discards any partial message.
    pub fn reset(&mut self) {
        self.sequencer.reset();
        self.pending = Buffer::new();
    }
}

// ============================================================================
// Fragmentation
// ============================================================================

/// Splits a message into frames of at most `max_frame_size` bytes.
///
/// Every frame but the last is exactly `max_frame_size` bytes. An empty
/// message yields one empty final frame.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] if `max_frame_size` is zero.
pub fn fragment(message: &WebSocketMessage, max_frame_size: usize) -> Result<Vec<Frame>> {
    if max_frame_size == 0 {
        return Err(Error::invalid_argument("max frame size must be positive"));
    }

    let bytes = message.payload().to_vec();
    if bytes.is_empty() {
        return Ok(vec![Frame::new(message.kind(), Buffer::new(), true)]);
    }

    let count = bytes.len().div_ceil(max_frame_size);
    let frames = bytes
        .chunks(max_frame_size)
        .enumerate()
        .map(|(index, chunk)| {
            let kind = if index == 0 {
                message.kind()
            } else {
                FrameKind::Continuation
            };
            Frame::new(kind, Buffer::from(chunk), index + 1 == count)
        })
        .collect();
    Ok(frames)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    #[test]
    fn test_single_final_frame_is_a_message() {
        let mut assembler = FrameAssembler::new();
        let message = assembler.push(Frame::text("hello", true)).unwrap().unwrap();
        assert!(message.is_text());
        assert_eq!(message.text_data(), "hello");
        assert!(!assembler.is_open());
    }

    #[test]
    fn test_three_frames_concatenate_in_order() {
        let mut assembler = FrameAssembler::new();
        assert!(assembler.push(Frame::text("a", false)).unwrap().is_none());
        assert!(
            assembler
                .push(Frame::continuation(Buffer::from("b"), false))
                .unwrap()
                .is_none()
        );
        let message = assembler
            .push(Frame::continuation(Buffer::from("c"), true))
            .unwrap()
            .unwrap();

        assert_eq!(message.kind(), FrameKind::Text);
        assert_eq!(message.text_data(), "abc");
    }

    #[test]
    fn test_continuation_without_open_message() {
        let mut assembler = FrameAssembler::new();
        let err = assembler
            .push(Frame::continuation(Buffer::from("x"), true))
            .unwrap_err();
        assert!(matches!(err, Error::UnexpectedContinuation));
    }

    #[test]
    fn test_interleaving_is_rejected() {
        let mut assembler = FrameAssembler::new();
        assembler.push(Frame::binary(Buffer::from("a"), false)).unwrap();
        let err = assembler.push(Frame::text("b", true)).unwrap_err();
        assert!(matches!(
            err,
            Error::FrameInterleaving {
                kind: FrameKind::Text
            }
        ));
        assert!(!assembler.is_open());
    }

    #[test]
    fn test_sequencer_rejection_keeps_state() {
        let mut sequencer = FrameSequencer::new();
        sequencer.check(&Frame::binary(Buffer::from("a"), false)).unwrap();
        assert!(sequencer.check(&Frame::binary(Buffer::new(), true)).is_err());
        assert_eq!(sequencer.open_kind(), Some(FrameKind::Binary));
        sequencer
            .check(&Frame::continuation(Buffer::new(), true))
            .unwrap();
        assert_eq!(sequencer.open_kind(), None);
    }

    #[test]
    fn test_fragment_sizes() {
        let message = WebSocketMessage::binary(Buffer::from("abcdefg"));
        let frames = fragment(&message, 3).unwrap();
        let sizes: Vec<usize> = frames.iter().map(|f| f.binary_data().length()).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
        assert!(frames[0].is_binary());
        assert!(frames[1].is_continuation());
        assert!(frames[2].is_final());
        assert!(!frames[1].is_final());
    }

    #[test]
    fn test_fragment_exact_multiple_has_no_empty_tail() {
        let message = WebSocketMessage::text("abcd");
        let frames = fragment(&message, 2).unwrap();
        assert_eq!(frames.len(), 2);
        assert!(frames[1].is_final());
    }

    #[test]
    fn test_fragment_empty_message() {
        let frames = fragment(&WebSocketMessage::text(""), 8).unwrap();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].is_text());
        assert!(frames[0].is_final());
    }

    #[test]
    fn test_fragment_zero_size() {
        let err = fragment(&WebSocketMessage::text("a"), 0).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }

    proptest! {
        #[test]
        fn prop_fragments_reassemble(data in proptest::collection::vec(any::<u8>(), 0..256), size in 1usize..40) {
            let message = WebSocketMessage::binary(Buffer::from(data.clone()));
            let frames = fragment(&message, size).unwrap();
            for frame in &frames[..frames.len() - 1] {
                prop_assert_eq!(frame.binary_data().length(), size);
            }

            let mut assembler = FrameAssembler::new();
            let mut out = None;
            for frame in frames {
                out = assembler.push(frame).unwrap();
            }
            prop_assert_eq!(out.unwrap().into_payload().to_vec(), data);
        }
    }
}
