//! Growable, randomly addressable byte buffer.
//!
//! [`Buffer`] is the leaf data type carried by every stream, frame and
//! event bus payload in the crate.
//!
//! # Semantics
//!
//! | Operation | Behaviour |
//! |-----------|-----------|
//! | `get_*(pos)` | Fails with [`Error::OutOfRange`] past the end, never resizes |
//! | `set_*(pos, v)` | Zero-fills `[length, pos)` and grows as needed, never fails |
//! | `append_*(v)` | Grows by the written width |
//! | `copy()` / `clone()` | Independent bytes |
//! | `slice(..)` | View over shared storage with a length fixed at creation |
//!
//! Numeric accessors are big-endian.
//!
//! # Slices
//!
//! A slice shares storage with its source: a write through either is
//! visible through the other inside the slice's window. A write through
//! a slice that would go past its window first detaches the slice into
//! private storage, so the source is never overwritten outside the window.

// ============================================================================
// Submodules
// ============================================================================

/// Named character encodings.
pub mod encoding;

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Error, Result, report_unhandled};

pub use encoding::Encoding;

// ============================================================================
// Types
// ============================================================================

/// Which part of the shared storage a buffer sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum View {
    /// The whole storage; length tracks storage length.
    Whole,
    /// A fixed window of the storage.
    Window { offset: usize, len: usize },
}

// ============================================================================
// Buffer
// ============================================================================

/// Growable byte sequence with random access.
///
/// `Clone` produces an independent copy, the same as [`Buffer::copy`].
pub struct Buffer {
    storage: Arc<RwLock<Vec<u8>>>,
    view: View,
}

// ============================================================================
// Buffer - Constructors
// ============================================================================

impl Buffer {
    /// Creates an empty buffer.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::from_vec(Vec::new())
    }

    /// Creates an empty buffer with a capacity hint.
    #[inline]
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self::from_vec(Vec::with_capacity(capacity))
    }

    /// Creates a buffer holding the UTF-8 bytes of `text`.
    #[inline]
    #[must_use]
    pub fn from_string(text: &str) -> Self {
        Self::from_vec(text.as_bytes().to_vec())
    }

    /// Creates a buffer holding `text` in the named encoding.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedEncoding`] for unknown encoding names.
    pub fn from_string_with_encoding(text: &str, encoding: &str) -> Result<Self> {
        let encoding = Encoding::from_name(encoding)?;
        Ok(Self::from_vec(encoding.encode(text)))
    }

    /// Creates a buffer that owns `bytes`.
    #[inline]
    #[must_use]
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self {
            storage: Arc::new(RwLock::new(bytes)),
            view: View::Whole,
        }
    }
}

// ============================================================================
// Buffer - Inspection
// ============================================================================

impl Buffer {
    /// Returns the number of readable bytes.
    #[must_use]
    pub fn length(&self) -> usize {
        match self.view {
            View::Whole => self.storage.read().len(),
            View::Window { len, .. } => len,
        }
    }

    /// Returns `true` if the buffer holds no bytes.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.length() == 0
    }

    /// Returns a copy of all bytes.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        self.with_bytes(<[u8]>::to_vec)
    }

    /// Decodes all bytes in the named encoding.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedEncoding`] for unknown encoding names.
    pub fn to_string_with_encoding(&self, encoding: &str) -> Result<String> {
        let encoding = Encoding::from_name(encoding)?;
        Ok(self.with_bytes(|bytes| encoding.decode(bytes)))
    }

    /// Runs `f` over the visible bytes while holding the storage read lock.
    fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let storage = self.storage.read();
        match self.view {
            View::Whole => f(&storage),
            View::Window { offset, len } => f(&storage[offset..offset + len]),
        }
    }

    /// Copies `width` bytes starting at `pos`.
    fn read_range(&self, pos: usize, width: usize) -> Result<Vec<u8>> {
        self.with_bytes(|bytes| {
            pos.checked_add(width)
                .and_then(|end| bytes.get(pos..end))
                .map(<[u8]>::to_vec)
                .ok_or_else(|| Error::out_of_range(pos, width, bytes.len()))
        })
    }

    fn read_array<const N: usize>(&self, pos: usize) -> Result<[u8; N]> {
        self.with_bytes(|bytes| {
            pos.checked_add(N)
                .and_then(|end| bytes.get(pos..end))
                .and_then(|slice| <[u8; N]>::try_from(slice).ok())
                .ok_or_else(|| Error::out_of_range(pos, N, bytes.len()))
        })
    }
}

// ============================================================================
// Buffer - Numeric Getters
// ============================================================================

impl Buffer {
    /// Reads the byte at `pos`.
    pub fn get_byte(&self, pos: usize) -> Result<i8> {
        self.read_array(pos).map(i8::from_be_bytes)
    }

    /// Reads the byte at `pos` as unsigned.
    pub fn get_unsigned_byte(&self, pos: usize) -> Result<u8> {
        self.read_array(pos).map(u8::from_be_bytes)
    }

    /// Reads a 16-bit integer at `pos`.
    pub fn get_short(&self, pos: usize) -> Result<i16> {
        self.read_array(pos).map(i16::from_be_bytes)
    }

    /// Reads a 32-bit integer at `pos`.
    pub fn get_int(&self, pos: usize) -> Result<i32> {
        self.read_array(pos).map(i32::from_be_bytes)
    }

    /// Reads a 64-bit integer at `pos`.
    pub fn get_long(&self, pos: usize) -> Result<i64> {
        self.read_array(pos).map(i64::from_be_bytes)
    }

    /// Reads a 32-bit float at `pos`.
    pub fn get_float(&self, pos: usize) -> Result<f32> {
        self.read_array(pos).map(f32::from_be_bytes)
    }

    /// Reads a 64-bit float at `pos`.
    pub fn get_double(&self, pos: usize) -> Result<f64> {
        self.read_array(pos).map(f64::from_be_bytes)
    }
}

// ============================================================================
// Buffer - Range Getters
// ============================================================================

impl Buffer {
    /// Returns a copy of bytes `[start, end)` as a new buffer.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if `start > end`
    /// - [`Error::OutOfRange`] if `end` is past the end
    pub fn get_buffer(&self, start: usize, end: usize) -> Result<Buffer> {
        self.get_bytes(start, end).map(Self::from_vec)
    }

    /// Returns a copy of bytes `[start, end)`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if `start > end`
    /// - [`Error::OutOfRange`] if `end` is past the end
    pub fn get_bytes(&self, start: usize, end: usize) -> Result<Vec<u8>> {
        if start > end {
            return Err(Error::invalid_argument(format!(
                "start {start} is after end {end}"
            )));
        }
        self.read_range(start, end - start)
    }

    /// Decodes bytes `[start, end)` as UTF-8.
    pub fn get_string(&self, start: usize, end: usize) -> Result<String> {
        self.get_bytes(start, end)
            .map(|bytes| Encoding::Utf8.decode(&bytes))
    }

    /// Decodes bytes `[start, end)` in the named encoding.
    ///
    /// # Errors
    ///
    /// - [`Error::UnsupportedEncoding`] for unknown encoding names
    /// - range errors as for [`get_bytes`](Self::get_bytes)
    pub fn get_string_with_encoding(
        &self,
        start: usize,
        end: usize,
        encoding: &str,
    ) -> Result<String> {
        let encoding = Encoding::from_name(encoding)?;
        self.get_bytes(start, end).map(|bytes| encoding.decode(&bytes))
    }
}

// ============================================================================
// Buffer - Writes
// ============================================================================

impl Buffer {
    /// Writes `bytes` at `pos`, zero-filling any gap.
    ///
    /// A write whose end is not addressable leaves the buffer unchanged and
    /// goes to [`report_unhandled`].
    fn write_at(&mut self, pos: usize, bytes: &[u8]) {
        let Some(end) = pos.checked_add(bytes.len()) else {
            report_unhandled(&Error::invalid_argument(format!(
                "write of {} byte(s) at {pos} overflows the address space",
                bytes.len()
            )));
            return;
        };

        if let View::Window { offset, len } = self.view {
            if end <= len {
                let mut storage = self.storage.write();
                storage[offset + pos..offset + end].copy_from_slice(bytes);
                return;
            }
            self.detach();
        }

        let mut storage = self.storage.write();
        if storage.len() < end {
            let additional = end - storage.len();
            if let Err(e) = storage.try_reserve(additional) {
                report_unhandled(&Error::invalid_argument(format!(
                    "cannot grow buffer to {end} byte(s): {e}"
                )));
                return;
            }
            storage.resize(end, 0);
        }
        storage[pos..end].copy_from_slice(bytes);
    }

    /// Moves a slice onto private storage holding its current window.
    fn detach(&mut self) {
        let bytes = self.to_vec();
        self.storage = Arc::new(RwLock::new(bytes));
        self.view = View::Whole;
    }

    fn append_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        let pos = self.length();
        self.write_at(pos, bytes);
        self
    }

    fn set_bytes(&mut self, pos: usize, bytes: &[u8]) -> &mut Self {
        self.write_at(pos, bytes);
        self
    }
}

// ============================================================================
// Buffer - Append
// ============================================================================

impl Buffer {
    /// Appends another buffer's bytes.
    pub fn append_buffer(&mut self, other: &Buffer) -> &mut Self {
        let bytes = other.to_vec();
        self.append_bytes(&bytes)
    }

    /// Appends `len` bytes of `other` starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfRange`] if the range is not inside `other`.
    pub fn append_buffer_range(
        &mut self,
        other: &Buffer,
        offset: usize,
        len: usize,
    ) -> Result<&mut Self> {
        let bytes = other.read_range(offset, len)?;
        Ok(self.append_bytes(&bytes))
    }

    /// Appends raw bytes.
    pub fn append_slice(&mut self, bytes: &[u8]) -> &mut Self {
        self.append_bytes(bytes)
    }

    /// Appends one byte.
    pub fn append_byte(&mut self, value: i8) -> &mut Self {
        self.append_bytes(&value.to_be_bytes())
    }

    /// Appends one unsigned byte.
    pub fn append_unsigned_byte(&mut self, value: u8) -> &mut Self {
        self.append_bytes(&[value])
    }

    /// Appends a 16-bit integer.
    pub fn append_short(&mut self, value: i16) -> &mut Self {
        self.append_bytes(&value.to_be_bytes())
    }

    /// Appends a 32-bit integer.
    pub fn append_int(&mut self, value: i32) -> &mut Self {
        self.append_bytes(&value.to_be_bytes())
    }

    /// Appends a 64-bit integer.
    pub fn append_long(&mut self, value: i64) -> &mut Self {
        self.append_bytes(&value.to_be_bytes())
    }

    /// Appends a 32-bit float.
    pub fn append_float(&mut self, value: f32) -> &mut Self {
        self.append_bytes(&value.to_be_bytes())
    }

    /// Appends a 64-bit float.
    pub fn append_double(&mut self, value: f64) -> &mut Self {
        self.append_bytes(&value.to_be_bytes())
    }

    /// Appends `text` as UTF-8.
    pub fn append_string(&mut self, text: &str) -> &mut Self {
        self.append_bytes(text.as_bytes())
    }

    /// Appends `text` in the named encoding.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedEncoding`] for unknown encoding names.
    pub fn append_string_with_encoding(&mut self, text: &str, encoding: &str) -> Result<&mut Self> {
        let encoding = Encoding::from_name(encoding)?;
        Ok(self.append_bytes(&encoding.encode(text)))
    }
}

// ============================================================================
// Buffer - Set
// ============================================================================

impl Buffer {
    /// Writes one byte at `pos`.
    pub fn set_byte(&mut self, pos: usize, value: i8) -> &mut Self {
        self.set_bytes(pos, &value.to_be_bytes())
    }

    /// Writes one unsigned byte at `pos`.
    pub fn set_unsigned_byte(&mut self, pos: usize, value: u8) -> &mut Self {
        self.set_bytes(pos, &[value])
    }

    /// Writes a 16-bit integer at `pos`.
    pub fn set_short(&mut self, pos: usize, value: i16) -> &mut Self {
        self.set_bytes(pos, &value.to_be_bytes())
    }

    /// Writes a 32-bit integer at `pos`.
    pub fn set_int(&mut self, pos: usize, value: i32) -> &mut Self {
        self.set_bytes(pos, &value.to_be_bytes())
    }

    /// Writes a 64-bit integer at `pos`.
    pub fn set_long(&mut self, pos: usize, value: i64) -> &mut Self {
        self.set_bytes(pos, &value.to_be_bytes())
    }

    /// Writes a 32-bit float at `pos`.
    pub fn set_float(&mut self, pos: usize, value: f32) -> &mut Self {
        self.set_bytes(pos, &value.to_be_bytes())
    }

    /// Writes a 64-bit float at `pos`.
    pub fn set_double(&mut self, pos: usize, value: f64) -> &mut Self {
        self.set_bytes(pos, &value.to_be_bytes())
    }

    /// Writes another buffer's bytes at `pos`.
    pub fn set_buffer(&mut self, pos: usize, other: &Buffer) -> &mut Self {
        let bytes = other.to_vec();
        self.set_bytes(pos, &bytes)
    }

    /// Writes `len` bytes of `other`, starting at `offset`, at `pos`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfRange`] if the range is not inside `other`.
    pub fn set_buffer_range(
        &mut self,
        pos: usize,
        other: &Buffer,
        offset: usize,
        len: usize,
    ) -> Result<&mut Self> {
        let bytes = other.read_range(offset, len)?;
        Ok(self.set_bytes(pos, &bytes))
    }

    /// Writes `text` as UTF-8 at `pos`.
    pub fn set_string(&mut self, pos: usize, text: &str) -> &mut Self {
        self.set_bytes(pos, text.as_bytes())
    }

    /// Writes `text` in the named encoding at `pos`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedEncoding`] for unknown encoding names.
    pub fn set_string_with_encoding(
        &mut self,
        pos: usize,
        text: &str,
        encoding: &str,
    ) -> Result<&mut Self> {
        let encoding = Encoding::from_name(encoding)?;
        Ok(self.set_bytes(pos, &encoding.encode(text)))
    }
}

// ============================================================================
// Buffer - Copy & Slice
// ============================================================================

impl Buffer {
    /// Returns an independent copy.
    #[must_use]
    pub fn copy(&self) -> Buffer {
        Self::from_vec(self.to_vec())
    }

    /// Returns a view over all current bytes.
    ///
    /// The view's length is fixed now and does not follow later appends
    /// to `self`.
    #[must_use]
    pub fn slice(&self) -> Buffer {
        let len = self.length();
        self.window(0, len)
    }

    /// Returns a view over bytes `[start, end)`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if `start > end`
    /// - [`Error::OutOfRange`] if `end` is past the end
    pub fn slice_range(&self, start: usize, end: usize) -> Result<Buffer> {
        if start > end {
            return Err(Error::invalid_argument(format!(
                "start {start} is after end {end}"
            )));
        }
        let length = self.length();
        if end > length {
            return Err(Error::out_of_range(start, end - start, length));
        }
        Ok(self.window(start, end))
    }

    fn window(&self, start: usize, end: usize) -> Buffer {
        let base = match self.view {
            View::Whole => 0,
            View::Window { offset, .. } => offset,
        };
        Buffer {
            storage: Arc::clone(&self.storage),
            view: View::Window {
                offset: base + start,
                len: end - start,
            },
        }
    }
}

// ============================================================================
// Trait Implementations
// ============================================================================

impl Default for Buffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Buffer {
    fn clone(&self) -> Self {
        self.copy()
    }
}

impl PartialEq for Buffer {
    fn eq(&self, other: &Self) -> bool {
        self.to_vec() == other.to_vec()
    }
}

impl Eq for Buffer {}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("length", &self.length())
            .field("sliced", &matches!(self.view, View::Window { .. }))
            .finish()
    }
}

/// Decodes the bytes as UTF-8, replacing malformed sequences.
impl fmt::Display for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.with_bytes(|bytes| Encoding::Utf8.decode(bytes)))
    }
}

impl From<&str> for Buffer {
    fn from(value: &str) -> Self {
        Self::from_string(value)
    }
}

impl From<String> for Buffer {
    fn from(value: String) -> Self {
        Self::from_vec(value.into_bytes())
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(value: Vec<u8>) -> Self {
        Self::from_vec(value)
    }
}

impl From<&[u8]> for Buffer {
    fn from(value: &[u8]) -> Self {
        Self::from_vec(value.to_vec())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    use crate::error::UnhandledCapture;

    #[test]
    fn test_unaddressable_write_leaves_buffer_unchanged() {
        let capture = UnhandledCapture::install(|err| {
            matches!(err, Error::InvalidArgument { message }
                if message.contains("overflows the address space")
                    || message.contains("cannot grow buffer"))
        });

        let mut buffer = Buffer::from("abc");
        buffer.set_int(usize::MAX - 1, 7);
        buffer.set_long(usize::MAX - 8, 7);
        buffer.set_string(usize::MAX, "x");

        assert_eq!(buffer, Buffer::from("abc"));
        assert_eq!(capture.count(), 3);
    }

    #[test]
    fn test_append_extends_by_width() {
        let mut buffer = Buffer::new();
        buffer
            .append_byte(1)
            .append_short(2)
            .append_int(3)
            .append_long(4)
            .append_float(5.0)
            .append_double(6.0);

        assert_eq!(buffer.length(), 1 + 2 + 4 + 8 + 4 + 8);
        assert_eq!(buffer.get_byte(0).unwrap(), 1);
        assert_eq!(buffer.get_short(1).unwrap(), 2);
        assert_eq!(buffer.get_int(3).unwrap(), 3);
        assert_eq!(buffer.get_long(7).unwrap(), 4);
        assert_eq!(buffer.get_float(15).unwrap(), 5.0);
        assert_eq!(buffer.get_double(19).unwrap(), 6.0);
    }

    #[test]
    fn test_big_endian_layout() {
        let mut buffer = Buffer::new();
        buffer.append_int(0x0102_0304);
        assert_eq!(buffer.to_vec(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_read_past_end_fails() {
        let buffer = Buffer::from_vec(vec![0, 0, 0]);
        let err = buffer.get_int(0).unwrap_err();
        assert!(matches!(
            err,
            Error::OutOfRange {
                position: 0,
                width: 4,
                length: 3
            }
        ));
        assert!(buffer.get_byte(3).is_err());
        assert!(buffer.get_byte(usize::MAX).is_err());
    }

    #[test]
    fn test_set_zero_fills_gap() {
        let mut buffer = Buffer::from_string("ab");
        buffer.set_int(6, -7);

        assert_eq!(buffer.length(), 10);
        assert_eq!(buffer.get_int(6).unwrap(), -7);
        assert_eq!(buffer.get_bytes(2, 6).unwrap(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_get_buffer_is_a_copy() {
        let mut buffer = Buffer::from_string("hello");
        let part = buffer.get_buffer(1, 3).unwrap();
        buffer.set_string(1, "EL");
        assert_eq!(part.to_string(), "el");
        assert!(buffer.get_buffer(3, 1).is_err());
        assert!(buffer.get_buffer(0, 6).is_err());
    }

    #[test]
    fn test_string_with_encoding() {
        let mut buffer = Buffer::new();
        buffer
            .append_string_with_encoding("é", "iso-8859-1")
            .unwrap();
        assert_eq!(buffer.to_vec(), vec![0xE9]);
        assert_eq!(
            buffer.get_string_with_encoding(0, 1, "latin1").unwrap(),
            "é"
        );

        let err = buffer.to_string_with_encoding("ebcdic-42").unwrap_err();
        assert!(matches!(err, Error::UnsupportedEncoding { .. }));
    }

    #[test]
    fn test_buffer_ranges() {
        let source = Buffer::from_string("abcdef");
        let mut target = Buffer::from_string("XY");
        target.append_buffer_range(&source, 2, 3).unwrap();
        assert_eq!(target.to_string(), "XYcde");

        target.set_buffer_range(0, &source, 0, 1).unwrap();
        assert_eq!(target.to_string(), "aYcde");

        assert!(target.append_buffer_range(&source, 5, 2).is_err());
    }

    #[test]
    fn test_copy_is_independent() {
        let buffer = Buffer::from_string("abc");
        let mut copy = buffer.copy();
        copy.append_byte(1).set_byte(0, b'z' as i8);
        assert_eq!(buffer.to_string(), "abc");
        assert_eq!(buffer.length(), 3);
    }

    #[test]
    fn test_slice_shares_storage() {
        let mut buffer = Buffer::from_string("abcdef");
        let mut slice = buffer.slice_range(1, 4).unwrap();

        slice.set_byte(0, b'B' as i8);
        assert_eq!(buffer.get_byte(1).unwrap(), b'B' as i8);

        buffer.set_byte(2, b'C' as i8);
        assert_eq!(slice.get_byte(1).unwrap(), b'C' as i8);
        assert_eq!(slice.to_string(), "BCd");
    }

    #[test]
    fn test_slice_length_is_fixed() {
        let mut buffer = Buffer::from_string("abc");
        let slice = buffer.slice();
        buffer.append_string("def");
        assert_eq!(slice.length(), 3);
        assert!(slice.get_byte(3).is_err());
    }

    #[test]
    fn test_slice_grow_detaches() {
        let buffer = Buffer::from_string("abcdef");
        let mut slice = buffer.slice_range(0, 2).unwrap();
        slice.append_string("ZZ");

        assert_eq!(slice.to_string(), "abZZ");
        assert_eq!(buffer.to_string(), "abcdef");

        slice.set_byte(0, b'q' as i8);
        assert_eq!(buffer.get_byte(0).unwrap(), b'a' as i8);
    }

    #[test]
    fn test_slice_of_slice() {
        let buffer = Buffer::from_string("abcdef");
        let outer = buffer.slice_range(1, 5).unwrap();
        let mut inner = outer.slice_range(1, 3).unwrap();
        assert_eq!(inner.to_string(), "cd");
        inner.set_byte(0, b'C' as i8);
        assert_eq!(buffer.to_string(), "abCdef");
    }

    #[test]
    fn test_set_buffer_from_own_slice() {
        let mut buffer = Buffer::from_string("abcd");
        let slice = buffer.slice_range(0, 2).unwrap();
        buffer.set_buffer(2, &slice);
        assert_eq!(buffer.to_string(), "abab");
    }

    #[test]
    fn test_clone_matches_copy() {
        let buffer = Buffer::from_string("x");
        let mut cloned = buffer.clone();
        cloned.set_byte(0, b'y' as i8);
        assert_eq!(buffer.to_string(), "x");
        assert_ne!(buffer, cloned);
    }

    proptest! {
        #[test]
        fn prop_set_int_past_end(initial in proptest::collection::vec(any::<u8>(), 0..32),
                                 gap in 0usize..32,
                                 value in any::<i32>()) {
            let mut buffer = Buffer::from_vec(initial.clone());
            let pos = initial.len() + gap;
            buffer.set_int(pos, value);

            prop_assert_eq!(buffer.length(), pos + 4);
            prop_assert_eq!(buffer.get_int(pos).unwrap(), value);
            prop_assert_eq!(buffer.get_bytes(0, initial.len()).unwrap(), initial.clone());
            prop_assert!(buffer.get_bytes(initial.len(), pos).unwrap().iter().all(|&b| b == 0));
        }

        #[test]
        fn prop_copy_append_never_mutates_source(bytes in proptest::collection::vec(any::<u8>(), 0..64),
                                                 extra in any::<i8>()) {
            let buffer = Buffer::from_vec(bytes.clone());
            buffer.copy().append_byte(extra);
            prop_assert_eq!(buffer.to_vec(), bytes);
        }

        #[test]
        fn prop_slice_write_visible_in_source(bytes in proptest::collection::vec(any::<u8>(), 1..64),
                                              value in any::<i8>()) {
            let buffer = Buffer::from_vec(bytes.clone());
            let mut slice = buffer.slice_range(0, bytes.len()).unwrap();
            slice.set_byte(0, value);
            prop_assert_eq!(buffer.get_byte(0).unwrap(), value);
        }

        #[test]
        fn prop_utf8_round_trip(text in any::<String>()) {
            let buffer = Buffer::from_string_with_encoding(&text, "utf-8").unwrap();
            prop_assert_eq!(buffer.to_string_with_encoding("utf-8").unwrap(), text);
        }

        #[test]
        fn prop_latin1_round_trip(text in "[\\x00-\\xff]*") {
            let buffer = Buffer::from_string_with_encoding(&text, "iso-8859-1").unwrap();
            prop_assert_eq!(buffer.length(), text.chars().count());
            prop_assert_eq!(buffer.to_string_with_encoding("iso-8859-1").unwrap(), text);
        }
    }
}
