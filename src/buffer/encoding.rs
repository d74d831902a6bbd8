//! Named character encodings for buffer string accessors.
//!
//! | Name(s) | Encoding |
//! |---------|----------|
//! | `utf-8`, `utf8` | UTF-8 |
//! | `utf-16` | UTF-16, big-endian with byte order mark |
//! | `utf-16be` | UTF-16 big-endian |
//! | `utf-16le` | UTF-16 little-endian |
//! | `iso-8859-1`, `latin1` | ISO-8859-1 |
//! | `us-ascii`, `ascii` | US-ASCII |
//!
//! Names are matched case-insensitively. Characters the encoding cannot
//! represent are written as `?`; malformed input decodes to U+FFFD.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

const REPLACEMENT_BYTE: u8 = b'?';
const BOM_BE: [u8; 2] = [0xFE, 0xFF];

/// A supported character encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Encoding {
    /// UTF-8.
    #[default]
    Utf8,
    /// UTF-16 with a byte order mark; big-endian when writing.
    Utf16,
    /// UTF-16 big-endian, no byte order mark.
    Utf16Be,
    /// UTF-16 little-endian, no byte order mark.
    Utf16Le,
    /// ISO-8859-1.
    Latin1,
    /// US-ASCII.
    Ascii,
}

impl Encoding {
    /// Looks up an encoding by name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedEncoding`] for unknown names.
    pub fn from_name(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Ok(Self::Utf8),
            "utf-16" | "utf16" => Ok(Self::Utf16),
            "utf-16be" | "utf16be" => Ok(Self::Utf16Be),
            "utf-16le" | "utf16le" => Ok(Self::Utf16Le),
            "iso-8859-1" | "iso8859-1" | "latin1" => Ok(Self::Latin1),
            "us-ascii" | "ascii" => Ok(Self::Ascii),
            _ => Err(Error::unsupported_encoding(name)),
        }
    }

    /// Returns the canonical name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Utf8 => "UTF-8",
            Self::Utf16 => "UTF-16",
            Self::Utf16Be => "UTF-16BE",
            Self::Utf16Le => "UTF-16LE",
            Self::Latin1 => "ISO-8859-1",
            Self::Ascii => "US-ASCII",
        }
    }

    /// Encodes a string to bytes.
    #[must_use]
    pub fn encode(&self, text: &str) -> Vec<u8> {
        match self {
            Self::Utf8 => text.as_bytes().to_vec(),
            Self::Utf16 => {
                let mut out = BOM_BE.to_vec();
                out.extend(text.encode_utf16().flat_map(u16::to_be_bytes));
                out
            }
            Self::Utf16Be => text.encode_utf16().flat_map(u16::to_be_bytes).collect(),
            Self::Utf16Le => text.encode_utf16().flat_map(u16::to_le_bytes).collect(),
            Self::Latin1 => text.chars().map(|c| narrow(c, 0xFF)).collect(),
            Self::Ascii => text.chars().map(|c| narrow(c, 0x7F)).collect(),
        }
    }

    /// Decodes bytes to a string.
    #[must_use]
    pub fn decode(&self, bytes: &[u8]) -> String {
        match self {
            Self::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Self::Utf16 => match bytes {
                [0xFE, 0xFF, rest @ ..] => decode_utf16(rest, u16::from_be_bytes),
                [0xFF, 0xFE, rest @ ..] => decode_utf16(rest, u16::from_le_bytes),
                _ => decode_utf16(bytes, u16::from_be_bytes),
            },
            Self::Utf16Be => decode_utf16(bytes, u16::from_be_bytes),
            Self::Utf16Le => decode_utf16(bytes, u16::from_le_bytes),
            Self::Latin1 => bytes.iter().map(|&b| char::from(b)).collect(),
            Self::Ascii => bytes
                .iter()
                .map(|&b| {
                    if b.is_ascii() {
                        char::from(b)
                    } else {
                        char::REPLACEMENT_CHARACTER
                    }
                })
                .collect(),
        }
    }
}

/// Maps a char to a single byte, or `?` when above `max`.
fn narrow(c: char, max: u32) -> u8 {
    u8::try_from(u32::from(c))
        .ok()
        .filter(|&b| u32::from(b) <= max)
        .unwrap_or(REPLACEMENT_BYTE)
}

fn decode_utf16(bytes: &[u8], unit: fn([u8; 2]) -> u16) -> String {
    let chunks = bytes.chunks_exact(2);
    let trailing = !chunks.remainder().is_empty();
    let mut text: String = char::decode_utf16(chunks.map(|pair| unit([pair[0], pair[1]])))
        .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect();
    if trailing {
        text.push(char::REPLACEMENT_CHARACTER);
    }
    text
}

impl FromStr for Encoding {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s)
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
