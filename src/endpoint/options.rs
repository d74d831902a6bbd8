//! Endpoint configuration.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};

use crate::stream::outbound::DEFAULT_WRITE_QUEUE_MAX_SIZE;

// ============================================================================
// Constants
// ============================================================================

/// Default maximum WebSocket frame payload (64 KiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// Default TCP read chunk size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

// ============================================================================
// WebSocketOptions
// ============================================================================

/// WebSocket endpoint configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebSocketOptions {
    /// Largest payload per outbound frame; longer messages are fragmented.
    pub max_frame_size: usize,

    /// Outbound watermark in bytes.
    pub write_queue_max_size: usize,
}

impl Default for WebSocketOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl WebSocketOptions {
    /// Creates options with default sizes.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            write_queue_max_size: DEFAULT_WRITE_QUEUE_MAX_SIZE,
        }
    }

    /// Sets the maximum frame payload.
    #[inline]
    #[must_use]
    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Sets the outbound watermark.
    #[inline]
    #[must_use]
    pub fn with_write_queue_max_size(mut self, size: usize) -> Self {
        self.write_queue_max_size = size;
        self
    }
}

// ============================================================================
// NetSocketOptions
// ============================================================================

/// TCP socket endpoint configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetSocketOptions {
    /// Bytes requested per read from the wire.
    pub read_buffer_size: usize,

    /// Outbound watermark in bytes.
    pub write_queue_max_size: usize,
}

impl Default for NetSocketOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl NetSocketOptions {
    /// Creates options with default sizes.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            write_queue_max_size: DEFAULT_WRITE_QUEUE_MAX_SIZE,
        }
    }

    /// Sets the read chunk size.
    #[inline]
    #[must_use]
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Sets the outbound watermark.
    #[inline]
    #[must_use]
    pub fn with_write_queue_max_size(mut self, size: usize) -> Self {
        self.write_queue_max_size = size;
        self
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let ws = WebSocketOptions::default();
        assert_eq!(ws.max_frame_size, 65_536);
        assert_eq!(ws.write_queue_max_size, 65_536);

        let net = NetSocketOptions::default();
        assert_eq!(net.read_buffer_size, 8192);
    }

    #[test]
    fn test_partial_json() {
        let ws: WebSocketOptions = serde_json::from_str(r#"{"maxFrameSize": 10}"#).unwrap();
        assert_eq!(ws.max_frame_size, 10);
        assert_eq!(ws.write_queue_max_size, DEFAULT_WRITE_QUEUE_MAX_SIZE);
    }
}
