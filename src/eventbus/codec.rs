//! Payload codecs.
//!
//! Local delivery never serializes; a codec's job is to hand each receiver
//! its own copy of the payload, optionally transformed. Built-in codecs
//! (`null`, `boolean`, `long`, `double`, `string`, `buffer`, `json`) copy
//! the body as is. A custom codec is selected per send with
//! [`DeliveryOptions::with_codec_name`](super::DeliveryOptions::with_codec_name).

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::error::{Error, Result};

use super::message::Body;

// ============================================================================
// Constants
// ============================================================================

/// Names reserved by the built-in codecs.
pub const BUILTIN_CODEC_NAMES: [&str; 7] =
    ["null", "boolean", "long", "double", "string", "buffer", "json"];

// ============================================================================
// MessageCodec
// ============================================================================

/// Produces the copy of a payload each receiver gets.
pub trait MessageCodec: Send + Sync + 'static {
    /// Registry name.
    fn name(&self) -> &str;

    /// Returns the receiver's copy of `body`.
    ///
    /// # Errors
    ///
    /// Implementations fail when the body is not of a type they handle.
    fn transform(&self, body: &Body) -> Result<Body>;
}

// ============================================================================
// CodecRegistry
// ============================================================================

/// Custom codecs by name.
#[derive(Default)]
pub(crate) struct CodecRegistry {
    custom: FxHashMap<String, Arc<dyn MessageCodec>>,
}

impl CodecRegistry {
    /// Adds a codec.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the name is taken.
    pub(crate) fn register(&mut self, codec: Arc<dyn MessageCodec>) -> Result<()> {
        let name = codec.name().to_string();
        if BUILTIN_CODEC_NAMES.contains(&name.as_str()) || self.custom.contains_key(&name) {
            return Err(Error::invalid_argument(format!(
                "codec {name} is already registered"
            )));
        }
        debug!(codec = %name, "Codec registered");
        self.custom.insert(name, codec);
        Ok(())
    }

    /// Removes a codec. Returns `false` if none was registered under `name`.
    pub(crate) fn unregister(&mut self, name: &str) -> bool {
        self.custom.remove(name).is_some()
    }

    /// Picks the codec for a delivery. `None` means a built-in copy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownCodec`] for an unregistered custom name.
    pub(crate) fn resolve(&self, name: Option<&str>) -> Result<Option<Arc<dyn MessageCodec>>> {
        match name {
            None => Ok(None),
            Some(name) if BUILTIN_CODEC_NAMES.contains(&name) => Ok(None),
            Some(name) => self
                .custom
                .get(name)
                .cloned()
                .map(Some)
                .ok_or_else(|| Error::unknown_codec(name)),
        }
    }
}

/// Applies `codec` to `body`, or copies it when no custom codec is selected.
pub(crate) fn transform(codec: Option<&Arc<dyn MessageCodec>>, body: &Body) -> Result<Body> {
    match codec {
        Some(codec) => codec.transform(body),
        None => Ok(body.clone()),
    }
}

// ============================================================================
// Tests
// ============================================================================
