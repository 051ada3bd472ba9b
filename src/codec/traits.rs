//! Codec trait definitions.

use crate::error::Result;
use crate::DecodedFrame;

/// Information about a codec.
#[derive(Debug, Clone)]
pub struct CodecInfo {
    /// Human-readable codec name.
    pub name: &'static str,
    /// Codec version string.
    pub version: &'static str,
    /// Encodings the codec decodes (transfer syntax names or file formats).
    pub encodings: &'static [&'static str],
}

/// Trait for frame decoders.
///
/// A codec claims a byte stream through [`can_decode`](FrameCodec::can_decode),
/// which must only sniff headers and never fully parse.
pub trait FrameCodec: Send + Sync {
    /// Get codec information.
    fn info(&self) -> CodecInfo;

    /// Whether this codec recognizes the byte stream.
    fn can_decode(&self, bytes: &[u8]) -> bool;

    /// Decode one frame.
    ///
    /// # Arguments
    /// * `bytes` - The complete encoded frame as fetched
    ///
    /// # Returns
    /// The decoded frame with raw (unrescaled) samples.
    fn decode(&self, bytes: &[u8]) -> Result<DecodedFrame>;
}
