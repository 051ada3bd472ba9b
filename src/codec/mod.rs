//! Codec implementations for encoded image frames.
//!
//! This module provides the [`FrameCodec`] trait and implementations for:
//! - DICOM Part-10 (native, RLE Lossless, JPEG Baseline)
//! - Raster images (PNG, JPEG, BMP and the other formats `image` reads)

mod part10;
mod raster;
mod rle;
mod traits;

pub use part10::DicomCodec;
pub use raster::RasterCodec;
pub use rle::decode_rle_frame;
pub use traits::{CodecInfo, FrameCodec};

use crate::error::{Result, ViewerError};
use crate::DecodedFrame;

/// Registry dispatching byte streams to the first codec that claims them.
pub struct CodecRegistry {
    codecs: Vec<Box<dyn FrameCodec>>,
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl CodecRegistry {
    /// Create a registry with no codecs.
    pub fn empty() -> Self {
        Self { codecs: Vec::new() }
    }

    /// Create a registry with the built-in codecs.
    pub fn with_defaults() -> Self {
        Self::empty()
            .with_codec(Box::new(DicomCodec::new()))
            .with_codec(Box::new(RasterCodec::new()))
    }

    /// Append a codec. Earlier codecs win when several claim a stream.
    pub fn with_codec(mut self, codec: Box<dyn FrameCodec>) -> Self {
        self.codecs.push(codec);
        self
    }

    /// Information about every registered codec.
    pub fn codecs(&self) -> Vec<CodecInfo> {
        self.codecs.iter().map(|c| c.info()).collect()
    }

    /// Find the codec claiming a byte stream.
    pub fn find(&self, bytes: &[u8]) -> Option<&dyn FrameCodec> {
        self.codecs
            .iter()
            .find(|c| c.can_decode(bytes))
            .map(|c| c.as_ref())
    }

    /// Decode a frame with the first matching codec.
    pub fn decode(&self, bytes: &[u8]) -> Result<DecodedFrame> {
        let codec = self.find(bytes).ok_or_else(|| {
            ViewerError::UnsupportedEncoding(format!(
                "No codec recognizes the stream ({} bytes)",
                bytes.len()
            ))
        })?;
        log::trace!("Decoding {} bytes with {}", bytes.len(), codec.info().name);
        codec.decode(bytes)
    }
}
