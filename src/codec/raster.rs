//! Raster image codec backed by the `image` crate.

use image::{ColorType, DynamicImage};

use super::traits::{CodecInfo, FrameCodec};
use crate::error::Result;
use crate::{DecodedFrame, PixelSamples};

/// Decoder for PNG, JPEG, BMP and the other formats `image` recognizes.
///
/// Gray images keep their bit depth (8 or 16 bit); everything else decodes
/// to 8-bit RGB.
#[derive(Debug, Default)]
pub struct RasterCodec;

impl RasterCodec {
    /// Create a new raster codec.
    pub fn new() -> Self {
        Self
    }
}

impl FrameCodec for RasterCodec {
    fn info(&self) -> CodecInfo {
        CodecInfo {
            name: "Raster",
            version: "1.0",
            encodings: &["PNG", "JPEG", "BMP", "TIFF", "GIF", "WebP"],
        }
    }

    fn can_decode(&self, bytes: &[u8]) -> bool {
        image::guess_format(bytes).is_ok()
    }

    fn decode(&self, bytes: &[u8]) -> Result<DecodedFrame> {
        let image = image::load_from_memory(bytes)?;
        frame_from_image(image)
    }
}

/// Convert a decoded image to a frame.
pub(crate) fn frame_from_image(image: DynamicImage) -> Result<DecodedFrame> {
    let (width, height) = (image.width(), image.height());

    match image.color() {
        ColorType::L8 | ColorType::La8 => {
            DecodedFrame::grayscale(width, height, PixelSamples::U8(image.into_luma8().into_raw()))
        }
        ColorType::L16 | ColorType::La16 => {
            DecodedFrame::grayscale(width, height, PixelSamples::U16(image.into_luma16().into_raw()))
        }
        _ => DecodedFrame::new(width, height, 3, PixelSamples::U8(image.into_rgb8().into_raw())),
    }
}
