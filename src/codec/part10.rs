//! DICOM Part-10 frame codec.
//!
//! Parses the file with the `dicom` crate, then decodes the first frame of
//! the pixel data. Native little-endian, RLE Lossless and JPEG Baseline
//! transfer syntaxes are handled; anything else is reported by name.

use std::borrow::Cow;
use std::io::Cursor;

use byteorder::{ByteOrder, LittleEndian};
use dicom_core::Tag;
use dicom::dictionary_std::tags;
use dicom_object::{DefaultDicomObject, InMemDicomObject};
use dicom_encoding::transfer_syntax::TransferSyntaxIndex;
use dicom_transfer_syntax_registry::TransferSyntaxRegistry;

use super::raster::frame_from_image;
use super::rle::decode_rle_frame;
use super::traits::{CodecInfo, FrameCodec};
use crate::error::{Result, ViewerError};
use crate::mapper::WindowLevel;
use crate::{DecodedFrame, PixelSamples};

const PREAMBLE_LEN: usize = 128;
const MAGIC: &[u8; 4] = b"DICM";

/// Transfer syntax UIDs this codec decodes.
pub mod transfer_syntax {
    /// Implicit VR Little Endian
    pub const IMPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2";
    /// Explicit VR Little Endian
    pub const EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1";
    /// RLE Lossless
    pub const RLE_LOSSLESS: &str = "1.2.840.10008.1.2.5";
    /// JPEG Baseline (Process 1)
    pub const JPEG_BASELINE: &str = "1.2.840.10008.1.2.4.50";
}

/// Image attributes read from the data set.
#[derive(Debug, Clone)]
struct ImageAttributes {
    rows: u32,
    columns: u32,
    bits_allocated: u16,
    signed: bool,
    samples_per_pixel: u16,
    planar: bool,
    photometric: String,
}

impl ImageAttributes {
    fn bytes_per_sample(&self) -> usize {
        (self.bits_allocated as usize + 7) / 8
    }

    fn pixel_count(&self) -> usize {
        self.rows as usize * self.columns as usize
    }

    fn frame_len(&self) -> usize {
        self.pixel_count() * self.samples_per_pixel as usize * self.bytes_per_sample()
    }
}

/// DICOM Part-10 codec.
#[derive(Debug, Default)]
pub struct DicomCodec;

impl DicomCodec {
    /// Create a new DICOM codec.
    pub fn new() -> Self {
        Self
    }

    /// Parse a Part-10 stream, with or without the 128-byte preamble.
    fn parse(bytes: &[u8]) -> Result<DefaultDicomObject> {
        let start = if has_preamble(bytes) {
            PREAMBLE_LEN
        } else if bytes.starts_with(MAGIC) {
            0
        } else {
            return Err(ViewerError::UnsupportedEncoding(
                "Stream is not DICOM Part-10".into(),
            ));
        };
        Ok(dicom_object::from_reader(Cursor::new(&bytes[start..]))?)
    }
}

fn has_preamble(bytes: &[u8]) -> bool {
    bytes.len() >= PREAMBLE_LEN + MAGIC.len() && &bytes[PREAMBLE_LEN..PREAMBLE_LEN + 4] == MAGIC
}

impl FrameCodec for DicomCodec {
    fn info(&self) -> CodecInfo {
        CodecInfo {
            name: "DICOM",
            version: "1.0",
            encodings: &[
                "Implicit VR Little Endian",
                "Explicit VR Little Endian",
                "RLE Lossless",
                "JPEG Baseline",
            ],
        }
    }

    fn can_decode(&self, bytes: &[u8]) -> bool {
        has_preamble(bytes) || bytes.starts_with(MAGIC)
    }

    fn decode(&self, bytes: &[u8]) -> Result<DecodedFrame> {
        let object = Self::parse(bytes)?;
        let ts = object.meta().transfer_syntax().trim_end_matches(['\0', ' ']).to_string();
        let attrs = read_attributes(&object)?;

        log::debug!(
            "DICOM frame {}x{} {}-bit spp={} ts={}",
            attrs.columns,
            attrs.rows,
            attrs.bits_allocated,
            attrs.samples_per_pixel,
            ts
        );

        let frame = match ts.as_str() {
            transfer_syntax::IMPLICIT_VR_LITTLE_ENDIAN | transfer_syntax::EXPLICIT_VR_LITTLE_ENDIAN => {
                let data = native_pixel_data(&object)?;
                frame_from_native(&attrs, &data)?
            }
            transfer_syntax::RLE_LOSSLESS => {
                let fragments = pixel_fragments(&object)?;
                let first = fragments.first().ok_or_else(|| {
                    ViewerError::CorruptData("RLE pixel data has no fragments".into())
                })?;
                let data = decode_rle_frame(
                    first,
                    attrs.pixel_count(),
                    attrs.bytes_per_sample(),
                    attrs.samples_per_pixel as usize,
                )?;
                // RLE output is always interleaved
                let attrs = ImageAttributes {
                    planar: false,
                    ..attrs.clone()
                };
                frame_from_native(&attrs, &data)?
            }
            transfer_syntax::JPEG_BASELINE => {
                let fragments = pixel_fragments(&object)?;
                let stream = first_jpeg_stream(&fragments)?;
                let image = image::load_from_memory_with_format(&stream, image::ImageFormat::Jpeg)?;
                if image.width() != attrs.columns || image.height() != attrs.rows {
                    return Err(ViewerError::CorruptData(format!(
                        "JPEG stream is {}x{}, data set declares {}x{}",
                        image.width(),
                        image.height(),
                        attrs.columns,
                        attrs.rows
                    )));
                }
                frame_from_image(image)?
            }
            other => {
                let name = TransferSyntaxRegistry
                    .get(other)
                    .map(|t| t.name().to_string())
                    .unwrap_or_else(|| "unknown transfer syntax".to_string());
                return Err(ViewerError::UnsupportedEncoding(format!("{} ({})", name, other)));
            }
        };

        Ok(apply_display_attributes(frame, &object, &attrs))
    }
}

fn get_u16(obj: &InMemDicomObject, tag: Tag) -> Option<u16> {
    obj.element(tag).ok().and_then(|e| e.to_int::<u16>().ok())
}

fn get_string(obj: &InMemDicomObject, tag: Tag) -> Option<String> {
    obj.element(tag)
        .ok()
        .and_then(|e| e.to_str().ok())
        .map(|s| s.trim_end_matches(['\0', ' ']).trim().to_string())
}

fn get_floats(obj: &InMemDicomObject, tag: Tag) -> Option<Vec<f64>> {
    obj.element(tag).ok().and_then(|e| e.to_multi_float64().ok())
}

fn read_attributes(obj: &InMemDicomObject) -> Result<ImageAttributes> {
    let missing = |name: &str| ViewerError::CorruptData(format!("Missing {} attribute", name));

    let rows = get_u16(obj, tags::ROWS).ok_or_else(|| missing("Rows"))? as u32;
    let columns = get_u16(obj, tags::COLUMNS).ok_or_else(|| missing("Columns"))? as u32;
    let bits_allocated = get_u16(obj, tags::BITS_ALLOCATED).unwrap_or(16);
    let samples_per_pixel = get_u16(obj, tags::SAMPLES_PER_PIXEL).unwrap_or(1);

    if bits_allocated != 8 && bits_allocated != 16 {
        return Err(ViewerError::UnsupportedEncoding(format!(
            "{} bits allocated",
            bits_allocated
        )));
    }

    Ok(ImageAttributes {
        rows,
        columns,
        bits_allocated,
        signed: get_u16(obj, tags::PIXEL_REPRESENTATION).unwrap_or(0) == 1,
        samples_per_pixel,
        planar: get_u16(obj, tags::PLANAR_CONFIGURATION).unwrap_or(0) == 1,
        photometric: get_string(obj, tags::PHOTOMETRIC_INTERPRETATION)
            .unwrap_or_else(|| "MONOCHROME2".to_string()),
    })
}

fn native_pixel_data(obj: &InMemDicomObject) -> Result<Vec<u8>> {
    let element = obj
        .element(tags::PIXEL_DATA)
        .map_err(|_| ViewerError::CorruptData("Missing PixelData element".into()))?;
    let bytes: Cow<[u8]> = element
        .to_bytes()
        .map_err(|e| ViewerError::CorruptData(format!("Failed to extract pixel data: {}", e)))?;
    Ok(bytes.into_owned())
}

fn pixel_fragments(obj: &InMemDicomObject) -> Result<Vec<Vec<u8>>> {
    let element = obj
        .element(tags::PIXEL_DATA)
        .map_err(|_| ViewerError::CorruptData("Missing PixelData element".into()))?;
    element
        .value()
        .fragments()
        .map(|f| f.to_vec())
        .ok_or_else(|| ViewerError::CorruptData("PixelData is not encapsulated".into()))
}

/// Concatenate fragments up to and including the first JPEG end-of-image marker.
fn first_jpeg_stream(fragments: &[Vec<u8>]) -> Result<Vec<u8>> {
    let mut stream = Vec::new();
    for fragment in fragments {
        stream.extend_from_slice(fragment);
        let trimmed = stream.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
        if stream[..trimmed].ends_with(&[0xFF, 0xD9]) {
            stream.truncate(trimmed);
            return Ok(stream);
        }
    }
    if stream.is_empty() {
        return Err(ViewerError::CorruptData("JPEG pixel data has no fragments".into()));
    }
    Ok(stream)
}

/// Build a frame from uncompressed little-endian sample bytes.
fn frame_from_native(attrs: &ImageAttributes, data: &[u8]) -> Result<DecodedFrame> {
    let frame_len = attrs.frame_len();
    if data.len() < frame_len {
        return Err(ViewerError::CorruptData(format!(
            "Pixel data holds {} bytes, {}x{}x{} at {} bits needs {}",
            data.len(),
            attrs.columns,
            attrs.rows,
            attrs.samples_per_pixel,
            attrs.bits_allocated,
            frame_len
        )));
    }
    let data = &data[..frame_len];

    let samples = match (attrs.bits_allocated, attrs.signed) {
        (8, false) => PixelSamples::U8(data.to_vec()),
        (8, true) => PixelSamples::I8(data.iter().map(|&b| b as i8).collect()),
        (_, false) => {
            let mut out = vec![0u16; data.len() / 2];
            LittleEndian::read_u16_into(data, &mut out);
            PixelSamples::U16(out)
        }
        (_, true) => {
            let mut out = vec![0i16; data.len() / 2];
            LittleEndian::read_i16_into(data, &mut out);
            PixelSamples::I16(out)
        }
    };

    let samples = if attrs.planar && attrs.samples_per_pixel == 3 {
        interleave_planes(samples, attrs.pixel_count())
    } else {
        samples
    };

    DecodedFrame::new(attrs.columns, attrs.rows, attrs.samples_per_pixel, samples)
}

/// Convert planar RRR..GGG..BBB to interleaved RGB.
fn interleave_planes(samples: PixelSamples, pixel_count: usize) -> PixelSamples {
    fn interleave<T: Copy + Default>(planes: &[T], n: usize) -> Vec<T> {
        let mut out = vec![T::default(); planes.len()];
        for p in 0..n {
            for c in 0..3 {
                out[p * 3 + c] = planes[c * n + p];
            }
        }
        out
    }

    match samples {
        PixelSamples::U8(v) => PixelSamples::U8(interleave(&v, pixel_count)),
        PixelSamples::I8(v) => PixelSamples::I8(interleave(&v, pixel_count)),
        PixelSamples::U16(v) => PixelSamples::U16(interleave(&v, pixel_count)),
        PixelSamples::I16(v) => PixelSamples::I16(interleave(&v, pixel_count)),
    }
}

fn apply_display_attributes(
    mut frame: DecodedFrame,
    obj: &InMemDicomObject,
    attrs: &ImageAttributes,
) -> DecodedFrame {
    let slope = get_floats(obj, tags::RESCALE_SLOPE)
        .and_then(|v| v.first().copied())
        .filter(|s| *s != 0.0)
        .unwrap_or(1.0);
    let intercept = get_floats(obj, tags::RESCALE_INTERCEPT)
        .and_then(|v| v.first().copied())
        .unwrap_or(0.0);
    frame = frame.with_rescale(slope, intercept);

    let center = get_floats(obj, tags::WINDOW_CENTER).and_then(|v| v.first().copied());
    let width = get_floats(obj, tags::WINDOW_WIDTH).and_then(|v| v.first().copied());
    if let (Some(center), Some(width)) = (center, width) {
        match WindowLevel::new(width, center) {
            Ok(window) => frame = frame.with_default_window(window),
            Err(e) => log::warn!("Ignoring stored window: {}", e),
        }
    }

    if let Some(spacing) = get_floats(obj, tags::PIXEL_SPACING) {
        if let [row, column] = spacing[..] {
            if row > 0.0 && column > 0.0 {
                frame = frame.with_pixel_spacing(row, column);
            }
        }
    }

    frame.monochrome1 = !frame.is_color() && attrs.photometric == "MONOCHROME1";
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicom_core::{DataElement, PrimitiveValue, VR};
    use dicom_object::meta::FileMetaTableBuilder;

    fn element(tag: Tag, vr: VR, value: PrimitiveValue) -> DataElement<InMemDicomObject> {
        DataElement::new(tag, vr, value)
    }

    fn build(ts: &str, extra: Vec<DataElement<InMemDicomObject>>, pixel_bytes: Vec<u8>) -> Vec<u8> {
        let mut elements = vec![
            element(tags::SAMPLES_PER_PIXEL, VR::US, PrimitiveValue::from(1_u16)),
            element(tags::PHOTOMETRIC_INTERPRETATION, VR::CS, PrimitiveValue::from("MONOCHROME2")),
            element(tags::ROWS, VR::US, PrimitiveValue::from(2_u16)),
            element(tags::COLUMNS, VR::US, PrimitiveValue::from(2_u16)),
            element(tags::BITS_ALLOCATED, VR::US, PrimitiveValue::from(16_u16)),
            element(tags::BITS_STORED, VR::US, PrimitiveValue::from(16_u16)),
            element(tags::HIGH_BIT, VR::US, PrimitiveValue::from(15_u16)),
        ];
        elements.extend(extra);
        elements.push(element(tags::PIXEL_DATA, VR::OB, PrimitiveValue::from(pixel_bytes)));

        let file = InMemDicomObject::from_element_iter(elements)
            .with_meta(
                FileMetaTableBuilder::new()
                    .transfer_syntax(ts)
                    .media_storage_sop_class_uid("1.2.840.10008.5.1.4.1.1.2")
                    .media_storage_sop_instance_uid("1.2.826.0.1.3680043.2.1125.1"),
            )
            .unwrap();

        let mut bytes = Vec::new();
        file.write_all(&mut bytes).unwrap();
        bytes
    }

    fn le_i16(values: &[i16]) -> Vec<u8> {
        let mut out = vec![0u8; values.len() * 2];
        LittleEndian::write_i16_into(values, &mut out);
        out
    }

    #[test]
    fn test_decode_native_ct_frame() {
        let bytes = build(
            transfer_syntax::EXPLICIT_VR_LITTLE_ENDIAN,
            vec![
                element(tags::PIXEL_REPRESENTATION, VR::US, PrimitiveValue::from(1_u16)),
                element(tags::RESCALE_INTERCEPT, VR::DS, PrimitiveValue::from("-1024")),
                element(tags::RESCALE_SLOPE, VR::DS, PrimitiveValue::from("1")),
                element(tags::WINDOW_CENTER, VR::DS, PrimitiveValue::from("40")),
                element(tags::WINDOW_WIDTH, VR::DS, PrimitiveValue::from("400")),
                element(tags::PIXEL_SPACING, VR::DS, PrimitiveValue::from("0.5\\0.7")),
            ],
            le_i16(&[0, 1024, -5, 3000]),
        );

        let codec = DicomCodec::new();
        assert!(codec.can_decode(&bytes));
        let frame = codec.decode(&bytes).unwrap();

        assert_eq!((frame.width, frame.height), (2, 2));
        assert_eq!(frame.samples, PixelSamples::I16(vec![0, 1024, -5, 3000]));
        assert_eq!(frame.real_value(0, 0), Some(-1024.0));
        assert_eq!(frame.default_window, Some(WindowLevel { width: 400.0, center: 40.0 }));
        assert_eq!(frame.pixel_spacing, Some((0.5, 0.7)));
        assert!(!frame.monochrome1);
    }

    #[test]
    fn test_short_pixel_buffer_is_corrupt() {
        let bytes = build(transfer_syntax::EXPLICIT_VR_LITTLE_ENDIAN, vec![], vec![0u8; 6]);
        assert!(matches!(
            DicomCodec::new().decode(&bytes),
            Err(ViewerError::CorruptData(_))
        ));
    }

    #[test]
    fn test_unsupported_transfer_syntax_is_named() {
        // JPEG 2000 is recognized by the registry but not decoded here
        let bytes = build("1.2.840.10008.1.2.4.90", vec![], vec![0u8; 8]);
        match DicomCodec::new().decode(&bytes) {
            Err(ViewerError::UnsupportedEncoding(msg)) => assert!(msg.contains("1.2.840.10008.1.2.4.90")),
            other => panic!("unexpected result: {:?}", other.map(|f| f.width)),
        }
    }

    #[test]
    fn test_preamble_optional() {
        let bytes = build(transfer_syntax::EXPLICIT_VR_LITTLE_ENDIAN, vec![], vec![0u8; 8]);
        let codec = DicomCodec::new();
        if has_preamble(&bytes) {
            assert!(codec.decode(&bytes[PREAMBLE_LEN..]).is_ok());
        }
        assert!(codec.decode(&bytes).is_ok());
        assert!(!codec.can_decode(b"\x89PNG\r\n\x1a\n"));
    }

    #[test]
    fn test_planar_rgb_interleaved() {
        let samples = interleave_planes(PixelSamples::U8(vec![1, 2, 10, 20, 100, 200]), 2);
        assert_eq!(samples, PixelSamples::U8(vec![1, 10, 100, 2, 20, 200]));
    }

    #[test]
    fn test_jpeg_stream_split_across_fragments() {
        let fragments = vec![vec![0xFF, 0xD8, 0x01], vec![0x02, 0xFF, 0xD9, 0x00], vec![0xFF, 0xD8]];
        let stream = first_jpeg_stream(&fragments).unwrap();
        assert_eq!(stream, vec![0xFF, 0xD8, 0x01, 0x02, 0xFF, 0xD9]);
    }
}
