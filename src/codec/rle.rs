//! DICOM RLE Lossless segment decoding.
//!
//! A frame is one fragment: a 64-byte header (segment count plus 15 offsets,
//! all little-endian u32) followed by PackBits-compressed segments. Each
//! segment holds one byte plane, most significant byte first per sample.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Result, ViewerError};

const HEADER_LEN: usize = 64;
const MAX_SEGMENTS: usize = 15;
/// Most output bytes a PackBits segment can yield per input byte (a 2-byte run of 128).
const MAX_RUN_EXPANSION: usize = 64;

/// Decode an RLE fragment into interleaved little-endian sample bytes.
pub fn decode_rle_frame(
    fragment: &[u8],
    pixel_count: usize,
    bytes_per_sample: usize,
    samples_per_pixel: usize,
) -> Result<Vec<u8>> {
    if fragment.len() < HEADER_LEN {
        return Err(ViewerError::CorruptData(format!(
            "RLE fragment of {} bytes is shorter than its header",
            fragment.len()
        )));
    }

    let segment_count = LittleEndian::read_u32(&fragment[0..4]) as usize;
    let expected = bytes_per_sample * samples_per_pixel;
    if segment_count != expected || segment_count > MAX_SEGMENTS {
        return Err(ViewerError::CorruptData(format!(
            "RLE frame has {} segments, expected {}",
            segment_count, expected
        )));
    }

    let mut offsets = [0usize; MAX_SEGMENTS];
    for (i, offset) in offsets.iter_mut().enumerate().take(segment_count) {
        let at = 4 + i * 4;
        *offset = LittleEndian::read_u32(&fragment[at..at + 4]) as usize;
    }

    // validate every segment before sizing buffers from the declared dimensions
    let mut bounds = [(0usize, 0usize); MAX_SEGMENTS];
    for segment in 0..segment_count {
        let start = offsets[segment];
        let end = if segment + 1 < segment_count {
            offsets[segment + 1]
        } else {
            fragment.len()
        };
        if start < HEADER_LEN || start > end || end > fragment.len() {
            return Err(ViewerError::CorruptData(format!(
                "RLE segment {} has invalid bounds {}..{}",
                segment, start, end
            )));
        }
        let capacity = (end - start).saturating_mul(MAX_RUN_EXPANSION);
        if pixel_count > capacity {
            return Err(ViewerError::CorruptData(format!(
                "RLE segment {} holds {} bytes, cannot expand to {} samples",
                segment,
                end - start,
                pixel_count
            )));
        }
        bounds[segment] = (start, end);
    }

    let total = pixel_count
        .checked_mul(expected)
        .ok_or_else(|| ViewerError::CorruptData(format!("RLE frame of {} pixels is too large", pixel_count)))?;
    let mut out = vec![0u8; total];
    let mut plane = Vec::with_capacity(pixel_count);

    for (segment, &(start, end)) in bounds.iter().enumerate().take(segment_count) {
        plane.clear();
        unpack_bits(&fragment[start..end], pixel_count, &mut plane)?;

        let channel = segment / bytes_per_sample;
        // segments run MSB first; output is little-endian
        let byte = bytes_per_sample - 1 - segment % bytes_per_sample;
        for (pixel, &value) in plane.iter().enumerate() {
            out[(pixel * samples_per_pixel + channel) * bytes_per_sample + byte] = value;
        }
    }

    Ok(out)
}

/// PackBits decode until `len` bytes are produced.
fn unpack_bits(data: &[u8], len: usize, out: &mut Vec<u8>) -> Result<()> {
    let mut i = 0;
    while out.len() < len && i < data.len() {
        let n = data[i] as i8;
        i += 1;
        match n {
            0..=127 => {
                let count = n as usize + 1;
                let literal = data.get(i..i + count).ok_or_else(|| {
                    ViewerError::CorruptData("RLE literal run past end of segment".into())
                })?;
                out.extend_from_slice(literal);
                i += count;
            }
            -127..=-1 => {
                let value = *data.get(i).ok_or_else(|| {
                    ViewerError::CorruptData("RLE replicate run past end of segment".into())
                })?;
                out.extend(std::iter::repeat(value).take((1 - n as isize) as usize));
                i += 1;
            }
            // -128 is a no-op
            _ => {}
        }
    }

    if out.len() < len {
        return Err(ViewerError::CorruptData(format!(
            "RLE segment decoded to {} bytes, expected {}",
            out.len(),
            len
        )));
    }
    out.truncate(len);
    Ok(())
}
