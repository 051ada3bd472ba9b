//! Intensity mapping (window/level).
//!
//! Maps real sample values to 8-bit display values:
//!
//! ```text
//! display = clamp(((v - (center - width / 2)) / width) * 255, 0, 255)
//! ```
//!
//! rounded to the nearest integer. Values at or below the window floor are
//! black, values at or above the ceiling are white. Preset tables live in
//! [`crate::config::presets`]; the mapper only knows width and center.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ViewerError};
use crate::DecodedFrame;
use crate::PixelSamples;

/// Window width/center pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowLevel {
    /// Range of real values spread over 0..255. Must be positive.
    pub width: f64,
    /// Real value mapped to mid-gray.
    pub center: f64,
}

impl Default for WindowLevel {
    fn default() -> Self {
        Self {
            width: 400.0,
            center: 40.0,
        }
    }
}

impl WindowLevel {
    /// Create a validated window.
    pub fn new(width: f64, center: f64) -> Result<Self> {
        let window = Self { width, center };
        window.validate()?;
        Ok(window)
    }

    /// Reject non-positive or non-finite parameters.
    pub fn validate(&self) -> Result<()> {
        if !(self.width > 0.0) || !self.width.is_finite() || !self.center.is_finite() {
            return Err(ViewerError::InvalidWindow { width: self.width });
        }
        Ok(())
    }

    /// Lowest real value that is not clipped to black.
    pub fn floor(&self) -> f64 {
        self.center - self.width / 2.0
    }

    /// Real value mapped to white.
    pub fn ceiling(&self) -> f64 {
        self.center + self.width / 2.0
    }

    /// Display value for a real value. Assumes a validated window.
    pub fn display_value(&self, real: f64) -> u8 {
        let scaled = ((real - self.floor()) / self.width) * 255.0;
        scaled.clamp(0.0, 255.0).round() as u8
    }
}

impl std::fmt::Display for WindowLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "W{} / L{}", self.width, self.center)
    }
}

/// Channel layout of a display surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceFormat {
    /// One byte per pixel.
    Gray8,
    /// Four bytes per pixel, alpha last.
    Rgba8,
}

impl SurfaceFormat {
    /// Bytes per pixel.
    pub fn channels(&self) -> usize {
        match self {
            SurfaceFormat::Gray8 => 1,
            SurfaceFormat::Rgba8 => 4,
        }
    }
}

/// Displayable pixels at frame resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelSurface {
    /// Width in pixels (same as the decoded frame).
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Channel layout.
    pub format: SurfaceFormat,
    /// Row-major pixel bytes.
    pub data: Vec<u8>,
}

impl PixelSurface {
    /// RGBA value at a pixel; gray is expanded.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let channels = self.format.channels();
        let offset = (y as usize * self.width as usize + x as usize) * channels;
        match self.format {
            SurfaceFormat::Gray8 => {
                let v = self.data[offset];
                Some([v, v, v, 255])
            }
            SurfaceFormat::Rgba8 => {
                let px = &self.data[offset..offset + 4];
                Some([px[0], px[1], px[2], px[3]])
            }
        }
    }

    /// Flip every color channel (`255 - v`), keeping alpha.
    pub fn inverted(&self) -> PixelSurface {
        let data = match self.format {
            SurfaceFormat::Gray8 => self.data.iter().map(|&v| 255 - v).collect(),
            SurfaceFormat::Rgba8 => self
                .data
                .chunks_exact(4)
                .flat_map(|px| [255 - px[0], 255 - px[1], 255 - px[2], px[3]])
                .collect(),
        };
        PixelSurface {
            data,
            ..self.clone()
        }
    }

    /// Convert to an RGBA image buffer.
    pub fn to_rgba_image(&self) -> image::RgbaImage {
        let mut out = image::RgbaImage::new(self.width, self.height);
        for (x, y, px) in out.enumerate_pixels_mut() {
            if let Some(rgba) = self.pixel(x, y) {
                *px = image::Rgba(rgba);
            }
        }
        out
    }
}

/// Map a decoded frame to display pixels.
///
/// `invert` flips the output; MONOCHROME1 sources are flipped once more so
/// that they display bright-on-dark like MONOCHROME2.
pub fn map_to_display(frame: &DecodedFrame, window: WindowLevel, invert: bool) -> Result<PixelSurface> {
    window.validate()?;
    if frame.width == 0 || frame.height == 0 {
        return Err(ViewerError::CorruptData("Frame has no pixels".into()));
    }

    let flip = invert ^ frame.monochrome1;
    let slope = frame.rescale_slope;
    let intercept = frame.rescale_intercept;
    let map = move |raw: f64| -> u8 {
        let display = window.display_value(raw * slope + intercept);
        if flip {
            255 - display
        } else {
            display
        }
    };

    let width = frame.width as usize;
    let (format, data) = if frame.is_color() {
        let mut out = vec![0u8; frame.pixel_count() * 4];
        match &frame.samples {
            PixelSamples::U8(v) => map_color(v, width, &mut out, &map),
            PixelSamples::I8(v) => map_color(v, width, &mut out, &map),
            PixelSamples::U16(v) => map_color(v, width, &mut out, &map),
            PixelSamples::I16(v) => map_color(v, width, &mut out, &map),
        }
        (SurfaceFormat::Rgba8, out)
    } else {
        let mut out = vec![0u8; frame.pixel_count()];
        match &frame.samples {
            PixelSamples::U8(v) => map_gray(v, width, &mut out, &map),
            PixelSamples::I8(v) => map_gray(v, width, &mut out, &map),
            PixelSamples::U16(v) => map_gray(v, width, &mut out, &map),
            PixelSamples::I16(v) => map_gray(v, width, &mut out, &map),
        }
        (SurfaceFormat::Gray8, out)
    };

    log::trace!(
        "Mapped {}x{} frame with {} (invert={})",
        frame.width,
        frame.height,
        window,
        flip
    );

    Ok(PixelSurface {
        width: frame.width,
        height: frame.height,
        format,
        data,
    })
}

fn map_gray<T, F>(src: &[T], width: usize, out: &mut [u8], map: &F)
where
    T: Copy + Into<f64> + Sync,
    F: Fn(f64) -> u8 + Sync,
{
    out.par_chunks_mut(width)
        .zip(src.par_chunks(width))
        .for_each(|(dst, row)| {
            for (d, &s) in dst.iter_mut().zip(row) {
                *d = map(s.into());
            }
        });
}

fn map_color<T, F>(src: &[T], width: usize, out: &mut [u8], map: &F)
where
    T: Copy + Into<f64> + Sync,
    F: Fn(f64) -> u8 + Sync,
{
    out.par_chunks_mut(width * 4)
        .zip(src.par_chunks(width * 3))
        .for_each(|(dst, row)| {
            for (d, s) in dst.chunks_exact_mut(4).zip(row.chunks_exact(3)) {
                d[0] = map(s[0].into());
                d[1] = map(s[1].into());
                d[2] = map(s[2].into());
                d[3] = 255;
            }
        });
}

/// Window spanning the frame's full real-value range.
pub fn auto_window(frame: &DecodedFrame) -> WindowLevel {
    match frame.real_range() {
        Some((min, max)) => WindowLevel {
            width: (max - min).max(1.0),
            center: (min + max) / 2.0,
        },
        None => WindowLevel::default(),
    }
}

/// Window to use for a frame: the source's suggestion, else its full range.
pub fn initial_window(frame: &DecodedFrame) -> WindowLevel {
    frame
        .default_window
        .filter(|w| w.validate().is_ok())
        .unwrap_or_else(|| auto_window(frame))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(raw: i16, slope: f64, intercept: f64) -> DecodedFrame {
        DecodedFrame::grayscale(1, 1, PixelSamples::I16(vec![raw]))
            .unwrap()
            .with_rescale(slope, intercept)
    }

    fn display(frame: &DecodedFrame, width: f64, center: f64) -> u8 {
        let window = WindowLevel::new(width, center).unwrap();
        map_to_display(frame, window, false).unwrap().data[0]
    }

    #[test]
    fn test_ct_air_below_brain_window() {
        // raw 0 with intercept -1024 is air, far below the brain window floor
        let frame = single(0, 1.0, -1024.0);
        assert_eq!(display(&frame, 80.0, 40.0), 0);
    }

    #[test]
    fn test_window_boundaries() {
        // floor = 0, ceiling = 80, center = 40
        assert_eq!(display(&single(0, 1.0, 0.0), 80.0, 40.0), 0);
        assert_eq!(display(&single(80, 1.0, 0.0), 80.0, 40.0), 255);
        let mid = display(&single(40, 1.0, 0.0), 80.0, 40.0);
        assert!(mid == 127 || mid == 128, "midpoint mapped to {}", mid);
        assert_eq!(display(&single(3000, 1.0, 0.0), 80.0, 40.0), 255);
    }

    #[test]
    fn test_linear_between_floor_and_ceiling() {
        // W255/C127.5 is the identity on 0..255
        let frame = DecodedFrame::grayscale(4, 1, PixelSamples::U8(vec![0, 10, 200, 255])).unwrap();
        let window = WindowLevel::new(255.0, 127.5).unwrap();
        let surface = map_to_display(&frame, window, false).unwrap();
        assert_eq!(surface.data, vec![0, 10, 200, 255]);
    }

    #[test]
    fn test_formula_matches_reference() {
        let window = WindowLevel::new(350.0, 50.0).unwrap();
        let raw: Vec<i16> = (-200..200).step_by(7).collect();
        let frame = DecodedFrame::grayscale(raw.len() as u32, 1, PixelSamples::I16(raw.clone()))
            .unwrap()
            .with_rescale(2.0, -10.0);
        let surface = map_to_display(&frame, window, false).unwrap();

        for (i, &r) in raw.iter().enumerate() {
            let v = f64::from(r) * 2.0 - 10.0;
            let expected = (((v - (50.0 - 175.0)) / 350.0) * 255.0).clamp(0.0, 255.0).round() as u8;
            assert_eq!(surface.data[i], expected, "raw {}", r);
        }
    }

    #[test]
    fn test_invert_flips_and_is_idempotent() {
        let frame = DecodedFrame::grayscale(3, 1, PixelSamples::U16(vec![0, 100, 400])).unwrap();
        let window = WindowLevel::new(400.0, 200.0).unwrap();

        let plain = map_to_display(&frame, window, false).unwrap();
        let inverted = map_to_display(&frame, window, true).unwrap();
        for (p, i) in plain.data.iter().zip(&inverted.data) {
            assert_eq!(255 - p, *i);
        }

        assert_eq!(plain.inverted().inverted(), plain);
        assert_eq!(plain.inverted(), inverted);
    }

    #[test]
    fn test_invalid_window_rejected() {
        let frame = single(0, 1.0, 0.0);
        let zero = WindowLevel { width: 0.0, center: 40.0 };
        let negative = WindowLevel { width: -5.0, center: 40.0 };

        assert!(matches!(
            map_to_display(&frame, zero, false),
            Err(ViewerError::InvalidWindow { .. })
        ));
        assert!(matches!(
            map_to_display(&frame, negative, false),
            Err(ViewerError::InvalidWindow { .. })
        ));
        assert!(WindowLevel::new(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn test_monochrome1_displays_inverted() {
        let mut frame = DecodedFrame::grayscale(1, 1, PixelSamples::U8(vec![0])).unwrap();
        frame.monochrome1 = true;
        let window = WindowLevel::new(255.0, 127.5).unwrap();
        assert_eq!(map_to_display(&frame, window, false).unwrap().data[0], 255);
        assert_eq!(map_to_display(&frame, window, true).unwrap().data[0], 0);
    }

    #[test]
    fn test_color_windowed_per_channel() {
        let frame = DecodedFrame::new(1, 1, 3, PixelSamples::U8(vec![255, 0, 128])).unwrap();
        let window = WindowLevel::new(255.0, 127.5).unwrap();
        let surface = map_to_display(&frame, window, false).unwrap();
        assert_eq!(surface.format, SurfaceFormat::Rgba8);
        assert_eq!(surface.pixel(0, 0), Some([255, 0, 128, 255]));
    }

    #[test]
    fn test_auto_window_spans_range() {
        let frame = DecodedFrame::grayscale(2, 1, PixelSamples::U16(vec![100, 300]))
            .unwrap()
            .with_rescale(1.0, -50.0);
        let window = auto_window(&frame);
        assert_eq!(window.width, 200.0);
        assert_eq!(window.center, 150.0);
        assert_eq!(initial_window(&frame), window);

        let suggested = frame.clone().with_default_window(WindowLevel::new(80.0, 40.0).unwrap());
        assert_eq!(initial_window(&suggested).width, 80.0);
    }
}
