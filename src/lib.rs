//! Medical Image Viewport Engine
//!
//! The core of a radiology review workstation: decodes image frames, maps raw
//! sample values to displayable pixels through a window/level transform,
//! composites AI findings and user measurements in image space, and keeps a
//! grid of viewports in sync as the user scrubs slices, switches series or
//! resizes the window.
//!
//! # Components
//!
//! - **Frame Decoder** ([`decoder`], [`codec`]): bytes in, [`DecodedFrame`] out,
//!   with an LRU cache and a cancellable background worker
//! - **Intensity Mapper** ([`mapper`]): window/level to 8-bit display values
//! - **Overlay Compositor** ([`overlay`]): image-space annotations drawn at the
//!   current image-to-screen scale, with hit-testing
//! - **Viewport** ([`viewport`]): one rendering surface and its load state machine
//! - **Grid Coordinator** ([`grid`]): N viewports in a 1x1/1x2/2x2/3x3 layout
//! - **Session State** ([`session`]): single source of truth, mutated by actions
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use medimg_view::{Action, ManifestCatalog, StaticFindings, ViewerConfig, ViewerEngine};
//!
//! let catalog = ManifestCatalog::load("studies.json")?;
//! let mut engine = ViewerEngine::new(ViewerConfig::default(), catalog, StaticFindings::empty())?;
//! engine.open_study("study-001")?;
//! engine.dispatch(Action::SetSlice(12))?;
//! engine.wait_idle(std::time::Duration::from_secs(2));
//! let rendered = engine.render_viewport(0)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod catalog;
pub mod cli;
pub mod codec;
pub mod config;
pub mod decoder;
pub mod engine;
pub mod error;
pub mod events;
pub mod findings;
pub mod grid;
pub mod mapper;
pub mod measurement;
pub mod overlay;
pub mod session;
pub mod viewport;

// Re-export commonly used types
pub use catalog::{FrameAddress, ManifestCatalog, Orientation, SeriesDescriptor, StudyCatalog, StudyReference};
pub use codec::{CodecRegistry, FrameCodec};
pub use config::{Modality, ViewerConfig};
pub use decoder::{DecodeWorker, FrameDecoder, FrameFetcher};
pub use engine::ViewerEngine;
pub use error::{Result, ViewerError};
pub use findings::{FindingsProvider, StaticFindings};
pub use grid::{GridCoordinator, GridLayout};
pub use mapper::{map_to_display, PixelSurface, WindowLevel};
pub use measurement::{Measurement, MeasurementId, MeasurementKind};
pub use overlay::{ImageToScreen, OverlayAnnotation, OverlayId, OverlayScene, OverlayShape};
pub use session::{Action, SessionState, SyncPolicy, ViewportState};
pub use viewport::{Viewport, ViewportStatus};

/// Raw sample storage of a decoded frame.
///
/// Values are stored exactly as encoded; rescale slope/intercept is applied
/// only when mapping to display.
#[derive(Debug, Clone, PartialEq)]
pub enum PixelSamples {
    /// Unsigned 8-bit samples.
    U8(Vec<u8>),
    /// Signed 8-bit samples.
    I8(Vec<i8>),
    /// Unsigned 16-bit samples.
    U16(Vec<u16>),
    /// Signed 16-bit samples.
    I16(Vec<i16>),
}

impl PixelSamples {
    /// Number of samples (pixels times channels).
    pub fn len(&self) -> usize {
        match self {
            PixelSamples::U8(v) => v.len(),
            PixelSamples::I8(v) => v.len(),
            PixelSamples::U16(v) => v.len(),
            PixelSamples::I16(v) => v.len(),
        }
    }

    /// Whether there are no samples.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw value at a sample index.
    pub fn get(&self, index: usize) -> Option<f64> {
        match self {
            PixelSamples::U8(v) => v.get(index).map(|&s| f64::from(s)),
            PixelSamples::I8(v) => v.get(index).map(|&s| f64::from(s)),
            PixelSamples::U16(v) => v.get(index).map(|&s| f64::from(s)),
            PixelSamples::I16(v) => v.get(index).map(|&s| f64::from(s)),
        }
    }

    /// Bits per stored sample.
    pub fn bits(&self) -> u16 {
        match self {
            PixelSamples::U8(_) | PixelSamples::I8(_) => 8,
            PixelSamples::U16(_) | PixelSamples::I16(_) => 16,
        }
    }

    /// Whether samples are signed.
    pub fn is_signed(&self) -> bool {
        matches!(self, PixelSamples::I8(_) | PixelSamples::I16(_))
    }

    /// Short description such as `u16` or `i8`.
    pub fn kind(&self) -> &'static str {
        match self {
            PixelSamples::U8(_) => "u8",
            PixelSamples::I8(_) => "i8",
            PixelSamples::U16(_) => "u16",
            PixelSamples::I16(_) => "i16",
        }
    }

    /// Minimum and maximum raw values, `None` when empty.
    pub fn min_max(&self) -> Option<(f64, f64)> {
        fn fold<T: Copy + Into<f64>>(values: &[T]) -> Option<(f64, f64)> {
            values.iter().fold(None, |acc, &value| {
                let value: f64 = value.into();
                match acc {
                    None => Some((value, value)),
                    Some((min, max)) => Some((min.min(value), max.max(value))),
                }
            })
        }

        match self {
            PixelSamples::U8(v) => fold(v),
            PixelSamples::I8(v) => fold(v),
            PixelSamples::U16(v) => fold(v),
            PixelSamples::I16(v) => fold(v),
        }
    }
}

/// Decoded pixel buffer of one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Samples per pixel (1 for grayscale, 3 for RGB, interleaved).
    pub samples_per_pixel: u16,
    /// Raw stored samples.
    pub samples: PixelSamples,
    /// Rescale slope (`real = raw * slope + intercept`).
    pub rescale_slope: f64,
    /// Rescale intercept.
    pub rescale_intercept: f64,
    /// Window suggested by the source, if any.
    pub default_window: Option<WindowLevel>,
    /// Physical pixel spacing in mm as (row spacing, column spacing).
    pub pixel_spacing: Option<(f64, f64)>,
    /// Source uses MONOCHROME1 (low values are bright).
    pub monochrome1: bool,
}

impl DecodedFrame {
    /// Create a frame, checking the sample count against the dimensions.
    pub fn new(width: u32, height: u32, samples_per_pixel: u16, samples: PixelSamples) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(ViewerError::CorruptData(format!(
                "Invalid frame dimensions {}x{}",
                width, height
            )));
        }
        if samples_per_pixel != 1 && samples_per_pixel != 3 {
            return Err(ViewerError::UnsupportedEncoding(format!(
                "{} samples per pixel",
                samples_per_pixel
            )));
        }

        let expected = width as usize * height as usize * samples_per_pixel as usize;
        if samples.len() != expected {
            return Err(ViewerError::CorruptData(format!(
                "Pixel buffer mismatch: {}x{}x{} declares {} samples, got {}",
                width,
                height,
                samples_per_pixel,
                expected,
                samples.len()
            )));
        }

        Ok(Self {
            width,
            height,
            samples_per_pixel,
            samples,
            rescale_slope: 1.0,
            rescale_intercept: 0.0,
            default_window: None,
            pixel_spacing: None,
            monochrome1: false,
        })
    }

    /// Create a single-channel frame.
    pub fn grayscale(width: u32, height: u32, samples: PixelSamples) -> Result<Self> {
        Self::new(width, height, 1, samples)
    }

    /// Set the rescale transform.
    pub fn with_rescale(mut self, slope: f64, intercept: f64) -> Self {
        self.rescale_slope = slope;
        self.rescale_intercept = intercept;
        self
    }

    /// Set the source's suggested window.
    pub fn with_default_window(mut self, window: WindowLevel) -> Self {
        self.default_window = Some(window);
        self
    }

    /// Set physical pixel spacing in mm.
    pub fn with_pixel_spacing(mut self, row: f64, column: f64) -> Self {
        self.pixel_spacing = Some((row, column));
        self
    }

    /// Whether the frame carries color samples.
    pub fn is_color(&self) -> bool {
        self.samples_per_pixel == 3
    }

    /// Number of pixels.
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Apply the rescale transform to a raw value.
    pub fn rescale(&self, raw: f64) -> f64 {
        raw * self.rescale_slope + self.rescale_intercept
    }

    /// Real (rescaled) value of the first channel at a pixel.
    pub fn real_value(&self, x: u32, y: u32) -> Option<f64> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let index = (y as usize * self.width as usize + x as usize) * self.samples_per_pixel as usize;
        self.samples.get(index).map(|raw| self.rescale(raw))
    }

    /// Range of real values over all samples.
    pub fn real_range(&self) -> Option<(f64, f64)> {
        self.samples.min_max().map(|(min, max)| {
            let (a, b) = (self.rescale(min), self.rescale(max));
            // negative slopes swap the ends
            (a.min(b), a.max(b))
        })
    }
}

/// Library version information.
pub mod version {
    /// Library version string.
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");

    /// Library name.
    pub const NAME: &str = env!("CARGO_PKG_NAME");

    /// Get full version string.
    pub fn full_version() -> String {
        format!("{} {}", NAME, VERSION)
    }
}
