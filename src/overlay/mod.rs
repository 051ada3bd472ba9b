//! Overlay compositor.
//!
//! Annotations live in image pixel space (0..width, 0..height of the decoded
//! frame). They are transformed through the current [`ImageToScreen`] every
//! time a scene is composed, so a resize or zoom never needs a re-decode.

mod raster;
mod scene;

pub use raster::rasterize;
pub use scene::{compose, Layer, OverlayScene, OverlayStyle, SceneItem, ScreenShape, TextAlign, TextCommand, Tooltip};

use serde::{Deserialize, Serialize};

use crate::error::{Result, ViewerError};
use crate::measurement::MeasurementId;

/// A point in image pixel coordinates. Serialized as `[x, y]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct ImagePoint {
    /// Column coordinate.
    pub x: f64,
    /// Row coordinate.
    pub y: f64,
}

impl ImagePoint {
    /// Create a point.
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl From<[f64; 2]> for ImagePoint {
    fn from([x, y]: [f64; 2]) -> Self {
        Self { x, y }
    }
}

impl From<ImagePoint> for [f64; 2] {
    fn from(p: ImagePoint) -> Self {
        [p.x, p.y]
    }
}

/// A point in viewport (screen) coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenPoint {
    /// Horizontal position.
    pub x: f64,
    /// Vertical position.
    pub y: f64,
}

impl ScreenPoint {
    /// Create a point.
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point.
    pub fn distance_to(&self, other: &ScreenPoint) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// RGBA color, written as `#rrggbb` or `#rrggbbaa`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
    /// Red.
    pub r: u8,
    /// Green.
    pub g: u8,
    /// Blue.
    pub b: u8,
    /// Alpha.
    pub a: u8,
}

impl Color {
    /// Opaque color.
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    /// Same color with alpha scaled by `opacity` (0..=1).
    pub fn with_opacity(self, opacity: f64) -> Self {
        Self {
            a: (f64::from(self.a) * opacity.clamp(0.0, 1.0)).round() as u8,
            ..self
        }
    }

    /// Parse a hex color.
    pub fn from_hex(text: &str) -> Result<Self> {
        let hex = text.trim().trim_start_matches('#');
        let channel = |i: usize| {
            hex.get(i..i + 2)
                .and_then(|s| u8::from_str_radix(s, 16).ok())
                .ok_or_else(|| ViewerError::Config(format!("Invalid color {:?}", text)))
        };
        match hex.len() {
            6 => Ok(Self::rgb(channel(0)?, channel(2)?, channel(4)?)),
            8 => Ok(Self {
                r: channel(0)?,
                g: channel(2)?,
                b: channel(4)?,
                a: channel(6)?,
            }),
            _ => Err(ViewerError::Config(format!("Invalid color {:?}", text))),
        }
    }
}

impl TryFrom<String> for Color {
    type Error = ViewerError;

    fn try_from(s: String) -> Result<Self> {
        Color::from_hex(&s)
    }
}

impl From<Color> for String {
    fn from(c: Color) -> Self {
        if c.a == 255 {
            format!("#{:02x}{:02x}{:02x}", c.r, c.g, c.b)
        } else {
            format!("#{:02x}{:02x}{:02x}{:02x}", c.r, c.g, c.b, c.a)
        }
    }
}

/// Geometry of an AI finding, in image space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OverlayShape {
    /// Axis-aligned box.
    BoundingBox {
        /// Top-left corner.
        top_left: ImagePoint,
        /// Bottom-right corner.
        bottom_right: ImagePoint,
    },
    /// Segmentation outline.
    #[serde(rename = "segmentation", alias = "polygon")]
    Polygon {
        /// Vertices in order; at least 3.
        points: Vec<ImagePoint>,
    },
    /// Rectangular region filled with a radial intensity gradient.
    #[serde(rename = "heatmap")]
    HeatmapRegion {
        /// Top-left corner.
        top_left: ImagePoint,
        /// Bottom-right corner.
        bottom_right: ImagePoint,
    },
    /// Single detection marker.
    #[serde(rename = "detection-dot")]
    PointDetection {
        /// Marker center.
        center: ImagePoint,
    },
}

impl OverlayShape {
    /// Check the geometry is drawable.
    pub fn validate(&self) -> Result<()> {
        let finite = |p: &ImagePoint| p.x.is_finite() && p.y.is_finite();
        let ok = match self {
            OverlayShape::BoundingBox { top_left, bottom_right }
            | OverlayShape::HeatmapRegion { top_left, bottom_right } => finite(top_left) && finite(bottom_right),
            OverlayShape::Polygon { points } => points.len() >= 3 && points.iter().all(finite),
            OverlayShape::PointDetection { center } => finite(center),
        };
        if ok {
            Ok(())
        } else {
            Err(ViewerError::Config(format!("Invalid overlay geometry: {:?}", self)))
        }
    }
}

/// One AI finding overlay. Read-only to the viewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayAnnotation {
    /// Finding identifier.
    pub id: String,
    /// Label text.
    pub label: String,
    /// Draw color.
    pub color: Color,
    /// Model confidence, 0..=100.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_percent: Option<f64>,
    /// Slice the finding belongs to; `None` shows it on every slice.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slice_index: Option<usize>,
    /// Geometry.
    #[serde(flatten)]
    pub shape: OverlayShape,
}

impl OverlayAnnotation {
    /// Create an annotation visible on every slice.
    pub fn new(id: impl Into<String>, label: impl Into<String>, color: Color, shape: OverlayShape) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            color,
            confidence_percent: None,
            slice_index: None,
            shape,
        }
    }

    /// Set the confidence.
    pub fn with_confidence(mut self, percent: f64) -> Self {
        self.confidence_percent = Some(percent);
        self
    }

    /// Restrict to one slice.
    pub fn on_slice(mut self, slice_index: usize) -> Self {
        self.slice_index = Some(slice_index);
        self
    }

    /// Whether the annotation shows on a slice.
    pub fn visible_on(&self, slice_index: usize) -> bool {
        self.slice_index.map_or(true, |s| s == slice_index)
    }

    /// Hover text: `label (NN%)` when a confidence is known.
    pub fn tooltip_text(&self) -> String {
        match self.confidence_percent {
            Some(p) => format!("{} ({:.0}%)", self.label, p),
            None => self.label.clone(),
        }
    }
}

/// Identifier returned by hit-testing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OverlayId {
    /// An AI finding.
    Finding(String),
    /// A user measurement.
    Measurement(MeasurementId),
}

/// Uniform image-to-screen transform: `screen = image * scale + offset`.
///
/// One scale for both axes, so annotations never stretch relative to the image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageToScreen {
    /// Screen pixels per image pixel.
    pub scale: f64,
    /// Horizontal offset in screen pixels.
    pub offset_x: f64,
    /// Vertical offset in screen pixels.
    pub offset_y: f64,
}

impl Default for ImageToScreen {
    fn default() -> Self {
        Self::uniform(1.0)
    }
}

impl ImageToScreen {
    /// Pure scale, no offset.
    pub fn uniform(scale: f64) -> Self {
        Self {
            scale,
            offset_x: 0.0,
            offset_y: 0.0,
        }
    }

    /// Largest uniform scale fitting the frame in the screen, centered.
    pub fn aspect_fit(frame_width: u32, frame_height: u32, screen_width: u32, screen_height: u32) -> Self {
        if frame_width == 0 || frame_height == 0 {
            return Self::uniform(1.0);
        }
        let sx = f64::from(screen_width) / f64::from(frame_width);
        let sy = f64::from(screen_height) / f64::from(frame_height);
        let scale = sx.min(sy);
        Self {
            scale,
            offset_x: (f64::from(screen_width) - f64::from(frame_width) * scale) / 2.0,
            offset_y: (f64::from(screen_height) - f64::from(frame_height) * scale) / 2.0,
        }
    }

    /// Apply zoom about the screen center, then pan in screen pixels.
    pub fn zoomed(self, zoom: f64, pan: (f64, f64), screen_width: u32, screen_height: u32) -> Self {
        let (cx, cy) = (f64::from(screen_width) / 2.0, f64::from(screen_height) / 2.0);
        Self {
            scale: self.scale * zoom,
            offset_x: cx + (self.offset_x - cx) * zoom + pan.0,
            offset_y: cy + (self.offset_y - cy) * zoom + pan.1,
        }
    }

    /// Image point to screen.
    pub fn to_screen(&self, p: ImagePoint) -> ScreenPoint {
        ScreenPoint::new(p.x * self.scale + self.offset_x, p.y * self.scale + self.offset_y)
    }

    /// Screen point back to image space.
    pub fn to_image(&self, p: ScreenPoint) -> ImagePoint {
        ImagePoint::new((p.x - self.offset_x) / self.scale, (p.y - self.offset_y) / self.scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_hex() {
        let c = Color::from_hex("#ef4444").unwrap();
        assert_eq!(c, Color::rgb(0xef, 0x44, 0x44));
        assert_eq!(String::from(c), "#ef4444");
        assert_eq!(Color::from_hex("#00ff0080").unwrap().a, 0x80);
        assert!(Color::from_hex("red").is_err());
    }

    #[test]
    fn test_annotation_json() {
        let json = r##"[
            {"id":"f1","label":"Tear","color":"#ef4444","confidence_percent":87.4,
             "type":"bounding-box","top_left":[10,10],"bottom_right":[50,50]},
            {"id":"f2","label":"Edema","color":"#f59e0b","slice_index":4,
             "type":"segmentation","points":[[0,0],[10,0],[5,8]]},
            {"id":"f3","label":"Nodule","color":"#22c55e","type":"detection-dot","center":[30,40]}
        ]"##;
        let annotations: Vec<OverlayAnnotation> = serde_json::from_str(json).unwrap();

        assert_eq!(annotations.len(), 3);
        assert_eq!(annotations[0].tooltip_text(), "Tear (87%)");
        assert!(matches!(annotations[1].shape, OverlayShape::Polygon { ref points } if points.len() == 3));
        assert!(annotations[1].visible_on(4) && !annotations[1].visible_on(5));
        assert!(annotations[2].visible_on(99));
    }

    #[test]
    fn test_polygon_needs_three_points() {
        let shape = OverlayShape::Polygon {
            points: vec![ImagePoint::new(0.0, 0.0), ImagePoint::new(1.0, 1.0)],
        };
        assert!(shape.validate().is_err());
    }

    #[test]
    fn test_uniform_transform() {
        let t = ImageToScreen::uniform(2.0);
        assert_eq!(t.to_screen(ImagePoint::new(10.0, 10.0)), ScreenPoint::new(20.0, 20.0));
        assert_eq!(t.to_image(ScreenPoint::new(100.0, 100.0)), ImagePoint::new(50.0, 50.0));
    }

    #[test]
    fn test_aspect_fit_is_uniform() {
        // 512x256 frame in a 400x400 cell: width bound
        let t = ImageToScreen::aspect_fit(512, 256, 400, 400);
        assert_eq!(t.scale, 400.0 / 512.0);
        assert_eq!(t.offset_x, 0.0);
        assert_eq!(t.offset_y, 100.0);
    }

    #[test]
    fn test_zoom_keeps_center() {
        let t = ImageToScreen::aspect_fit(100, 100, 200, 200).zoomed(2.0, (0.0, 0.0), 200, 200);
        assert_eq!(t.to_screen(ImagePoint::new(50.0, 50.0)), ScreenPoint::new(100.0, 100.0));
        assert_eq!(t.scale, 4.0);

        let panned = ImageToScreen::uniform(1.0).zoomed(1.0, (5.0, -3.0), 10, 10);
        assert_eq!(panned.to_screen(ImagePoint::new(0.0, 0.0)), ScreenPoint::new(5.0, -3.0));
    }
}
