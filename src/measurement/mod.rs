//! User measurements: length, angle, area, ellipse, probe and ROI statistics.
//!
//! Geometry is kept in image pixel space. Values are in millimetres when the
//! frame carries pixel spacing, otherwise in pixels.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{Result, ViewerError};
use crate::overlay::ImagePoint;
use crate::DecodedFrame;

/// Identifier of a measurement within a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MeasurementId(String);

impl MeasurementId {
    /// Create an id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether no id was assigned yet (the session assigns one on add).
    pub fn is_unassigned(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for MeasurementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MeasurementId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Kind of measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MeasurementKind {
    /// Distance between two points.
    Length,
    /// Angle at the middle of three points.
    Angle,
    /// Polygon area.
    Area,
    /// Ellipse inscribed in two corner points.
    Ellipse,
    /// Single-pixel value.
    #[serde(alias = "hu-probe")]
    Probe,
    /// Statistics over a rectangle.
    #[serde(alias = "hu-roi", alias = "intensity-roi")]
    RoiStatistics,
}

impl MeasurementKind {
    /// Number of points the geometry needs (`None` for polygons, which need at least 3).
    pub fn required_points(&self) -> Option<usize> {
        match self {
            MeasurementKind::Length | MeasurementKind::Ellipse | MeasurementKind::RoiStatistics => Some(2),
            MeasurementKind::Angle => Some(3),
            MeasurementKind::Probe => Some(1),
            MeasurementKind::Area => None,
        }
    }

    /// Display name.
    pub fn name(&self) -> &'static str {
        match self {
            MeasurementKind::Length => "Length",
            MeasurementKind::Angle => "Angle",
            MeasurementKind::Area => "Area",
            MeasurementKind::Ellipse => "Ellipse",
            MeasurementKind::Probe => "Probe",
            MeasurementKind::RoiStatistics => "ROI",
        }
    }
}

/// Statistics of real values inside a region.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoiStats {
    /// Mean value.
    pub mean: f64,
    /// Minimum value.
    pub min: f64,
    /// Maximum value.
    pub max: f64,
    /// Population standard deviation.
    pub std_dev: f64,
    /// Number of pixels sampled.
    pub count: usize,
}

/// A user-created measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Identifier, assigned by the session when empty.
    pub id: MeasurementId,
    /// Measurement kind.
    pub kind: MeasurementKind,
    /// Measured value.
    pub value: f64,
    /// Unit of `value`.
    pub unit: String,
    /// Anatomical location label.
    #[serde(default)]
    pub location_label: String,
    /// Creation time, seconds since the Unix epoch.
    pub timestamp_created: u64,
    /// Image-space geometry.
    #[serde(default)]
    pub points: Vec<ImagePoint>,
    /// Statistics for ROI measurements.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<RoiStats>,
    /// Series the measurement was taken on; `None` shows it everywhere.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series_id: Option<String>,
    /// Slice the measurement was taken on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slice_index: Option<usize>,
}

/// Seconds since the Unix epoch.
pub fn now_epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl Measurement {
    fn build(kind: MeasurementKind, value: f64, unit: &str, points: Vec<ImagePoint>) -> Self {
        Self {
            id: MeasurementId::default(),
            kind,
            value,
            unit: unit.to_string(),
            location_label: String::new(),
            timestamp_created: now_epoch_secs(),
            points,
            stats: None,
            series_id: None,
            slice_index: None,
        }
    }

    /// Distance between two points.
    pub fn length(a: ImagePoint, b: ImagePoint, spacing: Option<(f64, f64)>) -> Self {
        let unit = if spacing.is_some() { "mm" } else { "px" };
        Self::build(MeasurementKind::Length, distance(a, b, spacing), unit, vec![a, b])
    }

    /// Angle at `vertex` between the rays to `a` and `b`, in degrees.
    pub fn angle(a: ImagePoint, vertex: ImagePoint, b: ImagePoint) -> Self {
        Self::build(
            MeasurementKind::Angle,
            angle_degrees(a, vertex, b),
            "°",
            vec![a, vertex, b],
        )
    }

    /// Area of a closed polygon.
    pub fn area(points: Vec<ImagePoint>, spacing: Option<(f64, f64)>) -> Result<Self> {
        if points.len() < 3 {
            return Err(ViewerError::InvalidAction(format!(
                "Area needs at least 3 points, got {}",
                points.len()
            )));
        }
        let unit = if spacing.is_some() { "mm²" } else { "px²" };
        Ok(Self::build(MeasurementKind::Area, polygon_area(&points, spacing), unit, points))
    }

    /// Area of the ellipse inscribed in the rectangle spanned by two corners.
    pub fn ellipse(corner_a: ImagePoint, corner_b: ImagePoint, spacing: Option<(f64, f64)>) -> Self {
        let unit = if spacing.is_some() { "mm²" } else { "px²" };
        Self::build(
            MeasurementKind::Ellipse,
            ellipse_area(corner_a, corner_b, spacing),
            unit,
            vec![corner_a, corner_b],
        )
    }

    /// Real value at one pixel.
    pub fn probe(frame: &DecodedFrame, point: ImagePoint, unit: &str) -> Result<Self> {
        let value = probe(frame, point).ok_or_else(|| {
            ViewerError::InvalidAction(format!("Probe at ({}, {}) is outside the frame", point.x, point.y))
        })?;
        Ok(Self::build(MeasurementKind::Probe, value, unit, vec![point]))
    }

    /// Statistics over the rectangle spanned by two corners; the value is the mean.
    pub fn roi(frame: &DecodedFrame, corner_a: ImagePoint, corner_b: ImagePoint, unit: &str) -> Result<Self> {
        let stats = roi_statistics(frame, corner_a, corner_b).ok_or_else(|| {
            ViewerError::InvalidAction("ROI does not cover any pixel of the frame".into())
        })?;
        let mut m = Self::build(MeasurementKind::RoiStatistics, stats.mean, unit, vec![corner_a, corner_b]);
        m.stats = Some(stats);
        Ok(m)
    }

    /// Set the id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = MeasurementId::new(id);
        self
    }

    /// Set the location label.
    pub fn with_location(mut self, label: impl Into<String>) -> Self {
        self.location_label = label.into();
        self
    }

    /// Anchor to a series and slice.
    pub fn on(mut self, series_id: impl Into<String>, slice_index: usize) -> Self {
        self.series_id = Some(series_id.into());
        self.slice_index = Some(slice_index);
        self
    }

    /// Whether the measurement shows on a series slice.
    pub fn visible_on(&self, series_id: &str, slice_index: usize) -> bool {
        self.series_id.as_deref().map_or(true, |s| s == series_id)
            && self.slice_index.map_or(true, |s| s == slice_index)
    }

    /// Set the creation time.
    pub fn with_timestamp(mut self, epoch_secs: u64) -> Self {
        self.timestamp_created = epoch_secs;
        self
    }

    /// Check that the geometry fits the kind.
    pub fn validate(&self) -> Result<()> {
        let ok = match self.kind.required_points() {
            Some(n) => self.points.len() == n,
            None => self.points.len() >= 3,
        };
        if !ok {
            return Err(ViewerError::InvalidAction(format!(
                "{} measurement has {} points",
                self.kind.name(),
                self.points.len()
            )));
        }
        if !self.value.is_finite() {
            return Err(ViewerError::InvalidAction("Measurement value is not finite".into()));
        }
        Ok(())
    }

    /// Short display text such as `12.40 mm`.
    pub fn display_text(&self) -> String {
        format!("{:.2} {}", self.value, self.unit)
    }
}

/// Distance between two points, scaled by (row, column) spacing.
pub fn distance(a: ImagePoint, b: ImagePoint, spacing: Option<(f64, f64)>) -> f64 {
    let (sy, sx) = spacing.unwrap_or((1.0, 1.0));
    let dx = (b.x - a.x) * sx;
    let dy = (b.y - a.y) * sy;
    (dx * dx + dy * dy).sqrt()
}

/// Angle at `vertex` in degrees (0..=180). Degenerate rays give 0.
pub fn angle_degrees(a: ImagePoint, vertex: ImagePoint, b: ImagePoint) -> f64 {
    let (ux, uy) = (a.x - vertex.x, a.y - vertex.y);
    let (vx, vy) = (b.x - vertex.x, b.y - vertex.y);
    let norm = (ux * ux + uy * uy).sqrt() * (vx * vx + vy * vy).sqrt();
    if norm == 0.0 {
        return 0.0;
    }
    let cos = ((ux * vx + uy * vy) / norm).clamp(-1.0, 1.0);
    cos.acos().to_degrees()
}

/// Shoelace area of a polygon.
pub fn polygon_area(points: &[ImagePoint], spacing: Option<(f64, f64)>) -> f64 {
    let (sy, sx) = spacing.unwrap_or((1.0, 1.0));
    let n = points.len();
    if n < 3 {
        return 0.0;
    }
    let twice: f64 = (0..n)
        .map(|i| {
            let (p, q) = (points[i], points[(i + 1) % n]);
            p.x * q.y - q.x * p.y
        })
        .sum();
    twice.abs() / 2.0 * sx * sy
}

/// Area of the ellipse inscribed in the rectangle spanned by two corners.
pub fn ellipse_area(a: ImagePoint, b: ImagePoint, spacing: Option<(f64, f64)>) -> f64 {
    let (sy, sx) = spacing.unwrap_or((1.0, 1.0));
    let rx = (b.x - a.x).abs() / 2.0 * sx;
    let ry = (b.y - a.y).abs() / 2.0 * sy;
    std::f64::consts::PI * rx * ry
}

/// Real value of the pixel containing `point`.
pub fn probe(frame: &DecodedFrame, point: ImagePoint) -> Option<f64> {
    if point.x < 0.0 || point.y < 0.0 {
        return None;
    }
    frame.real_value(point.x.floor() as u32, point.y.floor() as u32)
}

/// Mean/min/max/standard deviation of real values inside a rectangle.
///
/// The rectangle is clipped to the frame; `None` when nothing remains.
pub fn roi_statistics(frame: &DecodedFrame, a: ImagePoint, b: ImagePoint) -> Option<RoiStats> {
    let x0 = a.x.min(b.x).floor().max(0.0) as u32;
    let y0 = a.y.min(b.y).floor().max(0.0) as u32;
    let x1 = (a.x.max(b.x).ceil().max(0.0) as u32).min(frame.width);
    let y1 = (a.y.max(b.y).ceil().max(0.0) as u32).min(frame.height);

    let values: Vec<f64> = (y0..y1)
        .flat_map(|y| (x0..x1).map(move |x| (x, y)))
        .filter_map(|(x, y)| frame.real_value(x, y))
        .collect();
    if values.is_empty() {
        return None;
    }

    let count = values.len();
    let mean = values.iter().sum::<f64>() / count as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;
    let (min, max) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));

    Some(RoiStats {
        mean,
        min,
        max,
        std_dev: variance.sqrt(),
        count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PixelSamples;

    fn pt(x: f64, y: f64) -> ImagePoint {
        ImagePoint::new(x, y)
    }

    fn ct_frame() -> DecodedFrame {
        // 3x2, HU = raw - 1024
        DecodedFrame::grayscale(3, 2, PixelSamples::I16(vec![1024, 1034, 1044, 1054, 1064, 1074]))
            .unwrap()
            .with_rescale(1.0, -1024.0)
    }

    #[test]
    fn test_length_with_spacing() {
        let m = Measurement::length(pt(0.0, 0.0), pt(3.0, 4.0), None);
        assert_eq!((m.value, m.unit.as_str()), (5.0, "px"));

        let mm = Measurement::length(pt(0.0, 0.0), pt(3.0, 4.0), Some((0.5, 0.5)));
        assert_eq!((mm.value, mm.unit.as_str()), (2.5, "mm"));
    }

    #[test]
    fn test_angle() {
        let right = angle_degrees(pt(1.0, 0.0), pt(0.0, 0.0), pt(0.0, 1.0));
        assert!((right - 90.0).abs() < 1e-9);
        assert_eq!(angle_degrees(pt(0.0, 0.0), pt(0.0, 0.0), pt(1.0, 0.0)), 0.0);
    }

    #[test]
    fn test_area_and_ellipse() {
        let square = Measurement::area(vec![pt(0.0, 0.0), pt(4.0, 0.0), pt(4.0, 4.0), pt(0.0, 4.0)], None).unwrap();
        assert_eq!(square.value, 16.0);
        assert!(Measurement::area(vec![pt(0.0, 0.0), pt(1.0, 1.0)], None).is_err());

        let circle = ellipse_area(pt(0.0, 0.0), pt(2.0, 2.0), None);
        assert!((circle - std::f64::consts::PI).abs() < 1e-12);
    }

    #[test]
    fn test_roi_statistics() {
        let frame = ct_frame();
        let stats = roi_statistics(&frame, pt(0.0, 0.0), pt(3.0, 2.0)).unwrap();
        assert_eq!(stats.count, 6);
        assert_eq!((stats.min, stats.max), (0.0, 50.0));
        assert!((stats.mean - 25.0).abs() < 1e-9);
        assert!((stats.std_dev - 17.078251).abs() < 1e-5);

        // clipped to the frame
        let clipped = roi_statistics(&frame, pt(2.0, 1.0), pt(10.0, 10.0)).unwrap();
        assert_eq!(clipped.count, 1);
        assert_eq!(clipped.mean, 50.0);

        assert!(roi_statistics(&frame, pt(5.0, 5.0), pt(9.0, 9.0)).is_none());
    }

    #[test]
    fn test_probe() {
        let frame = ct_frame();
        let m = Measurement::probe(&frame, pt(1.5, 0.2), "HU").unwrap();
        assert_eq!(m.value, 10.0);
        assert!(Measurement::probe(&frame, pt(-1.0, 0.0), "HU").is_err());
    }

    #[test]
    fn test_validate_geometry() {
        let mut m = Measurement::length(pt(0.0, 0.0), pt(1.0, 0.0), None);
        assert!(m.validate().is_ok());
        m.points.pop();
        assert!(m.validate().is_err());
    }

    #[test]
    fn test_kind_serde_aliases() {
        let kind: MeasurementKind = serde_json::from_str("\"hu-roi\"").unwrap();
        assert_eq!(kind, MeasurementKind::RoiStatistics);
        assert_eq!(serde_json::to_string(&MeasurementKind::Probe).unwrap(), "\"probe\"");
    }
}
