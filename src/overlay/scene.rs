//! Screen-space draw list and hit-testing.

use super::{Color, ImagePoint, ImageToScreen, OverlayAnnotation, OverlayId, OverlayShape, ScreenPoint};
use crate::measurement::{Measurement, MeasurementKind};

/// Draw layers, bottom to top.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Layer {
    /// Semi-transparent heatmap fills.
    Heatmap,
    /// Segmentation polygons.
    Segmentation,
    /// Bounding boxes.
    BoundingBox,
    /// Point detections.
    PointDetection,
    /// User measurements, always above findings.
    Measurement,
}

/// Geometry after the image-to-screen transform.
#[derive(Debug, Clone, PartialEq)]
pub enum ScreenShape {
    /// Stroked rectangle.
    Rect {
        /// Minimum corner.
        min: ScreenPoint,
        /// Maximum corner.
        max: ScreenPoint,
    },
    /// Rectangle filled with a radial alpha gradient.
    Heatmap {
        /// Minimum corner.
        min: ScreenPoint,
        /// Maximum corner.
        max: ScreenPoint,
    },
    /// Closed polygon.
    Polygon(Vec<ScreenPoint>),
    /// Open polyline.
    Polyline(Vec<ScreenPoint>),
    /// Circle with a screen-space radius.
    Circle {
        /// Center.
        center: ScreenPoint,
        /// Radius in screen pixels.
        radius: f64,
    },
    /// Ellipse inscribed in a rectangle.
    Ellipse {
        /// Minimum corner.
        min: ScreenPoint,
        /// Maximum corner.
        max: ScreenPoint,
    },
}

impl ScreenShape {
    /// Whether `p` lies inside the shape, or within `tolerance` of a stroke.
    pub fn contains(&self, p: ScreenPoint, tolerance: f64) -> bool {
        match self {
            ScreenShape::Rect { min, max } | ScreenShape::Heatmap { min, max } => {
                p.x >= min.x - tolerance && p.x <= max.x + tolerance && p.y >= min.y - tolerance && p.y <= max.y + tolerance
            }
            ScreenShape::Polygon(points) => {
                polygon_contains(points, p) || polyline_distance(points, true, p) <= tolerance
            }
            ScreenShape::Polyline(points) => polyline_distance(points, false, p) <= tolerance,
            ScreenShape::Circle { center, radius } => center.distance_to(&p) <= radius + tolerance,
            ScreenShape::Ellipse { min, max } => {
                let (cx, cy) = ((min.x + max.x) / 2.0, (min.y + max.y) / 2.0);
                let rx = (max.x - min.x) / 2.0 + tolerance;
                let ry = (max.y - min.y) / 2.0 + tolerance;
                if rx <= 0.0 || ry <= 0.0 {
                    return false;
                }
                let (dx, dy) = ((p.x - cx) / rx, (p.y - cy) / ry);
                dx * dx + dy * dy <= 1.0
            }
        }
    }
}

/// Ray-casting point-in-polygon test.
pub(crate) fn polygon_contains(points: &[ScreenPoint], p: ScreenPoint) -> bool {
    if points.len() < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = points.len() - 1;
    for i in 0..points.len() {
        let (vi, vj) = (points[i], points[j]);
        if (vi.y > p.y) != (vj.y > p.y) && p.x < (vj.x - vi.x) * (p.y - vi.y) / (vj.y - vi.y) + vi.x {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Distance from `p` to a segment.
pub(crate) fn segment_distance(a: ScreenPoint, b: ScreenPoint, p: ScreenPoint) -> f64 {
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    let len2 = dx * dx + dy * dy;
    if len2 == 0.0 {
        return a.distance_to(&p);
    }
    let t = (((p.x - a.x) * dx + (p.y - a.y) * dy) / len2).clamp(0.0, 1.0);
    ScreenPoint::new(a.x + t * dx, a.y + t * dy).distance_to(&p)
}

fn polyline_distance(points: &[ScreenPoint], closed: bool, p: ScreenPoint) -> f64 {
    match points {
        [] => f64::INFINITY,
        [single] => single.distance_to(&p),
        _ => {
            let open = points.windows(2).map(|w| segment_distance(w[0], w[1], p));
            let closing = closed.then(|| segment_distance(points[points.len() - 1], points[0], p));
            open.chain(closing).fold(f64::INFINITY, f64::min)
        }
    }
}

/// Horizontal text anchoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextAlign {
    /// Text starts at the anchor.
    Start,
    /// Text is centered on the anchor.
    Middle,
}

/// Label drawn by the host next to a shape.
#[derive(Debug, Clone, PartialEq)]
pub struct TextCommand {
    /// Baseline anchor in screen space.
    pub anchor: ScreenPoint,
    /// Text.
    pub text: String,
    /// Text color.
    pub color: Color,
    /// Alignment relative to the anchor.
    pub align: TextAlign,
}

/// One drawable overlay.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneItem {
    /// Source of the item.
    pub id: OverlayId,
    /// Draw layer.
    pub layer: Layer,
    /// Screen geometry.
    pub shape: ScreenShape,
    /// Stroke color.
    pub stroke: Color,
    /// Fill color, if filled.
    pub fill: Option<Color>,
    /// Labels.
    pub labels: Vec<TextCommand>,
    /// Text shown on hover.
    pub tooltip: String,
}

/// Hover tooltip, drawn above everything.
#[derive(Debug, Clone, PartialEq)]
pub struct Tooltip {
    /// Item under the pointer.
    pub id: OverlayId,
    /// Text.
    pub text: String,
    /// Pointer position.
    pub anchor: ScreenPoint,
}

/// Composition parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayStyle {
    /// Screen radius of point detections.
    pub point_radius_px: f64,
    /// Hit-test tolerance around strokes.
    pub hit_tolerance_px: f64,
    /// Color of user measurements.
    pub measurement_color: Color,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            point_radius_px: 20.0,
            hit_tolerance_px: 6.0,
            measurement_color: Color::rgb(0xfa, 0xcc, 0x15),
        }
    }
}

/// Composited overlays of one viewport, in draw order.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayScene {
    items: Vec<SceneItem>,
    hit_tolerance: f64,
    tooltip: Option<Tooltip>,
}

impl OverlayScene {
    /// Items in draw order (bottom first).
    pub fn items(&self) -> &[SceneItem] {
        &self.items
    }

    /// Topmost item at a screen point.
    pub fn hit_test(&self, p: ScreenPoint) -> Option<&OverlayId> {
        self.items
            .iter()
            .rev()
            .find(|item| item.shape.contains(p, self.hit_tolerance))
            .map(|item| &item.id)
    }

    /// Tooltip for the topmost item at a screen point.
    pub fn tooltip_at(&self, p: ScreenPoint) -> Option<Tooltip> {
        self.items
            .iter()
            .rev()
            .find(|item| item.shape.contains(p, self.hit_tolerance))
            .map(|item| Tooltip {
                id: item.id.clone(),
                text: item.tooltip.clone(),
                anchor: p,
            })
    }

    /// Set the hovered point; the tooltip becomes the top layer.
    pub fn set_hover(&mut self, p: Option<ScreenPoint>) {
        self.tooltip = p.and_then(|p| self.tooltip_at(p));
    }

    /// Current hover tooltip.
    pub fn tooltip(&self) -> Option<&Tooltip> {
        self.tooltip.as_ref()
    }

    /// Every label in draw order.
    pub fn labels(&self) -> impl Iterator<Item = &TextCommand> {
        self.items.iter().flat_map(|i| i.labels.iter())
    }
}

/// Transform annotations and measurements to screen space and order them for drawing.
pub fn compose(
    annotations: &[OverlayAnnotation],
    measurements: &[Measurement],
    transform: &ImageToScreen,
    style: &OverlayStyle,
) -> OverlayScene {
    let mut items: Vec<SceneItem> = annotations
        .iter()
        .filter(|a| a.shape.validate().is_ok())
        .map(|a| annotation_item(a, transform, style))
        .collect();
    // stable: equal layers keep provider order
    items.sort_by_key(|i| i.layer);

    items.extend(measurements.iter().filter_map(|m| measurement_item(m, transform, style)));

    OverlayScene {
        items,
        hit_tolerance: style.hit_tolerance_px,
        tooltip: None,
    }
}

fn corners(a: ImagePoint, b: ImagePoint, t: &ImageToScreen) -> (ScreenPoint, ScreenPoint) {
    let (p, q) = (t.to_screen(a), t.to_screen(b));
    (
        ScreenPoint::new(p.x.min(q.x), p.y.min(q.y)),
        ScreenPoint::new(p.x.max(q.x), p.y.max(q.y)),
    )
}

fn label(anchor: ScreenPoint, text: impl Into<String>, color: Color, align: TextAlign) -> TextCommand {
    TextCommand {
        anchor,
        text: text.into(),
        color,
        align,
    }
}

fn annotation_item(a: &OverlayAnnotation, t: &ImageToScreen, style: &OverlayStyle) -> SceneItem {
    let id = OverlayId::Finding(a.id.clone());
    let tooltip = a.tooltip_text();

    let (layer, shape, fill, labels) = match &a.shape {
        OverlayShape::HeatmapRegion { top_left, bottom_right } => {
            let (min, max) = corners(*top_left, *bottom_right, t);
            let text = label(ScreenPoint::new(min.x, min.y - 5.0), &a.label, a.color, TextAlign::Start);
            (Layer::Heatmap, ScreenShape::Heatmap { min, max }, Some(a.color), vec![text])
        }
        OverlayShape::Polygon { points } => {
            let points: Vec<ScreenPoint> = points.iter().map(|p| t.to_screen(*p)).collect();
            let top = points
                .iter()
                .copied()
                .fold(ScreenPoint::new(f64::INFINITY, f64::INFINITY), |acc, p| {
                    if p.y < acc.y { p } else { acc }
                });
            let text = label(ScreenPoint::new(top.x, top.y - 5.0), &a.label, a.color, TextAlign::Middle);
            (
                Layer::Segmentation,
                ScreenShape::Polygon(points),
                Some(a.color.with_opacity(0.3)),
                vec![text],
            )
        }
        OverlayShape::BoundingBox { top_left, bottom_right } => {
            let (min, max) = corners(*top_left, *bottom_right, t);
            let text = label(ScreenPoint::new(min.x, min.y - 5.0), &tooltip, a.color, TextAlign::Start);
            (Layer::BoundingBox, ScreenShape::Rect { min, max }, None, vec![text])
        }
        OverlayShape::PointDetection { center } => {
            let c = t.to_screen(*center);
            let radius = style.point_radius_px;
            let mut labels = vec![label(
                ScreenPoint::new(c.x, c.y - radius - 8.0),
                &a.label,
                a.color,
                TextAlign::Middle,
            )];
            if let Some(p) = a.confidence_percent {
                labels.push(label(ScreenPoint::new(c.x, c.y + 4.0), format!("{:.0}", p), a.color, TextAlign::Middle));
            }
            (
                Layer::PointDetection,
                ScreenShape::Circle { center: c, radius },
                Some(a.color.with_opacity(0.2)),
                labels,
            )
        }
    };

    SceneItem {
        id,
        layer,
        shape,
        stroke: a.color,
        fill,
        labels,
        tooltip,
    }
}

fn measurement_item(m: &Measurement, t: &ImageToScreen, style: &OverlayStyle) -> Option<SceneItem> {
    if m.validate().is_err() {
        log::warn!("Skipping measurement {} with invalid geometry", m.id);
        return None;
    }
    let points: Vec<ScreenPoint> = m.points.iter().map(|p| t.to_screen(*p)).collect();

    let shape = match m.kind {
        MeasurementKind::Length | MeasurementKind::Angle => ScreenShape::Polyline(points.clone()),
        MeasurementKind::Area => ScreenShape::Polygon(points.clone()),
        MeasurementKind::Ellipse => {
            let (min, max) = corners(m.points[0], m.points[1], t);
            ScreenShape::Ellipse { min, max }
        }
        MeasurementKind::RoiStatistics => {
            let (min, max) = corners(m.points[0], m.points[1], t);
            ScreenShape::Rect { min, max }
        }
        MeasurementKind::Probe => ScreenShape::Circle {
            center: points[0],
            radius: 3.0,
        },
    };

    let anchor = points.last().copied().unwrap_or(ScreenPoint::new(0.0, 0.0));
    let text = m.display_text();
    let color = style.measurement_color;

    Some(SceneItem {
        id: OverlayId::Measurement(m.id.clone()),
        layer: Layer::Measurement,
        shape,
        stroke: color,
        fill: None,
        labels: vec![label(ScreenPoint::new(anchor.x + 6.0, anchor.y - 6.0), text.clone(), color, TextAlign::Start)],
        tooltip: format!("{}: {}", m.kind.name(), text),
    })
}
