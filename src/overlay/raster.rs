//! Paint a composited scene into an RGBA buffer.
//!
//! Labels are not rasterized; hosts draw [`TextCommand`](super::TextCommand)s
//! with their own font stack.

use image::{Rgba, RgbaImage};

use super::scene::{polygon_contains, segment_distance};
use super::{Color, ImageToScreen, OverlayScene, ScreenPoint, ScreenShape};
use crate::mapper::PixelSurface;

const STROKE_HALF_WIDTH: f64 = 1.0;
const HEATMAP_CENTER_ALPHA: f64 = 0.6;
const HEATMAP_EDGE_ALPHA: f64 = 0.1;

/// Render the image and every overlay at screen resolution.
pub fn rasterize(
    surface: &PixelSurface,
    scene: &OverlayScene,
    transform: &ImageToScreen,
    screen_width: u32,
    screen_height: u32,
) -> RgbaImage {
    let mut canvas = RgbaImage::from_pixel(screen_width, screen_height, Rgba([0, 0, 0, 255]));

    // nearest-neighbour sampling through the inverse transform
    for (x, y, px) in canvas.enumerate_pixels_mut() {
        let p = transform.to_image(ScreenPoint::new(f64::from(x) + 0.5, f64::from(y) + 0.5));
        if p.x >= 0.0 && p.y >= 0.0 {
            if let Some(rgba) = surface.pixel(p.x as u32, p.y as u32) {
                *px = Rgba(rgba);
            }
        }
    }

    for item in scene.items() {
        match &item.shape {
            ScreenShape::Heatmap { min, max } => {
                let color = item.fill.unwrap_or(item.stroke);
                paint_heatmap(&mut canvas, *min, *max, color);
            }
            shape => {
                if let Some(fill) = item.fill {
                    fill_shape(&mut canvas, shape, fill);
                }
                stroke_shape(&mut canvas, shape, item.stroke);
            }
        }
    }

    canvas
}

fn blend(canvas: &mut RgbaImage, x: i64, y: i64, color: Color, alpha: f64) {
    if x < 0 || y < 0 || x >= i64::from(canvas.width()) || y >= i64::from(canvas.height()) {
        return;
    }
    let a = (f64::from(color.a) / 255.0 * alpha).clamp(0.0, 1.0);
    let px = canvas.get_pixel_mut(x as u32, y as u32);
    for (dst, src) in px.0.iter_mut().zip([color.r, color.g, color.b]) {
        *dst = (f64::from(*dst) * (1.0 - a) + f64::from(src) * a).round() as u8;
    }
}

/// Pixel rows/columns touched by a screen-space box.
fn pixel_range(min: ScreenPoint, max: ScreenPoint, canvas: &RgbaImage) -> (i64, i64, i64, i64) {
    let x0 = min.x.floor().max(0.0) as i64;
    let y0 = min.y.floor().max(0.0) as i64;
    let x1 = (max.x.ceil() as i64).min(i64::from(canvas.width()) - 1);
    let y1 = (max.y.ceil() as i64).min(i64::from(canvas.height()) - 1);
    (x0, y0, x1, y1)
}

fn bounds(shape: &ScreenShape) -> (ScreenPoint, ScreenPoint) {
    let pad = STROKE_HALF_WIDTH + 1.0;
    let from_points = |points: &[ScreenPoint]| {
        points.iter().fold(
            (
                ScreenPoint::new(f64::INFINITY, f64::INFINITY),
                ScreenPoint::new(f64::NEG_INFINITY, f64::NEG_INFINITY),
            ),
            |(lo, hi), p| {
                (
                    ScreenPoint::new(lo.x.min(p.x - pad), lo.y.min(p.y - pad)),
                    ScreenPoint::new(hi.x.max(p.x + pad), hi.y.max(p.y + pad)),
                )
            },
        )
    };
    match shape {
        ScreenShape::Rect { min, max } | ScreenShape::Heatmap { min, max } | ScreenShape::Ellipse { min, max } => (
            ScreenPoint::new(min.x - pad, min.y - pad),
            ScreenPoint::new(max.x + pad, max.y + pad),
        ),
        ScreenShape::Polygon(points) | ScreenShape::Polyline(points) => from_points(points),
        ScreenShape::Circle { center, radius } => (
            ScreenPoint::new(center.x - radius - pad, center.y - radius - pad),
            ScreenPoint::new(center.x + radius + pad, center.y + radius + pad),
        ),
    }
}

fn for_each_pixel(canvas: &mut RgbaImage, shape: &ScreenShape, mut f: impl FnMut(&mut RgbaImage, i64, i64, ScreenPoint)) {
    let (min, max) = bounds(shape);
    if !(min.x.is_finite() && max.x.is_finite()) {
        return;
    }
    let (x0, y0, x1, y1) = pixel_range(min, max, canvas);
    for y in y0..=y1 {
        for x in x0..=x1 {
            let center = ScreenPoint::new(x as f64 + 0.5, y as f64 + 0.5);
            f(canvas, x, y, center);
        }
    }
}

fn ellipse_value(min: ScreenPoint, max: ScreenPoint, p: ScreenPoint) -> Option<f64> {
    let (rx, ry) = ((max.x - min.x) / 2.0, (max.y - min.y) / 2.0);
    if rx <= 0.0 || ry <= 0.0 {
        return None;
    }
    let (dx, dy) = ((p.x - (min.x + rx)) / rx, (p.y - (min.y + ry)) / ry);
    Some((dx * dx + dy * dy).sqrt())
}

fn fill_shape(canvas: &mut RgbaImage, shape: &ScreenShape, color: Color) {
    for_each_pixel(canvas, shape, |canvas, x, y, p| {
        let inside = match shape {
            ScreenShape::Rect { min, max } | ScreenShape::Heatmap { min, max } => {
                p.x >= min.x && p.x <= max.x && p.y >= min.y && p.y <= max.y
            }
            ScreenShape::Polygon(points) => polygon_contains(points, p),
            ScreenShape::Polyline(_) => false,
            ScreenShape::Circle { center, radius } => center.distance_to(&p) <= *radius,
            ScreenShape::Ellipse { min, max } => ellipse_value(*min, *max, p).is_some_and(|v| v <= 1.0),
        };
        if inside {
            blend(canvas, x, y, color, 1.0);
        }
    });
}

fn stroke_shape(canvas: &mut RgbaImage, shape: &ScreenShape, color: Color) {
    let near_segments = |points: &[ScreenPoint], closed: bool, p: ScreenPoint| {
        let n = points.len();
        let segments = if closed { n } else { n.saturating_sub(1) };
        (0..segments).any(|i| segment_distance(points[i], points[(i + 1) % n], p) <= STROKE_HALF_WIDTH)
    };

    for_each_pixel(canvas, shape, |canvas, x, y, p| {
        let on_stroke = match shape {
            ScreenShape::Rect { min, max } | ScreenShape::Heatmap { min, max } => {
                let corners = [*min, ScreenPoint::new(max.x, min.y), *max, ScreenPoint::new(min.x, max.y)];
                near_segments(&corners, true, p)
            }
            ScreenShape::Polygon(points) => near_segments(points, true, p),
            ScreenShape::Polyline(points) => near_segments(points, false, p),
            ScreenShape::Circle { center, radius } => (center.distance_to(&p) - radius).abs() <= STROKE_HALF_WIDTH,
            ScreenShape::Ellipse { min, max } => {
                let r = ((max.x - min.x).min(max.y - min.y) / 2.0).max(1.0);
                ellipse_value(*min, *max, p).is_some_and(|v| (v - 1.0).abs() * r <= STROKE_HALF_WIDTH)
            }
        };
        if on_stroke {
            blend(canvas, x, y, color, 1.0);
        }
    });
}

fn paint_heatmap(canvas: &mut RgbaImage, min: ScreenPoint, max: ScreenPoint, color: Color) {
    let shape = ScreenShape::Heatmap { min, max };
    for_each_pixel(canvas, &shape, |canvas, x, y, p| {
        if p.x < min.x || p.x > max.x || p.y < min.y || p.y > max.y {
            return;
        }
        // radial falloff from the center to the inscribed ellipse
        let t = ellipse_value(min, max, p).unwrap_or(1.0).min(1.0);
        let alpha = HEATMAP_CENTER_ALPHA + (HEATMAP_EDGE_ALPHA - HEATMAP_CENTER_ALPHA) * t;
        blend(canvas, x, y, color, alpha);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::SurfaceFormat;
    use crate::overlay::{compose, ImagePoint, OverlayAnnotation, OverlayShape, OverlayStyle};

    fn gray_surface(width: u32, height: u32, value: u8) -> PixelSurface {
        PixelSurface {
            width,
            height,
            format: SurfaceFormat::Gray8,
            data: vec![value; (width * height) as usize],
        }
    }

    #[test]
    fn test_image_scaled_to_screen() {
        let mut surface = gray_surface(2, 2, 0);
        surface.data[3] = 200; // bottom-right
        let scene = compose(&[], &[], &ImageToScreen::uniform(2.0), &OverlayStyle::default());
        let out = rasterize(&surface, &scene, &ImageToScreen::uniform(2.0), 4, 4);

        assert_eq!(out.get_pixel(0, 0).0, [0, 0, 0, 255]);
        assert_eq!(out.get_pixel(3, 3).0, [200, 200, 200, 255]);
        assert_eq!(out.get_pixel(2, 2).0, [200, 200, 200, 255]);
    }

    #[test]
    fn test_bbox_stroke_painted_at_scaled_position() {
        let surface = gray_surface(20, 20, 0);
        let transform = ImageToScreen::uniform(2.0);
        let red = Color::rgb(255, 0, 0);
        let bbox = OverlayAnnotation::new(
            "b",
            "Tear",
            red,
            OverlayShape::BoundingBox {
                top_left: ImagePoint::new(5.0, 5.0),
                bottom_right: ImagePoint::new(15.0, 15.0),
            },
        );
        let scene = compose(&[bbox], &[], &transform, &OverlayStyle::default());
        let out = rasterize(&surface, &scene, &transform, 40, 40);

        // stroke at screen x=10, y=20; interior untouched
        assert_eq!(out.get_pixel(10, 20).0, [255, 0, 0, 255]);
        assert_eq!(out.get_pixel(20, 20).0, [0, 0, 0, 255]);
    }

    #[test]
    fn test_heatmap_is_translucent() {
        let surface = gray_surface(10, 10, 0);
        let transform = ImageToScreen::uniform(1.0);
        let heat = OverlayAnnotation::new(
            "h",
            "Heat",
            Color::rgb(255, 0, 0),
            OverlayShape::HeatmapRegion {
                top_left: ImagePoint::new(0.0, 0.0),
                bottom_right: ImagePoint::new(10.0, 10.0),
            },
        );
        let scene = compose(&[heat], &[], &transform, &OverlayStyle::default());
        let out = rasterize(&surface, &scene, &transform, 10, 10);

        let center = out.get_pixel(5, 5).0[0];
        let corner = out.get_pixel(0, 0).0[0];
        assert!(center > corner);
        assert!(center < 255);
    }
}
