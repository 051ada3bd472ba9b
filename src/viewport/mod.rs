//! One rendering surface and its load state machine.
//!
//! `Idle -> Loading -> Displaying`, `Loading -> Error` on failure, and any
//! state back to `Loading` whenever the (series, slice) target changes.
//! Decodes run on the [`DecodeWorker`](crate::decoder::DecodeWorker); the
//! viewport only hands out requests and accepts the completion whose token
//! matches its current target.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use image::RgbaImage;
use serde::Serialize;

use crate::catalog::SeriesDescriptor;
use crate::decoder::{CancelToken, DecodeOutcome, DecodeRequest};
use crate::error::{Result, ViewerError};
use crate::events::{EventHandler, NullEvents, ViewportEvent};
use crate::mapper::{map_to_display, WindowLevel};
use crate::measurement::Measurement;
use crate::overlay::{
    compose, rasterize, ImageToScreen, OverlayAnnotation, OverlayId, OverlayScene, OverlayStyle, ScreenPoint,
};
use crate::session::ViewportState;
use crate::DecodedFrame;

/// Load state of a viewport.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ViewportStatus {
    /// Nothing assigned.
    Idle,
    /// Waiting for a decode.
    Loading,
    /// Showing the decoded target.
    Displaying,
    /// The target failed to load.
    Error {
        /// User-visible message.
        message: String,
        /// Series of the failed target.
        series_id: String,
        /// Slice of the failed target.
        slice_index: usize,
    },
}

impl ViewportStatus {
    /// Whether a decode is outstanding.
    pub fn is_loading(&self) -> bool {
        matches!(self, ViewportStatus::Loading)
    }
}

impl std::fmt::Display for ViewportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViewportStatus::Idle => write!(f, "Idle"),
            ViewportStatus::Loading => write!(f, "Loading"),
            ViewportStatus::Displaying => write!(f, "Displaying"),
            ViewportStatus::Error {
                message,
                series_id,
                slice_index,
            } => write!(f, "Error: {} ({} slice {})", message, series_id, slice_index),
        }
    }
}

/// Monotonic request tokens shared by every viewport of a grid.
#[derive(Debug, Clone, Default)]
pub struct TokenSource(Arc<AtomicU64>);

impl TokenSource {
    /// Create a source starting at 1.
    pub fn new() -> Self {
        Self::default()
    }

    /// Next token.
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Output of [`Viewport::render`].
#[derive(Debug, Clone)]
pub struct RenderedView {
    /// Screen-sized RGBA pixels with overlays painted.
    pub image: RgbaImage,
    /// Composited overlays, for labels and hit-testing.
    pub scene: OverlayScene,
    /// Transform used for this render.
    pub transform: ImageToScreen,
}

struct Pending {
    token: u64,
    cancel: CancelToken,
}

/// One grid cell's rendering surface.
pub struct Viewport {
    index: usize,
    tokens: TokenSource,
    events: Arc<dyn EventHandler>,
    status: ViewportStatus,
    status_token: u64,
    target: Option<(String, usize)>,
    pending: Option<Pending>,
    frame: Option<DecodedFrame>,
    screen: (u32, u32),
    window: WindowLevel,
    invert: bool,
    zoom: f64,
    pan: (f64, f64),
}

impl Viewport {
    /// Create an idle viewport.
    pub fn new(index: usize, tokens: TokenSource) -> Self {
        Self {
            index,
            tokens,
            events: Arc::new(NullEvents),
            status: ViewportStatus::Idle,
            status_token: 0,
            target: None,
            pending: None,
            frame: None,
            screen: (512, 512),
            window: WindowLevel::default(),
            invert: false,
            zoom: 1.0,
            pan: (0.0, 0.0),
        }
    }

    /// Deliver state transitions to `events`.
    pub fn with_events(mut self, events: Arc<dyn EventHandler>) -> Self {
        self.events = events;
        self
    }

    pub(crate) fn set_events(&mut self, events: Arc<dyn EventHandler>) {
        self.events = events;
    }

    /// Grid cell index.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Current load state.
    pub fn status(&self) -> &ViewportStatus {
        &self.status
    }

    /// Current (series, slice) target.
    pub fn target(&self) -> Option<(&str, usize)> {
        self.target.as_ref().map(|(s, i)| (s.as_str(), *i))
    }

    /// Token of the outstanding request.
    pub fn pending_token(&self) -> Option<u64> {
        self.pending.as_ref().map(|p| p.token)
    }

    /// Frame on display.
    pub fn frame(&self) -> Option<&DecodedFrame> {
        self.frame.as_ref()
    }

    /// Rendered size in screen pixels.
    pub fn screen_size(&self) -> (u32, u32) {
        self.screen
    }

    /// Window in use.
    pub fn window(&self) -> WindowLevel {
        self.window
    }

    fn transition(&mut self, status: ViewportStatus, token: u64) {
        log::debug!("Viewport {}: {} -> {}", self.index, self.status, status);
        self.status = status.clone();
        self.status_token = token;
        self.events.on_viewport(&ViewportEvent::new(self.index, token, status));
    }

    /// Point the viewport at a slice and produce the decode request for it.
    ///
    /// The index is not clamped: anything outside `0..frame_count` fails with
    /// `IndexOutOfRange` and leaves the viewport unchanged. The previous
    /// request, if still running, is canceled.
    pub fn set_target(&mut self, series: &SeriesDescriptor, slice_index: i64) -> Result<DecodeRequest> {
        let slice = series.check_index(slice_index)?;
        let address = series
            .frame(slice)
            .cloned()
            .ok_or_else(|| ViewerError::out_of_range(slice_index, series.frame_count()))?;

        if let Some(previous) = self.pending.take() {
            previous.cancel.cancel();
        }
        let token = self.tokens.next();
        let cancel = CancelToken::new();
        self.pending = Some(Pending {
            token,
            cancel: cancel.clone(),
        });
        self.target = Some((series.series_id().to_string(), slice));
        self.frame = None;
        self.transition(ViewportStatus::Loading, token);

        Ok(DecodeRequest {
            token,
            viewport: self.index,
            series_id: series.series_id().to_string(),
            slice_index: slice,
            address,
            cancel,
        })
    }

    /// Drop the target and return to `Idle`.
    pub fn clear(&mut self) {
        if let Some(previous) = self.pending.take() {
            previous.cancel.cancel();
        }
        self.target = None;
        self.frame = None;
        if self.status != ViewportStatus::Idle {
            self.transition(ViewportStatus::Idle, 0);
        }
    }

    /// Accept a decode completion. Returns whether it was applied.
    ///
    /// Completions for anything but the outstanding request are stale and
    /// dropped, as are cancellations.
    pub fn apply_outcome(&mut self, outcome: DecodeOutcome) -> bool {
        let current = self.pending.as_ref().map(|p| p.token);
        if current != Some(outcome.token) {
            log::trace!(
                "Viewport {}: discarding stale decode #{} ({} slice {})",
                self.index,
                outcome.token,
                outcome.series_id,
                outcome.slice_index
            );
            return false;
        }

        match outcome.result {
            Err(e) if e.is_canceled() => false,
            Ok(frame) => {
                self.pending = None;
                self.frame = Some(frame);
                self.transition(ViewportStatus::Displaying, outcome.token);
                true
            }
            Err(e) => {
                self.pending = None;
                self.frame = None;
                log::warn!(
                    "Viewport {}: failed to load {} slice {}: {}",
                    self.index,
                    outcome.series_id,
                    outcome.slice_index,
                    e
                );
                self.transition(
                    ViewportStatus::Error {
                        message: e.to_string(),
                        series_id: outcome.series_id,
                        slice_index: outcome.slice_index,
                    },
                    outcome.token,
                );
                true
            }
        }
    }

    /// Copy window, inversion, zoom and pan from session state.
    pub fn set_display(&mut self, state: &ViewportState) {
        self.window = state.window;
        self.invert = state.invert;
        self.zoom = state.zoom;
        self.pan = state.pan;
    }

    /// Change the rendered size. Never triggers a decode.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.screen = (width.max(1), height.max(1));
    }

    /// Current image-to-screen transform, once a frame is on display.
    pub fn image_to_screen(&self) -> Option<ImageToScreen> {
        let frame = self.frame.as_ref()?;
        let (sw, sh) = self.screen;
        Some(ImageToScreen::aspect_fit(frame.width, frame.height, sw, sh).zoomed(self.zoom, self.pan, sw, sh))
    }

    /// Overlays for the displayed slice at the current transform.
    pub fn scene(
        &self,
        annotations: &[OverlayAnnotation],
        measurements: &[Measurement],
        style: &OverlayStyle,
    ) -> Option<OverlayScene> {
        let transform = self.image_to_screen()?;
        let (series_id, slice) = self.target()?;
        let annotations: Vec<OverlayAnnotation> =
            annotations.iter().filter(|a| a.visible_on(slice)).cloned().collect();
        let measurements: Vec<Measurement> = measurements
            .iter()
            .filter(|m| m.visible_on(series_id, slice))
            .cloned()
            .collect();
        Some(compose(&annotations, &measurements, &transform, style))
    }

    /// Topmost overlay under a screen point.
    pub fn hit_test(
        &self,
        point: ScreenPoint,
        annotations: &[OverlayAnnotation],
        measurements: &[Measurement],
        style: &OverlayStyle,
    ) -> Option<OverlayId> {
        self.scene(annotations, measurements, style)?
            .hit_test(point)
            .cloned()
    }

    /// Map the frame to display pixels and paint overlays over it.
    ///
    /// A mapping failure moves the viewport to `Error`.
    pub fn render(
        &mut self,
        annotations: &[OverlayAnnotation],
        measurements: &[Measurement],
        style: &OverlayStyle,
    ) -> Result<RenderedView> {
        let frame = self.frame.as_ref().ok_or_else(|| {
            ViewerError::InvalidAction(format!("Viewport {} has no frame to display ({})", self.index, self.status))
        })?;

        let surface = match map_to_display(frame, self.window, self.invert) {
            Ok(surface) => surface,
            Err(e) => {
                if let Some((series_id, slice_index)) = self.target.clone() {
                    self.frame = None;
                    let token = self.status_token;
                    self.transition(
                        ViewportStatus::Error {
                            message: e.to_string(),
                            series_id,
                            slice_index,
                        },
                        token,
                    );
                }
                return Err(e);
            }
        };

        let transform = self
            .image_to_screen()
            .ok_or_else(|| ViewerError::Internal("transform without frame".into()))?;
        let scene = self
            .scene(annotations, measurements, style)
            .ok_or_else(|| ViewerError::Internal("scene without target".into()))?;
        let (width, height) = self.screen;
        let image = rasterize(&surface, &scene, &transform, width, height);
        Ok(RenderedView { image, scene, transform })
    }
}
