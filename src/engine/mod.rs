//! Engine facade wiring catalog, findings, session and grid together.
//!
//! The engine is driven from one thread: actions go in through
//! [`ViewerEngine::dispatch`], decode completions are applied by
//! [`ViewerEngine::pump`], and rendering happens on demand.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::catalog::{StudyCatalog, StudyReference};
use crate::config::{Modality, ViewerConfig};
use crate::decoder::{CacheSnapshot, DecodeWorker, FrameDecoder, FrameFetcher, FsFetcher};
use crate::error::{Result, ViewerError};
use crate::events::EventHandler;
use crate::findings::FindingsProvider;
use crate::grid::GridCoordinator;
use crate::measurement::{Measurement, MeasurementId, MeasurementKind};
use crate::overlay::{ImagePoint, OverlayAnnotation, OverlayId, OverlayStyle, ScreenPoint, Tooltip};
use crate::session::{Action, SessionChange, SessionState, Tool};
use crate::viewport::{RenderedView, Viewport};

/// The viewport engine.
pub struct ViewerEngine {
    config: ViewerConfig,
    catalog: Arc<dyn StudyCatalog>,
    findings: Arc<dyn FindingsProvider>,
    session: SessionState,
    grid: GridCoordinator,
    style: OverlayStyle,
    /// Findings of the open study keyed by series id.
    study_findings: HashMap<String, Vec<OverlayAnnotation>>,
}

impl ViewerEngine {
    /// Create an engine reading frames from the file system.
    pub fn new<C, F>(config: ViewerConfig, catalog: C, findings: F) -> Result<Self>
    where
        C: StudyCatalog + 'static,
        F: FindingsProvider + 'static,
    {
        Self::with_fetcher(config, Arc::new(catalog), Arc::new(findings), Arc::new(FsFetcher::new()))
    }

    /// Create an engine with an explicit byte fetcher.
    pub fn with_fetcher(
        config: ViewerConfig,
        catalog: Arc<dyn StudyCatalog>,
        findings: Arc<dyn FindingsProvider>,
        fetcher: Arc<dyn FrameFetcher>,
    ) -> Result<Self> {
        config.validate()?;
        let decoder = Arc::new(FrameDecoder::new(fetcher, config.cache_capacity));
        let worker = DecodeWorker::new(decoder, config.decode_threads)?;
        let mut grid = GridCoordinator::new(worker);
        let session = SessionState::new(&config);
        grid.sync(&session)?;

        let style = OverlayStyle {
            point_radius_px: config.point_detection_radius_px,
            hit_tolerance_px: config.hit_tolerance_px,
            ..Default::default()
        };

        log::info!(
            "Viewer engine ready: layout {}, cache {} frames, {} decode threads",
            config.initial_layout,
            config.cache_capacity,
            config.decode_threads
        );

        Ok(Self {
            config,
            catalog,
            findings,
            session,
            grid,
            style,
            study_findings: HashMap::new(),
        })
    }

    /// Deliver viewport and session events to `events`.
    pub fn with_events<E: EventHandler + 'static>(mut self, events: E) -> Self {
        self.grid = self.grid.with_events(Arc::new(events));
        self
    }

    /// Configuration in use.
    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    /// Canonical session state.
    pub fn session(&self) -> &SessionState {
        &self.session
    }

    /// The grid coordinator.
    pub fn grid(&self) -> &GridCoordinator {
        &self.grid
    }

    /// One viewport.
    pub fn viewport(&self, index: usize) -> Result<&Viewport> {
        self.grid.viewport(index)
    }

    /// Decode cache counters.
    pub fn cache_stats(&self) -> CacheSnapshot {
        self.grid.worker().decoder().cache().stats()
    }

    /// Open a study from the catalog and load its findings.
    pub fn open_study(&mut self, study_id: &str) -> Result<Vec<SessionChange>> {
        let study = self.catalog.open_study(study_id)?;
        log::info!(
            "Opening study {} ({}, {} series)",
            study.study_id(),
            study.modality(),
            study.series().len()
        );
        self.dispatch(Action::OpenStudy(study))
    }

    /// Apply a control-surface action.
    pub fn dispatch(&mut self, action: Action) -> Result<Vec<SessionChange>> {
        let findings = match &action {
            Action::OpenStudy(study) => Some(self.load_findings(study)?),
            _ => None,
        };
        let changes = self.grid.dispatch(&mut self.session, action)?;

        if let Some(findings) = findings {
            self.study_findings = findings;
        } else if self.session.study().is_none() {
            self.study_findings.clear();
        }
        Ok(changes)
    }

    fn load_findings(&self, study: &StudyReference) -> Result<HashMap<String, Vec<OverlayAnnotation>>> {
        let mut by_series = HashMap::new();
        for series in study.series() {
            let list = self
                .findings
                .findings_for(study.study_id(), Some(series.series_id()))?;
            log::debug!("{} findings for series {}", list.len(), series.series_id());
            by_series.insert(series.series_id().to_string(), list);
        }
        Ok(by_series)
    }

    /// Apply decode completions that have arrived.
    pub fn pump(&mut self) -> usize {
        self.grid.pump()
    }

    /// Wait until every viewport settles. Returns false on timeout.
    pub fn wait_idle(&mut self, timeout: Duration) -> bool {
        self.grid.wait_idle(timeout)
    }

    /// Resize the whole grid surface.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.grid.resize(width, height);
    }

    /// Resize one viewport.
    pub fn resize_viewport(&mut self, index: usize, width: u32, height: u32) -> Result<()> {
        self.grid.resize_viewport(index, width, height)
    }

    /// AI findings drawn in a viewport, empty while overlays are hidden.
    pub fn findings_for_viewport(&self, index: usize) -> &[OverlayAnnotation] {
        if !self.session.show_ai_overlay() {
            return &[];
        }
        self.session
            .viewport(index)
            .and_then(|cell| cell.series_id.as_ref())
            .and_then(|series| self.study_findings.get(series))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Render a viewport with its overlays.
    pub fn render_viewport(&mut self, index: usize) -> Result<RenderedView> {
        let annotations = self.findings_for_viewport(index).to_vec();
        let style = self.style;
        self.grid
            .viewport_mut(index)?
            .render(&annotations, self.session.measurements(), &style)
    }

    /// Topmost overlay under a screen point of a viewport.
    pub fn hit_test(&self, index: usize, point: ScreenPoint) -> Result<Option<OverlayId>> {
        let viewport = self.grid.viewport(index)?;
        Ok(viewport.hit_test(
            point,
            self.findings_for_viewport(index),
            self.session.measurements(),
            &self.style,
        ))
    }

    /// Hover tooltip at a screen point of a viewport.
    pub fn tooltip_at(&self, index: usize, point: ScreenPoint) -> Result<Option<Tooltip>> {
        let viewport = self.grid.viewport(index)?;
        Ok(viewport
            .scene(self.findings_for_viewport(index), self.session.measurements(), &self.style)
            .and_then(|scene| scene.tooltip_at(point)))
    }

    /// Create a measurement from screen points clicked on the active viewport.
    ///
    /// Needs the measure tool and a displayed frame.
    pub fn measure(&mut self, kind: MeasurementKind, points: &[ScreenPoint]) -> Result<MeasurementId> {
        if self.session.active_tool() != Tool::Measure {
            return Err(ViewerError::InvalidAction("Measure tool is not active".into()));
        }
        if let Some(required) = kind.required_points() {
            if points.len() != required {
                return Err(ViewerError::InvalidAction(format!(
                    "{} needs {} points, got {}",
                    kind.name(),
                    required,
                    points.len()
                )));
            }
        }

        let active = self.session.active_viewport();
        let viewport = self.grid.viewport(active)?;
        let (frame, transform) = match (viewport.frame(), viewport.image_to_screen()) {
            (Some(frame), Some(transform)) => (frame, transform),
            _ => {
                return Err(ViewerError::InvalidAction(format!(
                    "Viewport {} has no frame to measure",
                    active
                )))
            }
        };
        let image: Vec<ImagePoint> = points.iter().map(|p| transform.to_image(*p)).collect();
        let spacing = frame.pixel_spacing;
        let unit = match self.session.study().map(|s| s.modality()) {
            Some(Modality::Ct) => "HU",
            _ => "",
        };

        let measurement = match kind {
            MeasurementKind::Length => Measurement::length(image[0], image[1], spacing),
            MeasurementKind::Angle => Measurement::angle(image[0], image[1], image[2]),
            MeasurementKind::Area => Measurement::area(image, spacing)?,
            MeasurementKind::Ellipse => Measurement::ellipse(image[0], image[1], spacing),
            MeasurementKind::Probe => Measurement::probe(frame, image[0], unit)?,
            MeasurementKind::RoiStatistics => Measurement::roi(frame, image[0], image[1], unit)?,
        };

        self.dispatch(Action::AddMeasurement(measurement))?;
        self.session
            .measurements()
            .last()
            .map(|m| m.id.clone())
            .ok_or_else(|| ViewerError::Internal("measurement was not stored".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{FrameAddress, ManifestCatalog, Orientation, SeriesDescriptor};
    use crate::decoder::test_support::gray_png;
    use crate::decoder::MemoryFetcher;
    use crate::events::{ChannelEvents, EngineEvent};
    use crate::findings::StaticFindings;
    use crate::grid::GridLayout;
    use crate::overlay::{Color, OverlayShape};
    use crate::viewport::ViewportStatus;

    const WAIT: Duration = Duration::from_secs(5);

    fn engine(findings: StaticFindings) -> ViewerEngine {
        let fetcher = MemoryFetcher::new();
        let mut series = Vec::new();
        for id in ["t2", "stir"] {
            let frames: Vec<FrameAddress> = (0..5).map(|i| FrameAddress::new(format!("{}/{}", id, i))).collect();
            for frame in &frames {
                fetcher.insert(frame.clone(), gray_png(50, 50, 0));
            }
            series.push(SeriesDescriptor::new(id, id.to_uppercase(), Orientation::Sagittal, frames).unwrap());
        }
        let study = StudyReference::new("knee", Modality::Mri, series).unwrap();
        let catalog = ManifestCatalog::from_studies(vec![study]).unwrap();

        let config = ViewerConfig {
            decode_threads: 2,
            ..Default::default()
        };
        ViewerEngine::with_fetcher(config, Arc::new(catalog), Arc::new(findings), Arc::new(fetcher)).unwrap()
    }

    fn tear_box() -> OverlayAnnotation {
        OverlayAnnotation::new(
            "tear",
            "Meniscal tear",
            Color::rgb(0xef, 0x44, 0x44),
            OverlayShape::BoundingBox {
                top_left: ImagePoint::new(10.0, 10.0),
                bottom_right: ImagePoint::new(40.0, 40.0),
            },
        )
        .with_confidence(87.0)
    }

    #[test]
    fn test_open_and_render() {
        let mut engine = engine(StaticFindings::empty());
        engine.open_study("knee").unwrap();
        assert!(engine.wait_idle(WAIT));
        engine.resize_viewport(0, 100, 100).unwrap();

        let view = engine.render_viewport(0).unwrap();
        assert_eq!(view.image.dimensions(), (100, 100));
        assert_eq!(view.transform.scale, 2.0);
        assert_eq!(engine.viewport(0).unwrap().status(), &ViewportStatus::Displaying);
    }

    #[test]
    fn test_unknown_study() {
        let mut engine = engine(StaticFindings::empty());
        assert!(matches!(engine.open_study("nope"), Err(ViewerError::NotFound(_))));
        assert!(engine.session().study().is_none());
    }

    #[test]
    fn test_overlay_visibility_toggle() {
        let mut findings = StaticFindings::empty();
        findings.add_series_finding("knee", "t2", tear_box());
        let mut engine = engine(findings);
        engine.open_study("knee").unwrap();
        assert!(engine.wait_idle(WAIT));
        engine.resize_viewport(0, 100, 100).unwrap();

        let inside = ScreenPoint::new(50.0, 50.0);
        assert_eq!(engine.hit_test(0, inside).unwrap(), None);

        engine.dispatch(Action::ToggleOverlay).unwrap();
        assert_eq!(engine.hit_test(0, inside).unwrap(), Some(OverlayId::Finding("tear".into())));
        let tooltip = engine.tooltip_at(0, inside).unwrap().unwrap();
        assert_eq!(tooltip.text, "Meniscal tear (87%)");

        // findings belong to t2 only
        engine
            .dispatch(Action::AssignSeries { viewport: 0, series_id: "stir".into() })
            .unwrap();
        assert!(engine.wait_idle(WAIT));
        assert_eq!(engine.hit_test(0, inside).unwrap(), None);
    }

    #[test]
    fn test_measurement_wins_hit_test() {
        let mut findings = StaticFindings::empty();
        findings.add_series_finding("knee", "t2", tear_box());
        let mut engine = engine(findings);
        engine.open_study("knee").unwrap();
        assert!(engine.wait_idle(WAIT));
        engine.resize_viewport(0, 100, 100).unwrap();
        engine.dispatch(Action::ToggleOverlay).unwrap();
        engine.dispatch(Action::SetActiveTool(Tool::Measure)).unwrap();

        let id = engine
            .measure(
                MeasurementKind::Length,
                &[ScreenPoint::new(30.0, 50.0), ScreenPoint::new(70.0, 50.0)],
            )
            .unwrap();
        let hit = engine.hit_test(0, ScreenPoint::new(50.0, 50.0)).unwrap();
        assert_eq!(hit, Some(OverlayId::Measurement(id.clone())));

        let m = engine.session().measurement(&id).unwrap();
        assert_eq!(m.unit, "px");
        assert!((m.value - 20.0).abs() < 1e-9);
        assert_eq!(m.slice_index, Some(0));
    }

    #[test]
    fn test_measure_requires_tool() {
        let mut engine = engine(StaticFindings::empty());
        engine.open_study("knee").unwrap();
        assert!(engine.wait_idle(WAIT));
        let err = engine.measure(MeasurementKind::Probe, &[ScreenPoint::new(1.0, 1.0)]);
        assert!(matches!(err, Err(ViewerError::InvalidAction(_))));
    }

    #[test]
    fn test_slice_navigation_hits_cache() {
        let mut engine = engine(StaticFindings::empty());
        engine.open_study("knee").unwrap();
        assert!(engine.wait_idle(WAIT));
        engine.dispatch(Action::SetSlice(1)).unwrap();
        assert!(engine.wait_idle(WAIT));
        engine.dispatch(Action::SetSlice(0)).unwrap();
        assert!(engine.wait_idle(WAIT));

        let stats = engine.cache_stats();
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.hits, 1);
    }

    #[test]
    fn test_events_delivered_in_order() {
        let (events, receiver) = ChannelEvents::new();
        let mut engine = engine(StaticFindings::empty()).with_events(events);
        engine.open_study("knee").unwrap();
        assert!(engine.wait_idle(WAIT));

        let statuses: Vec<_> = receiver
            .drain_viewport(0)
            .into_iter()
            .map(|e| e.status)
            .collect();
        assert_eq!(statuses, vec![ViewportStatus::Loading, ViewportStatus::Displaying]);
    }

    #[test]
    fn test_session_events_published() {
        let (events, receiver) = ChannelEvents::new();
        let mut engine = engine(StaticFindings::empty()).with_events(events);
        engine.open_study("knee").unwrap();
        engine.dispatch(Action::SetLayout(GridLayout::SideBySide)).unwrap();

        let changes: Vec<_> = receiver
            .try_iter()
            .filter_map(|e| match e {
                EngineEvent::Session(change) => Some(change),
                EngineEvent::Viewport(_) => None,
            })
            .collect();
        assert!(changes.contains(&SessionChange::StudyOpened { study_id: "knee".into() }));
        assert!(changes.contains(&SessionChange::Layout { layout: GridLayout::SideBySide }));
    }

    #[test]
    fn test_close_study_drops_findings() {
        let mut findings = StaticFindings::empty();
        findings.add_series_finding("knee", "t2", tear_box());
        let mut engine = engine(findings);
        engine.open_study("knee").unwrap();
        engine.dispatch(Action::ToggleOverlay).unwrap();
        assert_eq!(engine.findings_for_viewport(0).len(), 1);

        engine.dispatch(Action::CloseStudy).unwrap();
        assert!(engine.findings_for_viewport(0).is_empty());
        assert!(engine.wait_idle(WAIT));
        assert_eq!(engine.viewport(0).unwrap().status(), &ViewportStatus::Idle);
    }
}
