//! Viewport grid: layout geometry and the coordinator that keeps one
//! [`Viewport`] per cell in step with the session.

use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::decoder::{DecodeOutcome, DecodeWorker};
use crate::error::{Result, ViewerError};
use crate::events::{EventHandler, NullEvents};
use crate::session::{Action, SessionChange, SessionState};
use crate::viewport::{TokenSource, Viewport, ViewportStatus};

/// Arrangement of grid cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum GridLayout {
    /// One cell.
    #[default]
    #[serde(rename = "1x1")]
    Single,
    /// Two cells side by side.
    #[serde(rename = "1x2")]
    SideBySide,
    /// Two by two.
    #[serde(rename = "2x2")]
    Quad,
    /// Three by three.
    #[serde(rename = "3x3")]
    Nine,
}

/// Placement of one cell inside the grid surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRect {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Width.
    pub width: u32,
    /// Height.
    pub height: u32,
}

impl GridLayout {
    /// Every layout, smallest first.
    pub const ALL: [GridLayout; 4] = [GridLayout::Single, GridLayout::SideBySide, GridLayout::Quad, GridLayout::Nine];

    /// Rows and columns.
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            GridLayout::Single => (1, 1),
            GridLayout::SideBySide => (1, 2),
            GridLayout::Quad => (2, 2),
            GridLayout::Nine => (3, 3),
        }
    }

    /// Number of cells.
    pub fn cell_count(&self) -> usize {
        let (rows, cols) = self.dimensions();
        (rows * cols) as usize
    }

    /// Row-major placement of a cell in a `width` x `height` surface.
    ///
    /// The last row and column absorb the remainder of uneven divisions.
    pub fn cell_rect(&self, index: usize, width: u32, height: u32) -> Option<CellRect> {
        if index >= self.cell_count() {
            return None;
        }
        let (rows, cols) = self.dimensions();
        let (row, col) = (index as u32 / cols, index as u32 % cols);
        let (cell_w, cell_h) = (width / cols, height / rows);
        let x = col * cell_w;
        let y = row * cell_h;
        Some(CellRect {
            x,
            y,
            width: if col + 1 == cols { width - x } else { cell_w },
            height: if row + 1 == rows { height - y } else { cell_h },
        })
    }
}

impl std::fmt::Display for GridLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (rows, cols) = self.dimensions();
        write!(f, "{}x{}", rows, cols)
    }
}

impl FromStr for GridLayout {
    type Err = ViewerError;

    fn from_str(s: &str) -> Result<Self> {
        GridLayout::ALL
            .into_iter()
            .find(|l| l.to_string() == s.trim())
            .ok_or_else(|| ViewerError::InvalidAction(format!("Unknown layout '{}' (use 1x1, 1x2, 2x2 or 3x3)", s)))
    }
}

/// Owns the grid's viewports and routes decode work for them.
///
/// Viewports only read the session: the coordinator applies actions to the
/// [`SessionState`], then re-derives every cell's target and display state
/// from it, submitting decodes for cells whose target moved.
pub struct GridCoordinator {
    layout: GridLayout,
    viewports: Vec<Viewport>,
    worker: DecodeWorker,
    tokens: TokenSource,
    events: Arc<dyn EventHandler>,
    study_id: Option<String>,
    surface: (u32, u32),
}

impl GridCoordinator {
    /// Create a coordinator with no cells; call [`sync`](Self::sync) to populate.
    pub fn new(worker: DecodeWorker) -> Self {
        Self {
            layout: GridLayout::Single,
            viewports: Vec::new(),
            worker,
            tokens: TokenSource::new(),
            events: Arc::new(NullEvents),
            study_id: None,
            surface: (512, 512),
        }
    }

    /// Deliver viewport and session events to `events`.
    pub fn with_events(mut self, events: Arc<dyn EventHandler>) -> Self {
        for viewport in &mut self.viewports {
            viewport.set_events(Arc::clone(&events));
        }
        self.events = events;
        self
    }

    /// Current layout.
    pub fn layout(&self) -> GridLayout {
        self.layout
    }

    /// Viewports in cell order.
    pub fn viewports(&self) -> &[Viewport] {
        &self.viewports
    }

    /// One viewport.
    pub fn viewport(&self, index: usize) -> Result<&Viewport> {
        self.viewports
            .get(index)
            .ok_or_else(|| ViewerError::out_of_range(index as i64, self.viewports.len()))
    }

    /// One viewport, mutably.
    pub fn viewport_mut(&mut self, index: usize) -> Result<&mut Viewport> {
        let len = self.viewports.len();
        self.viewports
            .get_mut(index)
            .ok_or_else(|| ViewerError::out_of_range(index as i64, len))
    }

    /// The decode worker.
    pub fn worker(&self) -> &DecodeWorker {
        &self.worker
    }

    /// Apply an action to the session, notify observers, then re-sync cells.
    pub fn dispatch(&mut self, session: &mut SessionState, action: Action) -> Result<Vec<SessionChange>> {
        let changes = session.apply(action)?;
        for change in &changes {
            self.events.on_session(change);
        }
        self.sync(session)?;
        Ok(changes)
    }

    /// Change the layout through the session.
    pub fn set_layout(&mut self, session: &mut SessionState, layout: GridLayout) -> Result<Vec<SessionChange>> {
        self.dispatch(session, Action::SetLayout(layout))
    }

    /// Change the active cell through the session.
    pub fn set_active_viewport(&mut self, session: &mut SessionState, index: usize) -> Result<Vec<SessionChange>> {
        self.dispatch(session, Action::SetActiveViewport(index))
    }

    /// Bring every viewport in line with the session. Returns the number of
    /// decodes submitted.
    pub fn sync(&mut self, session: &SessionState) -> Result<usize> {
        let study_id = session.study().map(|s| s.study_id().to_string());
        if study_id != self.study_id {
            // same series ids in another study are different frames
            for viewport in &mut self.viewports {
                viewport.clear();
            }
            self.study_id = study_id;
        }

        let count = session.viewports().len();
        let relayout = self.layout != session.layout() || self.viewports.len() != count;
        if relayout {
            log::debug!("Grid layout {} -> {} ({} cells)", self.layout, session.layout(), count);
        }
        self.layout = session.layout();
        while self.viewports.len() > count {
            if let Some(mut discarded) = self.viewports.pop() {
                discarded.clear();
            }
        }
        while self.viewports.len() < count {
            let viewport = Viewport::new(self.viewports.len(), self.tokens.clone()).with_events(Arc::clone(&self.events));
            self.viewports.push(viewport);
        }
        if relayout {
            self.layout_cells();
        }

        let mut submitted = 0;
        for (index, state) in session.viewports().iter().enumerate() {
            let viewport = &mut self.viewports[index];
            viewport.set_display(state);
            match session.series_for(index) {
                None => {
                    if viewport.target().is_some() {
                        viewport.clear();
                    }
                }
                Some(series) => {
                    if viewport.target() == Some((series.series_id(), state.slice_index)) {
                        continue;
                    }
                    let request = viewport.set_target(series, state.slice_index as i64)?;
                    self.worker.submit(request);
                    submitted += 1;
                }
            }
        }
        Ok(submitted)
    }

    /// Apply every completion that has arrived. Returns how many were applied.
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        while let Some(outcome) = self.worker.try_next() {
            if self.route(outcome) {
                applied += 1;
            }
        }
        applied
    }

    fn route(&mut self, outcome: DecodeOutcome) -> bool {
        match self.viewports.get_mut(outcome.viewport) {
            Some(viewport) => viewport.apply_outcome(outcome),
            None => false,
        }
    }

    /// Whether no viewport is waiting for a decode.
    pub fn is_idle(&self) -> bool {
        self.viewports.iter().all(|v| v.pending_token().is_none())
    }

    /// Pump completions until every viewport settles or `timeout` passes.
    pub fn wait_idle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.pump();
            if self.is_idle() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                log::warn!("Grid not idle after {:?}", timeout);
                return false;
            }
            if let Some(outcome) = self.worker.next_timeout(deadline - now) {
                self.route(outcome);
            }
        }
    }

    /// Resize the whole grid surface. Cells are re-laid out; nothing is re-decoded.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.surface = (width.max(1), height.max(1));
        self.layout_cells();
    }

    /// Resize a single cell.
    pub fn resize_viewport(&mut self, index: usize, width: u32, height: u32) -> Result<()> {
        self.viewport_mut(index)?.resize(width, height);
        Ok(())
    }

    /// Placement of a cell inside the grid surface.
    pub fn cell_rect(&self, index: usize) -> Option<CellRect> {
        self.layout.cell_rect(index, self.surface.0, self.surface.1)
    }

    fn layout_cells(&mut self) {
        let (width, height) = self.surface;
        let layout = self.layout;
        for (index, viewport) in self.viewports.iter_mut().enumerate() {
            if let Some(rect) = layout.cell_rect(index, width, height) {
                viewport.resize(rect.width, rect.height);
            }
        }
    }

    /// Cells currently in the error state.
    pub fn failed_viewports(&self) -> Vec<usize> {
        self.viewports
            .iter()
            .filter(|v| matches!(v.status(), ViewportStatus::Error { .. }))
            .map(|v| v.index())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{FrameAddress, Orientation, SeriesDescriptor, StudyReference};
    use crate::config::Modality;
    use crate::decoder::test_support::gray_png;
    use crate::decoder::{FrameDecoder, MemoryFetcher};
    use crate::events::{ChannelEvents, EngineEvent};

    const WAIT: Duration = Duration::from_secs(5);

    fn series(id: &str, slices: usize) -> SeriesDescriptor {
        let frames = (0..slices).map(|i| FrameAddress::new(format!("{}/{}", id, i))).collect();
        SeriesDescriptor::new(id, id, Orientation::Axial, frames).unwrap()
    }

    fn fixture(ids: &[&str], slices: usize) -> (GridCoordinator, SessionState) {
        let fetcher = MemoryFetcher::new();
        for id in ids {
            for i in 0..slices {
                fetcher.insert(format!("{}/{}", id, i), gray_png(4, 4, i as u8 * 10));
            }
        }
        let decoder = Arc::new(FrameDecoder::new(Arc::new(fetcher), 16));
        let worker = DecodeWorker::new(decoder, 2).unwrap();
        let mut grid = GridCoordinator::new(worker);

        let study = StudyReference::new(
            "study",
            Modality::Mri,
            ids.iter().map(|id| series(id, slices)).collect(),
        )
        .unwrap();
        let mut session = SessionState::default();
        grid.dispatch(&mut session, Action::OpenStudy(study)).unwrap();
        (grid, session)
    }

    #[test]
    fn test_layout_cell_counts() {
        let counts: Vec<_> = GridLayout::ALL.iter().map(|l| l.cell_count()).collect();
        assert_eq!(counts, vec![1, 2, 4, 9]);
        assert_eq!("2x2".parse::<GridLayout>().unwrap(), GridLayout::Quad);
        assert!("4x4".parse::<GridLayout>().is_err());
        assert_eq!(serde_json::to_string(&GridLayout::SideBySide).unwrap(), "\"1x2\"");
    }

    #[test]
    fn test_cell_rects_cover_surface() {
        let layout = GridLayout::Nine;
        let last = layout.cell_rect(8, 100, 50).unwrap();
        assert_eq!(last, CellRect { x: 66, y: 32, width: 34, height: 18 });
        assert_eq!(
            GridLayout::SideBySide.cell_rect(1, 100, 50),
            Some(CellRect { x: 50, y: 0, width: 50, height: 50 })
        );
        assert!(layout.cell_rect(9, 100, 50).is_none());
    }

    #[test]
    fn test_open_study_loads_every_cell() {
        let (mut grid, mut session) = fixture(&["t1"], 3);
        grid.set_layout(&mut session, GridLayout::SideBySide).unwrap();
        assert!(grid.wait_idle(WAIT));
        assert!(grid
            .viewports()
            .iter()
            .all(|v| v.status() == &ViewportStatus::Displaying));
    }

    #[test]
    fn test_grid_resize_discards_state() {
        let (mut grid, mut session) = fixture(&["a", "b", "c", "d"], 2);
        grid.set_layout(&mut session, GridLayout::Quad).unwrap();
        for (cell, id) in ["a", "b", "c", "d"].iter().enumerate() {
            grid.dispatch(
                &mut session,
                Action::AssignSeries { viewport: cell, series_id: id.to_string() },
            )
            .unwrap();
        }
        assert!(grid.wait_idle(WAIT));
        let before: Vec<_> = grid.viewports().iter().map(|v| v.target().unwrap().0.to_string()).collect();
        assert_eq!(before, vec!["a", "b", "c", "d"]);

        grid.set_layout(&mut session, GridLayout::Single).unwrap();
        assert_eq!(grid.viewports().len(), 1);
        grid.set_layout(&mut session, GridLayout::Quad).unwrap();
        assert!(grid.wait_idle(WAIT));

        let after: Vec<_> = grid.viewports().iter().map(|v| v.target().unwrap()).collect();
        assert_eq!(after, vec![("a", 0), ("a", 0), ("a", 0), ("a", 0)]);
        assert!(session.viewports()[1..]
            .iter()
            .all(|c| c.window == session.default_window() && c.slice_index == 0));
    }

    #[test]
    fn test_only_current_slice_displayed() {
        let (mut grid, mut session) = fixture(&["ax"], 10);
        grid.dispatch(&mut session, Action::SetSlice(5)).unwrap();
        grid.dispatch(&mut session, Action::SetSlice(6)).unwrap();
        assert!(grid.wait_idle(WAIT));

        let viewport = grid.viewport(0).unwrap();
        assert_eq!(viewport.target(), Some(("ax", 6)));
        assert_eq!(viewport.frame().unwrap().samples.get(0), Some(60.0));
    }

    #[test]
    fn test_failure_isolated_to_one_cell() {
        let (mut grid, mut session) = fixture(&["good"], 2);
        let broken = StudyReference::new(
            "study",
            Modality::Mri,
            vec![series("good", 2), series("missing", 2)],
        )
        .unwrap();
        grid.dispatch(&mut session, Action::OpenStudy(broken)).unwrap();
        grid.set_layout(&mut session, GridLayout::SideBySide).unwrap();
        grid.dispatch(
            &mut session,
            Action::AssignSeries { viewport: 1, series_id: "missing".into() },
        )
        .unwrap();
        assert!(grid.wait_idle(WAIT));

        assert_eq!(grid.viewport(0).unwrap().status(), &ViewportStatus::Displaying);
        assert_eq!(grid.failed_viewports(), vec![1]);
        match grid.viewport(1).unwrap().status() {
            ViewportStatus::Error { series_id, slice_index, .. } => {
                assert_eq!((series_id.as_str(), *slice_index), ("missing", 0));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_display_change_does_not_redecode() {
        let (mut grid, mut session) = fixture(&["ax"], 2);
        assert!(grid.wait_idle(WAIT));
        let changes = grid
            .dispatch(&mut session, Action::SetWindowLevel { width: 80.0, center: 40.0 })
            .unwrap();
        assert_eq!(changes, vec![SessionChange::Display { viewport: 0 }]);
        assert!(grid.is_idle());
        assert_eq!(grid.viewport(0).unwrap().window().width, 80.0);

        grid.resize(300, 200);
        assert!(grid.is_idle());
        assert_eq!(grid.viewport(0).unwrap().screen_size(), (300, 200));
    }

    #[test]
    fn test_session_changes_published() {
        let fetcher = MemoryFetcher::new().with_frame("x/0", gray_png(2, 2, 0));
        let decoder = Arc::new(FrameDecoder::new(Arc::new(fetcher), 4));
        let (events, receiver) = ChannelEvents::new();
        let mut grid = GridCoordinator::new(DecodeWorker::new(decoder, 1).unwrap()).with_events(Arc::new(events));
        let mut session = SessionState::default();

        grid.dispatch(&mut session, Action::ToggleOverlay).unwrap();
        assert_eq!(
            receiver.try_recv().unwrap(),
            EngineEvent::Session(SessionChange::OverlayVisibility { visible: true })
        );
    }
}
