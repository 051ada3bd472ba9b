//! Navigation and session state.
//!
//! [`SessionState`] is the single source of truth for everything the control
//! surface can change. It is mutated only through [`SessionState::apply`],
//! which either commits the whole action and reports what changed, or fails
//! and leaves the state untouched.

use serde::{Deserialize, Serialize};

use crate::catalog::{SeriesDescriptor, StudyReference};
use crate::config::ViewerConfig;
use crate::error::{Result, ViewerError};
use crate::grid::GridLayout;
use crate::mapper::WindowLevel;
use crate::measurement::{Measurement, MeasurementId};

/// Interactive tool bound to pointer input on the active viewport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    /// Pointer only selects and hovers.
    #[default]
    None,
    /// Drag pans the image.
    Pan,
    /// Drag zooms the image.
    Zoom,
    /// Clicks place measurement points.
    Measure,
}

/// How slice and window actions fan out across grid cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPolicy {
    /// Only the active cell changes.
    #[default]
    Independent,
    /// Every cell with a series follows the same slice and window.
    Linked,
}

/// State of one grid cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewportState {
    /// Assigned series, if any.
    pub series_id: Option<String>,
    /// Current slice within the series.
    pub slice_index: usize,
    /// Window applied to this cell.
    pub window: WindowLevel,
    /// Whether the display is inverted.
    pub invert: bool,
    /// Zoom factor on top of aspect-fit.
    pub zoom: f64,
    /// Pan offset in screen pixels.
    pub pan: (f64, f64),
    /// Whether this is the active cell.
    pub is_active: bool,
}

impl ViewportState {
    /// A cell showing the first slice of `series` under `window`.
    pub fn initial(series: Option<&SeriesDescriptor>, window: WindowLevel) -> Self {
        Self {
            series_id: series.map(|s| s.series_id().to_string()),
            slice_index: 0,
            window,
            invert: false,
            zoom: 1.0,
            pan: (0.0, 0.0),
            is_active: false,
        }
    }
}

/// A named mutation request from the control surface.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Load a study into every cell.
    OpenStudy(StudyReference),
    /// Drop the current study.
    CloseStudy,
    /// Go to a slice. Out-of-range indices are rejected.
    SetSlice(i64),
    /// Move by `delta` slices, stopping at the first and last slice.
    StepSlice(i64),
    /// Set the window.
    SetWindowLevel {
        /// Window width, must be positive.
        width: f64,
        /// Window center.
        center: f64,
    },
    /// Apply a modality preset by id.
    ApplyPreset(String),
    /// Set display inversion.
    SetInvert(bool),
    /// Change the grid layout.
    SetLayout(GridLayout),
    /// Make one cell active.
    SetActiveViewport(usize),
    /// Show a series in a cell, starting at its first slice.
    AssignSeries {
        /// Cell index.
        viewport: usize,
        /// Series id within the open study.
        series_id: String,
    },
    /// Show or hide AI findings.
    ToggleOverlay,
    /// Select the interactive tool.
    SetActiveTool(Tool),
    /// Set the active cell's zoom.
    SetZoom(f64),
    /// Set the active cell's pan offset.
    SetPan {
        /// Horizontal offset.
        x: f64,
        /// Vertical offset.
        y: f64,
    },
    /// Change the fan-out policy.
    SetSyncPolicy(SyncPolicy),
    /// Add a measurement. An empty id gets one assigned.
    AddMeasurement(Measurement),
    /// Replace the measurement with the same id.
    UpdateMeasurement(Measurement),
    /// Delete a measurement.
    DeleteMeasurement(MeasurementId),
    /// Select a measurement, or clear the selection.
    SelectMeasurement(Option<MeasurementId>),
    /// Delete every measurement.
    ClearMeasurements,
    /// Return to the initial state.
    Reset,
}

impl Action {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Action::OpenStudy(_) => "open-study",
            Action::CloseStudy => "close-study",
            Action::SetSlice(_) => "set-slice",
            Action::StepSlice(_) => "step-slice",
            Action::SetWindowLevel { .. } => "set-window-level",
            Action::ApplyPreset(_) => "apply-preset",
            Action::SetInvert(_) => "set-invert",
            Action::SetLayout(_) => "set-layout",
            Action::SetActiveViewport(_) => "set-active-viewport",
            Action::AssignSeries { .. } => "assign-series",
            Action::ToggleOverlay => "toggle-overlay",
            Action::SetActiveTool(_) => "set-active-tool",
            Action::SetZoom(_) => "set-zoom",
            Action::SetPan { .. } => "set-pan",
            Action::SetSyncPolicy(_) => "set-sync-policy",
            Action::AddMeasurement(_) => "add-measurement",
            Action::UpdateMeasurement(_) => "update-measurement",
            Action::DeleteMeasurement(_) => "delete-measurement",
            Action::SelectMeasurement(_) => "select-measurement",
            Action::ClearMeasurements => "clear-measurements",
            Action::Reset => "reset",
        }
    }
}

/// Notification of one piece of state that an action changed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "change", rename_all = "kebab-case")]
pub enum SessionChange {
    /// A study was opened.
    StudyOpened {
        /// Study id.
        study_id: String,
    },
    /// The study was closed.
    StudyClosed,
    /// A cell's series or slice changed; its frame must be reloaded.
    Target {
        /// Cell index.
        viewport: usize,
    },
    /// A cell's window, inversion, zoom or pan changed; re-render only.
    Display {
        /// Cell index.
        viewport: usize,
    },
    /// The grid layout changed.
    Layout {
        /// New layout.
        layout: GridLayout,
    },
    /// A different cell became active.
    ActiveViewport {
        /// Cell index.
        viewport: usize,
    },
    /// AI overlay visibility changed.
    OverlayVisibility {
        /// Whether findings are shown.
        visible: bool,
    },
    /// The active tool changed.
    Tool {
        /// New tool.
        tool: Tool,
    },
    /// The fan-out policy changed.
    SyncPolicy {
        /// New policy.
        policy: SyncPolicy,
    },
    /// The measurement list changed.
    Measurements,
    /// The selected measurement changed.
    Selection {
        /// Selected id.
        selected: Option<MeasurementId>,
    },
    /// Everything was reset.
    Reset,
}

/// Canonical session state.
#[derive(Debug, Clone)]
pub struct SessionState {
    study: Option<StudyReference>,
    layout: GridLayout,
    viewports: Vec<ViewportState>,
    active_viewport: usize,
    sync_policy: SyncPolicy,
    show_ai_overlay: bool,
    active_tool: Tool,
    measurements: Vec<Measurement>,
    selected_measurement: Option<MeasurementId>,
    next_measurement: u64,
    default_window: WindowLevel,
    initial_layout: GridLayout,
    initial_sync: SyncPolicy,
    initial_overlay: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new(&ViewerConfig::default())
    }
}

impl SessionState {
    /// Empty session using the configured layout, policy and window.
    pub fn new(config: &ViewerConfig) -> Self {
        let mut state = Self {
            study: None,
            layout: config.initial_layout,
            viewports: Vec::new(),
            active_viewport: 0,
            sync_policy: config.sync_policy,
            show_ai_overlay: config.show_ai_overlay,
            active_tool: Tool::None,
            measurements: Vec::new(),
            selected_measurement: None,
            next_measurement: 1,
            default_window: config.default_window,
            initial_layout: config.initial_layout,
            initial_sync: config.sync_policy,
            initial_overlay: config.show_ai_overlay,
        };
        state.viewports = (0..state.layout.cell_count())
            .map(|_| ViewportState::initial(None, state.default_window))
            .collect();
        state.mark_active();
        state
    }

    /// Apply an action. On error nothing changes.
    pub fn apply(&mut self, action: Action) -> Result<Vec<SessionChange>> {
        let name = action.name();
        let mut next = self.clone();
        match next.reduce(action) {
            Ok(changes) => {
                log::debug!("{}: {} change(s)", name, changes.len());
                *self = next;
                Ok(changes)
            }
            Err(e) => {
                log::debug!("{} rejected: {}", name, e);
                Err(e)
            }
        }
    }

    /// The open study.
    pub fn study(&self) -> Option<&StudyReference> {
        self.study.as_ref()
    }

    /// Grid layout.
    pub fn layout(&self) -> GridLayout {
        self.layout
    }

    /// Per-cell state, one entry per grid cell.
    pub fn viewports(&self) -> &[ViewportState] {
        &self.viewports
    }

    /// State of one cell.
    pub fn viewport(&self, index: usize) -> Option<&ViewportState> {
        self.viewports.get(index)
    }

    /// Index of the active cell.
    pub fn active_viewport(&self) -> usize {
        self.active_viewport
    }

    /// Fan-out policy.
    pub fn sync_policy(&self) -> SyncPolicy {
        self.sync_policy
    }

    /// Whether AI findings are shown.
    pub fn show_ai_overlay(&self) -> bool {
        self.show_ai_overlay
    }

    /// Active tool.
    pub fn active_tool(&self) -> Tool {
        self.active_tool
    }

    /// All measurements in creation order.
    pub fn measurements(&self) -> &[Measurement] {
        &self.measurements
    }

    /// Measurement by id.
    pub fn measurement(&self, id: &MeasurementId) -> Option<&Measurement> {
        self.measurements.iter().find(|m| &m.id == id)
    }

    /// Selected measurement id.
    pub fn selected_measurement(&self) -> Option<&MeasurementId> {
        self.selected_measurement.as_ref()
    }

    /// Window given to new cells.
    pub fn default_window(&self) -> WindowLevel {
        self.default_window
    }

    /// Series shown in a cell.
    pub fn series_for(&self, index: usize) -> Option<&SeriesDescriptor> {
        let id = self.viewports.get(index)?.series_id.as_deref()?;
        self.study.as_ref()?.series_by_id(id)
    }

    fn reduce(&mut self, action: Action) -> Result<Vec<SessionChange>> {
        match action {
            Action::OpenStudy(study) => Ok(self.open_study(study)),
            Action::CloseStudy => self.close_study(),
            Action::SetSlice(index) => self.set_slice(index),
            Action::StepSlice(delta) => self.step_slice(delta),
            Action::SetWindowLevel { width, center } => self.set_window(WindowLevel::new(width, center)?),
            Action::ApplyPreset(id) => self.apply_preset(&id),
            Action::SetInvert(invert) => Ok(self.set_invert(invert)),
            Action::SetLayout(layout) => Ok(self.set_layout(layout)),
            Action::SetActiveViewport(index) => self.set_active_viewport(index),
            Action::AssignSeries { viewport, series_id } => self.assign_series(viewport, &series_id),
            Action::ToggleOverlay => {
                self.show_ai_overlay = !self.show_ai_overlay;
                Ok(vec![SessionChange::OverlayVisibility { visible: self.show_ai_overlay }])
            }
            Action::SetActiveTool(tool) => {
                self.active_tool = tool;
                Ok(vec![SessionChange::Tool { tool }])
            }
            Action::SetZoom(zoom) => {
                if !zoom.is_finite() || zoom <= 0.0 {
                    return Err(ViewerError::InvalidAction(format!("Zoom must be positive, got {}", zoom)));
                }
                let active = self.active_viewport;
                self.viewports[active].zoom = zoom;
                Ok(vec![SessionChange::Display { viewport: active }])
            }
            Action::SetPan { x, y } => {
                if !x.is_finite() || !y.is_finite() {
                    return Err(ViewerError::InvalidAction("Pan offset must be finite".into()));
                }
                let active = self.active_viewport;
                self.viewports[active].pan = (x, y);
                Ok(vec![SessionChange::Display { viewport: active }])
            }
            Action::SetSyncPolicy(policy) => {
                self.sync_policy = policy;
                Ok(vec![SessionChange::SyncPolicy { policy }])
            }
            Action::AddMeasurement(measurement) => self.add_measurement(measurement),
            Action::UpdateMeasurement(measurement) => self.update_measurement(measurement),
            Action::DeleteMeasurement(id) => self.delete_measurement(&id),
            Action::SelectMeasurement(id) => self.select_measurement(id),
            Action::ClearMeasurements => {
                self.measurements.clear();
                let mut changes = vec![SessionChange::Measurements];
                if self.selected_measurement.take().is_some() {
                    changes.push(SessionChange::Selection { selected: None });
                }
                Ok(changes)
            }
            Action::Reset => {
                let config = ViewerConfig {
                    initial_layout: self.initial_layout,
                    sync_policy: self.initial_sync,
                    show_ai_overlay: self.initial_overlay,
                    default_window: self.default_window,
                    ..Default::default()
                };
                *self = Self::new(&config);
                Ok(vec![SessionChange::Reset])
            }
        }
    }

    fn mark_active(&mut self) {
        let active = self.active_viewport;
        for (i, cell) in self.viewports.iter_mut().enumerate() {
            cell.is_active = i == active;
        }
    }

    fn require_study(&self) -> Result<&StudyReference> {
        self.study
            .as_ref()
            .ok_or_else(|| ViewerError::InvalidAction("No study is open".into()))
    }

    /// Cells a slice or window action applies to.
    fn sync_targets(&self) -> Vec<usize> {
        match self.sync_policy {
            SyncPolicy::Independent => vec![self.active_viewport],
            SyncPolicy::Linked => self
                .viewports
                .iter()
                .enumerate()
                .filter(|(i, cell)| cell.series_id.is_some() || *i == self.active_viewport)
                .map(|(i, _)| i)
                .collect(),
        }
    }

    fn frame_count(&self, index: usize) -> Result<usize> {
        self.series_for(index)
            .map(|s| s.frame_count())
            .ok_or_else(|| ViewerError::InvalidAction(format!("Viewport {} has no series", index)))
    }

    fn open_study(&mut self, study: StudyReference) -> Vec<SessionChange> {
        let window = self.default_window;
        self.viewports = (0..self.layout.cell_count())
            .map(|_| ViewportState::initial(study.first_series(), window))
            .collect();
        self.mark_active();
        self.measurements.clear();
        self.selected_measurement = None;

        let mut changes = vec![SessionChange::StudyOpened {
            study_id: study.study_id().to_string(),
        }];
        changes.extend((0..self.viewports.len()).map(|viewport| SessionChange::Target { viewport }));
        changes.push(SessionChange::Measurements);
        self.study = Some(study);
        changes
    }

    fn close_study(&mut self) -> Result<Vec<SessionChange>> {
        self.require_study()?;
        self.study = None;
        let window = self.default_window;
        for cell in &mut self.viewports {
            *cell = ViewportState {
                is_active: cell.is_active,
                ..ViewportState::initial(None, window)
            };
        }
        self.measurements.clear();
        self.selected_measurement = None;

        let mut changes = vec![SessionChange::StudyClosed];
        changes.extend((0..self.viewports.len()).map(|viewport| SessionChange::Target { viewport }));
        changes.push(SessionChange::Measurements);
        Ok(changes)
    }

    fn set_slice(&mut self, index: i64) -> Result<Vec<SessionChange>> {
        self.require_study()?;
        let targets = self.sync_targets();
        // validate every target before touching any
        for &cell in &targets {
            let count = self.frame_count(cell)?;
            if index < 0 || index as usize >= count {
                return Err(ViewerError::out_of_range(index, count));
            }
        }

        let mut changes = Vec::new();
        for cell in targets {
            let state = &mut self.viewports[cell];
            if state.slice_index != index as usize {
                state.slice_index = index as usize;
                changes.push(SessionChange::Target { viewport: cell });
            }
        }
        Ok(changes)
    }

    fn step_slice(&mut self, delta: i64) -> Result<Vec<SessionChange>> {
        self.require_study()?;
        let targets = self.sync_targets();
        let mut counts = Vec::with_capacity(targets.len());
        for &cell in &targets {
            counts.push(self.frame_count(cell)?);
        }

        let mut changes = Vec::new();
        for (cell, count) in targets.into_iter().zip(counts) {
            let state = &mut self.viewports[cell];
            let last = count as i64 - 1;
            let next = (state.slice_index as i64).saturating_add(delta).clamp(0, last) as usize;
            if next != state.slice_index {
                state.slice_index = next;
                changes.push(SessionChange::Target { viewport: cell });
            }
        }
        Ok(changes)
    }

    fn set_window(&mut self, window: WindowLevel) -> Result<Vec<SessionChange>> {
        window.validate()?;
        let mut changes = Vec::new();
        for cell in self.sync_targets() {
            self.viewports[cell].window = window;
            changes.push(SessionChange::Display { viewport: cell });
        }
        Ok(changes)
    }

    fn set_invert(&mut self, invert: bool) -> Vec<SessionChange> {
        let mut changes = Vec::new();
        for cell in self.sync_targets() {
            self.viewports[cell].invert = invert;
            changes.push(SessionChange::Display { viewport: cell });
        }
        changes
    }

    fn apply_preset(&mut self, id: &str) -> Result<Vec<SessionChange>> {
        let modality = self.require_study()?.modality();
        if let Some(preset) = modality.window_preset(id) {
            return self.set_window(preset.window());
        }
        if let Some(view) = modality.view_presets().iter().find(|p| p.id.eq_ignore_ascii_case(id)) {
            return Ok(self.set_invert(view.invert));
        }
        if modality.sequence_presets().iter().any(|p| p.id.eq_ignore_ascii_case(id)) {
            // sequence presets describe the acquisition; intensity mapping is unchanged
            return Ok(Vec::new());
        }
        Err(ViewerError::InvalidAction(format!(
            "No preset '{}' for modality {}",
            id, modality
        )))
    }

    fn set_layout(&mut self, layout: GridLayout) -> Vec<SessionChange> {
        let old_count = self.viewports.len();
        let new_count = layout.cell_count();
        let first = self.study.as_ref().and_then(|s| s.first_series());
        let window = self.default_window;

        self.viewports.truncate(new_count);
        let added = old_count.min(new_count)..new_count;
        self.viewports
            .extend(added.clone().map(|_| ViewportState::initial(first, window)));
        self.layout = layout;

        let mut changes = vec![SessionChange::Layout { layout }];
        if self.active_viewport >= new_count {
            self.active_viewport = 0;
            changes.push(SessionChange::ActiveViewport { viewport: 0 });
        }
        self.mark_active();
        changes.extend(added.map(|viewport| SessionChange::Target { viewport }));
        changes
    }

    fn set_active_viewport(&mut self, index: usize) -> Result<Vec<SessionChange>> {
        if index >= self.viewports.len() {
            return Err(ViewerError::out_of_range(index as i64, self.viewports.len()));
        }
        if index == self.active_viewport {
            return Ok(Vec::new());
        }
        self.active_viewport = index;
        self.mark_active();
        Ok(vec![SessionChange::ActiveViewport { viewport: index }])
    }

    fn assign_series(&mut self, viewport: usize, series_id: &str) -> Result<Vec<SessionChange>> {
        if viewport >= self.viewports.len() {
            return Err(ViewerError::out_of_range(viewport as i64, self.viewports.len()));
        }
        let study = self.require_study()?;
        if study.series_by_id(series_id).is_none() {
            return Err(ViewerError::NotFound(format!(
                "Series {} in study {}",
                series_id,
                study.study_id()
            )));
        }
        let cell = &mut self.viewports[viewport];
        cell.series_id = Some(series_id.to_string());
        cell.slice_index = 0;
        Ok(vec![SessionChange::Target { viewport }])
    }

    fn add_measurement(&mut self, mut measurement: Measurement) -> Result<Vec<SessionChange>> {
        measurement.validate()?;
        if measurement.id.is_unassigned() {
            loop {
                let id = MeasurementId::new(format!("m-{}", self.next_measurement));
                self.next_measurement += 1;
                if self.measurement(&id).is_none() {
                    measurement.id = id;
                    break;
                }
            }
        } else if self.measurement(&measurement.id).is_some() {
            return Err(ViewerError::InvalidAction(format!(
                "Measurement {} already exists",
                measurement.id
            )));
        }

        // taken on the active cell unless anchored explicitly
        if measurement.series_id.is_none() {
            let active = &self.viewports[self.active_viewport];
            if let Some(series) = &active.series_id {
                measurement.series_id = Some(series.clone());
                measurement.slice_index = Some(active.slice_index);
            }
        }
        self.measurements.push(measurement);
        Ok(vec![SessionChange::Measurements])
    }

    fn update_measurement(&mut self, measurement: Measurement) -> Result<Vec<SessionChange>> {
        measurement.validate()?;
        let existing = self
            .measurements
            .iter_mut()
            .find(|m| m.id == measurement.id)
            .ok_or_else(|| ViewerError::NotFound(format!("Measurement {}", measurement.id)))?;
        *existing = measurement;
        Ok(vec![SessionChange::Measurements])
    }

    fn delete_measurement(&mut self, id: &MeasurementId) -> Result<Vec<SessionChange>> {
        let position = self
            .measurements
            .iter()
            .position(|m| &m.id == id)
            .ok_or_else(|| ViewerError::NotFound(format!("Measurement {}", id)))?;
        self.measurements.remove(position);

        let mut changes = vec![SessionChange::Measurements];
        if self.selected_measurement.as_ref() == Some(id) {
            self.selected_measurement = None;
            changes.push(SessionChange::Selection { selected: None });
        }
        Ok(changes)
    }

    fn select_measurement(&mut self, id: Option<MeasurementId>) -> Result<Vec<SessionChange>> {
        if let Some(id) = &id {
            if self.measurement(id).is_none() {
                return Err(ViewerError::NotFound(format!("Measurement {}", id)));
            }
        }
        self.selected_measurement = id.clone();
        Ok(vec![SessionChange::Selection { selected: id }])
    }
}
