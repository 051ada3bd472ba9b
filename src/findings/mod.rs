//! AI findings provider.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ViewerError};
use crate::overlay::OverlayAnnotation;

/// Source of AI finding overlays.
pub trait FindingsProvider: Send + Sync {
    /// Findings of a study. With a series id, study-wide findings plus that
    /// series' findings; without one, study-wide findings only.
    fn findings_for(&self, study_id: &str, series_id: Option<&str>) -> Result<Vec<OverlayAnnotation>>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StudyFindings {
    /// Findings shown on every series.
    #[serde(default)]
    study: Vec<OverlayAnnotation>,
    /// Findings keyed by series id.
    #[serde(default)]
    series: HashMap<String, Vec<OverlayAnnotation>>,
}

/// Fixed findings loaded once, keyed by study id.
///
/// ```json
/// { "mri-knee-001": {
///     "study": [],
///     "series": { "t2": [ { "id": "f1", "label": "Meniscal tear", "color": "#ef4444",
///                           "confidence_percent": 87, "type": "bounding-box",
///                           "top_left": [120, 80], "bottom_right": [180, 130] } ] } } }
/// ```
#[derive(Debug, Clone, Default)]
pub struct StaticFindings {
    studies: HashMap<String, StudyFindings>,
}

impl StaticFindings {
    /// Provider with no findings.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse findings JSON. Invalid geometry is rejected.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let studies: HashMap<String, StudyFindings> = serde_json::from_str(text)?;
        for findings in studies.values() {
            for annotation in findings.study.iter().chain(findings.series.values().flatten()) {
                annotation.shape.validate()?;
            }
        }
        Ok(Self { studies })
    }

    /// Load findings from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ViewerError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read findings {}: {}", path.display(), e),
            ))
        })?;
        let findings = Self::from_json_str(&text)?;
        log::debug!("Loaded findings for {} studies from {}", findings.studies.len(), path.display());
        Ok(findings)
    }

    /// Add a study-wide finding.
    pub fn add_study_finding(&mut self, study_id: &str, annotation: OverlayAnnotation) {
        self.studies
            .entry(study_id.to_string())
            .or_default()
            .study
            .push(annotation);
    }

    /// Add a series finding.
    pub fn add_series_finding(&mut self, study_id: &str, series_id: &str, annotation: OverlayAnnotation) {
        self.studies
            .entry(study_id.to_string())
            .or_default()
            .series
            .entry(series_id.to_string())
            .or_default()
            .push(annotation);
    }
}

impl FindingsProvider for StaticFindings {
    fn findings_for(&self, study_id: &str, series_id: Option<&str>) -> Result<Vec<OverlayAnnotation>> {
        // unknown study: analysis pending, not an error
        let Some(study) = self.studies.get(study_id) else {
            return Ok(Vec::new());
        };
        let mut findings = study.study.clone();
        if let Some(series) = series_id.and_then(|id| study.series.get(id)) {
            findings.extend(series.iter().cloned());
        }
        Ok(findings)
    }
}
