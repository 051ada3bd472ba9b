//! Study catalog: studies, series and their ordered frame addresses.
//!
//! Frame order is acquisition order as listed by the catalog. Nothing here
//! derives order from file names; see [`discovery`] for the one place that
//! builds a series from a directory.

pub mod discovery;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::Modality;
use crate::error::{Result, ViewerError};

pub use discovery::FrameDiscovery;

/// Opaque locator of one encoded frame (path or URI).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrameAddress(String);

impl FrameAddress {
    /// Create an address from any string locator.
    pub fn new(locator: impl Into<String>) -> Self {
        Self(locator.into())
    }

    /// Create an address from a file path.
    pub fn from_path(path: &Path) -> Self {
        Self(path.to_string_lossy().into_owned())
    }

    /// The locator string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the locator carries a URI scheme (`wadouri:`, `http://`).
    pub fn has_scheme(&self) -> bool {
        match self.0.split_once(':') {
            // a single letter before ':' is a Windows drive
            Some((scheme, _)) => scheme.len() > 1 && scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.'),
            None => false,
        }
    }
}

impl std::fmt::Display for FrameAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for FrameAddress {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for FrameAddress {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Anatomical plane of a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    /// Axial (transverse) slices.
    Axial,
    /// Sagittal slices.
    Sagittal,
    /// Coronal slices.
    Coronal,
    /// No defined plane (projection images, scouts).
    #[default]
    None,
}

/// Wire form of a series inside a manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SeriesManifest {
    series_id: String,
    #[serde(default)]
    label: String,
    #[serde(default)]
    orientation: Orientation,
    frames: Vec<FrameAddress>,
}

impl TryFrom<SeriesManifest> for SeriesDescriptor {
    type Error = ViewerError;

    fn try_from(m: SeriesManifest) -> Result<Self> {
        SeriesDescriptor::new(m.series_id, m.label, m.orientation, m.frames)
    }
}

impl From<SeriesDescriptor> for SeriesManifest {
    fn from(s: SeriesDescriptor) -> Self {
        Self {
            series_id: s.series_id,
            label: s.label,
            orientation: s.orientation,
            frames: s.frames,
        }
    }
}

/// One acquisition series: an ordered, non-empty list of frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SeriesManifest", into = "SeriesManifest")]
pub struct SeriesDescriptor {
    series_id: String,
    label: String,
    orientation: Orientation,
    frames: Vec<FrameAddress>,
}

impl SeriesDescriptor {
    /// Create a series. Fails when `frames` is empty.
    pub fn new(
        series_id: impl Into<String>,
        label: impl Into<String>,
        orientation: Orientation,
        frames: Vec<FrameAddress>,
    ) -> Result<Self> {
        let series_id = series_id.into();
        if frames.is_empty() {
            return Err(ViewerError::Catalog(format!(
                "Series {} has no frames",
                series_id
            )));
        }
        let mut label = label.into();
        if label.is_empty() {
            label = series_id.clone();
        }
        Ok(Self {
            series_id,
            label,
            orientation,
            frames,
        })
    }

    /// Series identifier.
    pub fn series_id(&self) -> &str {
        &self.series_id
    }

    /// Human label such as "T2" or "STIR".
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Anatomical plane.
    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    /// Number of slices (always at least 1).
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// All frame addresses in acquisition order.
    pub fn frames(&self) -> &[FrameAddress] {
        &self.frames
    }

    /// Frame address of a slice.
    pub fn frame(&self, slice_index: usize) -> Option<&FrameAddress> {
        self.frames.get(slice_index)
    }

    /// Validate a signed slice index against this series.
    pub fn check_index(&self, slice_index: i64) -> Result<usize> {
        if slice_index < 0 || slice_index as u64 >= self.frames.len() as u64 {
            return Err(ViewerError::out_of_range(slice_index, self.frames.len()));
        }
        Ok(slice_index as usize)
    }

    /// Resolve relative file addresses against a base directory.
    fn rebase(&mut self, base: &Path) {
        for frame in &mut self.frames {
            if !frame.has_scheme() && Path::new(frame.as_str()).is_relative() {
                *frame = FrameAddress::from_path(&base.join(frame.as_str()));
            }
        }
    }
}

/// An opened imaging study.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StudyManifest", into = "StudyManifest")]
pub struct StudyReference {
    study_id: String,
    modality: Modality,
    series: Vec<SeriesDescriptor>,
}

/// Wire form of a study inside a manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StudyManifest {
    study_id: String,
    modality: Modality,
    #[serde(default)]
    series: Vec<SeriesDescriptor>,
}

impl TryFrom<StudyManifest> for StudyReference {
    type Error = ViewerError;

    fn try_from(m: StudyManifest) -> Result<Self> {
        StudyReference::new(m.study_id, m.modality, m.series)
    }
}

impl From<StudyReference> for StudyManifest {
    fn from(s: StudyReference) -> Self {
        Self {
            study_id: s.study_id,
            modality: s.modality,
            series: s.series,
        }
    }
}

impl StudyReference {
    /// Create a study. Series ids must be unique.
    pub fn new(study_id: impl Into<String>, modality: Modality, series: Vec<SeriesDescriptor>) -> Result<Self> {
        let study_id = study_id.into();
        for (i, s) in series.iter().enumerate() {
            if series[..i].iter().any(|o| o.series_id == s.series_id) {
                return Err(ViewerError::Catalog(format!(
                    "Duplicate series {} in study {}",
                    s.series_id, study_id
                )));
            }
        }
        Ok(Self {
            study_id,
            modality,
            series,
        })
    }

    /// Study identifier.
    pub fn study_id(&self) -> &str {
        &self.study_id
    }

    /// Study modality.
    pub fn modality(&self) -> Modality {
        self.modality
    }

    /// Series in catalog order.
    pub fn series(&self) -> &[SeriesDescriptor] {
        &self.series
    }

    /// Look up a series by id.
    pub fn series_by_id(&self, series_id: &str) -> Option<&SeriesDescriptor> {
        self.series.iter().find(|s| s.series_id == series_id)
    }

    /// The series assigned to new grid cells.
    pub fn first_series(&self) -> Option<&SeriesDescriptor> {
        self.series.first()
    }
}

/// Source of studies and frame addresses.
pub trait StudyCatalog: Send + Sync {
    /// Series of a study in display order.
    fn list_series(&self, study_id: &str) -> Result<Vec<SeriesDescriptor>>;

    /// Frame address of one slice.
    fn resolve_frame(&self, series_id: &str, slice_index: usize) -> Result<FrameAddress>;

    /// Modality of a study.
    fn modality(&self, study_id: &str) -> Result<Modality>;

    /// Load a complete study reference.
    fn open_study(&self, study_id: &str) -> Result<StudyReference> {
        StudyReference::new(study_id, self.modality(study_id)?, self.list_series(study_id)?)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ManifestFile {
    studies: Vec<StudyReference>,
}

/// Catalog backed by a JSON manifest listing every frame explicitly.
///
/// ```json
/// { "studies": [ { "study_id": "mri-knee-001", "modality": "MRI",
///     "series": [ { "series_id": "t2", "label": "T2", "orientation": "sagittal",
///                   "frames": ["t2/IM (1).dcm", "t2/IM (2).dcm"] } ] } ] }
/// ```
#[derive(Debug, Clone, Default)]
pub struct ManifestCatalog {
    studies: Vec<StudyReference>,
}

impl ManifestCatalog {
    /// Build a catalog from already constructed studies.
    pub fn from_studies(studies: Vec<StudyReference>) -> Result<Self> {
        for (i, s) in studies.iter().enumerate() {
            if studies[..i].iter().any(|o| o.study_id == s.study_id) {
                return Err(ViewerError::Catalog(format!("Duplicate study {}", s.study_id)));
            }
        }
        Ok(Self { studies })
    }

    /// Parse a manifest. Frame addresses are kept verbatim.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let file: ManifestFile = serde_json::from_str(text)?;
        Self::from_studies(file.studies)
    }

    /// Load a manifest file; relative frame paths resolve against its directory.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ViewerError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read manifest {}: {}", path.display(), e),
            ))
        })?;
        let mut catalog = Self::from_json_str(&text)?;

        if let Some(base) = path.parent() {
            for study in &mut catalog.studies {
                for series in &mut study.series {
                    series.rebase(base);
                }
            }
        }

        log::info!(
            "Loaded manifest {} ({} studies)",
            path.display(),
            catalog.studies.len()
        );
        Ok(catalog)
    }

    /// Serialize the catalog back to manifest JSON.
    pub fn to_json_string(&self) -> Result<String> {
        let file = ManifestFile {
            studies: self.studies.clone(),
        };
        Ok(serde_json::to_string_pretty(&file)?)
    }

    /// All studies.
    pub fn studies(&self) -> &[StudyReference] {
        &self.studies
    }

    fn study(&self, study_id: &str) -> Result<&StudyReference> {
        self.studies
            .iter()
            .find(|s| s.study_id == study_id)
            .ok_or_else(|| ViewerError::NotFound(format!("Study {}", study_id)))
    }
}

impl StudyCatalog for ManifestCatalog {
    fn list_series(&self, study_id: &str) -> Result<Vec<SeriesDescriptor>> {
        Ok(self.study(study_id)?.series.clone())
    }

    fn resolve_frame(&self, series_id: &str, slice_index: usize) -> Result<FrameAddress> {
        let series = self
            .studies
            .iter()
            .flat_map(|s| s.series.iter())
            .find(|s| s.series_id == series_id)
            .ok_or_else(|| ViewerError::NotFound(format!("Series {}", series_id)))?;

        series
            .frame(slice_index)
            .cloned()
            .ok_or_else(|| ViewerError::out_of_range(slice_index as i64, series.frame_count()))
    }

    fn modality(&self, study_id: &str) -> Result<Modality> {
        Ok(self.study(study_id)?.modality)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MANIFEST: &str = r#"{
        "studies": [{
            "study_id": "mri-shoulder-001",
            "modality": "MRI",
            "series": [
                { "series_id": "s002", "label": "T2", "orientation": "axial",
                  "frames": ["t2/IM (1).dcm", "t2/IM (10).dcm", "t2/IM (100).dcm"] },
                { "series_id": "s005", "label": "STIR",
                  "frames": ["/data/stir/a.dcm"] }
            ]
        }]
    }"#;

    #[test]
    fn test_manifest_preserves_frame_order() {
        let catalog = ManifestCatalog::from_json_str(MANIFEST).unwrap();
        let series = catalog.list_series("mri-shoulder-001").unwrap();

        assert_eq!(series.len(), 2);
        assert_eq!(series[0].label(), "T2");
        assert_eq!(series[0].orientation(), Orientation::Axial);
        assert_eq!(series[1].orientation(), Orientation::None);
        assert_eq!(
            series[0].frames().iter().map(|f| f.as_str()).collect::<Vec<_>>(),
            vec!["t2/IM (1).dcm", "t2/IM (10).dcm", "t2/IM (100).dcm"]
        );
        assert_eq!(
            catalog.resolve_frame("s002", 1).unwrap().as_str(),
            "t2/IM (10).dcm"
        );
    }

    #[test]
    fn test_resolve_errors() {
        let catalog = ManifestCatalog::from_json_str(MANIFEST).unwrap();
        assert!(matches!(
            catalog.resolve_frame("nope", 0),
            Err(ViewerError::NotFound(_))
        ));
        assert!(matches!(
            catalog.resolve_frame("s005", 1),
            Err(ViewerError::IndexOutOfRange { index: 1, len: 1 })
        ));
        assert!(catalog.open_study("missing").is_err());
    }

    #[test]
    fn test_empty_series_rejected() {
        let text = r#"{"studies":[{"study_id":"x","modality":"CT",
            "series":[{"series_id":"a","frames":[]}]}]}"#;
        assert!(ManifestCatalog::from_json_str(text).is_err());
    }

    #[test]
    fn test_duplicate_series_rejected() {
        let a = SeriesDescriptor::new("a", "", Orientation::None, vec!["1".into()]).unwrap();
        assert_eq!(a.label(), "a");
        assert!(StudyReference::new("s", Modality::Ct, vec![a.clone(), a]).is_err());
    }

    #[test]
    fn test_check_index() {
        let series = SeriesDescriptor::new("a", "A", Orientation::Axial, vec!["1".into(), "2".into()]).unwrap();
        assert_eq!(series.check_index(1).unwrap(), 1);
        assert!(series.check_index(2).is_err());
        assert!(series.check_index(-1).is_err());
    }

    #[test]
    fn test_load_rebases_relative_paths() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("manifest.json");
        std::fs::write(&path, MANIFEST).unwrap();

        let catalog = ManifestCatalog::load(&path).unwrap();
        let first = catalog.resolve_frame("s002", 0).unwrap();
        assert_eq!(first.as_str(), dir.path().join("t2/IM (1).dcm").to_string_lossy());

        let absolute = catalog.resolve_frame("s005", 0).unwrap();
        assert_eq!(absolute.as_str(), "/data/stir/a.dcm");
    }

    #[test]
    fn test_scheme_detection() {
        assert!(FrameAddress::new("wadouri:/dicom/a.dcm").has_scheme());
        assert!(FrameAddress::new("https://pacs/frame/1").has_scheme());
        assert!(!FrameAddress::new("C:/data/a.dcm").has_scheme());
        assert!(!FrameAddress::new("t2/IM (1).dcm").has_scheme());
    }

    #[test]
    fn test_manifest_json_roundtrip() {
        let catalog = ManifestCatalog::from_json_str(MANIFEST).unwrap();
        let text = catalog.to_json_string().unwrap();
        let again = ManifestCatalog::from_json_str(&text).unwrap();
        assert_eq!(again.studies(), catalog.studies());
    }
}
