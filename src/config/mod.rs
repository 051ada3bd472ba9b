//! Viewer configuration and modality-specific rules.

pub mod presets;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ViewerError};
use crate::grid::GridLayout;
use crate::mapper::WindowLevel;
use crate::session::SyncPolicy;

pub use presets::{SequencePreset, ViewPreset, WindowPreset};

/// Imaging modality of a study.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Modality {
    /// Magnetic Resonance Imaging
    #[serde(rename = "MRI", alias = "MR")]
    Mri,
    /// Computed Tomography
    #[serde(rename = "CT")]
    Ct,
    /// Projection radiography (CR/DX)
    #[serde(rename = "XRAY", alias = "XR", alias = "DX", alias = "CR")]
    XRay,
    /// Other/Unknown
    #[serde(rename = "OTHER")]
    Other,
}

impl Modality {
    /// Parse modality from a DICOM modality string or catalog label.
    pub fn from_dicom_string(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "MR" | "MRI" => Modality::Mri,
            "CT" => Modality::Ct,
            "CR" | "DX" | "DR" | "XR" | "XRAY" | "X-RAY" => Modality::XRay,
            _ => Modality::Other,
        }
    }

    /// Numeric window presets offered for this modality.
    ///
    /// MRI has none: its sequence presets are informational only.
    pub fn window_presets(&self) -> &'static [WindowPreset] {
        match self {
            Modality::Ct => presets::CT_WINDOW_PRESETS,
            _ => &[],
        }
    }

    /// Look up a window preset by id.
    pub fn window_preset(&self, id: &str) -> Option<&'static WindowPreset> {
        self.window_presets()
            .iter()
            .find(|p| p.id.eq_ignore_ascii_case(id))
    }

    /// Sequence presets (MRI only).
    pub fn sequence_presets(&self) -> &'static [SequencePreset] {
        match self {
            Modality::Mri => presets::MRI_SEQUENCE_PRESETS,
            _ => &[],
        }
    }

    /// View presets (X-ray only).
    pub fn view_presets(&self) -> &'static [ViewPreset] {
        match self {
            Modality::XRay => presets::XRAY_VIEW_PRESETS,
            _ => &[],
        }
    }
}

impl std::fmt::Display for Modality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Modality::Mri => "MRI",
            Modality::Ct => "CT",
            Modality::XRay => "XRAY",
            Modality::Other => "OTHER",
        };
        write!(f, "{}", name)
    }
}

/// Configuration for the viewport engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Maximum number of decoded frames kept in the decode cache.
    pub cache_capacity: usize,
    /// Worker threads used for decoding.
    pub decode_threads: usize,
    /// Grid layout when a session starts.
    pub initial_layout: GridLayout,
    /// Whether slice/window actions are shared across cells.
    pub sync_policy: SyncPolicy,
    /// Whether AI overlays start visible.
    pub show_ai_overlay: bool,
    /// Screen-space tolerance for hit-testing strokes and points.
    pub hit_tolerance_px: f64,
    /// Screen radius of point detection markers.
    pub point_detection_radius_px: f64,
    /// Window applied to every cell on study load.
    pub default_window: WindowLevel,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 32,
            decode_threads: num_cpus::get(),
            initial_layout: GridLayout::Single,
            sync_policy: SyncPolicy::Independent,
            show_ai_overlay: false,
            hit_tolerance_px: 6.0,
            point_detection_radius_px: 20.0,
            default_window: WindowLevel::default(),
        }
    }
}

impl ViewerConfig {
    /// Parse a configuration from TOML text. Missing keys take defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: ViewerConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ViewerError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        log::debug!("Loaded viewer config from {}", path.display());
        Self::from_toml_str(&text)
    }

    /// Serialize to TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ViewerError::Config(e.to_string()))
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.cache_capacity == 0 {
            return Err(ViewerError::Config("cache_capacity must be at least 1".into()));
        }
        if self.decode_threads == 0 {
            return Err(ViewerError::Config("decode_threads must be at least 1".into()));
        }
        if self.hit_tolerance_px < 0.0 || self.point_detection_radius_px <= 0.0 {
            return Err(ViewerError::Config("hit geometry must be positive".into()));
        }
        self.default_window
            .validate()
            .map_err(|e| ViewerError::Config(format!("default_window: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modality_detection() {
        assert_eq!(Modality::from_dicom_string("MR"), Modality::Mri);
        assert_eq!(Modality::from_dicom_string(" ct "), Modality::Ct);
        assert_eq!(Modality::from_dicom_string("DX"), Modality::XRay);
        assert_eq!(Modality::from_dicom_string("US"), Modality::Other);
    }

    #[test]
    fn test_presets_scoped_by_modality() {
        let brain = Modality::Ct.window_preset("brain").unwrap();
        assert_eq!((brain.width, brain.center), (80.0, 40.0));
        let bone = Modality::Ct.window_preset("Bone").unwrap();
        assert_eq!((bone.width, bone.center), (2500.0, 480.0));

        assert!(Modality::Mri.window_presets().is_empty());
        assert!(!Modality::Mri.sequence_presets().is_empty());
        assert!(Modality::XRay.view_presets().iter().any(|p| p.invert));
    }

    #[test]
    fn test_config_defaults() {
        let config = ViewerConfig::default();
        assert_eq!(config.cache_capacity, 32);
        assert_eq!(config.default_window, WindowLevel { width: 400.0, center: 40.0 });
        assert_eq!(config.sync_policy, SyncPolicy::Independent);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_toml() {
        let config = ViewerConfig::from_toml_str(
            r#"
            cache_capacity = 8
            sync_policy = "linked"
            initial_layout = "2x2"

            [default_window]
            width = 80.0
            center = 40.0
            "#,
        )
        .unwrap();

        assert_eq!(config.cache_capacity, 8);
        assert_eq!(config.sync_policy, SyncPolicy::Linked);
        assert_eq!(config.initial_layout, GridLayout::Quad);
        assert_eq!(config.default_window.width, 80.0);
        assert_eq!(config.hit_tolerance_px, 6.0);
    }

    #[test]
    fn test_config_rejects_bad_values() {
        assert!(ViewerConfig::from_toml_str("cache_capacity = 0").is_err());
        assert!(ViewerConfig::from_toml_str("[default_window]\nwidth = 0.0\ncenter = 1.0").is_err());
        assert!(ViewerConfig::from_toml_str("cache_capacity = \"many\"").is_err());
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let config = ViewerConfig {
            decode_threads: 2,
            ..Default::default()
        };
        let text = config.to_toml_string().unwrap();
        let parsed = ViewerConfig::from_toml_str(&text).unwrap();
        assert_eq!(parsed.decode_threads, 2);
    }
}
