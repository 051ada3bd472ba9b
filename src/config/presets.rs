//! Modality preset tables offered to the control surface.

use crate::mapper::WindowLevel;

/// Named CT window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowPreset {
    /// Stable identifier.
    pub id: &'static str,
    /// Display name.
    pub name: &'static str,
    /// Window width in HU.
    pub width: f64,
    /// Window center (level) in HU.
    pub center: f64,
}

impl WindowPreset {
    /// The preset as a window.
    pub fn window(&self) -> WindowLevel {
        WindowLevel {
            width: self.width,
            center: self.center,
        }
    }
}

/// MRI sequence descriptor. Display-only, not an intensity remap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SequencePreset {
    /// Stable identifier.
    pub id: &'static str,
    /// Display name.
    pub name: &'static str,
    /// Repetition time (ms).
    pub tr_ms: u32,
    /// Echo time (ms).
    pub te_ms: u32,
    /// What the sequence highlights.
    pub description: &'static str,
}

/// X-ray view mode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewPreset {
    /// Stable identifier.
    pub id: &'static str,
    /// Display name.
    pub name: &'static str,
    /// Short description.
    pub description: &'static str,
    /// Whether selecting this view inverts the display.
    pub invert: bool,
}

/// CT window presets.
pub const CT_WINDOW_PRESETS: &[WindowPreset] = &[
    WindowPreset { id: "brain", name: "Brain", width: 80.0, center: 40.0 },
    WindowPreset { id: "subdural", name: "Subdural", width: 200.0, center: 75.0 },
    WindowPreset { id: "stroke", name: "Stroke", width: 8.0, center: 32.0 },
    WindowPreset { id: "bone", name: "Bone", width: 2500.0, center: 480.0 },
    WindowPreset { id: "lung", name: "Lung", width: 1500.0, center: -600.0 },
    WindowPreset { id: "mediastinum", name: "Mediastinum", width: 350.0, center: 50.0 },
    WindowPreset { id: "abdomen", name: "Abdomen", width: 350.0, center: 40.0 },
    WindowPreset { id: "liver", name: "Liver", width: 150.0, center: 30.0 },
    WindowPreset { id: "soft-tissue", name: "Soft Tissue", width: 400.0, center: 40.0 },
];

/// MRI sequence presets.
pub const MRI_SEQUENCE_PRESETS: &[SequencePreset] = &[
    SequencePreset { id: "t1", name: "T1-Weighted", tr_ms: 450, te_ms: 15, description: "Anatomy" },
    SequencePreset { id: "t2", name: "T2-Weighted", tr_ms: 4000, te_ms: 100, description: "Edema/Fluid" },
    SequencePreset { id: "flair", name: "FLAIR", tr_ms: 9000, te_ms: 120, description: "Suppress CSF" },
    SequencePreset { id: "dwi", name: "Diffusion", tr_ms: 3000, te_ms: 80, description: "Ischemia" },
    SequencePreset { id: "pd", name: "Proton Density", tr_ms: 2000, te_ms: 20, description: "Tissue contrast" },
    SequencePreset { id: "t1-gad", name: "T1 + Gad", tr_ms: 450, te_ms: 15, description: "Enhancement" },
];

/// X-ray view presets.
pub const XRAY_VIEW_PRESETS: &[ViewPreset] = &[
    ViewPreset { id: "standard", name: "Standard", description: "Default view", invert: false },
    ViewPreset { id: "bone", name: "Bone Enhancement", description: "Enhance bone structures", invert: false },
    ViewPreset { id: "soft", name: "Soft Tissue", description: "Enhance soft tissue", invert: false },
    ViewPreset { id: "inverted", name: "Inverted", description: "Negative image", invert: true },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_windows_are_valid() {
        for preset in CT_WINDOW_PRESETS {
            assert!(preset.window().validate().is_ok(), "{}", preset.id);
        }
    }

    #[test]
    fn test_preset_ids_unique() {
        let mut ids: Vec<_> = CT_WINDOW_PRESETS.iter().map(|p| p.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), CT_WINDOW_PRESETS.len());
    }
}
