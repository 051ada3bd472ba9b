//! Build a series from the frames found in a directory.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use crate::catalog::{FrameAddress, Orientation, SeriesDescriptor};
use crate::error::{Result, ViewerError};

/// Frame discovery for directories holding one series each.
///
/// Files are ordered with a natural sort so `IM (2).dcm` precedes
/// `IM (10).dcm`.
pub struct FrameDiscovery {
    /// File patterns to match (case-insensitive, `*` and `?`).
    patterns: Vec<String>,

    /// Whether to follow symbolic links.
    follow_symlinks: bool,
}

impl Default for FrameDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDiscovery {
    /// Create a discovery matching DICOM and common raster files.
    pub fn new() -> Self {
        Self {
            patterns: vec![
                "*.dcm".to_string(),
                "*.png".to_string(),
                "*.jpg".to_string(),
                "*.jpeg".to_string(),
            ],
            follow_symlinks: false,
        }
    }

    /// Replace the file patterns.
    pub fn patterns(mut self, patterns: Vec<String>) -> Self {
        self.patterns = patterns;
        self
    }

    /// Add a pattern to match.
    pub fn pattern(mut self, pattern: &str) -> Self {
        self.patterns.push(pattern.to_string());
        self
    }

    /// Enable following symbolic links.
    pub fn follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    /// Matching files directly inside `dir`, naturally sorted.
    pub fn discover(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        if !dir.exists() {
            return Err(ViewerError::NotFound(format!(
                "Directory not found: {}",
                dir.display()
            )));
        }
        if !dir.is_dir() {
            return Err(ViewerError::Catalog(format!(
                "Not a directory: {}",
                dir.display()
            )));
        }

        let entries = std::fs::read_dir(dir).map_err(|e| {
            ViewerError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read directory {}: {}", dir.display(), e),
            ))
        })?;

        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();

            let metadata = if self.follow_symlinks {
                std::fs::metadata(&path)
            } else {
                std::fs::symlink_metadata(&path)
            };
            let metadata = match metadata {
                Ok(m) => m,
                Err(e) => {
                    log::debug!("Skipping {}: {}", path.display(), e);
                    continue;
                }
            };

            if metadata.is_file() && self.matches_pattern(&path) {
                files.push(path);
            }
        }

        files.sort_by(|a, b| natural_cmp(&file_name(a), &file_name(b)));
        log::debug!("Discovered {} frames in {}", files.len(), dir.display());
        Ok(files)
    }

    /// Discover a directory and wrap the result as a series.
    pub fn discover_series(
        &self,
        dir: &Path,
        series_id: &str,
        label: &str,
        orientation: Orientation,
    ) -> Result<SeriesDescriptor> {
        let frames = self
            .discover(dir)?
            .iter()
            .map(|p| FrameAddress::from_path(p))
            .collect();
        SeriesDescriptor::new(series_id, label, orientation, frames)
    }

    fn matches_pattern(&self, path: &Path) -> bool {
        let name = file_name(path).to_lowercase();
        if name.is_empty() {
            return false;
        }
        self.patterns
            .iter()
            .any(|pattern| glob_match(&name, &pattern.to_lowercase()))
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Glob matching supporting `*` and `?`.
fn glob_match(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();

    let (mut ti, mut pi) = (0, 0);
    // position of the last '*' and the text index it was tried at
    let mut star: Option<(usize, usize)> = None;

    while ti < text.len() {
        if pi < pattern.len() && (pattern[pi] == '?' || pattern[pi] == text[ti]) {
            ti += 1;
            pi += 1;
        } else if pi < pattern.len() && pattern[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }

    pattern[pi..].iter().all(|&c| c == '*')
}

/// Compare names treating digit runs as numbers.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut a = a.chars().peekable();
    let mut b = b.chars().peekable();

    loop {
        match (a.peek().copied(), b.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(ca), Some(cb)) if ca.is_ascii_digit() && cb.is_ascii_digit() => {
                let na = take_digits(&mut a);
                let nb = take_digits(&mut b);
                let ta = na.trim_start_matches('0');
                let tb = nb.trim_start_matches('0');
                let ord = ta
                    .len()
                    .cmp(&tb.len())
                    .then_with(|| ta.cmp(tb))
                    .then_with(|| na.len().cmp(&nb.len()));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (Some(ca), Some(cb)) => {
                let ord = ca.to_ascii_lowercase().cmp(&cb.to_ascii_lowercase());
                if ord != Ordering::Equal {
                    return ord;
                }
                a.next();
                b.next();
            }
        }
    }
}

fn take_digits(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut digits = String::new();
    while let Some(&c) = chars.peek() {
        if !c.is_ascii_digit() {
            break;
        }
        digits.push(c);
        chars.next();
    }
    digits
}
