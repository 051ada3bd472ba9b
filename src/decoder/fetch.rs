//! Byte sources for encoded frames.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::catalog::FrameAddress;
use crate::error::{Result, ViewerError};

/// Retrieves the encoded bytes behind a frame address.
pub trait FrameFetcher: Send + Sync {
    /// Fetch the complete encoded frame.
    fn fetch(&self, address: &FrameAddress) -> Result<Vec<u8>>;
}

/// Fetcher reading frames from the local file system.
///
/// Addresses may carry a `file://` or `wadouri:` prefix; relative paths
/// resolve against the base directory when one is set.
#[derive(Debug, Clone, Default)]
pub struct FsFetcher {
    base_dir: Option<PathBuf>,
}

impl FsFetcher {
    /// Create a fetcher resolving relative paths against the working directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative paths against `dir`.
    pub fn with_base_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.base_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// File system path behind an address.
    pub fn resolve(&self, address: &FrameAddress) -> PathBuf {
        let locator = address.as_str();
        let locator = locator
            .strip_prefix("file://")
            .or_else(|| locator.strip_prefix("wadouri:"))
            .unwrap_or(locator);

        let path = Path::new(locator);
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }
}

impl FrameFetcher for FsFetcher {
    fn fetch(&self, address: &FrameAddress) -> Result<Vec<u8>> {
        let path = self.resolve(address);
        std::fs::read(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                ViewerError::NotFound(format!("Frame {} ({})", address, path.display()))
            }
            _ => ViewerError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read {}: {}", path.display(), e),
            )),
        })
    }
}

/// Fetcher serving frames from memory.
#[derive(Debug, Default)]
pub struct MemoryFetcher {
    frames: RwLock<HashMap<FrameAddress, Vec<u8>>>,
}

impl MemoryFetcher {
    /// Create an empty fetcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the bytes of a frame, replacing any previous entry.
    pub fn insert(&self, address: impl Into<FrameAddress>, bytes: Vec<u8>) {
        if let Ok(mut frames) = self.frames.write() {
            frames.insert(address.into(), bytes);
        }
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with_frame(self, address: impl Into<FrameAddress>, bytes: Vec<u8>) -> Self {
        self.insert(address, bytes);
        self
    }

    /// Number of stored frames.
    pub fn len(&self) -> usize {
        self.frames.read().map(|f| f.len()).unwrap_or(0)
    }

    /// Whether no frames are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FrameFetcher for MemoryFetcher {
    fn fetch(&self, address: &FrameAddress) -> Result<Vec<u8>> {
        let frames = self
            .frames
            .read()
            .map_err(|_| ViewerError::Internal("frame store lock poisoned".into()))?;
        frames
            .get(address)
            .cloned()
            .ok_or_else(|| ViewerError::NotFound(format!("Frame {}", address)))
    }
}
