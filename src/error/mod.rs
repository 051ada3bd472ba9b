//! Error types for the viewport engine.

use thiserror::Error;

/// Result type alias for the library.
pub type Result<T> = std::result::Result<T, ViewerError>;

/// Main error type for the viewport engine.
#[derive(Error, Debug)]
pub enum ViewerError {
    /// A frame address or catalog entry could not be resolved.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The byte stream uses an encoding no registered codec handles.
    #[error("Unsupported encoding: {0}")]
    UnsupportedEncoding(String),

    /// The byte stream parsed but its structure is inconsistent.
    #[error("Corrupt data: {0}")]
    CorruptData(String),

    /// Window width was zero or negative.
    #[error("Invalid window: width must be positive, got {width}")]
    InvalidWindow {
        /// The rejected width.
        width: f64,
    },

    /// Slice or cell index outside the valid range.
    #[error("Index {index} out of range (valid: 0..{len})")]
    IndexOutOfRange {
        /// The rejected index.
        index: i64,
        /// Number of valid entries.
        len: usize,
    },

    /// The decode was superseded by a newer request.
    #[error("Decode canceled")]
    Canceled,

    /// Study catalog is inconsistent (empty series, duplicate ids).
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// A session action was rejected.
    #[error("Invalid action: {0}")]
    InvalidAction(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ViewerError {
    /// Whether this error only signals a superseded request.
    pub fn is_canceled(&self) -> bool {
        matches!(self, ViewerError::Canceled)
    }

    /// Build an out-of-range error for a slice or cell index.
    pub fn out_of_range(index: i64, len: usize) -> Self {
        ViewerError::IndexOutOfRange { index, len }
    }
}

impl From<dicom_object::ReadError> for ViewerError {
    fn from(err: dicom_object::ReadError) -> Self {
        ViewerError::CorruptData(format!("DICOM parse failed: {}", err))
    }
}

impl From<image::ImageError> for ViewerError {
    fn from(err: image::ImageError) -> Self {
        match err {
            image::ImageError::Unsupported(e) => ViewerError::UnsupportedEncoding(e.to_string()),
            image::ImageError::IoError(e) => ViewerError::Io(e),
            other => ViewerError::CorruptData(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for ViewerError {
    fn from(err: serde_json::Error) -> Self {
        ViewerError::Config(format!("JSON: {}", err))
    }
}

impl From<toml::de::Error> for ViewerError {
    fn from(err: toml::de::Error) -> Self {
        ViewerError::Config(format!("TOML: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_range_message() {
        let err = ViewerError::out_of_range(-1, 20);
        assert_eq!(err.to_string(), "Index -1 out of range (valid: 0..20)");
    }

    #[test]
    fn test_dicom_read_error_is_corrupt() {
        let read = dicom_object::from_reader(std::io::Cursor::new(b"DICM\x02\x00".to_vec()));
        match read {
            Err(e) => assert!(matches!(ViewerError::from(e), ViewerError::CorruptData(_))),
            Ok(_) => panic!("truncated stream parsed"),
        }
    }

    #[test]
    fn test_canceled_flag() {
        assert!(ViewerError::Canceled.is_canceled());
        assert!(!ViewerError::NotFound("x".into()).is_canceled());
    }
}
