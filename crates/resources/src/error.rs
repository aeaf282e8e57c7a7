//! Error types for resource loading.

use std::path::PathBuf;
use thiserror::Error;

/// Error type for resource loading operations.
#[derive(Error, Debug)]
pub enum ResourceError {
    /// The file could not be opened or read.
    #[error("Failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A malformed record in an OBJ file.
    #[error("{path}:{line}: {message}")]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    /// A face refers to a vertex that does not exist.
    #[error("{path}:{line}: vertex index {index} out of range (1..={count})")]
    IndexOutOfRange {
        path: PathBuf,
        line: usize,
        index: i64,
        count: usize,
    },

    /// The image could not be decoded.
    #[error("Failed to decode image '{path}': {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// The decoded image has a zero dimension.
    #[error("Image '{0}' is empty")]
    EmptyImage(PathBuf),
}

/// Result type alias for resource operations.
pub type ResourceResult<T> = Result<T, ResourceError>;
