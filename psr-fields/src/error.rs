//! Error types for PSR dataset fields.
//!
//! Covers missing dataset inputs, artifact decoding, mesh parsing, the
//! external solver boundary and configuration.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Primary error type for field loading and cache regeneration.
#[derive(Debug, Error)]
pub enum FieldError {
    /// A required input file does not exist.
    #[error("missing input: {}", path.display())]
    MissingInput { path: PathBuf },

    /// Filesystem operation failed.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed `.npy` payload.
    #[error("invalid npy data in {}: {reason}", path.display())]
    Npy { path: PathBuf, reason: String },

    /// Malformed `.npz` container.
    #[error("invalid npz archive {}: {source}", path.display())]
    Zip {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    /// Archive does not contain the requested array.
    #[error("array '{key}' not found in {}", path.display())]
    MissingKey { path: PathBuf, key: String },

    /// Mesh could not be parsed or sampled.
    #[error("mesh error in {}: {reason}", path.display())]
    Mesh { path: PathBuf, reason: String },

    /// External grid solver failed.
    #[error("grid solver failed: {message}")]
    Solver { message: String },

    /// Array has an unexpected shape.
    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch { expected: Vec<usize>, got: Vec<usize> },

    /// Model path cannot be split into dataset and model names.
    #[error("cannot derive dataset layout from {}", path.display())]
    InvalidPath { path: PathBuf },

    /// Configuration value out of range.
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Configuration file could not be parsed.
    #[error("failed to parse configuration: {0}")]
    Config(#[from] serde_json::Error),

    /// Launcher could not start or supervise its workers.
    #[error("launch failed: {message}")]
    Launch { message: String },
}

impl FieldError {
    /// Wrap an I/O error, mapping `NotFound` to [`FieldError::MissingInput`].
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            FieldError::MissingInput {
                path: path.to_path_buf(),
            }
        } else {
            FieldError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }

    pub fn npy(path: &Path, reason: impl Into<String>) -> Self {
        FieldError::Npy {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    pub fn mesh(path: &Path, reason: impl Into<String>) -> Self {
        FieldError::Mesh {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    pub fn solver(message: impl Into<String>) -> Self {
        FieldError::Solver {
            message: message.into(),
        }
    }

    /// Returns true if a required input is absent
    pub fn is_missing_input(&self) -> bool {
        matches!(self, FieldError::MissingInput { .. })
    }

    /// Returns true if this error indicates an unreadable artifact
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            FieldError::Npy { .. }
                | FieldError::Zip { .. }
                | FieldError::MissingKey { .. }
                | FieldError::ShapeMismatch { .. }
        )
    }
}

/// Result type alias for field operations
pub type Result<T> = std::result::Result<T, FieldError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_missing_input() {
        let err = FieldError::io(
            Path::new("a/b.npz"),
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.is_missing_input());
        assert!(!err.is_corruption());
    }

    #[test]
    fn decoding_errors_are_corruption() {
        assert!(FieldError::npy(Path::new("x.npy"), "bad magic").is_corruption());
        let other = FieldError::io(
            Path::new("x.npz"),
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(!other.is_corruption());
    }
}
