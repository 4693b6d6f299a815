use std::path::{Path, PathBuf};

use thiserror::Error;

/// Failure kinds attached as context to error chains produced by this crate.
///
/// Callers that need to classify a failure can walk the chain with
/// `err.downcast_ref::<PreprocessError>()`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreprocessError {
    /// The chunk encoder rejected a slice of games.
    #[error("encoder rejected a chunk")]
    Encoding,
    /// A file-system read, write, or delete failed.
    #[error("storage failure at {}", path.display())]
    Storage { path: PathBuf },
    /// On-disk state disagrees with the frozen counters.
    #[error("dataset consistency violated: {detail}")]
    Consistency { detail: String },
    /// The run was misconfigured and no phase was started.
    #[error("invalid configuration: {detail}")]
    Config { detail: String },
    /// The overall deadline expired before the run finished.
    #[error("preprocessing deadline expired")]
    DeadlineExceeded,
    /// A worker stopped early because a sibling failed.
    #[error("worker cancelled after a sibling failure")]
    Cancelled,
}

impl PreprocessError {
    pub fn storage(path: impl AsRef<Path>) -> Self {
        PreprocessError::Storage {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn consistency(detail: impl Into<String>) -> Self {
        PreprocessError::Consistency {
            detail: detail.into(),
        }
    }

    pub fn config(detail: impl Into<String>) -> Self {
        PreprocessError::Config {
            detail: detail.into(),
        }
    }
}
