use std::path::PathBuf;

use thiserror::Error;

/// Every fatal failure of an install run.
///
/// Dependency-guard problems are not represented here: they are reported as
/// [`crate::runtime_dep::DependencyOutcome::Warning`] and never abort a run.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Host unreachable, non-success status, missing tag or malformed body.
    #[error("failed to resolve release from {url}: {reason}")]
    Resolution { url: String, reason: String },

    #[error("no asset matching `{suffix}` found in {searched} release(s)")]
    NotFound { suffix: String, searched: usize },

    /// The artifact was downloaded but does not have the expected layout.
    #[error("packaging error in {asset}: {reason}")]
    Packaging { asset: String, reason: String },

    #[error("permission denied installing to {path:?}: {reason}")]
    Permission { path: PathBuf, reason: String },

    #[error("download of {url} failed: {reason}")]
    Download { url: String, reason: String },

    #[error("IO error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("install state error: {0}")]
    State(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type FetchResult<T> = Result<T, FetchError>;

impl FetchError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FetchError::Io {
            path: path.into(),
            source,
        }
    }

    /// Process exit status for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            FetchError::Resolution { .. } => 2,
            FetchError::NotFound { .. } => 3,
            FetchError::Packaging { .. } => 4,
            FetchError::Permission { .. } => 5,
            FetchError::Download { .. }
            | FetchError::Io { .. }
            | FetchError::State(_)
            | FetchError::Config(_) => 1,
        }
    }
}
