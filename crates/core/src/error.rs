use std::path::PathBuf;
use thiserror::Error;

/// Per-file failure. Never escapes a batch or the watch loop.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("unreadable source {}: {reason}", path.display())]
    UnreadableSource { path: PathBuf, reason: String },

    #[error("encode failed for {}: {reason}", path.display())]
    Encode { path: PathBuf, reason: String },

    #[error("file name of {} normalizes to an empty name", path.display())]
    InvalidName { path: PathBuf },

    #[error("worker for {} did not complete: {reason}", path.display())]
    Task { path: PathBuf, reason: String },
}

impl ProcessError {
    pub fn unreadable(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::UnreadableSource {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn encode(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Encode {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn path(&self) -> &PathBuf {
        match self {
            Self::UnreadableSource { path, .. }
            | Self::Encode { path, .. }
            | Self::InvalidName { path }
            | Self::Task { path, .. } => path,
        }
    }
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("manifest json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("failed to watch {}: {reason}", dir.display())]
    Init { dir: PathBuf, reason: String },

    #[error("gave up re-establishing watch on {} after {attempts} attempts", dir.display())]
    Exhausted { dir: PathBuf, attempts: u32 },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Watch(#[from] WatchError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
