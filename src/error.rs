use std::io;

/// Failure categories surfaced by the virtual filesystem.
///
/// `NotFound` and `InvalidPath` are raised synchronously by lookups;
/// the remaining kinds come out of container parsing and extraction.
#[derive(Debug, thiserror::Error)]
pub enum VfsError {
    #[error("entry not found: {0}")]
    NotFound(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("no registered handler accepts: {0}")]
    Unsupported(String),

    #[error("corrupted archive {path}: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("archive nesting depth exceeded at: {0}")]
    DepthExceeded(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl VfsError {
    pub fn corrupt(path: impl Into<String>, reason: impl ToString) -> Self {
        Self::Corrupt {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, VfsError>;
