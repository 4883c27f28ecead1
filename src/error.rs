//! Error types for the backup pipeline.
//!
//! Every stage reports through [`BackupError`]. None of these are fatal to the
//! process: a direct invocation maps them to an exit status, a watch-triggered
//! run logs them and keeps watching.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Unified result type for all fallible operations in fbackup.
pub type Result<T> = std::result::Result<T, BackupError>;

#[derive(Debug, Error)]
pub enum BackupError {
    /// The configured source directory does not exist.
    #[error("Source directory {0:?} does not exist")]
    SourceNotFound(PathBuf),

    /// The file or directory designated for backup does not exist.
    #[error("Target {0:?} does not exist")]
    TargetNotFound(PathBuf),

    #[error("Failed to create destination directory {path:?}: {source}")]
    DestinationCreateFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to copy to {path:?}: {reason}")]
    CopyFailed { path: PathBuf, reason: String },

    #[error("Failed to build archive {path:?}: {reason}")]
    ArchiveFailed { path: PathBuf, reason: String },

    #[error("Upload to '{target}' failed: {reason}")]
    UploadFailed { target: String, reason: String },

    /// The request cannot be run as given (missing destination, no subject).
    #[error("Invalid backup request: {0}")]
    InvalidRequest(String),

    /// A cloud target identifier that no registered integration knows about.
    #[error("Unknown cloud target '{0}'")]
    UnknownCloudTarget(String),

    /// An OS-level fault while inspecting a path, e.g. permission denied.
    #[error("Cannot access {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl BackupError {
    pub(crate) fn copy_failed(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        BackupError::CopyFailed {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn archive_failed(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        BackupError::ArchiveFailed {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Name of the pipeline stage that produced this error, for user-facing reports.
    pub fn stage(&self) -> &'static str {
        match self {
            BackupError::SourceNotFound(_)
            | BackupError::TargetNotFound(_)
            | BackupError::Io { .. } => "path check",
            BackupError::DestinationCreateFailed { .. } | BackupError::CopyFailed { .. } => {
                "copy"
            }
            BackupError::ArchiveFailed { .. } => "compression",
            BackupError::UploadFailed { .. } => "upload",
            BackupError::InvalidRequest(_)
            | BackupError::UnknownCloudTarget(_)
            | BackupError::Config(_) => "configuration",
        }
    }
}
