//! The immutable description of one backup invocation.

use crate::error::{BackupError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Everything a pipeline run needs to know, fully populated by the caller.
///
/// Empty strings mean "not specified". All fields are trimmed on the way in.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct BackupRequest {
    /// Directory containing the target, or empty.
    pub source_path: String,
    /// Directory receiving the output. Required.
    pub destination_path: String,
    /// File name under `source_path`, or empty to back up the whole source directory.
    pub target_file: String,
    /// Explicit output name, or empty to derive one.
    pub backup_name: String,
    /// Compress the copy into a zip archive.
    pub compress: bool,
    /// Cloud target identifiers, e.g. `google_drive`.
    pub cloud_targets: BTreeSet<String>,
}

/// The file or directory designated for backup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subject {
    /// `target_file` (joined to `source_path` when one is given).
    File(PathBuf),
    /// The whole `source_path`.
    Directory(PathBuf),
}

impl Subject {
    pub fn path(&self) -> &Path {
        match self {
            Subject::File(path) | Subject::Directory(path) => path,
        }
    }
}

impl BackupRequest {
    pub fn new(source_path: impl AsRef<str>, destination_path: impl AsRef<str>) -> Self {
        Self {
            source_path: source_path.as_ref().trim().to_string(),
            destination_path: destination_path.as_ref().trim().to_string(),
            ..Self::default()
        }
    }

    pub fn target_file(mut self, target_file: impl AsRef<str>) -> Self {
        self.target_file = target_file.as_ref().trim().to_string();
        self
    }

    pub fn backup_name(mut self, backup_name: impl AsRef<str>) -> Self {
        self.backup_name = backup_name.as_ref().trim().to_string();
        self
    }

    pub fn compress(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn cloud_target(mut self, target: impl AsRef<str>) -> Self {
        let target = target.as_ref().trim();
        if !target.is_empty() {
            self.cloud_targets.insert(target.to_string());
        }
        self
    }

    /// Trims every field in place. Requests read from a config file go through here.
    pub fn normalized(mut self) -> Self {
        for field in [
            &mut self.source_path,
            &mut self.destination_path,
            &mut self.target_file,
            &mut self.backup_name,
        ] {
            *field = field.trim().to_string();
        }
        self.cloud_targets = self
            .cloud_targets
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        self
    }

    pub fn source(&self) -> Option<&Path> {
        non_empty(&self.source_path)
    }

    pub fn destination(&self) -> Option<&Path> {
        non_empty(&self.destination_path)
    }

    pub fn target(&self) -> Option<&Path> {
        non_empty(&self.target_file)
    }

    /// The subject of this request, or `None` when neither a source nor a target is given.
    pub fn subject(&self) -> Option<Subject> {
        match (self.source(), self.target()) {
            (Some(source), Some(target)) => Some(Subject::File(source.join(target))),
            (None, Some(target)) => Some(Subject::File(target.to_path_buf())),
            (Some(source), None) => Some(Subject::Directory(source.to_path_buf())),
            (None, None) => None,
        }
    }

    /// Checks the structural preconditions every run relies on.
    pub fn validate(&self) -> Result<()> {
        if self.destination().is_none() {
            return Err(BackupError::InvalidRequest(
                "a destination directory must be specified".to_string(),
            ));
        }
        if self.subject().is_none() {
            return Err(BackupError::InvalidRequest(
                "either a source directory or a target file must be specified".to_string(),
            ));
        }
        Ok(())
    }
}

fn non_empty(value: &str) -> Option<&Path> {
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(Path::new(value))
    }
}
