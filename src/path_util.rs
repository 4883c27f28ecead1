//! Existence checks for the paths named by a [`BackupRequest`](crate::request::BackupRequest).
//!
//! Checks are tri-state and never collapse OS faults into "absent": a
//! permission error while inspecting a path surfaces as [`BackupError::Io`].

use crate::error::{BackupError, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Result of checking one configured path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExistenceState {
    /// The path was given as an empty string.
    Unspecified,
    Present,
    Absent,
}

impl ExistenceState {
    pub fn is_present(self) -> bool {
        matches!(self, ExistenceState::Present)
    }
}

/// Classifies `path` as a directory.
///
/// An existing non-directory counts as [`ExistenceState::Absent`].
///
/// # Errors
/// Returns [`BackupError::Io`] if the check itself fails for any reason other
/// than the path (or one of its parents) not existing.
pub fn classify_dir(path: Option<&Path>) -> Result<ExistenceState> {
    classify(path, |meta| meta.is_dir())
}

/// Classifies `path` as a regular file (symlinks are followed).
pub fn classify_file(path: Option<&Path>) -> Result<ExistenceState> {
    classify(path, |meta| meta.is_file())
}

fn classify(path: Option<&Path>, is_kind: impl Fn(&fs::Metadata) -> bool) -> Result<ExistenceState> {
    let Some(path) = path.filter(|p| !p.as_os_str().is_empty()) else {
        return Ok(ExistenceState::Unspecified);
    };
    match fs::metadata(extended_path(path)) {
        Ok(meta) if is_kind(&meta) => Ok(ExistenceState::Present),
        Ok(_) => Ok(ExistenceState::Absent),
        Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) => {
            Ok(ExistenceState::Absent)
        }
        Err(source) => Err(BackupError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Returns the form of `path` that bypasses the platform path-length ceiling.
///
/// On Windows absolute paths get the `\\?\` (or `\\?\UNC\`) prefix; everywhere
/// else the path is returned unchanged.
#[cfg(windows)]
pub fn extended_path(path: &Path) -> PathBuf {
    use std::path::{Component, Prefix};

    let Ok(abs) = std::path::absolute(path) else {
        return path.to_path_buf();
    };
    let Some(Component::Prefix(prefix)) = abs.components().next() else {
        return abs;
    };
    let Some(text) = abs.to_str() else {
        return abs;
    };
    match prefix.kind() {
        Prefix::Disk(_) => PathBuf::from(format!(r"\\?\{text}")),
        Prefix::UNC(..) => PathBuf::from(format!(r"\\?\UNC\{}", &text[2..])),
        _ => abs,
    }
}

#[cfg(not(windows))]
pub fn extended_path(path: &Path) -> PathBuf {
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::TempDir;

    #[test]
    fn test_classify_unspecified() -> Result<()> {
        assert_eq!(classify_dir(None)?, ExistenceState::Unspecified);
        assert_eq!(classify_file(Some(Path::new("")))?, ExistenceState::Unspecified);
        Ok(())
    }

    #[test]
    fn test_classify_present_and_absent() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let file = temp_dir.path().join("x.txt");
        File::create(&file)?;

        assert_eq!(classify_dir(Some(temp_dir.path()))?, ExistenceState::Present);
        assert_eq!(classify_file(Some(&file))?, ExistenceState::Present);

        // wrong kind
        assert_eq!(classify_dir(Some(&file))?, ExistenceState::Absent);
        assert_eq!(classify_file(Some(temp_dir.path()))?, ExistenceState::Absent);

        let missing = temp_dir.path().join("missing");
        assert_eq!(classify_dir(Some(&missing))?, ExistenceState::Absent);
        // a file used as a parent directory
        assert_eq!(
            classify_file(Some(&file.join("child")))?,
            ExistenceState::Absent
        );
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_classify_permission_denied_is_not_absent() -> anyhow::Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new()?;
        let locked = temp_dir.path().join("locked");
        fs::create_dir(&locked)?;
        File::create(locked.join("x.txt"))?;
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000))?;

        let result = classify_file(Some(&locked.join("x.txt")));
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755))?;

        // root ignores permission bits entirely
        if let Ok(state) = result {
            assert_eq!(state, ExistenceState::Present);
        } else {
            assert!(matches!(result, Err(BackupError::Io { .. })));
        }
        Ok(())
    }

    #[cfg(not(windows))]
    #[test]
    fn test_extended_path_is_identity() {
        let path = Path::new("/tmp/some/deep/path");
        assert_eq!(extended_path(path), path);
    }

    #[cfg(windows)]
    #[test]
    fn test_extended_path_prefixes_disk_paths() {
        let path = Path::new(r"C:\backups\out");
        assert_eq!(extended_path(path), PathBuf::from(r"\\?\C:\backups\out"));

        let verbatim = Path::new(r"\\?\C:\backups\out");
        assert_eq!(extended_path(verbatim), verbatim);
    }
}
