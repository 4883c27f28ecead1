//! Copy engine: places the backup subject at `destination/<resolved name>`.
//!
//! A failed copy never leaves a half-written artifact under the final name:
//! whatever this invocation created at the destination is removed before the
//! error is returned. Content that already occupied the name is never touched.

use crate::error::{BackupError, Result};
use crate::naming::ResolvedName;
use crate::path_util::{ExistenceState, classify_dir, classify_file, extended_path};
use crate::request::{BackupRequest, Subject};
use filetime::FileTime;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// Copies the subject of `request` into its destination under `name`.
///
/// Preconditions are checked in order: the source directory (when given), then
/// the subject itself. A missing destination directory is created first.
///
/// # Returns
/// The artifact path, always `destination/name`.
///
/// # Errors
/// `SourceNotFound`, `TargetNotFound`, `DestinationCreateFailed` or
/// `CopyFailed`; classifier faults surface as `Io`.
pub fn copy_backup(request: &BackupRequest, name: &ResolvedName) -> Result<PathBuf> {
    let source = request.source();
    if classify_dir(source)? == ExistenceState::Absent {
        let source = source.unwrap_or(Path::new("")).to_path_buf();
        error!(source = ?source, "Source directory does not exist");
        return Err(BackupError::SourceNotFound(source));
    }

    let subject = request.subject().ok_or_else(|| {
        BackupError::InvalidRequest("nothing to back up".to_string())
    })?;
    let subject_state = match &subject {
        Subject::File(path) => classify_file(Some(path))?,
        Subject::Directory(path) => classify_dir(Some(path))?,
    };
    if !subject_state.is_present() {
        error!(target_path = ?subject.path(), "Target does not exist");
        return Err(BackupError::TargetNotFound(subject.path().to_path_buf()));
    }

    let destination = request.destination().ok_or_else(|| {
        BackupError::InvalidRequest("a destination directory must be specified".to_string())
    })?;
    match classify_dir(Some(destination))? {
        ExistenceState::Present => {}
        ExistenceState::Absent | ExistenceState::Unspecified => {
            fs::create_dir_all(extended_path(destination)).map_err(|source| {
                error!(
                    destination = ?destination,
                    %source,
                    "An error occurred while attempting to create the destination directory"
                );
                BackupError::DestinationCreateFailed {
                    path: destination.to_path_buf(),
                    source,
                }
            })?;
            info!(destination = ?destination, "Created destination directory");
        }
    }

    let artifact = destination.join(name);
    let from = extended_path(subject.path());
    let to = extended_path(&artifact);

    // Reserve the name first. Anything already there is someone else's data,
    // so a failure here returns without rollback.
    let reserved = match &subject {
        Subject::Directory(_) => fs::create_dir(&to),
        Subject::File(_) => fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&to)
            .map(drop),
    };
    if let Err(e) = reserved {
        let err = if e.kind() == ErrorKind::AlreadyExists {
            BackupError::copy_failed(&artifact, "destination already exists")
        } else {
            BackupError::copy_failed(&artifact, e)
        };
        error!(artifact = ?artifact, "{err}");
        return Err(err);
    }

    let copied = match &subject {
        Subject::Directory(_) => {
            let skip = excluded_dirs(&from, &extended_path(destination), &to);
            copy_dir_contents(&from, &to, &skip)
        }
        Subject::File(_) => copy_contents(&from, &to),
    };
    if let Err(e) = copied {
        error!(
            destination = ?destination,
            error = %e,
            "An error occurred while attempting to copy the backup"
        );
        discard_partial(&to);
        return Err(BackupError::copy_failed(&artifact, e));
    }

    info!(
        subject = ?subject.path(),
        artifact = ?artifact,
        "Successfully copied backup"
    );
    Ok(artifact)
}

/// Copies one file, preserving permission bits plus access and modification times.
///
/// Fails if `to` already exists.
pub fn copy_file_preserving(from: &Path, to: &Path) -> std::io::Result<()> {
    // create_new reserves the name so a racing writer cannot be clobbered.
    fs::OpenOptions::new().write(true).create_new(true).open(to)?;
    copy_contents(from, to)
}

/// Fills the already reserved `to` with the content and times of `from`.
fn copy_contents(from: &Path, to: &Path) -> std::io::Result<()> {
    fs::copy(from, to)?;
    restore_times(from, to)
}

/// Directories a copy of `from` must not descend into: the artifact being
/// written and, when it lies inside the source, the whole destination.
fn excluded_dirs(from: &Path, destination: &Path, to: &Path) -> Vec<PathBuf> {
    let source = fs::canonicalize(from).ok();
    [to, destination]
        .into_iter()
        .filter_map(|dir| fs::canonicalize(dir).ok())
        .filter(|dir| Some(dir) != source.as_ref())
        .collect()
}

/// Recursively copies the directory `from` into the existing, empty `to`.
///
/// Directories in `skip` (canonical paths) are left out with everything below them.
fn copy_dir_contents(from: &Path, to: &Path, skip: &[PathBuf]) -> std::io::Result<()> {
    let mut dirs = vec![];
    let walker = WalkDir::new(from)
        .follow_links(true)
        .min_depth(1)
        .into_iter()
        .filter_entry(|entry| {
            !(entry.file_type().is_dir()
                && fs::canonicalize(entry.path()).is_ok_and(|dir| skip.contains(&dir)))
        });

    for entry in walker {
        let entry = entry.map_err(std::io::Error::other)?;
        let rel = entry
            .path()
            .strip_prefix(from)
            .map_err(std::io::Error::other)?;
        let dest = to.join(rel);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir(&dest)?;
            dirs.push((entry.path().to_path_buf(), dest));
        } else if file_type.is_file() {
            copy_file_preserving(entry.path(), &dest)?;
        } else {
            debug!(entry = ?entry.path(), "Skipping special file");
            continue;
        }
        debug!(entry = ?entry.path(), "Copied");
    }

    // Directory metadata last, innermost first, once nothing else writes into them.
    for (src, dest) in dirs.iter().rev() {
        restore_dir_metadata(src, dest)?;
    }
    restore_dir_metadata(from, to)
}

fn restore_dir_metadata(from: &Path, to: &Path) -> std::io::Result<()> {
    let meta = fs::metadata(from)?;
    fs::set_permissions(to, meta.permissions())?;
    restore_times(from, to)
}

fn restore_times(from: &Path, to: &Path) -> std::io::Result<()> {
    let meta = fs::metadata(from)?;
    let atime = FileTime::from_last_access_time(&meta);
    let mtime = FileTime::from_last_modification_time(&meta);
    filetime::set_file_times(to, atime, mtime)
}

/// Removes whatever a failed copy left at `path`.
fn discard_partial(path: &Path) {
    let removed = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => {
            // A read-only copied directory blocks its own removal.
            make_writable(path);
            fs::remove_dir_all(path)
        }
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == ErrorKind::NotFound => return,
        Err(e) => Err(e),
    };
    match removed {
        Ok(()) => warn!(path = ?path, "Removed partial backup"),
        Err(e) => error!(path = ?path, error = %e, "Failed to remove partial backup"),
    }
}

fn make_writable(path: &Path) {
    for entry in WalkDir::new(path).into_iter().filter_map(|e| e.ok()) {
        if entry.file_type().is_dir()
            && let Ok(meta) = entry.metadata()
        {
            let mut perms = meta.permissions();
            if perms.readonly() {
                #[allow(clippy::permissions_set_readonly_false)]
                perms.set_readonly(false);
                let _ = fs::set_permissions(entry.path(), perms);
            }
        }
    }
}
