//! Output naming.
//!
//! A run resolves its name exactly once; the copy, the archive and every log
//! line reuse the same [`ResolvedName`] so an embedded timestamp never drifts
//! between stages.

use crate::constants::BACKUP_MARKER;
use crate::path_util::ExistenceState;
use crate::request::BackupRequest;
use chrono::{DateTime, Local};
use std::fmt;
use std::path::Path;

/// `15-Oct-2026_14-03-22-123`: no separators, no dots, no spaces.
const TIMESTAMP_FORMAT: &str = "%d-%b-%Y_%H-%M-%S-%3f";

/// The final base name of a backup artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedName(String);

impl ResolvedName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResolvedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<Path> for ResolvedName {
    fn as_ref(&self) -> &Path {
        Path::new(&self.0)
    }
}

/// Renders the timestamp embedded in derived names.
pub fn timestamp(now: &DateTime<Local>) -> String {
    now.format(TIMESTAMP_FORMAT).to_string()
}

/// Resolves the output name using the current local time.
pub fn resolve(request: &BackupRequest, target: ExistenceState) -> ResolvedName {
    resolve_at(request, target, &Local::now())
}

/// Resolves the output name for `request` as of `now`.
///
/// `target` is the existence of the target file: an unspecified target means
/// the whole source directory is the subject.
pub fn resolve_at(
    request: &BackupRequest,
    target: ExistenceState,
    now: &DateTime<Local>,
) -> ResolvedName {
    if !request.backup_name.is_empty() {
        return ResolvedName(request.backup_name.clone());
    }
    let stamp = timestamp(now);
    let name = match target {
        ExistenceState::Present | ExistenceState::Absent => {
            let file = request.target().and_then(Path::file_name).map(Path::new);
            let stem = file
                .and_then(Path::file_stem)
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            match file.and_then(Path::extension) {
                Some(ext) => format!("{stem}{BACKUP_MARKER}{stamp}.{}", ext.to_string_lossy()),
                None => format!("{stem}{BACKUP_MARKER}{stamp}"),
            }
        }
        ExistenceState::Unspecified => {
            let dir = request
                .source()
                .and_then(base_name)
                .unwrap_or_default();
            format!("{dir}{BACKUP_MARKER}{stamp}")
        }
    };
    ResolvedName(name)
}

/// Last path component, resolving `.`/`..` and trailing separators first.
fn base_name(path: &Path) -> Option<String> {
    if let Some(name) = path.file_name() {
        return Some(name.to_string_lossy().into_owned());
    }
    let abs = std::path::absolute(path).ok()?;
    let canonical = abs.canonicalize().unwrap_or(abs);
    canonical
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
}
