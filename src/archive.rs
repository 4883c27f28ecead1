//! Zip compression of a finished copy.
//!
//! On success exactly one output remains: the archive. On failure the partial
//! archive is removed and the uncompressed copy is kept, since it is still a
//! valid backup.

use crate::constants::ARCHIVE_EXTENSION;
use crate::error::{BackupError, Result};
use crate::path_util::extended_path;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Archive path for `artifact`: a file loses its extension, a directory keeps its full name.
///
/// A file that is already a `.zip` keeps its full name too, so the archive
/// never lands on the artifact itself.
pub fn archive_path_for(artifact: &Path) -> PathBuf {
    if artifact.is_file() {
        let archive = artifact.with_extension(ARCHIVE_EXTENSION);
        if archive != artifact {
            return archive;
        }
    }
    let mut name = artifact.as_os_str().to_os_string();
    name.push(".");
    name.push(ARCHIVE_EXTENSION);
    PathBuf::from(name)
}

/// Compresses `artifact` into a sibling zip archive and removes `artifact`.
///
/// A directory is stored under a top-level folder named after it, including
/// entries for empty subdirectories. A file is stored under its base name.
///
/// # Errors
/// Returns [`BackupError::ArchiveFailed`] if the archive cannot be written,
/// including when a file already occupies the archive path.
pub fn compress(artifact: &Path) -> Result<PathBuf> {
    let archive = archive_path_for(artifact);
    info!(archive = ?archive, "Creating ZIP archive");

    let file = match fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(extended_path(&archive))
    {
        Ok(file) => file,
        Err(e) => {
            error!(archive = ?archive, error = %e, "Compression failed");
            return Err(BackupError::archive_failed(&archive, e));
        }
    };

    let written = if artifact.is_dir() {
        write_dir(file, artifact)
    } else {
        write_file(file, artifact)
    };
    if let Err(e) = written {
        error!(archive = ?archive, error = %e, "Compression failed");
        if let Err(e) = fs::remove_file(extended_path(&archive)) {
            warn!(archive = ?archive, error = %e, "Failed to remove partial archive");
        }
        return Err(BackupError::archive_failed(&archive, e));
    }

    let removed = if artifact.is_dir() {
        fs::remove_dir_all(extended_path(artifact))
    } else {
        fs::remove_file(extended_path(artifact))
    };
    if let Err(e) = removed {
        warn!(
            artifact = ?artifact,
            error = %e,
            "Archive created but the uncompressed copy could not be removed"
        );
    }

    info!(archive = ?archive, "Compression successful");
    Ok(archive)
}

fn options_for(path: &Path) -> io::Result<SimpleFileOptions> {
    let meta = fs::metadata(path)?;
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(meta.len() >= u64::from(u32::MAX));
    Ok(with_permissions(options, &meta))
}

#[cfg(unix)]
fn with_permissions(options: SimpleFileOptions, meta: &fs::Metadata) -> SimpleFileOptions {
    use std::os::unix::fs::PermissionsExt;
    options.unix_permissions(meta.permissions().mode())
}

#[cfg(not(unix))]
fn with_permissions(options: SimpleFileOptions, _meta: &fs::Metadata) -> SimpleFileOptions {
    options
}

fn write_file(file: File, src: &Path) -> anyhow::Result<()> {
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let name = src
        .file_name()
        .ok_or_else(|| anyhow::anyhow!("Invalid file name {src:?}"))?
        .to_string_lossy()
        .into_owned();

    zip.start_file(name, options_for(src)?)?;
    let mut reader = File::open(extended_path(src))?;
    io::copy(&mut reader, &mut zip)?;
    finish(zip)?;

    debug!(file = ?src, "Added file to ZIP");
    Ok(())
}

fn write_dir(file: File, src: &Path) -> anyhow::Result<()> {
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let prefix = src.parent().unwrap_or_else(|| Path::new(""));

    for entry in WalkDir::new(src).follow_links(true) {
        let entry = entry?;
        let path = entry.path();
        let name = entry_name(path.strip_prefix(prefix)?);

        if entry.file_type().is_dir() {
            // Only leaves need explicit entries; files imply their parents.
            if fs::read_dir(path)?.next().is_none() {
                zip.add_directory(format!("{name}/"), options_for(path)?)?;
                debug!(dir = ?path, "Added empty directory to ZIP");
            }
        } else if entry.file_type().is_file() {
            zip.start_file(name, options_for(path)?)?;
            let mut reader = File::open(path)?;
            io::copy(&mut reader, &mut zip)?;
            debug!(file = ?path, "Added file to ZIP");
        } else {
            debug!(entry = ?path, "Skipping special file");
        }
    }
    finish(zip)
}

/// Writes the central directory and flushes the buffered file.
fn finish(zip: ZipWriter<BufWriter<File>>) -> anyhow::Result<()> {
    let mut file = zip.finish()?.into_inner().map_err(|e| e.into_error())?;
    file.flush()?;
    Ok(())
}

/// Zip entry names always use `/`, whatever the platform separator.
fn entry_name(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
