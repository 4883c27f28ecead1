//! One backup run: classify, name, copy, compress, upload.
//!
//! Each stage's output feeds the next and the first failing stage ends the
//! run. Upload failures are the exception: they are reported per target in
//! the [`BackupReport`] and never fail the run.

use crate::archive;
use crate::error::Result;
use crate::file_util;
use crate::naming::{self, ResolvedName};
use crate::path_util::{ExistenceState, classify_file};
use crate::request::BackupRequest;
use crate::upload::{UploadOutcome, UploadRegistry};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{Span, error, info, info_span};

/// Result of a successful run.
#[derive(Debug)]
pub struct BackupReport {
    /// The name resolved for this run, shared by the copy and the archive.
    pub name: ResolvedName,
    /// The durable output: the copy, or the archive when compression was requested.
    pub artifact: PathBuf,
    pub uploads: Vec<UploadOutcome>,
}

/// Runs backups against a fixed set of upload integrations.
#[derive(Debug, Clone)]
pub struct BackupPipeline {
    uploads: Arc<UploadRegistry>,
    runs: Arc<AtomicU64>,
}

impl Default for BackupPipeline {
    fn default() -> Self {
        Self::new(UploadRegistry::with_defaults())
    }
}

impl BackupPipeline {
    pub fn new(uploads: UploadRegistry) -> Self {
        Self {
            uploads: Arc::new(uploads),
            runs: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn uploads(&self) -> &UploadRegistry {
        &self.uploads
    }

    /// Checks `request` without touching the file system.
    pub fn validate(&self, request: &BackupRequest) -> Result<()> {
        request.validate()?;
        self.uploads.validate(&request.cloud_targets)
    }

    /// Runs the whole pipeline for `request`.
    ///
    /// # Errors
    /// The error of the first failing stage; no artifact is produced in that case.
    pub fn run(&self, request: &BackupRequest) -> Result<BackupReport> {
        let run = self.runs.fetch_add(1, Ordering::Relaxed) + 1;
        let span = info_span!("backup", run, name = tracing::field::Empty);
        let _enter = span.enter();

        let result = self.run_stages(request);
        match &result {
            Ok(report) => info!(
                artifact = ?report.artifact,
                "Backup successfully created"
            ),
            Err(e) => error!(stage = e.stage(), error = %e, "Backup failed"),
        }
        result
    }

    fn run_stages(&self, request: &BackupRequest) -> Result<BackupReport> {
        self.validate(request)?;

        let name = naming::resolve(request, target_state(request)?);
        Span::current().record("name", name.as_str());
        info!("Resolved backup name");

        let mut artifact = file_util::copy_backup(request, &name)?;
        if request.compress {
            artifact = archive::compress(&artifact)?;
        }

        let uploads = if request.cloud_targets.is_empty() {
            vec![]
        } else {
            self.uploads.dispatch(&artifact, &request.cloud_targets)
        };

        Ok(BackupReport {
            name,
            artifact,
            uploads,
        })
    }
}

/// Existence of the request's target file, as the name resolver sees it.
pub fn target_state(request: &BackupRequest) -> Result<ExistenceState> {
    let target = request.target().map(|t| match request.source() {
        Some(source) => source.join(t),
        None => t.to_path_buf(),
    });
    classify_file(target.as_deref())
}
