//! Hand-off of finished artifacts to cloud targets.
//!
//! Targets are looked up by identifier in an [`UploadRegistry`]. Each target
//! is its own failure domain: one failing upload never stops the others, and
//! the local artifact is never touched.

use crate::error::{BackupError, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Identifier of the Google Drive target.
pub const GOOGLE_DRIVE: &str = "google_drive";

/// Identifier the remote side assigned to an uploaded artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteId(pub String);

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An upload integration for one cloud target.
pub trait UploadTarget: Send + Sync {
    /// Identifier used in configuration, e.g. `google_drive`.
    fn id(&self) -> &str;

    /// Uploads the artifact at `artifact`. May block for as long as it needs.
    fn upload(&self, artifact: &Path) -> anyhow::Result<RemoteId>;
}

#[derive(Clone)]
enum Registration {
    Ready(Arc<dyn UploadTarget>),
    /// Known identifier without an integration yet.
    Pending,
}

/// What happened to one target during dispatch.
#[derive(Debug)]
pub enum UploadOutcome {
    Uploaded { target: String, remote_id: RemoteId },
    Pending { target: String },
    Failed { target: String, error: BackupError },
}

impl UploadOutcome {
    pub fn target(&self) -> &str {
        match self {
            UploadOutcome::Uploaded { target, .. }
            | UploadOutcome::Pending { target }
            | UploadOutcome::Failed { target, .. } => target,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, UploadOutcome::Failed { .. })
    }
}

/// Maps target identifiers to their upload integrations.
#[derive(Clone, Default)]
pub struct UploadRegistry {
    targets: BTreeMap<String, Registration>,
}

impl UploadRegistry {
    /// A registry that knows no targets.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every built-in identifier. Google Drive is recognized
    /// but has no integration yet.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.mark_pending(GOOGLE_DRIVE);
        registry
    }

    /// Registers `target` under its own identifier, replacing any previous entry.
    pub fn register(&mut self, target: impl UploadTarget + 'static) -> &mut Self {
        self.targets
            .insert(target.id().to_string(), Registration::Ready(Arc::new(target)));
        self
    }

    /// Marks `id` as a valid identifier whose integration is not implemented.
    pub fn mark_pending(&mut self, id: impl Into<String>) -> &mut Self {
        self.targets.insert(id.into(), Registration::Pending);
        self
    }

    pub fn contains(&self, id: &str) -> bool {
        self.targets.contains_key(id)
    }

    /// Checks that every identifier in `ids` is known.
    ///
    /// # Errors
    /// Returns [`BackupError::UnknownCloudTarget`] for the first unknown identifier.
    pub fn validate(&self, ids: &BTreeSet<String>) -> Result<()> {
        match ids.iter().find(|id| !self.contains(id)) {
            Some(id) => Err(BackupError::UnknownCloudTarget(id.clone())),
            None => Ok(()),
        }
    }

    /// Uploads `artifact` to every target in `ids`, one at a time, in sorted order.
    pub fn dispatch(&self, artifact: &Path, ids: &BTreeSet<String>) -> Vec<UploadOutcome> {
        ids.iter()
            .map(|id| self.dispatch_one(artifact, id))
            .collect()
    }

    fn dispatch_one(&self, artifact: &Path, id: &str) -> UploadOutcome {
        let target = id.to_string();
        match self.targets.get(id) {
            Some(Registration::Ready(uploader)) => {
                info!(cloud = %id, artifact = ?artifact, "Uploading backup");
                match uploader.upload(artifact) {
                    Ok(remote_id) => {
                        info!(cloud = %id, remote_id = %remote_id, "Upload successful");
                        UploadOutcome::Uploaded { target, remote_id }
                    }
                    Err(e) => {
                        error!(cloud = %id, error = %e, "Upload failed");
                        UploadOutcome::Failed {
                            error: BackupError::UploadFailed {
                                target: target.clone(),
                                reason: format!("{e:#}"),
                            },
                            target,
                        }
                    }
                }
            }
            Some(Registration::Pending) => {
                warn!(cloud = %id, "Upload target is not implemented yet, skipping");
                UploadOutcome::Pending { target }
            }
            None => {
                let error = BackupError::UnknownCloudTarget(target.clone());
                error!(cloud = %id, "{error}");
                UploadOutcome::Failed { target, error }
            }
        }
    }
}

impl fmt::Debug for UploadRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.targets.keys()).finish()
    }
}
