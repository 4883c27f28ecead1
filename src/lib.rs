//! fbackup: backs up a file or a directory tree into a destination directory,
//! optionally zips the result and hands it to cloud targets.
//!
//! A run is a fixed sequence of stages (see [`pipeline`]); watch mode
//! ([`watcher`]) re-runs it after the source has been quiet for a while.

pub mod archive;
pub mod constants;
pub mod error;
pub mod file_util;
pub mod naming;
pub mod path_util;
pub mod pipeline;
pub mod request;
pub mod sysexits;
pub mod upload;
pub mod watcher;

pub use error::{BackupError, Result};
pub use pipeline::{BackupPipeline, BackupReport};
pub use request::BackupRequest;
