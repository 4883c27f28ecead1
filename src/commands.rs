//! Command-line interface definition for fbk.
//!
//! This module defines the CLI commands and the glue between the config
//! file, the command-line flags and the backup pipeline.

use crate::application::{self, Application};
use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use fbackup::watcher::{ChangeWatcher, FsEventSource, WatchSummary};
use fbackup::{BackupError, BackupPipeline, BackupReport, BackupRequest};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::runtime::Builder;
use tokio::sync::mpsc;
use tracing::info;

/// Command-line interface definition for fbk.
#[derive(Parser)]
#[command(version, about, long_about = None)]
pub(crate) struct Cli {
    /// Use this configuration file instead of the default one.
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Log debug output.
    #[arg(short, long, global = true)]
    pub verbose: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    pub commands: Option<Commands>,
}

/// Supported fbk commands.
#[derive(Subcommand, Debug)]
pub(crate) enum Commands {
    /// Run one backup and print the path of the result.
    Run {
        #[command(flatten)]
        request: RequestArgs,
    },
    /// Back up again every time the source changes, until interrupted.
    Watch {
        #[command(flatten)]
        request: RequestArgs,
        /// Milliseconds without changes before a backup starts.
        #[arg(long, value_name = "MS")]
        quiet_period_ms: Option<u64>,
    },
    /// Display the absolute path of the configuration file, or reset it.
    Config {
        /// Overwrite the configuration file with blank defaults.
        #[arg(short, long)]
        reset: bool,
    },
}

/// Request fields; each one given here overrides the config file.
#[derive(Args, Debug, Default, Clone)]
pub(crate) struct RequestArgs {
    /// Source directory.
    #[arg(short, long)]
    pub source: Option<String>,
    /// Destination directory.
    #[arg(short, long)]
    pub destination: Option<String>,
    /// File inside the source directory to back up instead of the whole directory.
    #[arg(short, long)]
    pub target: Option<String>,
    /// Output name to use instead of a timestamped one.
    #[arg(short = 'b', long = "name")]
    pub backup_name: Option<String>,
    /// Compress the backup into a zip archive.
    #[arg(short, long)]
    pub compress: bool,
    /// Cloud targets to upload the backup to.
    #[arg(long = "cloud", value_delimiter = ',', value_name = "ID")]
    pub cloud: Option<Vec<String>>,
}

impl RequestArgs {
    /// Layers the flags over `base`, the request from the config file.
    pub(crate) fn apply(self, mut base: BackupRequest) -> BackupRequest {
        if let Some(source) = self.source {
            base.source_path = source;
        }
        if let Some(destination) = self.destination {
            base.destination_path = destination;
        }
        if let Some(target) = self.target {
            base.target_file = target;
        }
        if let Some(name) = self.backup_name {
            base.backup_name = name;
        }
        base.compress |= self.compress;
        if let Some(cloud) = self.cloud {
            base.cloud_targets = cloud.into_iter().collect();
        }
        base.normalized()
    }
}

/// The config file location: `--config` or the platform default.
pub(crate) fn config_path(explicit: Option<PathBuf>) -> fbackup::Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path),
        None => application::config_file(),
    }
}

/// Loads the config file at `path`, creating it first if needed.
pub(crate) fn load_config(path: &Path) -> fbackup::Result<Application> {
    application::init_config(path)?;
    Application::load(path)
}

/// Runs a single backup.
pub(crate) fn run(request: &BackupRequest) -> fbackup::Result<BackupReport> {
    BackupPipeline::default().run(request)
}

/// Watches the subject of `request` until Ctrl-C.
pub(crate) fn watch(request: BackupRequest, quiet_period: Duration) -> Result<WatchSummary> {
    let pipeline = BackupPipeline::default();
    pipeline.validate(&request)?;
    let watcher = ChangeWatcher::for_pipeline(pipeline, request, quiet_period);
    let root = match watcher.filter() {
        Some(filter) => filter.watch_root().to_path_buf(),
        None => {
            return Err(BackupError::InvalidRequest("nothing to watch".to_string()).into());
        }
    };
    if !root.is_dir() {
        return Err(BackupError::SourceNotFound(root).into());
    }

    let rt = Builder::new_multi_thread().enable_all().build()?;
    rt.block_on(async move {
        let (tx, rx) = mpsc::unbounded_channel();
        let source = FsEventSource::start(&root, tx)?;
        let handle = watcher.spawn(rx);
        info!("Press Ctrl-C to stop watching");

        let signal = tokio::signal::ctrl_c().await;
        let summary = handle.stop().await;
        source.stop();
        signal?;
        Ok::<_, anyhow::Error>(summary)
    })
}

/// Prints the config file path.
pub(crate) fn config(path: &Path) {
    println!("config file: {}", path.display());
}

/// Resets the config file to blank defaults.
pub(crate) fn reset_config(path: &Path) -> fbackup::Result<()> {
    application::reset_config(path)?;
    println!("Configuration file reset successfully!");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_flags() {
        let cli = Cli::try_parse_from([
            "fbk", "run", "-s", "/data/a", "-d", "/backups", "-t", "x.txt", "-c", "--cloud",
            "google_drive",
        ])
        .unwrap();
        let Some(Commands::Run { request }) = cli.commands else {
            panic!("expected run");
        };
        assert_eq!(request.source.as_deref(), Some("/data/a"));
        assert_eq!(request.destination.as_deref(), Some("/backups"));
        assert_eq!(request.target.as_deref(), Some("x.txt"));
        assert!(request.compress);
        assert_eq!(request.cloud, Some(vec!["google_drive".to_string()]));
    }

    #[test]
    fn test_parse_watch_with_global_config() {
        let cli = Cli::try_parse_from([
            "fbk",
            "watch",
            "-s",
            "/data/a",
            "--quiet-period-ms",
            "500",
            "--config",
            "/tmp/fbk.toml",
            "-v",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/fbk.toml")));
        assert!(cli.verbose);
        assert!(matches!(
            cli.commands,
            Some(Commands::Watch {
                quiet_period_ms: Some(500),
                ..
            })
        ));
    }

    #[test]
    fn test_flags_override_config() {
        let base = BackupRequest::new("/data/a", "/backups")
            .target_file("x.txt")
            .cloud_target("google_drive");
        let args = RequestArgs {
            destination: Some(" /elsewhere ".to_string()),
            backup_name: Some("weekly".to_string()),
            compress: true,
            cloud: Some(vec![]),
            ..RequestArgs::default()
        };

        let merged = args.apply(base);

        assert_eq!(merged.source_path, "/data/a");
        assert_eq!(merged.destination_path, "/elsewhere");
        assert_eq!(merged.target_file, "x.txt");
        assert_eq!(merged.backup_name, "weekly");
        assert!(merged.compress);
        assert!(merged.cloud_targets.is_empty());
    }

    #[test]
    fn test_no_flags_keeps_config() {
        let base = BackupRequest::new("/data/a", "/backups").compress(true);
        assert_eq!(RequestArgs::default().apply(base.clone()), base);
    }
}
