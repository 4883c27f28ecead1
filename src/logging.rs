//! Log sink installation. Called once, before any command runs.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use fbackup::constants::PKG_NAME;
use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Directive used by `--verbose`: debug output for our own crates only.
const VERBOSE_DIRECTIVE: &str = "info,fbackup=debug,fbk=debug";

/// Installs stderr logging and, when `directory` is set, an appending log file
/// per day. `RUST_LOG` takes precedence over `level` and `verbose`.
pub(crate) fn init(level: &str, directory: Option<&Path>, verbose: bool) -> Result<()> {
    let default = if verbose { VERBOSE_DIRECTIVE } else { level };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default))
        .with_context(|| format!("Invalid log level '{default}'"))?;

    let file_layer = match directory {
        Some(dir) => {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {dir:?}"))?;
            let path = dir.join(log_file_name(&Local::now()));
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("Failed to open log file {path:?}"))?;
            Some(fmt::layer().with_writer(Arc::new(file)).with_ansi(false))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()
        .context("Failed to install the log subscriber")?;
    Ok(())
}

fn log_file_name(now: &DateTime<Local>) -> String {
    format!("{PKG_NAME}-{}.log", now.format("%Y-%m-%d"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_log_file_name() {
        let now = Local.with_ymd_and_hms(2026, 10, 15, 14, 3, 22).unwrap();
        assert_eq!(log_file_name(&now), "fbackup-2026-10-15.log");
    }
}
