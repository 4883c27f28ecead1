//! Persistent configuration for fbk.
//!
//! The config file is TOML with three tables: `[backup]` holds the request
//! fields, `[watch]` the debounce delay and `[log]` the log level and an
//! optional log directory. A missing file is created with blank keys.

use fbackup::constants::{CONFIG_NAME, DEFAULT_QUIET_PERIOD_MS, PKG_NAME};
use fbackup::{BackupError, BackupRequest, Result};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{fs, io};

/// The whole configuration file.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub(crate) struct Application {
    pub backup: BackupRequest,
    pub watch: WatchConfig,
    pub log: LogConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub(crate) struct WatchConfig {
    /// Delay after the last change before a backup starts.
    pub quiet_period_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            quiet_period_ms: DEFAULT_QUIET_PERIOD_MS,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub(crate) struct LogConfig {
    /// Default filter directive, e.g. `info` or `fbackup=debug`. `RUST_LOG` wins.
    pub level: String,
    /// Directory for daily log files. Logs only go to stderr when unset.
    pub directory: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
        }
    }
}

impl Application {
    /// Loads the configuration from `path`.
    pub(crate) fn load(path: &Path) -> Result<Self> {
        let toml_str = fs::read_to_string(path).map_err(|e| {
            BackupError::Config(format!("Error reading config file {path:?}: {e}"))
        })?;
        let app: Application = toml::from_str(&toml_str).map_err(|e| {
            BackupError::Config(format!("Error parsing config file {path:?}: {e}"))
        })?;
        Ok(app.normalized())
    }

    /// Writes the configuration to `path` in TOML format.
    ///
    /// Creates the parent directory if it does not exist.
    pub(crate) fn write(&self, path: &Path) -> Result<()> {
        let io_err = |source: io::Error| BackupError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let toml_str = toml::to_string_pretty(self)
            .map_err(|e| BackupError::Config(format!("Error serializing config: {e}")))?;
        let file = fs::File::create(path).map_err(io_err)?;
        let mut writer = io::BufWriter::new(file);
        writer.write_all(toml_str.as_bytes()).map_err(io_err)?;
        writer.flush().map_err(io_err)?;
        Ok(())
    }

    pub(crate) fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.watch.quiet_period_ms)
    }

    fn normalized(mut self) -> Self {
        self.backup = self.backup.normalized();
        self.log.level = self.log.level.trim().to_string();
        if self.log.level.is_empty() {
            self.log.level = LogConfig::default().level;
        }
        self
    }
}

/// Returns the absolute path to the configuration file.
pub(crate) fn config_file() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_NAME))
}

/// Returns the configuration directory for the application, platform-specific.
#[cfg(not(target_os = "macos"))]
fn config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| BackupError::Config("Couldn't get the config directory".to_string()))?;
    Ok(config_dir.join(PKG_NAME))
}

/// Returns the configuration directory for the application, platform-specific.
#[cfg(target_os = "macos")]
fn config_dir() -> Result<PathBuf> {
    let home_dir = dirs::home_dir()
        .ok_or_else(|| BackupError::Config("Couldn't get the home directory".to_string()))?;
    Ok(home_dir.join(".config").join(PKG_NAME))
}

/// Creates the configuration file at `path` with blank keys if it does not exist.
pub(crate) fn init_config(path: &Path) -> Result<()> {
    if !path.exists() {
        Application::default().write(path)?;
    }
    Ok(())
}

/// Overwrites the configuration file at `path` with the defaults.
pub(crate) fn reset_config(path: &Path) -> Result<()> {
    Application::default().write(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_file_name() -> anyhow::Result<()> {
        let file = config_file()?;
        assert!(file.ends_with(Path::new("fbackup").join("config.toml")));
        Ok(())
    }

    #[test]
    fn test_application_default() {
        let app = Application::default();
        assert_eq!(app.backup, BackupRequest::default());
        assert_eq!(app.watch.quiet_period_ms, 2000);
        assert_eq!(app.quiet_period(), Duration::from_secs(2));
        assert_eq!(app.log.level, "info");
        assert!(app.log.directory.is_none());
    }

    #[test]
    fn test_init_config_writes_blank_keys() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("nested").join("config.toml");

        init_config(&path)?;

        let toml_str = fs::read_to_string(&path)?;
        assert!(toml_str.contains("[backup]"));
        assert!(toml_str.contains("source_path = \"\""));
        assert!(toml_str.contains("destination_path = \"\""));
        assert!(toml_str.contains("quiet_period_ms = 2000"));
        assert_eq!(Application::load(&path)?, Application::default());
        Ok(())
    }

    #[test]
    fn test_init_config_keeps_existing_file() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "[watch]\nquiet_period_ms = 500\n")?;

        init_config(&path)?;

        assert_eq!(Application::load(&path)?.watch.quiet_period_ms, 500);
        Ok(())
    }

    #[test]
    fn test_load_trims_and_fills_defaults() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
[backup]
source_path = "  /data/a "
destination_path = "/backups"
target_file = "x.txt "
compress = true
cloud_targets = [" google_drive "]

[log]
level = " "
"#,
        )?;

        let app = Application::load(&path)?;

        assert_eq!(app.backup.source_path, "/data/a");
        assert_eq!(app.backup.target_file, "x.txt");
        assert!(app.backup.compress);
        assert!(app.backup.cloud_targets.contains("google_drive"));
        assert_eq!(app.watch.quiet_period_ms, 2000);
        assert_eq!(app.log.level, "info");
        Ok(())
    }

    #[test]
    fn test_load_rejects_invalid_toml() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "[backup\nsource_path = ")?;

        let err = Application::load(&path).unwrap_err();
        assert!(matches!(err, BackupError::Config(_)));
        Ok(())
    }

    #[test]
    fn test_reset_config() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "[backup]\nsource_path = \"/data\"\n")?;

        reset_config(&path)?;

        assert_eq!(Application::load(&path)?, Application::default());
        Ok(())
    }
}
