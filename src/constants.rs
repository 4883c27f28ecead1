/// Default configuration file name.
pub const CONFIG_NAME: &str = "config.toml";
/// Package name.
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
/// Separates the original name from the timestamp in derived backup names.
pub const BACKUP_MARKER: &str = "-BACKUP-";
/// Extension appended to compressed artifacts.
pub const ARCHIVE_EXTENSION: &str = "zip";
/// Default debounce delay between the last change event and a watch-triggered run.
pub const DEFAULT_QUIET_PERIOD_MS: u64 = 2000;
