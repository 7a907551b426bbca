//! Configuration of the backup tool read from a TOML file.

mod database;

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use derive_more::{Display, Error, From};

pub use database::{DatabaseDescriptor, InvalidScheduleTime, Registry, ScheduleTime};

use crate::engine::DumpTool;

const DEFAULT_BACKUP_ROOT: &str = "/var/backups/mysql";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
const DEFAULT_THROTTLE_SECS: u64 = 1;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
/// Configuration of the backup tool.
pub struct BackupConfig {
    /// Folder the database dumps are written to.
    #[serde(default = "default_backup_root")]
    pub backup_root: PathBuf,

    /// Seconds between two passes over all databases.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Pause in seconds before each database of a pass is evaluated.
    ///
    /// Prevents that the same database is backed up twice within its scheduled minute.
    #[serde(default = "default_throttle_secs")]
    pub throttle_secs: u64,

    /// Seconds after which an unreachable server is tried again.
    ///
    /// If unset, no further backups are attempted once the server was unreachable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_down_retry_secs: Option<u64>,

    /// Configuration of the dump tool.
    #[serde(default)]
    pub dump_tool: DumpTool,

    /// Databases to back up in backup order.
    #[serde(default)]
    pub databases: Vec<DatabaseDescriptor>,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            backup_root: default_backup_root(),
            poll_interval_secs: default_poll_interval_secs(),
            throttle_secs: default_throttle_secs(),
            server_down_retry_secs: None,
            dump_tool: DumpTool::default(),
            databases: Vec::new(),
        }
    }
}

fn default_backup_root() -> PathBuf {
    PathBuf::from(DEFAULT_BACKUP_ROOT)
}

fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_throttle_secs() -> u64 {
    DEFAULT_THROTTLE_SECS
}

#[derive(Debug, Display, Error, From)]
/// Errors on reading or validating the [BackupConfig].
pub enum ConfigError {
    /// Config file can't be read or written.
    #[display("Accessing the config file failed: {_0}")]
    #[from]
    Io(io::Error),
    /// Config file isn't valid TOML or doesn't match the expected layout.
    #[display("Parsing the config file failed: {_0}")]
    #[from]
    Parse(toml::de::Error),
    /// Default config can't be serialized.
    #[display("Serializing the default config failed: {_0}")]
    #[from]
    Serialize(toml::ser::Error),
    /// The throttle between databases is below one second.
    #[display("throttle_secs must be at least 1")]
    ThrottleTooShort,
    /// The poll interval is zero.
    #[display("poll_interval_secs must be at least 1")]
    PollIntervalTooShort,
    /// A database name is configured more than once.
    #[display("Database configured more than once: {_0}")]
    DuplicateDatabase(#[error(ignore)] String),
}

impl BackupConfig {
    /// Reads the config from `path`.
    ///
    /// If the file doesn't exist yet, the default config is written to `path` and returned.
    pub fn load_or_init(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(config_str) => Self::from_toml(&config_str),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!(
                    target: "config",
                    "Writing default config to {} because it doesn't exist yet",
                    path.display()
                );
                let default_config = Self::default();
                let config_str = toml::to_string_pretty(&default_config)?;
                if let Err(e) = std::fs::write(path, config_str) {
                    log::warn!(target: "config", "Writing default config to {} failed {e}", path.display());
                }

                Ok(default_config)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Parses and validates a config.
    pub fn from_toml(config_str: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(config_str)?;
        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.throttle_secs < 1 {
            return Err(ConfigError::ThrottleTooShort);
        }
        if self.poll_interval_secs < 1 {
            return Err(ConfigError::PollIntervalTooShort);
        }

        let mut names = HashSet::new();
        for database in &self.databases {
            if !names.insert(database.name.as_str()) {
                return Err(ConfigError::DuplicateDatabase(database.name.clone()));
            }
        }

        Ok(())
    }

    pub fn throttle(&self) -> Duration {
        Duration::from_secs(self.throttle_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn server_down_retry(&self) -> Option<Duration> {
        self.server_down_retry_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"
backup_root = "/srv/backups"
throttle_secs = 2
server_down_retry_secs = 900

[dump_tool]
program = "/usr/bin/mysqldump"
timeout_secs = 3600

[[databases]]
name = "shop"
host = "localhost"
user = "backup"
password = "secret"
start_time = "02:30"

[[databases]]
name = "wiki"
host = "10.0.0.7"
user = "backup"
password = "secret"
start_time = "03:15:00"
"#;

    #[test]
    fn parses_example_config() {
        let config = BackupConfig::from_toml(EXAMPLE).unwrap();

        assert_eq!(config.backup_root, PathBuf::from("/srv/backups"));
        assert_eq!(config.poll_interval(), Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS));
        assert_eq!(config.throttle(), Duration::from_secs(2));
        assert_eq!(config.server_down_retry(), Some(Duration::from_secs(900)));
        assert_eq!(config.dump_tool.program, PathBuf::from("/usr/bin/mysqldump"));
        assert_eq!(config.dump_tool.timeout(), Some(Duration::from_secs(3600)));
        assert!(!config.dump_tool.ignored_warnings.is_empty());

        let names: Vec<_> = config.databases.iter().map(|db| db.name.as_str()).collect();
        assert_eq!(names, ["shop", "wiki"]);
        assert_eq!(config.databases[1].start_time, ScheduleTime::new(3, 15).unwrap());
    }

    #[test]
    fn rejects_invalid_start_time() {
        let config = EXAMPLE.replace("02:30", "25:30");
        assert!(matches!(
            BackupConfig::from_toml(&config),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn rejects_zero_throttle() {
        let config = EXAMPLE.replace("throttle_secs = 2", "throttle_secs = 0");
        assert!(matches!(
            BackupConfig::from_toml(&config),
            Err(ConfigError::ThrottleTooShort)
        ));
    }

    #[test]
    fn rejects_duplicate_databases() {
        let config = EXAMPLE.replace("name = \"wiki\"", "name = \"shop\"");
        assert!(matches!(
            BackupConfig::from_toml(&config),
            Err(ConfigError::DuplicateDatabase(name)) if name == "shop"
        ));
    }

    #[test]
    fn writes_default_config_if_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mysql-backup.toml");

        let config = BackupConfig::load_or_init(&path).unwrap();
        assert_eq!(config, BackupConfig::default());
        assert!(path.exists());

        let reread = BackupConfig::load_or_init(&path).unwrap();
        assert_eq!(reread, config);
    }
}
