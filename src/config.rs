use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Main configuration structure for qbt-sync
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    /// The authoritative instance
    pub master: InstanceConfig,

    /// Follower instances reconciled against the master
    pub children: Vec<InstanceConfig>,

    /// Synchronization behavior settings
    #[serde(default)]
    pub sync: SyncConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// HTTP client settings
    #[serde(default)]
    pub http: HttpConfig,
}

/// Connection details for one qBittorrent instance
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct InstanceConfig {
    /// Web UI address, e.g. "http://10.0.0.2:8080"
    pub host: String,

    pub username: String,

    pub password: String,

    /// Display name used in logs (defaults to "master" / "child-N")
    #[serde(default)]
    pub name: String,
}

/// Synchronization configuration
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SyncConfig {
    /// Minimum seeding time on the master before a torrent is mirrored
    #[serde(default = "default_min_seeding_time")]
    pub min_seeding_time_minutes: u64,

    /// Skip hash verification when adding torrents to children
    #[serde(default = "default_true")]
    pub skip_hash_check: bool,

    /// Propagate deselected files from master to children
    #[serde(default = "default_true")]
    pub sync_file_selections: bool,

    /// Treat stopped/paused master torrents as removed
    #[serde(default)]
    pub treat_stopped_as_removed: bool,

    /// Minutes between daemon cycles
    #[serde(default = "default_daemon_interval")]
    pub daemon_interval_minutes: u64,

    /// Report only, never mutate children
    #[serde(default)]
    pub dry_run: bool,

    /// How many times to poll a freshly added torrent's file list
    #[serde(default = "default_file_list_attempts")]
    pub file_list_attempts: u32,

    /// Delay between file list polls in milliseconds
    #[serde(default = "default_file_list_retry_ms")]
    pub file_list_retry_ms: u64,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String, // "info"

    /// Enable colored output
    #[serde(default = "default_true")]
    pub color: bool,
}

/// HTTP client configuration
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct HttpConfig {
    /// Per-request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Errors raised while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path:?}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to expand environment variables in {field}")]
    Expand {
        field: String,
        #[source]
        source: shellexpand::LookupError<std::env::VarError>,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// One sync option that differs between two configurations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigChange {
    pub field: &'static str,
    pub old: String,
    pub new: String,
}

// Default value functions
fn default_true() -> bool {
    true
}
fn default_min_seeding_time() -> u64 {
    10
}
fn default_daemon_interval() -> u64 {
    60
}
fn default_file_list_attempts() -> u32 {
    10
}
fn default_file_list_retry_ms() -> u64 {
    500
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_timeout() -> u64 {
    30
}

// Default implementations
impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            min_seeding_time_minutes: default_min_seeding_time(),
            skip_hash_check: default_true(),
            sync_file_selections: default_true(),
            treat_stopped_as_removed: false,
            daemon_interval_minutes: default_daemon_interval(),
            dry_run: false,
            file_list_attempts: default_file_list_attempts(),
            file_list_retry_ms: default_file_list_retry_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            color: default_true(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
        }
    }
}

impl SyncConfig {
    pub fn min_seeding_seconds(&self) -> i64 {
        i64::try_from(self.min_seeding_time_minutes)
            .unwrap_or(i64::MAX)
            .saturating_mul(60)
    }

    /// List every option whose value differs in `new`
    pub fn changes(&self, new: &SyncConfig) -> Vec<ConfigChange> {
        let mut changes = Vec::new();
        let mut check = |field: &'static str, old: String, new: String| {
            if old != new {
                changes.push(ConfigChange { field, old, new });
            }
        };

        check(
            "min_seeding_time_minutes",
            self.min_seeding_time_minutes.to_string(),
            new.min_seeding_time_minutes.to_string(),
        );
        check(
            "skip_hash_check",
            self.skip_hash_check.to_string(),
            new.skip_hash_check.to_string(),
        );
        check(
            "sync_file_selections",
            self.sync_file_selections.to_string(),
            new.sync_file_selections.to_string(),
        );
        check(
            "treat_stopped_as_removed",
            self.treat_stopped_as_removed.to_string(),
            new.treat_stopped_as_removed.to_string(),
        );
        check(
            "daemon_interval_minutes",
            self.daemon_interval_minutes.to_string(),
            new.daemon_interval_minutes.to_string(),
        );
        check("dry_run", self.dry_run.to_string(), new.dry_run.to_string());
        check(
            "file_list_attempts",
            self.file_list_attempts.to_string(),
            new.file_list_attempts.to_string(),
        );
        check(
            "file_list_retry_ms",
            self.file_list_retry_ms.to_string(),
            new.file_list_retry_ms.to_string(),
        );

        changes
    }
}

impl Config {
    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_yaml(&content).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    /// Parse, normalize and validate a YAML document
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let mut config: Config =
            serde_yaml::from_str(content).map_err(|source| ConfigError::Parse {
                path: PathBuf::new(),
                source,
            })?;

        config.apply_default_names();
        config.expand_env()?;
        config.validate()?;

        Ok(config)
    }

    /// Pick the config file: explicit path, then ./config.yaml, then XDG
    pub fn resolve_path(explicit: Option<PathBuf>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path);
        }

        let local = PathBuf::from("config.yaml");
        if local.exists() {
            return Some(local);
        }

        Self::default_config_path()
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Option<PathBuf> {
        config_dir().map(|dir| dir.join("qbt-sync").join("config.yml"))
    }

    fn apply_default_names(&mut self) {
        if self.master.name.is_empty() {
            self.master.name = "master".to_string();
        }
        for (i, child) in self.children.iter_mut().enumerate() {
            if child.name.is_empty() {
                child.name = format!("child-{}", i + 1);
            }
        }
    }

    /// Expand `${VAR}` references in hosts and credentials
    fn expand_env(&mut self) -> Result<(), ConfigError> {
        self.master.expand_env()?;
        for child in &mut self.children {
            child.expand_env()?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.master.validate()?;

        if self.children.is_empty() {
            return Err(ConfigError::Invalid(
                "config must contain a non-empty 'children' list".to_string(),
            ));
        }

        let master_host = normalize_host(&self.master.host);
        let mut names = HashSet::new();
        for child in &self.children {
            child.validate()?;

            if normalize_host(&child.host) == master_host {
                return Err(ConfigError::Invalid(format!(
                    "child '{}' points at the master host {}",
                    child.name, self.master.host
                )));
            }

            if !names.insert(child.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate child name '{}'",
                    child.name
                )));
            }
        }

        if self.sync.daemon_interval_minutes == 0 {
            return Err(ConfigError::Invalid(
                "sync.daemon_interval_minutes must be at least 1".to_string(),
            ));
        }

        if self.sync.file_list_attempts == 0 {
            return Err(ConfigError::Invalid(
                "sync.file_list_attempts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

impl InstanceConfig {
    fn expand_env(&mut self) -> Result<(), ConfigError> {
        let name = self.name.clone();
        let expand = |field: &str, value: &str| -> Result<String, ConfigError> {
            shellexpand::env(value)
                .map(|v| v.into_owned())
                .map_err(|source| ConfigError::Expand {
                    field: format!("{}.{}", name, field),
                    source,
                })
        };

        self.host = expand("host", &self.host)?;
        self.username = expand("username", &self.username)?;
        self.password = expand("password", &self.password)?;
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "instance '{}' is missing a host",
                self.name
            )));
        }
        if self.username.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "instance '{}' is missing a username",
                self.name
            )));
        }
        Ok(())
    }
}

fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/').to_lowercase();
    host.strip_prefix("http://")
        .or_else(|| host.strip_prefix("https://"))
        .map(str::to_string)
        .unwrap_or(host)
}

/// Where the daemon gets a fresh configuration between cycles
pub trait ConfigSource: Send + Sync {
    fn load(&self) -> Result<Config, ConfigError>;
}

/// Reloads the YAML file the process was started with
pub struct FileConfigSource {
    path: PathBuf,
}

impl FileConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigSource for FileConfigSource {
    fn load(&self) -> Result<Config, ConfigError> {
        Config::load(&self.path)
    }
}

impl<F> ConfigSource for F
where
    F: Fn() -> Result<Config, ConfigError> + Send + Sync,
{
    fn load(&self) -> Result<Config, ConfigError> {
        self()
    }
}
