//! TOML configuration.
//!
//! Every field is optional; a missing file means all defaults. Lookup order
//! for the file is `--config`, then `$XDG_CONFIG_HOME/smartdl/config.toml`,
//! then `$HOME/.config/smartdl/config.toml`. A few environment variables
//! override the file (see [`Config::apply_env_overrides`]).
//!
//! ```toml
//! [download]
//! dir = "/srv/downloads"
//! max_file_size_bytes = 2147483648
//!
//! [engine]
//! rpc_url = "http://localhost:6800/jsonrpc"
//!
//! [retry]
//! max_attempts = 3
//! backoff_secs = [0, 120, 480]
//!
//! [retry.download]
//! backoff_secs = [30]
//! ```

use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::engine::Aria2Options;
use crate::retry::{DEFAULT_BACKOFF_SECS, DEFAULT_MAX_ATTEMPTS, RetryPolicy};

/// Default per-file ceiling: 2 GiB.
pub const DEFAULT_MAX_FILE_SIZE_BYTES: u64 = 2 * 1024 * 1024 * 1024;

const APP_DIR: &str = "smartdl";

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML for this schema.
    #[error("failed to parse config file '{}': {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A value is out of range.
    #[error("invalid config value for `{field}`: {message}")]
    Invalid { field: &'static str, message: String },
}

impl ConfigError {
    fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}

/// Full configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub database: DatabaseConfig,
    pub download: DownloadConfig,
    pub engine: EngineConfig,
    pub extract: ExtractConfig,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// `SQLite` file holding the job store.
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_data_dir().join("smartdl.db"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DownloadConfig {
    /// Where the engine writes files.
    pub dir: PathBuf,
    /// Declared sizes above this are skipped.
    pub max_file_size_bytes: u64,
    /// Engine poll interval while downloading.
    pub poll_interval_ms: u64,
    /// Scheduler sleep when no job is pending.
    pub idle_interval_ms: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            dir: default_data_dir().join("downloads"),
            max_file_size_bytes: DEFAULT_MAX_FILE_SIZE_BYTES,
            poll_interval_ms: 2000,
            idle_interval_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// aria2 JSON-RPC endpoint.
    pub rpc_url: String,
    /// aria2 `--rpc-secret`, sent as `token:<secret>`.
    pub secret: Option<String>,
    pub rpc_timeout_secs: u64,
    pub max_connections_per_server: u32,
    pub split: u32,
    pub min_split_size_mb: u32,
    /// Consecutive failed status calls tolerated before the attempt fails.
    pub max_poll_errors: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let options = Aria2Options::default();
        Self {
            rpc_url: "http://localhost:6800/jsonrpc".to_string(),
            secret: None,
            rpc_timeout_secs: 10,
            max_connections_per_server: options.max_connections_per_server,
            split: options.split,
            min_split_size_mb: options.min_split_size_mb,
            max_poll_errors: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExtractConfig {
    /// yt-dlp invocation; extra elements become leading arguments.
    pub ytdlp_command: Vec<String>,
    /// Headless renderer invocation; the page URL is appended.
    pub renderer_command: Vec<String>,
    pub probe_connect_timeout_secs: u64,
    pub probe_timeout_secs: u64,
    pub backend_timeout_secs: u64,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            ytdlp_command: vec!["yt-dlp".to_string()],
            renderer_command: vec!["smartdl-render".to_string()],
            probe_connect_timeout_secs: 10,
            probe_timeout_secs: 15,
            backend_timeout_secs: 120,
        }
    }
}

/// Retry policy with optional per-stage overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_secs: Vec<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classify: Option<StageRetryConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extract: Option<StageRetryConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download: Option<StageRetryConfig>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_secs: DEFAULT_BACKOFF_SECS.to_vec(),
            classify: None,
            extract: None,
            download: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StageRetryConfig {
    pub max_attempts: Option<u32>,
    pub backoff_secs: Option<Vec<u64>>,
}

impl RetryConfig {
    fn policy(&self, stage: Option<&StageRetryConfig>) -> RetryPolicy {
        let max_attempts = stage
            .and_then(|stage| stage.max_attempts)
            .unwrap_or(self.max_attempts);
        let backoff = stage
            .and_then(|stage| stage.backoff_secs.as_ref())
            .unwrap_or(&self.backoff_secs)
            .iter()
            .map(|secs| Duration::from_secs(*secs))
            .collect();
        RetryPolicy::new(max_attempts, backoff)
    }

    #[must_use]
    pub fn classify_policy(&self) -> RetryPolicy {
        self.policy(self.classify.as_ref())
    }

    #[must_use]
    pub fn extract_policy(&self) -> RetryPolicy {
        self.policy(self.extract.as_ref())
    }

    #[must_use]
    pub fn download_policy(&self) -> RetryPolicy {
        self.policy(self.download.as_ref())
    }
}

impl Config {
    /// Loads `explicit` if given, else the default config file when present,
    /// then applies environment overrides and validates.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if an explicit file is missing, a file cannot be
    /// parsed, or a value is out of range.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_env_overrides(|name| env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parses one TOML file without overrides or validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] or [`ConfigError::Parse`].
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "loaded config file");
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Applies `SMARTDL_DATABASE_PATH`, `SMARTDL_DOWNLOAD_DIR`,
    /// `SMARTDL_ARIA2_RPC_URL` and `SMARTDL_ARIA2_SECRET`. Empty values are
    /// ignored.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        if let Some(path) = get("SMARTDL_DATABASE_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(dir) = get("SMARTDL_DOWNLOAD_DIR") {
            self.download.dir = PathBuf::from(dir);
        }
        if let Some(url) = get("SMARTDL_ARIA2_RPC_URL") {
            self.engine.rpc_url = url;
        }
        if let Some(secret) = get("SMARTDL_ARIA2_SECRET") {
            self.engine.secret = Some(secret);
        }
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.download.poll_interval_ms == 0 {
            return Err(ConfigError::invalid(
                "download.poll_interval_ms",
                "must be greater than 0",
            ));
        }
        if self.download.idle_interval_ms == 0 {
            return Err(ConfigError::invalid(
                "download.idle_interval_ms",
                "must be greater than 0",
            ));
        }
        if self.download.max_file_size_bytes == 0 {
            return Err(ConfigError::invalid(
                "download.max_file_size_bytes",
                "must be greater than 0",
            ));
        }
        validate_attempts("retry.max_attempts", Some(self.retry.max_attempts))?;
        for (field, stage) in [
            ("retry.classify.max_attempts", &self.retry.classify),
            ("retry.extract.max_attempts", &self.retry.extract),
            ("retry.download.max_attempts", &self.retry.download),
        ] {
            validate_attempts(field, stage.as_ref().and_then(|stage| stage.max_attempts))?;
        }
        validate_command("extract.ytdlp_command", &self.extract.ytdlp_command)?;
        validate_command("extract.renderer_command", &self.extract.renderer_command)?;
        if self.engine.rpc_url.trim().is_empty() {
            return Err(ConfigError::invalid("engine.rpc_url", "must not be empty"));
        }
        for (field, value) in [
            ("engine.rpc_timeout_secs", self.engine.rpc_timeout_secs),
            (
                "extract.probe_connect_timeout_secs",
                self.extract.probe_connect_timeout_secs,
            ),
            ("extract.probe_timeout_secs", self.extract.probe_timeout_secs),
            ("extract.backend_timeout_secs", self.extract.backend_timeout_secs),
        ] {
            if !(1..=3600).contains(&value) {
                return Err(ConfigError::invalid(
                    field,
                    format!("{value}. Expected range: 1..=3600"),
                ));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.download.poll_interval_ms)
    }

    #[must_use]
    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.download.idle_interval_ms)
    }

    #[must_use]
    pub fn probe_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.extract.probe_connect_timeout_secs)
    }

    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.extract.probe_timeout_secs)
    }

    #[must_use]
    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.extract.backend_timeout_secs)
    }

    #[must_use]
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.engine.rpc_timeout_secs)
    }

    /// aria2 per-transfer options from the `[engine]` section.
    #[must_use]
    pub fn aria2_options(&self) -> Aria2Options {
        Aria2Options {
            max_connections_per_server: self.engine.max_connections_per_server,
            split: self.engine.split,
            min_split_size_mb: self.engine.min_split_size_mb,
        }
    }
}

fn validate_attempts(field: &'static str, value: Option<u32>) -> Result<(), ConfigError> {
    match value {
        Some(0) => Err(ConfigError::invalid(field, "must be at least 1")),
        _ => Ok(()),
    }
}

fn validate_command(field: &'static str, command: &[String]) -> Result<(), ConfigError> {
    match command.first() {
        Some(program) if !program.trim().is_empty() => Ok(()),
        _ => Err(ConfigError::invalid(field, "must name a program")),
    }
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/smartdl/config.toml`
/// 2. `$HOME/.config/smartdl/config.toml`
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg_config_home).join(APP_DIR).join("config.toml"));
    }
    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join(APP_DIR)
            .join("config.toml"),
    )
}

fn default_data_dir() -> PathBuf {
    if let Some(xdg_data_home) = env_var_non_empty_os("XDG_DATA_HOME") {
        return PathBuf::from(xdg_data_home).join(APP_DIR);
    }
    match env_var_non_empty_os("HOME") {
        Some(home) => PathBuf::from(home).join(".local").join("share").join(APP_DIR),
        None => PathBuf::from("."),
    }
}

fn env_var_non_empty_os(name: &str) -> Option<OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}
