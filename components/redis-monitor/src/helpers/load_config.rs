// External crates
use config::{Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::instrument;

/// Prefix of environment variables overriding [`Settings`] fields, e.g.
/// `REDIS_MONITOR_REDIS__MAX_RETRIES=5`.
pub const SETTINGS_ENV_PREFIX: &str = "REDIS_MONITOR";

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load env file {}: {source}", path.display())]
    EnvFile {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },
    #[error("failed to build settings: {0}")]
    Settings(#[from] config::ConfigError),
}

/// Tunables for a monitoring run.
///
/// Every field has a default, so an empty TOML file (or none at all) is a
/// valid configuration.
#[derive(Debug, Default, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub redis: RedisSettings,
    pub elasticsearch: ElasticsearchSettings,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct RedisSettings {
    /// Prefix of the numbered address variables (`Redis_URL_1`, ...)
    pub address_prefix: String,
    /// Prefix of the numbered credential variables (`Redis_Password_1`, ...)
    pub password_prefix: String,
    /// Logical database selected on every connection
    pub db: i64,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
    /// Extra attempts after a transport failure of the `INFO` request
    pub max_retries: u32,
    pub min_retry_backoff_ms: u64,
    pub max_retry_backoff_ms: u64,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            address_prefix: "Redis_URL".to_string(),
            password_prefix: "Redis_Password".to_string(),
            db: 0,
            connect_timeout_ms: 5_000,
            read_timeout_ms: 3_000,
            write_timeout_ms: 3_000,
            max_retries: 3,
            min_retry_backoff_ms: 8,
            max_retry_backoff_ms: 512,
        }
    }
}

impl RedisSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Upper bound for one request round trip (write the command, read the reply)
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms + self.read_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct ElasticsearchSettings {
    /// Daily indices are named `<index_prefix>_<YYYY-MM-DD>`
    pub index_prefix: String,
    /// Index requests wait indefinitely unless this is set
    pub request_timeout_ms: Option<u64>,
    /// Verify the cluster answers before polling any target
    pub healthcheck: bool,
    /// Upper bound for the startup health check
    pub healthcheck_timeout_ms: u64,
}

impl Default for ElasticsearchSettings {
    fn default() -> Self {
        Self {
            index_prefix: "redis_monitoring".to_string(),
            request_timeout_ms: None,
            healthcheck: true,
            healthcheck_timeout_ms: 5_000,
        }
    }
}

impl Settings {
    /// Build settings from defaults, an optional TOML file and
    /// `REDIS_MONITOR_*` environment overrides, in increasing precedence.
    #[instrument(
        name = "settings_loader",
        target = "helpers::load_config",
        level = "trace",
        skip_all
    )]
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            tracing::trace!(
                settings_file_path = %path.display(),
                "Adding TOML settings file source"
            );
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }

        let settings = builder
            .add_source(
                Environment::with_prefix(SETTINGS_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|cfg| cfg.try_deserialize::<Settings>())
            .inspect_err(|e| tracing::debug!(error = %e, "Settings not built"))?;

        tracing::trace!(?settings, "Settings loaded successfully");
        Ok(settings)
    }

    /// Render the resolved settings as TOML
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

/// Env file read from the working directory when no path is given
pub const DEFAULT_ENV_FILE: &str = ".env";

/// Load the env file into the process environment.
///
/// Without an explicit path, only `.env` in the working directory is read;
/// parent directories are not searched. A missing file is an error.
pub fn load_env_file(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    load_env_file_in(Path::new("."), path)
}

#[instrument(
    name = "env_file_loader",
    target = "helpers::load_config",
    level = "trace",
    skip_all
)]
fn load_env_file_in(working_dir: &Path, path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    let env_path = match path {
        Some(path) => path.to_path_buf(),
        None => working_dir.join(DEFAULT_ENV_FILE),
    };

    match dotenvy::from_path(&env_path) {
        Ok(()) => {
            tracing::debug!(env_file_path = %env_path.display(), "Env file loaded");
            Ok(env_path)
        }
        Err(source) => {
            tracing::debug!(env_file_path = %env_path.display(), error = %source, "Env file not loaded");
            Err(ConfigError::EnvFile {
                path: env_path,
                source,
            })
        }
    }
}
