//! Configuration loader with file resolution and environment override support.

use super::error::{ConfigError, ConfigResult};
use super::schema::{Config, LogFormat};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Environment variable prefix for overrides
const ENV_PREFIX: &str = "SERIAL_SESSION";

/// Config file name looked up in the working directory
const LOCAL_CONFIG_FILE_NAME: &str = "serial-session.toml";

/// Config file name inside the per-user config directory
const CONFIG_FILE_NAME: &str = "config.toml";

/// Application directory under the platform config directory
const APP_DIR_NAME: &str = "serial-session";

/// Environment variable for explicit config path
const CONFIG_PATH_ENV: &str = "SERIAL_SESSION_CONFIG";

/// Configuration loader with resolution and override logic.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Resolved config file path (if any)
    pub config_path: Option<PathBuf>,
    /// The loaded configuration
    pub config: Config,
}

impl ConfigLoader {
    /// Load configuration using standard resolution order.
    ///
    /// Resolution priority (highest to lowest):
    /// 1. `SERIAL_SESSION_CONFIG` environment variable (explicit path)
    /// 2. `./serial-session.toml` (current directory)
    /// 3. `~/.config/serial-session/config.toml` (XDG on Linux/macOS)
    /// 4. `%APPDATA%\serial-session\config.toml` (Windows)
    /// 5. Built-in defaults (no file required)
    ///
    /// Environment variables can override any config file values.
    pub fn load() -> ConfigResult<Self> {
        let config_path = resolve_config_path();

        let mut config = match &config_path {
            Some(path) => load_from_file(path)?,
            None => Config::default(),
        };

        apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(Self {
            config_path,
            config,
        })
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut config = load_from_file(&path)?;
        apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(Self {
            config_path: Some(path),
            config,
        })
    }

    /// Create a loader with default configuration (no file).
    ///
    /// Environment overrides that fail to parse are ignored here.
    pub fn with_defaults() -> Self {
        let mut config = Config::default();
        if let Err(e) = apply_env_overrides(&mut config) {
            tracing::warn!(error = %e, "ignoring invalid environment override");
        }

        Self {
            config_path: None,
            config,
        }
    }

    /// Get the loaded configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Consume the loader and return the configuration.
    pub fn into_config(self) -> Config {
        self.config
    }

    /// Save the current configuration to the file it was loaded from.
    pub fn save(&self) -> ConfigResult<()> {
        let path = self.config_path.as_ref().ok_or(ConfigError::NoPath)?;

        save_to_file(&self.config, path)
    }

    /// Save the current configuration to a specific file.
    pub fn save_to(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        save_to_file(&self.config, path.as_ref())
    }

    /// Reload configuration from file (if path is set).
    pub fn reload(&mut self) -> ConfigResult<()> {
        if let Some(path) = &self.config_path {
            let mut config = load_from_file(path)?;
            apply_env_overrides(&mut config)?;
            config.validate()?;
            self.config = config;
        }
        Ok(())
    }
}

/// Resolve the configuration file path using standard locations.
pub fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }

    let cwd_config = PathBuf::from(LOCAL_CONFIG_FILE_NAME);
    if cwd_config.exists() {
        return Some(cwd_config);
    }

    get_default_config_path().filter(|path| path.exists())
}

/// Get the platform-specific config directory.
fn get_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    }

    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
    }
}

/// Get the default config directory for creating new config files.
pub fn get_default_config_dir() -> Option<PathBuf> {
    get_config_dir().map(|d| d.join(APP_DIR_NAME))
}

/// Get the default config file path for creating new config files.
pub fn get_default_config_path() -> Option<PathBuf> {
    get_default_config_dir().map(|d| d.join(CONFIG_FILE_NAME))
}

fn load_from_file(path: &Path) -> ConfigResult<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;

    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn save_to_file(config: &Config, path: &Path) -> ConfigResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
            path: path.to_path_buf(),
            source: e,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|e| ConfigError::Write {
        path: path.to_path_buf(),
        source: e,
    })
}

/// First set variable among `SERIAL_SESSION_<key>` and the legacy names.
fn env_value(key: &str, legacy: &[&str]) -> Option<(String, String)> {
    let primary = format!("{ENV_PREFIX}_{key}");
    std::iter::once(primary)
        .chain(legacy.iter().map(|name| name.to_string()))
        .find_map(|var| std::env::var(&var).ok().map(|value| (var, value)))
}

fn parse_env<T: FromStr>(var: &str, value: &str, what: &str) -> ConfigResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::env(var, format!("Invalid {what}: '{value}'")))
}

fn parse_flag(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value == "1"
}

/// Apply environment variable overrides to the configuration.
///
/// Environment variables follow the pattern: `SERIAL_SESSION_<SECTION>_<KEY>`
/// For example:
/// - `SERIAL_SESSION_SERIAL_DEFAULT_BAUD=9600`
/// - `SERIAL_SESSION_POLL_INTERVAL_MS=50`
/// - `SERIAL_SESSION_TESTING_PORT=/dev/ttyUSB0` (or legacy `TEST_PORT`)
fn apply_env_overrides(config: &mut Config) -> ConfigResult<()> {
    // Serial overrides
    if let Some((_, val)) = env_value("SERIAL_DEFAULT_PORT", &[]) {
        config.serial.default_port = Some(val);
    }
    if let Some((var, val)) = env_value("SERIAL_DEFAULT_BAUD", &[]) {
        config.serial.default_baud = parse_env(&var, &val, "baud rate")?;
    }
    if let Some((var, val)) = env_value("SERIAL_DEFAULT_TIMEOUT_MS", &[]) {
        config.serial.default_timeout_ms = parse_env(&var, &val, "timeout")?;
    }
    if let Some((var, val)) = env_value("SERIAL_PARITY", &[]) {
        config.serial.parity = parse_env(&var, &val, "parity")?;
    }
    if let Some((var, val)) = env_value("SERIAL_FLOW_CONTROL", &[]) {
        config.serial.flow_control = parse_env(&var, &val, "flow control")?;
    }

    // Poll overrides
    if let Some((var, val)) = env_value("POLL_INTERVAL_MS", &[]) {
        config.poll.interval_ms = parse_env(&var, &val, "poll interval")?;
    }
    if let Some((var, val)) = env_value("POLL_BUFFER_SIZE", &[]) {
        config.poll.buffer_size = parse_env(&var, &val, "buffer size")?;
    }
    if let Some((var, val)) = env_value("POLL_TIMEOUT_MS", &[]) {
        config.poll.timeout_ms = Some(parse_env(&var, &val, "poll timeout")?);
    }

    // Logging overrides
    if let Some((_, val)) = env_value("LOGGING_LEVEL", &[]) {
        config.logging.level = val;
    }
    if let Some((var, val)) = env_value("LOGGING_FORMAT", &[]) {
        config.logging.format = match val.to_ascii_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            "compact" => LogFormat::Compact,
            _ => return Err(ConfigError::env(var, "Expected 'pretty' or 'compact'")),
        };
    }

    // Testing overrides (also support legacy TEST_PORT etc.)
    if let Some((_, val)) = env_value("TESTING_PORT", &["TEST_PORT"]) {
        config.testing.port = Some(val);
    }
    if let Some((var, val)) = env_value("TESTING_BAUD", &["TEST_BAUD"]) {
        config.testing.baud = parse_env(&var, &val, "baud rate")?;
    }
    if let Some((var, val)) = env_value("TESTING_TIMEOUT_MS", &["TEST_TIMEOUT"]) {
        config.testing.timeout_ms = parse_env(&var, &val, "timeout")?;
    }
    if let Some((_, val)) = env_value("TESTING_LOOPBACK", &["TEST_LOOPBACK"]) {
        config.testing.loopback_enabled = parse_flag(&val);
    }

    Ok(())
}
