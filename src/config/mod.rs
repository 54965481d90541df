//! Configuration module.
//!
//! TOML-based configuration with environment variable overrides.
//!
//! # Configuration Resolution
//!
//! Configuration is loaded from the following locations (in order of priority):
//!
//! 1. `SERIAL_SESSION_CONFIG` environment variable (explicit path)
//! 2. `./serial-session.toml` (current directory)
//! 3. `~/.config/serial-session/config.toml` (XDG on Linux/macOS)
//! 4. `%APPDATA%\serial-session\config.toml` (Windows)
//! 5. Built-in defaults (no file required)
//!
//! # Environment Overrides
//!
//! The pattern is `SERIAL_SESSION_<SECTION>_<KEY>`, for example
//! `SERIAL_SESSION_SERIAL_DEFAULT_BAUD=9600` or
//! `SERIAL_SESSION_POLL_INTERVAL_MS=50`. The hardware test variables
//! `TEST_PORT`, `TEST_BAUD`, `TEST_TIMEOUT` and `TEST_LOOPBACK` are also read.
//!
//! # Example
//!
//! ```rust,no_run
//! use serial_session::config::ConfigLoader;
//!
//! let loader = ConfigLoader::load()?;
//! let config = loader.config();
//! println!("Default baud: {}", config.serial.default_baud);
//! # Ok::<(), serial_session::config::ConfigError>(())
//! ```

mod error;
mod loader;
mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{
    get_default_config_dir, get_default_config_path, resolve_config_path, ConfigLoader,
};
pub use schema::{Config, LogFormat, LoggingConfig, PollConfig, SerialConfig, TestingConfig};
