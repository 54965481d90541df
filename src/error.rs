//! Application-level error for the command-line front end.

use crate::config::ConfigError;
use crate::port::PortError;
use std::fmt;

/// A specialized `Result` type for the command-line front end.
pub type AppResult<T> = Result<T, AppError>;

/// Unified application error type.
#[derive(Debug)]
pub enum AppError {
    /// No port on the command line and no `serial.default_port` configured.
    NoPortSpecified,
    Port(PortError),
    Config(ConfigError),
    Io(std::io::Error),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoPortSpecified => write!(
                f,
                "No port given. Pass one on the command line or set serial.default_port."
            ),
            Self::Port(e) => write!(f, "A serial port error occurred: {e}"),
            Self::Config(e) => write!(f, "A configuration error occurred: {e}"),
            Self::Io(e) => write!(f, "An I/O error occurred: {e}"),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::NoPortSpecified => None,
            Self::Port(e) => Some(e),
            Self::Config(e) => Some(e),
            Self::Io(e) => Some(e),
        }
    }
}

// Implement `From` conversions to allow the `?` operator to work seamlessly.
impl From<PortError> for AppError {
    fn from(err: PortError) -> Self {
        AppError::Port(err)
    }
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        AppError::Config(err)
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err)
    }
}
