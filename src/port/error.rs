//! Port-specific error types.
//!
//! Every driver failure is surfaced as a [`PortError`]; [`PortError::kind`]
//! collapses the variants onto the coarse taxonomy callers branch on.

use std::fmt;
use thiserror::Error;

/// Coarse classification of a [`PortError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Invalid input passed to an operation.
    Argument,
    /// An OS-level failure (permissions, device removed, I/O error).
    System,
    /// The driver could not allocate required resources.
    Allocation,
    /// The feature is not supported by this platform or device.
    Unsupported,
    /// The session is not in an open state.
    NotOpen,
}

/// Step of the close sequence, reported when one of them fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseStep {
    Flush,
    RestoreConfig,
    Release,
}

impl fmt::Display for CloseStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flush => write!(f, "flush"),
            Self::RestoreConfig => write!(f, "restore prior configuration"),
            Self::Release => write!(f, "release handle"),
        }
    }
}

/// Errors that can occur during serial port operations.
#[derive(Debug, Error)]
pub enum PortError {
    /// Invalid arguments were passed to the operation.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The specified serial port was not found on the system.
    #[error("Serial port not found: {0}")]
    NotFound(String),

    /// The port exists but could not be opened with the requested access.
    #[error("Access denied to serial port: {0}")]
    AccessDenied(String),

    /// The requested operation is not supported by this system or device.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// A memory allocation failed while executing the operation.
    #[error("Allocation failure: {0}")]
    Allocation(String),

    /// A system error occurred while executing the operation.
    #[error("System failure: {0}")]
    System(#[from] std::io::Error),

    /// Attempted to use a session that is not open.
    #[error("Port is not open")]
    NotOpen,

    /// The host could not be queried for serial devices.
    #[error("Port enumeration failed: {0}")]
    Enumeration(#[source] Box<PortError>),

    /// One or more close steps failed; the handle has been released anyway.
    #[error("Close completed with {failed_steps} failed step(s), first at {step}: {source}")]
    CloseIncomplete {
        step: CloseStep,
        failed_steps: usize,
        #[source]
        source: Box<PortError>,
    },
}

impl PortError {
    /// Create an InvalidArgument error from a message.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Create a NotFound error from a port name.
    pub fn not_found(port_name: impl Into<String>) -> Self {
        Self::NotFound(port_name.into())
    }

    /// Create an Unsupported error from a message.
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported(message.into())
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::Argument,
            Self::NotFound(_) | Self::AccessDenied(_) | Self::System(_) => ErrorKind::System,
            Self::Unsupported(_) => ErrorKind::Unsupported,
            Self::Allocation(_) => ErrorKind::Allocation,
            Self::NotOpen => ErrorKind::NotOpen,
            Self::Enumeration(inner) => inner.kind(),
            Self::CloseIncomplete { source, .. } => source.kind(),
        }
    }
}

impl From<serialport::Error> for PortError {
    fn from(err: serialport::Error) -> Self {
        match err.kind() {
            serialport::ErrorKind::NoDevice => Self::NotFound(err.description),
            serialport::ErrorKind::InvalidInput => Self::InvalidArgument(err.description),
            serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
                Self::AccessDenied(err.description)
            }
            serialport::ErrorKind::Io(std::io::ErrorKind::OutOfMemory) => {
                Self::Allocation(err.description)
            }
            serialport::ErrorKind::Io(kind) => {
                Self::System(std::io::Error::new(kind, err.description))
            }
            serialport::ErrorKind::Unknown => Self::System(std::io::Error::other(err.description)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PortError::not_found("/dev/ttyUSB0");
        assert_eq!(err.to_string(), "Serial port not found: /dev/ttyUSB0");

        let err = PortError::invalid_argument("baud rate must be positive");
        assert_eq!(err.to_string(), "Invalid argument: baud rate must be positive");

        assert_eq!(PortError::NotOpen.to_string(), "Port is not open");
    }

    #[test]
    fn test_kind_classification() {
        assert_eq!(PortError::invalid_argument("x").kind(), ErrorKind::Argument);
        assert_eq!(PortError::not_found("x").kind(), ErrorKind::System);
        assert_eq!(PortError::unsupported("x").kind(), ErrorKind::Unsupported);
        assert_eq!(PortError::Allocation("x".into()).kind(), ErrorKind::Allocation);
        assert_eq!(PortError::NotOpen.kind(), ErrorKind::NotOpen);

        let nested = PortError::CloseIncomplete {
            step: CloseStep::RestoreConfig,
            failed_steps: 2,
            source: Box::new(PortError::unsupported("mark parity")),
        };
        assert_eq!(nested.kind(), ErrorKind::Unsupported);
        assert!(nested.to_string().contains("restore prior configuration"));
    }

    #[test]
    fn test_serialport_error_mapping() {
        let err: PortError =
            serialport::Error::new(serialport::ErrorKind::NoDevice, "gone").into();
        assert!(matches!(err, PortError::NotFound(ref d) if d == "gone"));

        let err: PortError =
            serialport::Error::new(serialport::ErrorKind::InvalidInput, "bad baud").into();
        assert_eq!(err.kind(), ErrorKind::Argument);

        let err: PortError = serialport::Error::new(
            serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied),
            "busy",
        )
        .into();
        assert!(matches!(err, PortError::AccessDenied(_)));

        let err: PortError = serialport::Error::new(
            serialport::ErrorKind::Io(std::io::ErrorKind::TimedOut),
            "slow",
        )
        .into();
        assert!(
            matches!(err, PortError::System(ref e) if e.kind() == std::io::ErrorKind::TimedOut)
        );
    }
}
