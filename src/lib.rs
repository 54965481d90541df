//! Serial port sessions.
//!
//! This library enumerates serial ports, opens them as [`Session`]s that
//! remember the configuration they found, and performs blocking and
//! non-blocking transfers with timeouts. Closing a session restores the
//! configuration captured at open time.
//!
//! # Modules
//!
//! - `port`: driver traits, the host driver and a mock driver
//! - `enumerate`: port enumeration
//! - `session`: the open → configure → transfer → close lifecycle
//! - `poller`: background polling reader
//! - `config`: configuration management with TOML support
//! - `error`: application-level error for the binary
//!
//! # Example
//!
//! ```no_run
//! use serial_session::{FlowControl, Parity, Session, TransferMode};
//!
//! let session = Session::open_system("/dev/ttyUSB0")?;
//! session.set_params(115200, 8, 1, Parity::None, FlowControl::None)?;
//! session.write(b"ping\n", TransferMode::Blocking, 500)?;
//!
//! let mut reply = [0u8; 64];
//! let n = session.read(&mut reply, TransferMode::Blocking, 500)?;
//! println!("{}", String::from_utf8_lossy(&reply[..n]));
//! session.close()?;
//! # Ok::<(), serial_session::PortError>(())
//! ```

pub mod config;
pub mod enumerate;
pub mod error;
pub mod poller;
pub mod port;
pub mod session;

// Re-export commonly used types for convenience
pub use enumerate::{available_ports, list_ports};
pub use error::{AppError, AppResult};
pub use poller::{PollOptions, PollSummary, Poller, StopReason};
pub use port::{
    CloseStep, DataBits, ErrorKind, FlowControl, FlushTarget, Parity, PortConfig, PortError,
    SerialDriver, StopBits, SystemDriver, TransferMode,
};
pub use session::{Phase, Session, SessionStats};

pub use config::{Config, ConfigError, ConfigLoader, ConfigResult};
