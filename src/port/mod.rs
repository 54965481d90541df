//! Port abstraction layer for serial communication.
//!
//! Provides the driver collaborator traits, the host driver built on the
//! `serialport` crate, and an in-memory mock for tests.

pub mod error;
pub mod mock;
pub mod system;
pub mod traits;

#[cfg(windows)]
mod dcb;
#[cfg(unix)]
mod termios;

pub use error::{CloseStep, ErrorKind, PortError};
pub use mock::{MockDevice, MockDriver, MockHandle, MockOp};
pub use system::{SystemDriver, SystemPort};
pub use traits::*;
