//! Port sessions.
//!
//! A [`Session`] owns one open device handle together with two configuration
//! snapshots: the *prior* configuration, captured right after open and never
//! modified, and the *current* configuration, updated by successful
//! [`Session::set_params`] calls. [`Session::close`] flushes the device,
//! reapplies the prior configuration and releases the handle, attempting
//! every step even when an earlier one fails.
//!
//! All operations on a session are serialized behind an internal mutex, so a
//! session can be shared (`Arc<Session>`) between a reader thread and writers.
//! A blocking transfer holds that mutex for up to its timeout; use
//! non-blocking transfers when another thread must get in between.
//!
//! # Timeouts
//!
//! `timeout_ms` is only used by [`TransferMode::Blocking`]. **A timeout of `0`
//! waits indefinitely**, which leaves the caller with no bound on latency.

use crate::port::{
    timeout_from_ms, CloseStep, DeviceHandle, FlowControl, FlushTarget, Parity, PortConfig,
    PortError, SerialDriver, SystemDriver, TransferMode, MAX_TRANSFER_LEN,
};
use parking_lot::Mutex;
use std::fmt;
use std::ops::{Deref, DerefMut};

/// Lifecycle phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Open with the device's pre-existing configuration.
    Open,
    /// Open, and at least one configuration change has been applied.
    Configured,
    /// Closed; terminal.
    Closed,
}

/// Transfer counters for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub bytes_read: u64,
    pub bytes_written: u64,
}

/// A device handle that is closed when dropped unless already released.
struct OwnedHandle {
    inner: Box<dyn DeviceHandle>,
    released: bool,
}

impl OwnedHandle {
    fn new(inner: Box<dyn DeviceHandle>) -> Self {
        Self {
            inner,
            released: false,
        }
    }

    fn release(&mut self) -> Result<(), PortError> {
        self.released = true;
        self.inner.close()
    }
}

impl Deref for OwnedHandle {
    type Target = dyn DeviceHandle;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

impl DerefMut for OwnedHandle {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.inner
    }
}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.inner.close() {
                tracing::debug!(port = self.inner.name(), error = %e, "handle release on drop failed");
            }
        }
    }
}

struct OpenPort {
    handle: OwnedHandle,
    prior: PortConfig,
    current: PortConfig,
    configured: bool,
    stats: SessionStats,
}

impl OpenPort {
    /// Run every close step, reporting the first failure and how many failed.
    fn shutdown(mut self) -> Result<(), PortError> {
        let mut failures = Vec::new();

        if let Err(e) = self.handle.flush(FlushTarget::Both) {
            failures.push((CloseStep::Flush, e));
        }
        if let Err(e) = self.handle.restore(&self.prior) {
            failures.push((CloseStep::RestoreConfig, e));
        }
        if let Err(e) = self.handle.release() {
            failures.push((CloseStep::Release, e));
        }

        let failed_steps = failures.len();
        match failures.into_iter().next() {
            None => Ok(()),
            Some((step, source)) => Err(PortError::CloseIncomplete {
                step,
                failed_steps,
                source: Box::new(source),
            }),
        }
    }
}

enum SessionState {
    Open(OpenPort),
    Closed,
}

/// One open serial port and its configuration history.
pub struct Session {
    name: String,
    state: Mutex<SessionState>,
}

impl Session {
    /// Open `name` through `driver` and snapshot its configuration.
    ///
    /// # Errors
    ///
    /// - `PortError::InvalidArgument` for an empty name or one containing NUL
    /// - `PortError::NotFound` / `PortError::AccessDenied` / `PortError::System`
    ///   as reported by the driver
    ///
    /// If the configuration cannot be read after opening, the handle is
    /// released before the error is returned.
    pub fn open(driver: &dyn SerialDriver, name: &str) -> Result<Self, PortError> {
        if name.is_empty() {
            return Err(PortError::invalid_argument("port name is empty"));
        }
        if name.contains('\0') {
            return Err(PortError::invalid_argument("port name contains NUL"));
        }

        let handle = OwnedHandle::new(driver.open_by_name(name)?);
        let prior = handle.get_config()?;
        tracing::debug!(port = name, prior = %prior, "session opened");

        Ok(Self {
            name: name.to_string(),
            state: Mutex::new(SessionState::Open(OpenPort {
                handle,
                prior,
                current: prior,
                configured: false,
                stats: SessionStats::default(),
            })),
        })
    }

    /// Open a port on the host's serial driver.
    pub fn open_system(name: &str) -> Result<Self, PortError> {
        Self::open(&SystemDriver::new(), name)
    }

    /// Name the session was opened with.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn phase(&self) -> Phase {
        match &*self.state.lock() {
            SessionState::Open(port) if port.configured => Phase::Configured,
            SessionState::Open(_) => Phase::Open,
            SessionState::Closed => Phase::Closed,
        }
    }

    pub fn is_open(&self) -> bool {
        self.phase() != Phase::Closed
    }

    fn with_open<T>(
        &self,
        f: impl FnOnce(&mut OpenPort) -> Result<T, PortError>,
    ) -> Result<T, PortError> {
        match &mut *self.state.lock() {
            SessionState::Open(port) => f(port),
            SessionState::Closed => Err(PortError::NotOpen),
        }
    }

    /// Configuration captured at open time.
    pub fn prior_config(&self) -> Result<PortConfig, PortError> {
        self.with_open(|port| Ok(port.prior))
    }

    /// Last successfully applied configuration.
    pub fn config(&self) -> Result<PortConfig, PortError> {
        self.with_open(|port| Ok(port.current))
    }

    /// Query the device for its active configuration.
    pub fn device_config(&self) -> Result<PortConfig, PortError> {
        self.with_open(|port| port.handle.get_config())
    }

    pub fn stats(&self) -> Result<SessionStats, PortError> {
        self.with_open(|port| Ok(port.stats))
    }

    /// Set the common line parameters.
    ///
    /// Arguments are validated before the device is touched. On a driver
    /// failure the device is rolled back to the last known-good configuration.
    pub fn set_params(
        &self,
        baud_rate: u32,
        data_bits: u8,
        stop_bits: u8,
        parity: Parity,
        flow_control: FlowControl,
    ) -> Result<(), PortError> {
        let config = PortConfig::from_raw(baud_rate, data_bits, stop_bits, parity, flow_control)?;
        self.apply_config(config)
    }

    /// Apply a full configuration, all or nothing from the caller's view.
    pub fn apply_config(&self, config: PortConfig) -> Result<(), PortError> {
        config.validate()?;
        self.with_open(|port| {
            if let Err(err) = port.handle.set_config(&config) {
                if let Err(rollback) = port.handle.set_config(&port.current) {
                    tracing::debug!(port = port.handle.name(), error = %rollback, "rollback failed");
                }
                // Trust the device over the snapshot if it can still be queried
                if let Ok(actual) = port.handle.get_config() {
                    port.current = actual;
                }
                return Err(err);
            }

            port.current = config;
            port.configured = true;
            tracing::debug!(port = port.handle.name(), config = %config, "session configured");
            Ok(())
        })
    }

    /// Read into `buffer`.
    ///
    /// Blocking reads wait until the buffer is full or `timeout_ms` elapses
    /// (`0` = no limit) and may return a short count. Non-blocking reads take
    /// only what is already waiting and return `0` when nothing is.
    pub fn read(
        &self,
        buffer: &mut [u8],
        mode: TransferMode,
        timeout_ms: u32,
    ) -> Result<usize, PortError> {
        check_transfer_len(buffer.len())?;
        self.with_open(|port| {
            if buffer.is_empty() {
                return Ok(0);
            }
            let n = match mode {
                TransferMode::Blocking => port
                    .handle
                    .blocking_read(buffer, timeout_from_ms(timeout_ms))?,
                TransferMode::NonBlocking => {
                    let len = port.handle.input_waiting()?.min(buffer.len());
                    if len == 0 {
                        0
                    } else {
                        port.handle.nonblocking_read(&mut buffer[..len])?
                    }
                }
            };
            port.stats.bytes_read += n as u64;
            Ok(n)
        })
    }

    /// Write from `data`.
    ///
    /// A non-blocking write may accept fewer bytes than offered; resending
    /// the remainder is up to the caller.
    pub fn write(
        &self,
        data: &[u8],
        mode: TransferMode,
        timeout_ms: u32,
    ) -> Result<usize, PortError> {
        check_transfer_len(data.len())?;
        self.with_open(|port| {
            if data.is_empty() {
                return Ok(0);
            }
            let n = match mode {
                TransferMode::Blocking => port
                    .handle
                    .blocking_write(data, timeout_from_ms(timeout_ms))?,
                TransferMode::NonBlocking => port.handle.nonblocking_write(data)?,
            };
            port.stats.bytes_written += n as u64;
            Ok(n)
        })
    }

    /// Discard buffered input and/or output.
    pub fn flush(&self, target: FlushTarget) -> Result<(), PortError> {
        self.with_open(|port| port.handle.flush(target))
    }

    /// Block until all queued output has been transmitted.
    pub fn drain(&self) -> Result<(), PortError> {
        self.with_open(|port| port.handle.drain())
    }

    pub fn input_waiting(&self) -> Result<usize, PortError> {
        self.with_open(|port| port.handle.input_waiting())
    }

    pub fn output_waiting(&self) -> Result<usize, PortError> {
        self.with_open(|port| port.handle.output_waiting())
    }

    /// Flush, restore the prior configuration and release the handle.
    ///
    /// The session is closed afterwards whatever the outcome; a second call
    /// returns `PortError::NotOpen`.
    pub fn close(&self) -> Result<(), PortError> {
        let state = std::mem::replace(&mut *self.state.lock(), SessionState::Closed);
        match state {
            SessionState::Closed => Err(PortError::NotOpen),
            SessionState::Open(port) => {
                let result = port.shutdown();
                tracing::debug!(port = %self.name, ok = result.is_ok(), "session closed");
                result
            }
        }
    }
}

fn check_transfer_len(len: usize) -> Result<(), PortError> {
    if len > MAX_TRANSFER_LEN {
        return Err(PortError::invalid_argument(format!(
            "buffer of {len} bytes exceeds the {MAX_TRANSFER_LEN} byte transfer limit"
        )));
    }
    Ok(())
}

impl Drop for Session {
    fn drop(&mut self) {
        let state = std::mem::replace(self.state.get_mut(), SessionState::Closed);
        if let SessionState::Open(port) = state {
            if let Err(e) = port.shutdown() {
                tracing::debug!(port = %self.name, error = %e, "close on drop incomplete");
            }
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("name", &self.name)
            .field("phase", &self.phase())
            .finish()
    }
}
