//! Host serial driver.
//!
//! Wraps the `serialport` crate behind [`SerialDriver`] / [`DeviceHandle`].
//! The device's settings are read before `serialport` reconfigures it and
//! reapplied straight after, so a session snapshots the true pre-open
//! configuration. Line settings are read and written in one piece through
//! the platform's native block (termios on unix, the `DCB` on Windows).

use super::error::PortError;
use super::traits::{
    DataBits, DeviceHandle, FlowControl, FlushTarget, Parity, PortConfig, SerialDriver, StopBits,
};
#[cfg(windows)]
use super::dcb::LineSettings;
#[cfg(unix)]
use super::termios::LineSettings;
use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

#[cfg(unix)]
type NativePort = serialport::TTYPort;
#[cfg(windows)]
type NativePort = serialport::COMPort;

/// Longest single wait inside a blocking transfer; unbounded transfers loop on it.
const MAX_WAIT_SLICE: Duration = Duration::from_millis(500);

/// Driver backed by the operating system's serial devices.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemDriver;

impl SystemDriver {
    pub fn new() -> Self {
        Self
    }
}

impl SerialDriver for SystemDriver {
    fn enumerate_ports(&self) -> Result<Vec<String>, PortError> {
        let ports = serialport::available_ports()?;
        Ok(ports.into_iter().map(|info| info.port_name).collect())
    }

    fn open_by_name(&self, name: &str) -> Result<Box<dyn DeviceHandle>, PortError> {
        let (found, _held) = LineSettings::peek(name).map_err(|e| open_error(name, e))?;
        let prior = found.config()?;
        tracing::trace!(port = name, settings = %prior, "pre-open line settings");

        let port = serialport::new(name, prior.baud_rate)
            .timeout(Duration::ZERO)
            .open_native()?;

        // Opening switched the device to raw mode at our defaults; put its
        // own speed, framing and flow control back.
        let mut line = LineSettings::read(&port)?;
        line.adopt_line(&found);
        if let Err(e) = line.write(&port) {
            if let Err(undo) = found.write(&port) {
                tracing::debug!(port = name, error = %undo, "could not put back pre-open settings");
            }
            return Err(e.into());
        }

        Ok(Box::new(SystemPort {
            port: Some(port),
            name: name.to_string(),
            found,
        }))
    }
}

fn open_error(name: &str, err: io::Error) -> PortError {
    match err.kind() {
        io::ErrorKind::NotFound => PortError::not_found(name),
        io::ErrorKind::PermissionDenied => PortError::AccessDenied(name.to_string()),
        kind => PortError::System(io::Error::new(
            kind,
            format!("cannot read line settings of {name}: {err}"),
        )),
    }
}

/// One open OS serial device.
pub struct SystemPort {
    /// `None` once the handle has been closed.
    port: Option<NativePort>,
    name: String,
    /// Settings the device had before it was opened.
    found: LineSettings,
}

impl SystemPort {
    fn port(&self) -> Result<&NativePort, PortError> {
        self.port.as_ref().ok_or(PortError::NotOpen)
    }

    fn port_mut(&mut self) -> Result<&mut NativePort, PortError> {
        self.port.as_mut().ok_or(PortError::NotOpen)
    }

    /// Read the device's settings, change them and write them back in one call.
    fn update(
        &mut self,
        change: impl FnOnce(&mut LineSettings) -> Result<(), PortError>,
    ) -> Result<(), PortError> {
        let port = self.port()?;
        let mut line = LineSettings::read(port)?;
        change(&mut line)?;
        line.write(port)?;
        Ok(())
    }
}

impl DeviceHandle for SystemPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_config(&self) -> Result<PortConfig, PortError> {
        LineSettings::read(self.port()?)?.config()
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), PortError> {
        self.update(|line| line.set_baud_rate(baud_rate))
    }

    fn set_data_bits(&mut self, data_bits: DataBits) -> Result<(), PortError> {
        self.update(|line| line.set_data_bits(data_bits))
    }

    fn set_stop_bits(&mut self, stop_bits: StopBits) -> Result<(), PortError> {
        self.update(|line| {
            line.set_stop_bits(stop_bits);
            Ok(())
        })
    }

    fn set_parity(&mut self, parity: Parity) -> Result<(), PortError> {
        self.update(|line| line.set_parity(parity))
    }

    fn set_flow_control(&mut self, flow_control: FlowControl) -> Result<(), PortError> {
        self.update(|line| line.set_flow_control(flow_control))
    }

    /// Applies every field with a single write, so an unsupported field
    /// leaves the device untouched.
    fn set_config(&mut self, config: &PortConfig) -> Result<(), PortError> {
        self.update(|line| {
            line.set_baud_rate(config.baud_rate)?;
            line.set_data_bits(config.data_bits)?;
            line.set_parity(config.parity)?;
            line.set_stop_bits(config.stop_bits);
            line.set_flow_control(config.flow_control)
        })
    }

    fn restore(&mut self, prior: &PortConfig) -> Result<(), PortError> {
        if self.found.config().ok().as_ref() == Some(prior) {
            self.found.write(self.port()?)?;
            Ok(())
        } else {
            self.set_config(prior)
        }
    }

    fn blocking_read(
        &mut self,
        buffer: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<usize, PortError> {
        let port = self.port_mut()?;
        let deadline = timeout.map(|t| Instant::now() + t);
        transfer_loop(buffer.len(), deadline, |done, wait| {
            port.set_timeout(wait)?;
            port.read(&mut buffer[done..])
        })
    }

    fn blocking_write(
        &mut self,
        data: &[u8],
        timeout: Option<Duration>,
    ) -> Result<usize, PortError> {
        let port = self.port_mut()?;
        let deadline = timeout.map(|t| Instant::now() + t);
        transfer_loop(data.len(), deadline, |done, wait| {
            port.set_timeout(wait)?;
            port.write(&data[done..])
        })
    }

    fn nonblocking_read(&mut self, buffer: &mut [u8]) -> Result<usize, PortError> {
        let port = self.port_mut()?;
        let waiting = port.bytes_to_read()? as usize;
        let len = waiting.min(buffer.len());
        if len == 0 {
            return Ok(0);
        }

        port.set_timeout(Duration::ZERO)?;
        match port.read(&mut buffer[..len]) {
            Ok(n) => Ok(n),
            Err(e) if is_transient(&e) => Ok(0),
            Err(e) => Err(PortError::System(e)),
        }
    }

    fn nonblocking_write(&mut self, data: &[u8]) -> Result<usize, PortError> {
        let port = self.port_mut()?;
        if data.is_empty() {
            return Ok(0);
        }

        port.set_timeout(Duration::ZERO)?;
        match port.write(data) {
            Ok(n) => Ok(n),
            Err(e) if is_transient(&e) => Ok(0),
            Err(e) => Err(PortError::System(e)),
        }
    }

    fn input_waiting(&self) -> Result<usize, PortError> {
        Ok(self.port()?.bytes_to_read()? as usize)
    }

    fn output_waiting(&self) -> Result<usize, PortError> {
        Ok(self.port()?.bytes_to_write()? as usize)
    }

    fn flush(&mut self, target: FlushTarget) -> Result<(), PortError> {
        let buffer = match target {
            FlushTarget::Input => serialport::ClearBuffer::Input,
            FlushTarget::Output => serialport::ClearBuffer::Output,
            FlushTarget::Both => serialport::ClearBuffer::All,
        };
        Ok(self.port()?.clear(buffer)?)
    }

    fn drain(&mut self) -> Result<(), PortError> {
        // io::Write::flush waits for the transmit queue (tcdrain on unix)
        self.port_mut()?.flush().map_err(PortError::System)
    }

    fn close(&mut self) -> Result<(), PortError> {
        // Dropping the serialport handle closes the descriptor
        self.port.take().map(drop).ok_or(PortError::NotOpen)
    }
}

impl std::fmt::Debug for SystemPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemPort")
            .field("name", &self.name)
            .field("open", &self.port.is_some())
            .finish()
    }
}

/// Drive `step` until `len` bytes are done, the deadline passes or the
/// device reports end of input.
///
/// `step` gets the count done so far and the wait for this attempt.
fn transfer_loop(
    len: usize,
    deadline: Option<Instant>,
    mut step: impl FnMut(usize, Duration) -> io::Result<usize>,
) -> Result<usize, PortError> {
    let mut done = 0;
    while done < len {
        let Some(wait) = next_wait(deadline) else {
            break;
        };
        match step(done, wait) {
            Ok(0) => break,
            Ok(n) => done += n,
            Err(e) if is_transient(&e) => continue,
            Err(e) => return Err(PortError::System(e)),
        }
    }
    Ok(done)
}

/// Time to wait in the next slice of a blocking transfer, `None` once expired.
fn next_wait(deadline: Option<Instant>) -> Option<Duration> {
    match deadline {
        Some(deadline) => {
            let remaining = deadline.saturating_duration_since(Instant::now());
            (!remaining.is_zero()).then(|| remaining.min(MAX_WAIT_SLICE))
        }
        None => Some(MAX_WAIT_SLICE),
    }
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_port_not_found_error() {
        let result = SystemDriver::new().open_by_name("/dev/nonexistent_port_12345");

        match result {
            Err(PortError::NotFound(name)) => assert_eq!(name, "/dev/nonexistent_port_12345"),
            other => panic!("Expected NotFound error, got: {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_open_fails_when_settings_unreadable() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.path().to_str().unwrap();

        let err = SystemDriver::new().open_by_name(path).unwrap_err();
        assert!(matches!(err, PortError::System(_)), "got {err:?}");
        assert!(err.to_string().contains("cannot read line settings"));
    }

    #[test]
    fn test_next_wait_expires() {
        assert_eq!(next_wait(None), Some(MAX_WAIT_SLICE));
        assert_eq!(next_wait(Some(Instant::now())), None);
        let wait = next_wait(Some(Instant::now() + Duration::from_millis(50))).unwrap();
        assert!(wait <= Duration::from_millis(50));
    }

    #[test]
    fn test_unbounded_transfer_stops_at_end_of_input() {
        let mut calls = 0;
        let n = transfer_loop(8, None, |_, _| {
            calls += 1;
            Ok(if calls == 1 { 3 } else { 0 })
        })
        .unwrap();

        assert_eq!(n, 3);
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_transfer_retries_transient_errors() {
        let mut results = vec![
            Ok(2),
            Err(io::Error::from(io::ErrorKind::TimedOut)),
            Err(io::Error::from(io::ErrorKind::Interrupted)),
            Ok(2),
        ]
        .into_iter();
        let mut offsets = Vec::new();

        let n = transfer_loop(4, None, |done, _| {
            offsets.push(done);
            results.next().unwrap_or(Ok(0))
        })
        .unwrap();

        assert_eq!(n, 4);
        assert_eq!(offsets, vec![0, 2, 2, 2]);
    }

    #[test]
    fn test_transfer_reports_hard_errors() {
        let err = transfer_loop(4, None, |_, _| {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        })
        .unwrap_err();
        assert!(matches!(err, PortError::System(ref e) if e.kind() == io::ErrorKind::BrokenPipe));
    }

    #[test]
    fn test_expired_deadline_transfers_nothing() {
        let n = transfer_loop(4, Some(Instant::now()), |_, _| Ok(4)).unwrap();
        assert_eq!(n, 0);
    }

    /// Pseudo-terminal pairs stand in for real devices. The Linux pty
    /// driver pins the slave to CS8 without parity, so framing and parity
    /// decoding is covered in the termios module instead.
    #[cfg(all(target_os = "linux", not(target_env = "musl")))]
    mod pty {
        use super::super::LineSettings;
        use crate::port::{FlowControl, Parity, PortConfig, StopBits};
        use crate::session::Session;
        use crate::SystemDriver;
        use pretty_assertions::assert_eq;
        use serialport::{SerialPort, TTYPort};

        /// Create a pty pair and preset the slave side; the master must be
        /// kept alive for the slave to stay usable.
        fn preset_pty(setup: impl FnOnce(&mut LineSettings)) -> (TTYPort, TTYPort, String) {
            let (master, mut slave) = TTYPort::pair().expect("pty pair");
            slave.set_exclusive(false).unwrap();

            let mut line = LineSettings::read(&slave).unwrap();
            setup(&mut line);
            line.write(&slave).unwrap();

            let name = slave.name().expect("pty has a path");
            (master, slave, name)
        }

        #[test]
        fn test_open_keeps_preset_line_settings() {
            let (_master, slave, name) = preset_pty(|line| {
                line.set_baud_rate(115_200).unwrap();
                line.set_stop_bits(StopBits::Two);
                line.set_flow_control(FlowControl::XonXoff).unwrap();
            });
            let before = LineSettings::read(&slave).unwrap();

            let session = Session::open(&SystemDriver::new(), &name).unwrap();
            let prior = session.prior_config().unwrap();
            assert_eq!(prior.baud_rate, 115_200);
            assert_eq!(prior.stop_bits, StopBits::Two);
            assert_eq!(prior.parity, Parity::None);
            assert_eq!(prior.flow_control, FlowControl::XonXoff);
            assert_eq!(session.device_config().unwrap(), prior);

            session.close().unwrap();
            assert_eq!(LineSettings::read(&slave).unwrap(), before);
        }

        #[test]
        fn test_close_restores_after_reconfiguration() {
            let (_master, slave, name) = preset_pty(|line| {
                line.set_baud_rate(57_600).unwrap();
                line.set_flow_control(FlowControl::RtsCts).unwrap();
            });
            let before = LineSettings::read(&slave).unwrap();

            let session = Session::open(&SystemDriver::new(), &name).unwrap();
            session
                .set_params(9600, 8, 1, Parity::None, FlowControl::None)
                .unwrap();
            assert_eq!(session.device_config().unwrap(), PortConfig::default());

            session.close().unwrap();
            assert_eq!(LineSettings::read(&slave).unwrap(), before);
            assert_eq!(before.config().unwrap().baud_rate, 57_600);
        }

        #[cfg(not(any(target_arch = "powerpc", target_arch = "powerpc64")))]
        #[test]
        fn test_open_keeps_non_standard_baud() {
            let (_master, slave, name) = preset_pty(|line| {
                line.set_baud_rate(250_000).unwrap();
            });

            let session = Session::open(&SystemDriver::new(), &name).unwrap();
            assert_eq!(session.prior_config().unwrap().baud_rate, 250_000);
            session.close().unwrap();

            let after = LineSettings::read(&slave).unwrap();
            assert_eq!(after.config().unwrap().baud_rate, 250_000);
        }
    }
}
