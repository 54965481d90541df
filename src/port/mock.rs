//! Mock serial driver for testing.
//!
//! Provides a [`MockDriver`] that simulates serial devices without requiring
//! actual hardware. Each device keeps its own line configuration, receive
//! queue and transmit log, can loop written bytes back into its receive
//! queue, and can be told to fail specific operations.

use super::error::{ErrorKind, PortError};
use super::traits::{
    DataBits, DeviceHandle, FlowControl, FlushTarget, Parity, PortConfig, SerialDriver, StopBits,
};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Driver operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockOp {
    Enumerate,
    Open,
    GetConfig,
    SetBaudRate,
    SetDataBits,
    SetStopBits,
    SetParity,
    SetFlowControl,
    Read,
    Write,
    InputWaiting,
    OutputWaiting,
    Flush,
    Drain,
    Close,
}

fn injected(op: MockOp, kind: ErrorKind) -> PortError {
    let message = format!("injected {op:?} failure");
    match kind {
        ErrorKind::Argument => PortError::InvalidArgument(message),
        ErrorKind::System => PortError::System(std::io::Error::other(message)),
        ErrorKind::Allocation => PortError::Allocation(message),
        ErrorKind::Unsupported => PortError::Unsupported(message),
        ErrorKind::NotOpen => PortError::NotOpen,
    }
}

/// Inner state of a mock device, protected by a mutex for interior mutability.
#[derive(Debug, Default)]
struct MockDeviceState {
    /// Active line configuration.
    config: PortConfig,
    /// Bytes waiting to be read.
    read_queue: VecDeque<u8>,
    /// Every byte accepted for transmission.
    transmitted: Vec<u8>,
    /// Feed transmitted bytes back into the read queue.
    loopback: bool,
    /// Upper bound on bytes accepted by a single non-blocking write.
    write_chunk: Option<usize>,
    /// One-shot failures, consumed by the first matching operation.
    faults: Vec<(MockOp, ErrorKind)>,
    open: bool,
    open_count: usize,
    close_count: usize,
    flushes: Vec<FlushTarget>,
    drain_count: usize,
}

impl MockDeviceState {
    fn take_fault(&mut self, op: MockOp) -> Result<(), PortError> {
        match self.faults.iter().position(|(o, _)| *o == op) {
            Some(idx) => {
                let (_, kind) = self.faults.remove(idx);
                Err(injected(op, kind))
            }
            None => Ok(()),
        }
    }

    fn accept(&mut self, data: &[u8]) {
        self.transmitted.extend_from_slice(data);
        if self.loopback {
            self.read_queue.extend(data);
        }
    }

    fn take_into(&mut self, buffer: &mut [u8]) -> usize {
        let n = buffer.len().min(self.read_queue.len());
        for (slot, byte) in buffer.iter_mut().zip(self.read_queue.drain(..n)) {
            *slot = byte;
        }
        n
    }
}

/// Shared view of one simulated device.
///
/// Clones refer to the same device, so a test can keep one to inspect what a
/// session did with it.
#[derive(Clone, Default)]
pub struct MockDevice {
    inner: Arc<(Mutex<MockDeviceState>, Condvar)>,
}

impl MockDevice {
    /// Create a device with default line settings (9600 8N1).
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a device whose transmitted bytes are echoed back to its input.
    pub fn loopback() -> Self {
        let device = Self::new();
        device.set_loopback(true);
        device
    }

    fn state(&self) -> parking_lot::MutexGuard<'_, MockDeviceState> {
        self.inner.0.lock()
    }

    /// Enqueue bytes to be returned by subsequent read operations.
    pub fn enqueue_read(&self, data: &[u8]) {
        self.state().read_queue.extend(data);
        self.inner.1.notify_all();
    }

    /// Get a copy of everything transmitted so far.
    pub fn transmitted(&self) -> Vec<u8> {
        self.state().transmitted.clone()
    }

    /// Current line configuration, as the hardware would report it.
    pub fn config(&self) -> PortConfig {
        self.state().config
    }

    /// Pre-set the line configuration, as another program might have.
    pub fn set_config(&self, config: PortConfig) {
        self.state().config = config;
    }

    pub fn set_loopback(&self, loopback: bool) {
        self.state().loopback = loopback;
    }

    /// Limit how many bytes one non-blocking write accepts (`None` = unlimited).
    pub fn set_write_chunk(&self, chunk: Option<usize>) {
        self.state().write_chunk = chunk;
    }

    /// Make the next `op` on this device fail with an error of `kind`.
    pub fn fail_next(&self, op: MockOp, kind: ErrorKind) {
        self.state().faults.push((op, kind));
    }

    /// Get the number of bytes available to read.
    pub fn available_bytes(&self) -> usize {
        self.state().read_queue.len()
    }

    pub fn is_open(&self) -> bool {
        self.state().open
    }

    pub fn open_count(&self) -> usize {
        self.state().open_count
    }

    pub fn close_count(&self) -> usize {
        self.state().close_count
    }

    /// Flush targets in the order they were requested.
    pub fn flushes(&self) -> Vec<FlushTarget> {
        self.state().flushes.clone()
    }

    pub fn drain_count(&self) -> usize {
        self.state().drain_count
    }
}

impl std::fmt::Debug for MockDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("MockDevice")
            .field("config", &state.config)
            .field("available_bytes", &state.read_queue.len())
            .field("open", &state.open)
            .finish()
    }
}

#[derive(Debug, Default)]
struct MockDriverState {
    devices: Vec<(String, MockDevice)>,
    /// Overrides the enumeration result when set.
    reported_names: Option<Vec<String>>,
    enumerate_fault: Option<ErrorKind>,
}

/// Mock serial driver for testing.
///
/// # Example
/// ```
/// use serial_session::port::{DeviceHandle, MockDriver, SerialDriver};
///
/// let driver = MockDriver::new();
/// let device = driver.add_loopback_device("MOCK0");
///
/// let mut handle = driver.open_by_name("MOCK0").unwrap();
/// handle.nonblocking_write(b"ping").unwrap();
///
/// let mut buffer = [0u8; 8];
/// let n = handle.nonblocking_read(&mut buffer).unwrap();
/// assert_eq!(&buffer[..n], b"ping");
/// assert_eq!(device.transmitted(), b"ping");
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockDriver {
    state: Arc<Mutex<MockDriverState>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `device` under `name`; enumeration reports names in registration order.
    pub fn add(&self, name: impl Into<String>, device: MockDevice) -> MockDevice {
        self.state.lock().devices.push((name.into(), device.clone()));
        device
    }

    /// Register a plain device.
    pub fn add_device(&self, name: impl Into<String>) -> MockDevice {
        self.add(name, MockDevice::new())
    }

    /// Register a device with TX looped back to RX.
    pub fn add_loopback_device(&self, name: impl Into<String>) -> MockDevice {
        self.add(name, MockDevice::loopback())
    }

    /// Look up a registered device.
    pub fn device(&self, name: &str) -> Option<MockDevice> {
        self.state
            .lock()
            .devices
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, d)| d.clone())
    }

    /// Report exactly `names` from enumeration, regardless of registered devices.
    pub fn report_names(&self, names: Vec<String>) {
        self.state.lock().reported_names = Some(names);
    }

    /// Make the next enumeration fail.
    pub fn fail_enumeration(&self, kind: ErrorKind) {
        self.state.lock().enumerate_fault = Some(kind);
    }
}

impl SerialDriver for MockDriver {
    fn enumerate_ports(&self) -> Result<Vec<String>, PortError> {
        let mut state = self.state.lock();
        if let Some(kind) = state.enumerate_fault.take() {
            return Err(injected(MockOp::Enumerate, kind));
        }
        Ok(match &state.reported_names {
            Some(names) => names.clone(),
            None => state.devices.iter().map(|(n, _)| n.clone()).collect(),
        })
    }

    fn open_by_name(&self, name: &str) -> Result<Box<dyn DeviceHandle>, PortError> {
        let device = self.device(name).ok_or_else(|| PortError::not_found(name))?;
        {
            let mut state = device.state();
            state.take_fault(MockOp::Open)?;
            if state.open {
                return Err(PortError::AccessDenied(format!("{name} is already open")));
            }
            state.open = true;
            state.open_count += 1;
        }

        Ok(Box::new(MockHandle {
            name: name.to_string(),
            device,
            open: true,
        }))
    }
}

/// Handle to an open [`MockDevice`].
pub struct MockHandle {
    name: String,
    device: MockDevice,
    open: bool,
}

impl MockHandle {
    /// Lock the device for `op`, failing if closed or if a fault is pending.
    fn begin(&self, op: MockOp) -> Result<parking_lot::MutexGuard<'_, MockDeviceState>, PortError> {
        if !self.open {
            return Err(PortError::NotOpen);
        }
        let mut state = self.device.state();
        state.take_fault(op)?;
        Ok(state)
    }

    fn update(&self, op: MockOp, apply: impl FnOnce(&mut PortConfig)) -> Result<(), PortError> {
        let mut state = self.begin(op)?;
        apply(&mut state.config);
        Ok(())
    }

    fn release(&mut self) {
        if self.open {
            self.open = false;
            let mut state = self.device.state();
            state.open = false;
            state.close_count += 1;
        }
    }
}

impl DeviceHandle for MockHandle {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_config(&self) -> Result<PortConfig, PortError> {
        Ok(self.begin(MockOp::GetConfig)?.config)
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), PortError> {
        self.update(MockOp::SetBaudRate, |c| c.baud_rate = baud_rate)
    }

    fn set_data_bits(&mut self, data_bits: DataBits) -> Result<(), PortError> {
        self.update(MockOp::SetDataBits, |c| c.data_bits = data_bits)
    }

    fn set_stop_bits(&mut self, stop_bits: StopBits) -> Result<(), PortError> {
        self.update(MockOp::SetStopBits, |c| c.stop_bits = stop_bits)
    }

    fn set_parity(&mut self, parity: Parity) -> Result<(), PortError> {
        self.update(MockOp::SetParity, |c| c.parity = parity)
    }

    fn set_flow_control(&mut self, flow_control: FlowControl) -> Result<(), PortError> {
        self.update(MockOp::SetFlowControl, |c| c.flow_control = flow_control)
    }

    fn blocking_read(
        &mut self,
        buffer: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<usize, PortError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.begin(MockOp::Read)?;
        let condvar = &self.device.inner.1;

        while state.read_queue.len() < buffer.len() {
            match deadline {
                Some(deadline) => {
                    if condvar.wait_until(&mut state, deadline).timed_out() {
                        break;
                    }
                }
                None => condvar.wait(&mut state),
            }
        }

        Ok(state.take_into(buffer))
    }

    fn blocking_write(
        &mut self,
        data: &[u8],
        _timeout: Option<Duration>,
    ) -> Result<usize, PortError> {
        let mut state = self.begin(MockOp::Write)?;
        state.accept(data);
        drop(state);
        self.device.inner.1.notify_all();
        Ok(data.len())
    }

    fn nonblocking_read(&mut self, buffer: &mut [u8]) -> Result<usize, PortError> {
        let mut state = self.begin(MockOp::Read)?;
        Ok(state.take_into(buffer))
    }

    fn nonblocking_write(&mut self, data: &[u8]) -> Result<usize, PortError> {
        let mut state = self.begin(MockOp::Write)?;
        let n = state.write_chunk.map_or(data.len(), |chunk| chunk.min(data.len()));
        state.accept(&data[..n]);
        drop(state);
        self.device.inner.1.notify_all();
        Ok(n)
    }

    fn input_waiting(&self) -> Result<usize, PortError> {
        Ok(self.begin(MockOp::InputWaiting)?.read_queue.len())
    }

    fn output_waiting(&self) -> Result<usize, PortError> {
        // Transmission is instantaneous
        self.begin(MockOp::OutputWaiting).map(|_| 0)
    }

    fn flush(&mut self, target: FlushTarget) -> Result<(), PortError> {
        let mut state = self.begin(MockOp::Flush)?;
        if matches!(target, FlushTarget::Input | FlushTarget::Both) {
            state.read_queue.clear();
        }
        state.flushes.push(target);
        Ok(())
    }

    fn drain(&mut self) -> Result<(), PortError> {
        self.begin(MockOp::Drain)?.drain_count += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), PortError> {
        if !self.open {
            return Err(PortError::NotOpen);
        }
        // The descriptor is gone even when the driver reports a failure
        self.release();
        self.device.state().take_fault(MockOp::Close)
    }
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for MockHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockHandle")
            .field("name", &self.name)
            .field("open", &self.open)
            .finish()
    }
}
