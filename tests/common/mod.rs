//! Shared test utilities for serial session tests.
//!
//! This module provides common test infrastructure including:
//! - Mock drivers with pre-registered devices
//! - Session builders that open against those devices
//! - Hardware test configuration from the environment

#![allow(dead_code)]

use serial_session::config::ConfigLoader;
use serial_session::port::{MockDevice, MockDriver};
use serial_session::{FlowControl, Parity, PortConfig, Session};
use std::time::{Duration, Instant};

/// Name used for the primary mock device in tests.
pub const MOCK_PORT: &str = "MOCK0";

/// A line configuration no fresh device has, for spotting restores.
pub fn unusual_config() -> PortConfig {
    PortConfig::from_raw(4800, 7, 2, Parity::Even, FlowControl::RtsCts)
        .expect("valid settings")
}

/// Create a mock driver with one plain device.
pub fn driver_with_device() -> (MockDriver, MockDevice) {
    let driver = MockDriver::new();
    let device = driver.add_device(MOCK_PORT);
    (driver, device)
}

/// Create a mock driver with one loopback device preset to `prior`.
pub fn loopback_with_prior(prior: PortConfig) -> (MockDriver, MockDevice) {
    let driver = MockDriver::new();
    let device = driver.add_loopback_device(MOCK_PORT);
    device.set_config(prior);
    (driver, device)
}

/// Open a session on the primary mock device.
pub fn open_session(driver: &MockDriver) -> Session {
    Session::open(driver, MOCK_PORT).expect("mock session opens")
}

/// Wait until `condition` holds or `timeout` passes.
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Hardware test configuration.
pub struct HardwareConfig {
    pub port_name: String,
    pub baud_rate: u32,
    pub loopback_enabled: bool,
    pub timeout: Duration,
}

impl HardwareConfig {
    /// Read the `[testing]` section (including `TEST_PORT` and friends).
    ///
    /// Returns `None` when no test port is configured.
    pub fn from_env() -> Option<Self> {
        let testing = ConfigLoader::with_defaults().into_config().testing;
        let timeout = testing.timeout();
        Some(Self {
            port_name: testing.port?,
            baud_rate: testing.baud,
            loopback_enabled: testing.loopback_enabled,
            timeout,
        })
    }

    /// Timeout in whole milliseconds, as session transfers take it.
    pub fn timeout_ms(&self) -> u32 {
        u32::try_from(self.timeout.as_millis()).unwrap_or(u32::MAX)
    }
}

/// Skip test if hardware is not available.
pub fn skip_without_hardware() -> Option<HardwareConfig> {
    let config = HardwareConfig::from_env();
    if config.is_none() {
        println!("Skipping hardware test: TEST_PORT not set");
    }
    config
}
