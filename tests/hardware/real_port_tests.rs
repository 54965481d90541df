//! Tests requiring actual serial hardware.
//!
//! # Running Hardware Tests
//!
//! ```bash
//! export TEST_PORT=/dev/ttyUSB0          # or COM3 on Windows
//! export TEST_BAUD=115200                # optional, default: 115200
//! export TEST_LOOPBACK=1                 # if port has TX-RX loopback
//!
//! cargo test --features hardware-tests -- --ignored
//! ```

use crate::common::skip_without_hardware;
use serial_session::{
    FlowControl, FlushTarget, Parity, Phase, PortError, Session, TransferMode,
};
use std::time::{Duration, Instant};

#[test]
#[ignore] // Run with --ignored flag
fn test_real_port_open_close_restores_settings() {
    let Some(hw) = skip_without_hardware() else {
        return;
    };

    let session = Session::open_system(&hw.port_name).expect("port opens");
    let prior = session.prior_config().expect("prior config");
    println!("Testing {} (found at {prior})", hw.port_name);

    session
        .set_params(hw.baud_rate, 8, 1, Parity::None, FlowControl::None)
        .expect("port accepts 8N1");
    assert_eq!(session.phase(), Phase::Configured);
    assert_eq!(session.device_config().unwrap().baud_rate, hw.baud_rate);
    session.close().expect("close succeeds");

    let reopened = Session::open_system(&hw.port_name).expect("port reopens");
    assert_eq!(reopened.prior_config().unwrap(), prior);
    reopened.close().unwrap();
}

#[test]
#[ignore]
fn test_real_port_nonblocking_read_returns_promptly() {
    let Some(hw) = skip_without_hardware() else {
        return;
    };

    let session = Session::open_system(&hw.port_name).expect("port opens");
    session.flush(FlushTarget::Both).unwrap();

    let mut buffer = [0u8; 64];
    let start = Instant::now();
    let n = session
        .read(&mut buffer, TransferMode::NonBlocking, 0)
        .unwrap();
    assert!(n <= buffer.len());
    assert!(start.elapsed() < Duration::from_millis(500));
    session.close().unwrap();
}

#[test]
#[ignore]
fn test_real_port_loopback() {
    let Some(hw) = skip_without_hardware() else {
        return;
    };
    if !hw.loopback_enabled {
        println!("Skipping loopback test: TEST_LOOPBACK not set");
        return;
    }

    let session = Session::open_system(&hw.port_name).expect("port opens");
    session
        .set_params(hw.baud_rate, 8, 1, Parity::None, FlowControl::None)
        .unwrap();
    session.flush(FlushTarget::Both).unwrap();

    let message = b"Hello World ";
    let written = session
        .write(message, TransferMode::Blocking, hw.timeout_ms())
        .unwrap();
    assert_eq!(written, message.len());
    session.drain().unwrap();

    let mut buffer = [0u8; 12];
    let n = session
        .read(&mut buffer, TransferMode::Blocking, hw.timeout_ms())
        .unwrap();
    assert_eq!(&buffer[..n], message);
    session.close().unwrap();
}

#[test]
#[ignore]
fn test_real_port_double_close() {
    let Some(hw) = skip_without_hardware() else {
        return;
    };

    let session = Session::open_system(&hw.port_name).expect("port opens");
    session.close().unwrap();
    assert!(matches!(session.close(), Err(PortError::NotOpen)));
}
