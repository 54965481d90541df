//! Port enumeration against the host driver.
//!
//! Marked as ignored because an empty result is only meaningful on a machine
//! known to have serial hardware.

use serial_session::{available_ports, Session};
use std::collections::HashSet;

#[test]
#[ignore] // Requires hardware
fn test_port_discovery() {
    let ports = available_ports().expect("host enumeration succeeds");

    if ports.is_empty() {
        println!("No ports found - skipping test");
        return;
    }

    println!("Found {} port(s)", ports.len());
    for port in &ports {
        println!("  - {port}");
    }

    let unique: HashSet<_> = ports.iter().collect();
    assert_eq!(unique.len(), ports.len(), "enumeration returned duplicates");
    assert!(ports.iter().all(|name| !name.is_empty()));
}

#[test]
#[ignore] // Requires hardware
fn test_every_listed_port_reports_its_config() {
    let ports = available_ports().expect("host enumeration succeeds");

    for port in ports {
        // Busy ports are fine, they just cannot be inspected
        match Session::open_system(&port) {
            Ok(session) => {
                let prior = session.prior_config().expect("prior config");
                println!("  {port}: {prior}");
                assert!(prior.baud_rate > 0);
                session.close().expect("close restores settings");
            }
            Err(e) => println!("  {port}: not opened ({e})"),
        }
    }
}
