//! Serial port enumeration.

use crate::port::{PortError, SerialDriver, SystemDriver};
use std::collections::HashSet;

/// List the serial devices `driver` can see, in the order it reports them.
///
/// A host with no serial devices yields `Ok` with an empty list; only a
/// failed query is an error. Empty names and repeated names are dropped.
pub fn list_ports(driver: &dyn SerialDriver) -> Result<Vec<String>, PortError> {
    let reported = driver
        .enumerate_ports()
        .map_err(|e| PortError::Enumeration(Box::new(e)))?;

    let mut seen = HashSet::with_capacity(reported.len());
    let ports: Vec<String> = reported
        .into_iter()
        .filter(|name| !name.is_empty() && seen.insert(name.clone()))
        .collect();

    tracing::trace!(count = ports.len(), "enumerated serial ports");
    Ok(ports)
}

/// List the host's serial devices.
pub fn available_ports() -> Result<Vec<String>, PortError> {
    list_ports(&SystemDriver::new())
}
