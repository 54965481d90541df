//! Hardware-specific tests requiring real serial devices.
//!
//! These tests are ignored by default and require actual hardware to run.
//! They should be run manually with the `--ignored` flag and `TEST_PORT`
//! (plus optionally `TEST_BAUD` and `TEST_LOOPBACK`) set.

pub mod port_discovery_tests;
pub mod real_port_tests;
