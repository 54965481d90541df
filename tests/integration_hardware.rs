//! Hardware integration test suite.
//!
//! These tests require actual serial hardware and are ignored by default.
//! Run with: cargo test --features hardware-tests -- --ignored

#![cfg(feature = "hardware-tests")]

#[path = "common/mod.rs"]
mod common;

#[path = "hardware/mod.rs"]
mod hardware;
