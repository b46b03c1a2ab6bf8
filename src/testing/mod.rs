//! Testing utilities and mock implementations
//!
//! Lets the protocol engine run end to end without an MQTT broker or
//! physical pins.

pub mod mocks;

pub use mocks::*;
