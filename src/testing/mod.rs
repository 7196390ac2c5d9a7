//! Testing utilities and mock implementations
//!
//! Lets the connection manager and health check be exercised without a
//! running MQTT broker.

pub mod mocks;

pub use mocks::*;
