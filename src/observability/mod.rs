//! Observability for the relay
//!
//! Structured logging with `tracing`; span macros for MQTT and lifecycle events.

pub mod logging;

// Re-export for convenience
pub use logging::{init_default_logging, init_logging, LogFormat};

// Span macros for structured logging
pub use logging::{lifecycle_span, mqtt_span};
