//! # funkstille-observability
//!
//! Structured Logging via tracing-subscriber. Logs gehen nach stderr,
//! stdout bleibt der Bridge zur umgebenden Anwendung vorbehalten.

pub mod logging;

pub use logging::{logging_initialisieren, LoggingConfig};
