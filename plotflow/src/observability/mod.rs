//! Logging setup for binaries embedding plotflow.
//!
//! The library itself only emits `tracing` events; installing a subscriber is
//! left to the host, which can call [`init_logging`] once at startup.

mod logging;

pub use logging::{init_logging, LogFormat, LoggingConfig};
