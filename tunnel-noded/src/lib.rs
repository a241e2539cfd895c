#![forbid(unsafe_code)]

//! The tunnel relay node daemon.

/// Command line and config file arguments
pub mod config;
/// Prometheus endpoint for the gateway counters
pub mod metrics;
/// Process wiring
pub mod node;
pub mod util;
