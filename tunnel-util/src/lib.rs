//! Logging and environment helpers for the tunnel relay node

pub mod config;
pub mod observability;
pub mod util;

// Defines GIT_DESC
include!(concat!(env!("OUT_DIR"), "/version.rs"));
