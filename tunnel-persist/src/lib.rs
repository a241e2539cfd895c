#![forbid(unsafe_code)]

//! Local channel store of a tunnel relay node.

/// Store schema migrations
pub mod migrations;
/// The redb-backed channel store
pub mod redb;

pub use crate::migrations::MIGRATIONS;
pub use crate::redb::RedbChannelDb;
