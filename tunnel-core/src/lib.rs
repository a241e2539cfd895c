#![crate_name = "tunnel_core"]

//! Control plane of a paid tunnel relay node.
//!
//! At startup the [`bootstrap::Bootstrapper`] prepares the local state store and resumes the
//! chain scanner, then the [`channel_select::ChannelSelector`] attaches the node to a payment
//! channel. In steady state the [`console::Console`] serves operator commands while the tunnel
//! gateway forwards traffic in the background.

#![forbid(unsafe_code)]
#![warn(rustdoc::broken_intra_doc_links)]

/// Startup: migrations, scan cursor and scanner resume
pub mod bootstrap;
/// Selecting or deploying the prioritized payment channel
pub mod channel_select;
/// Operator command loop
pub mod console;
/// Packet-forwarding engine contract
pub mod gateway;
/// In-process collaborators for running a node without network access
pub mod loopback;
/// Local store schema migrations
pub mod migration;
/// Value types shared by all components
pub mod model;
/// Payment service and local channel store contracts
pub mod payments;
/// Periodic throughput sampler
pub mod sampler;
/// Chain scanner contract
pub mod scanner;
/// Per-section packet counters
pub mod stats;
/// Various utilities
pub mod util;
/// On-chain wallet contract
pub mod wallet;
