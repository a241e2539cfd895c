//! Collaborators that run entirely in-process.
//!
//! They stand in for the network-backed payment service, tunnel gateway, chain scanner and
//! wallet, so a node can be started and operated without liteserver or DHT access.

pub mod gateway;
pub mod payments;
pub mod scanner;
pub mod wallet;

pub use gateway::LoopbackGateway;
pub use payments::LoopbackPaymentService;
pub use scanner::LoopbackScanner;
pub use wallet::{LoopbackChain, LoopbackWallet, LoopbackWalletProvider};

use std::time::{SystemTime, UNIX_EPOCH};

pub(crate) fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}
