use async_trait::async_trait;
use thiserror::Error;

use crate::stats::StatsSnapshot;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway already running")]
    AlreadyRunning,
    #[error("transport: {0}")]
    Transport(String),
}

/// The packet-forwarding engine
#[async_trait]
pub trait TunnelGateway: Send + Sync {
    /// Forwarding loop, returns only on failure
    async fn start(&self) -> Result<(), GatewayError>;

    /// A copy of the current per-section counters
    fn packets_stats(&self) -> StatsSnapshot;
}
