use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{Channel, ChannelAddress, ChannelStatus, Coins, NodeKey};

/// Local state store errors
#[derive(Debug, Error)]
pub enum DbError {
    #[error("not found")]
    NotFound,
    #[error("scan cursor regression: stored {stored}, requested {requested}")]
    CursorRegression { stored: u32, requested: u32 },
    #[error("record encoding: {0}")]
    Encoding(String),
    #[error("storage: {0}")]
    Storage(String),
}

impl DbError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DbError::NotFound)
    }
}

/// Receives channel state changes.
///
/// `resumed` is true when the update replays state that was already persisted before this
/// process started, rather than a live event.
pub trait ChannelObserver: Send + Sync {
    fn on_channel_update(&self, channel: &Channel, resumed: bool);
}

/// The local key-value store behind the payment service
pub trait ChannelDb: Send + Sync {
    /// Schema version of the store, 0 if never set
    fn get_migration_version(&self) -> Result<u64, DbError>;

    fn set_migration_version(&self, version: u64) -> Result<(), DbError>;

    /// Last fully processed masterchain seqno, [`DbError::NotFound`] if absent
    fn get_scan_cursor(&self) -> Result<u32, DbError>;

    /// Persist the scan cursor; a value lower than the stored one is rejected
    fn set_scan_cursor(&self, seqno: u32) -> Result<(), DbError>;

    /// All channels, or only those with the given status
    fn get_channels(&self, status: Option<ChannelStatus>) -> Result<Vec<Channel>, DbError>;

    fn get_channel(&self, address: &ChannelAddress) -> Result<Channel, DbError>;

    /// Insert or replace a channel and notify the observer
    fn put_channel(&self, channel: &Channel) -> Result<(), DbError>;

    fn set_channel_observer(&self, observer: Arc<dyn ChannelObserver>);
}

/// Payment service errors
#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("channel not found")]
    NotFound,
    #[error("deploy failed: {0}")]
    Deploy(String),
    #[error("balance calculation failed: {0}")]
    Balance(String),
    #[error("network: {0}")]
    Network(String),
    #[error("service stopped")]
    Stopped,
    #[error("store: {0}")]
    Db(DbError),
}

impl PaymentError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, PaymentError::NotFound)
    }
}

impl From<DbError> for PaymentError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::NotFound => PaymentError::NotFound,
            e => PaymentError::Db(e),
        }
    }
}

/// Owns channel state, on-chain deployment and ledger reads
#[async_trait]
pub trait PaymentService: Send + Sync {
    /// Our node key
    fn node_key(&self) -> NodeKey;

    /// The processing loop, runs for the process lifetime
    async fn start(&self) -> Result<(), PaymentError>;

    async fn list_channels(
        &self,
        status: Option<ChannelStatus>,
    ) -> Result<Vec<Channel>, PaymentError>;

    /// [`PaymentError::NotFound`] if the channel is not yet known
    async fn get_channel(&self, address: &ChannelAddress) -> Result<Channel, PaymentError>;

    /// Deploy a channel contract with the given counterparty
    async fn open_channel_with_node(
        &self,
        counterparty: &NodeKey,
    ) -> Result<ChannelAddress, PaymentError>;

    /// Our balance in the channel, or the capacity left if `capacity` is set
    async fn calc_balance(&self, channel: &Channel, capacity: bool) -> Result<Coins, PaymentError>;
}

/// Settings handed to the gateway, immutable after construction
#[derive(Clone)]
pub struct PaymentConfig {
    pub service: Arc<dyn PaymentService>,
    pub min_price_per_packet_route: Coins,
    pub min_price_per_packet_in_out: Coins,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_error_conversion_test() {
        assert!(PaymentError::from(DbError::NotFound).is_not_found());
        let err = PaymentError::from(DbError::Storage("disk".into()));
        assert!(!err.is_not_found());
        assert_eq!(err.to_string(), "store: storage: disk");
    }
}
