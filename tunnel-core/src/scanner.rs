use thiserror::Error;

use crate::payments::{ChannelObserver, DbError};

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("scanner already started")]
    AlreadyStarted,
    #[error("network: {0}")]
    Network(String),
    #[error("store: {0}")]
    Db(#[from] DbError),
}

/// Observes the blockchain from a cursor and feeds channel updates to the payment service.
///
/// The scanner is also the observer the payment store notifies, so that replayed and live
/// channel updates reach its in-memory state.
pub trait ChainScanner: ChannelObserver {
    /// Start scanning in the background from the given masterchain seqno
    fn start(&self, from_seqno: u32) -> Result<(), ScanError>;

    /// Stop the background scan; a no-op if not running
    fn stop(&self);
}
