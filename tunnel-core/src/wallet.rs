use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{BlockId, Coins, TxHash, WalletAddress};

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("insufficient funds: have {have}, need {need}")]
    InsufficientFunds { have: Coins, need: Coins },
    #[error("transaction was not confirmed: {0}")]
    NotConfirmed(String),
    #[error("network: {0}")]
    Network(String),
    #[error("wallet init: {0}")]
    Init(String),
}

/// Access to the current state of the chain
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// The latest known masterchain block
    async fn current_block(&self) -> Result<BlockId, WalletError>;
}

/// The node's own on-chain wallet
#[async_trait]
pub trait Wallet: Send + Sync {
    fn address(&self) -> WalletAddress;

    async fn balance_at(&self, block: &BlockId) -> Result<Coins, WalletError>;

    /// Send coins and wait until the transaction is included
    async fn transfer_wait(
        &self,
        to: &WalletAddress,
        amount: Coins,
        comment: &str,
    ) -> Result<TxHash, WalletError>;
}

/// What the console needs for wallet commands
#[derive(Clone)]
pub struct WalletHandle {
    pub wallet: Arc<dyn Wallet>,
    pub chain: Arc<dyn ChainClient>,
}

/// Creates the wallet during bootstrap
#[async_trait]
pub trait WalletProvider: Send + Sync {
    async fn init_wallet(&self) -> Result<WalletHandle, WalletError>;
}
