use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use log::info;

use super::scanner::BLOCK_INTERVAL;
use crate::model::{BlockId, Coins, NodeKey, TxHash, WalletAddress};
use crate::payments::{ChannelDb, DbError};
use crate::util::Clock;
use crate::wallet::{ChainClient, Wallet, WalletError, WalletHandle, WalletProvider};

/// A chain whose height follows the clock
pub struct LoopbackChain {
    clock: Arc<dyn Clock>,
    origin: Duration,
    first_seqno: u32,
}

impl LoopbackChain {
    pub fn new(clock: Arc<dyn Clock>, first_seqno: u32) -> Self {
        let origin = clock.now();
        LoopbackChain { clock, origin, first_seqno }
    }
}

#[async_trait]
impl ChainClient for LoopbackChain {
    async fn current_block(&self) -> Result<BlockId, WalletError> {
        let elapsed = self.clock.now().saturating_sub(self.origin);
        let blocks = (elapsed.as_secs() / BLOCK_INTERVAL.as_secs()) as u32;
        let seqno = self.first_seqno.saturating_add(blocks);
        Ok(BlockId { workchain: -1, shard: i64::MIN, seqno })
    }
}

/// A transfer accepted by [`LoopbackWallet`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transfer {
    pub to: WalletAddress,
    pub amount: Coins,
    pub comment: String,
}

struct WalletState {
    balance: Coins,
    transfers: Vec<Transfer>,
}

/// A wallet holding a local balance; transfers are recorded and confirm at once
pub struct LoopbackWallet {
    address: WalletAddress,
    state: Mutex<WalletState>,
}

impl LoopbackWallet {
    pub fn new(address: WalletAddress, balance: Coins) -> Self {
        let state = WalletState { balance, transfers: Vec::new() };
        LoopbackWallet { address, state: Mutex::new(state) }
    }

    pub fn transfers(&self) -> Vec<Transfer> {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).transfers.clone()
    }
}

#[async_trait]
impl Wallet for LoopbackWallet {
    fn address(&self) -> WalletAddress {
        self.address
    }

    async fn balance_at(&self, _block: &BlockId) -> Result<Coins, WalletError> {
        Ok(self.state.lock().unwrap_or_else(|e| e.into_inner()).balance)
    }

    async fn transfer_wait(
        &self,
        to: &WalletAddress,
        amount: Coins,
        comment: &str,
    ) -> Result<TxHash, WalletError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if amount > state.balance {
            return Err(WalletError::InsufficientFunds { have: state.balance, need: amount });
        }
        state.balance = state.balance.saturating_sub(amount);
        state.transfers.push(Transfer { to: *to, amount, comment: comment.to_string() });

        // not a real hash, only unique per wallet
        let mut hash = self.address.hash.to_vec();
        hash.extend_from_slice(&(state.transfers.len() as u64).to_be_bytes());
        info!("loopback transfer of {} to {} accepted", amount, to);
        Ok(TxHash(hash))
    }
}

/// Creates a [`LoopbackWallet`] owned by the node key.
///
/// The chain starts at the persisted scan cursor, so balance queries follow the scanner.
pub struct LoopbackWalletProvider {
    db: Arc<dyn ChannelDb>,
    node_key: NodeKey,
    balance: Coins,
    clock: Arc<dyn Clock>,
}

impl LoopbackWalletProvider {
    pub fn new(
        db: Arc<dyn ChannelDb>,
        node_key: NodeKey,
        balance: Coins,
        clock: Arc<dyn Clock>,
    ) -> Self {
        LoopbackWalletProvider { db, node_key, balance, clock }
    }
}

#[async_trait]
impl WalletProvider for LoopbackWalletProvider {
    async fn init_wallet(&self) -> Result<WalletHandle, WalletError> {
        let first_seqno = match self.db.get_scan_cursor() {
            Ok(cursor) => cursor,
            Err(DbError::NotFound) => 0,
            Err(e) => return Err(WalletError::Init(e.to_string())),
        };
        let address = WalletAddress::new(0, *self.node_key.as_bytes());
        let wallet = Arc::new(LoopbackWallet::new(address, self.balance));
        let chain = Arc::new(LoopbackChain::new(self.clock.clone(), first_seqno));
        Ok(WalletHandle { wallet, chain })
    }
}
