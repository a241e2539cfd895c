use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};

use super::unix_now;
use crate::model::{Channel, ChannelAddress, ChannelStatus, Coins, NodeKey};
use crate::payments::{ChannelDb, DbError, PaymentError, PaymentService};
use crate::util::Clock;

const PROCESS_INTERVAL: Duration = Duration::from_secs(1);

/// What the counterparty deposits when a deployed channel activates
pub const DEPLOY_DEPOSIT: Coins = Coins::from_nano(1_000_000_000);

/// Paid out of every ready channel per processing tick
pub const SPEND_PER_TICK: Coins = Coins::from_nano(1_000_000);

/// A payment service that keeps channels in the local store and "confirms" deployments on its
/// next processing tick.
///
/// Ready channels are drawn down by [`SPEND_PER_TICK`] on every tick, so capacity shrinks
/// while the balance stays at the deposit.
pub struct LoopbackPaymentService {
    db: Arc<dyn ChannelDb>,
    node_key: NodeKey,
    clock: Arc<dyn Clock>,
    spent: Mutex<BTreeMap<ChannelAddress, Coins>>,
}

impl LoopbackPaymentService {
    pub fn new(db: Arc<dyn ChannelDb>, node_key: NodeKey, clock: Arc<dyn Clock>) -> Self {
        LoopbackPaymentService { db, node_key, clock, spent: Mutex::new(BTreeMap::new()) }
    }

    /// Total paid out of a channel so far
    pub fn spent(&self, address: &ChannelAddress) -> Coins {
        self.lock_spent().get(address).copied().unwrap_or(Coins::ZERO)
    }

    fn lock_spent(&self) -> std::sync::MutexGuard<'_, BTreeMap<ChannelAddress, Coins>> {
        self.spent.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn spend(&self, channel: &Channel) {
        let mut spent = self.lock_spent();
        let paid = spent.entry(channel.address.clone()).or_insert(Coins::ZERO);
        let left = channel.deposited.saturating_sub(*paid);
        *paid = paid.checked_add(left.min(SPEND_PER_TICK)).unwrap_or(channel.deposited);
    }

    fn channel_address(&self, counterparty: &NodeKey) -> ChannelAddress {
        let mut mixed = [0u8; 32];
        for (i, b) in mixed.iter_mut().enumerate() {
            *b = counterparty.as_bytes()[i] ^ self.node_key.as_bytes()[i];
        }
        ChannelAddress::new(format!("0:{}", hex::encode(mixed)))
    }

    /// Activate deployed channels, complete their state exchange and pay out of ready ones.
    ///
    /// Returns the number of channels whose record changed.
    pub fn process_once(&self) -> Result<usize, PaymentError> {
        let mut advanced = 0;
        for mut channel in self.db.get_channels(None)? {
            match channel.status {
                ChannelStatus::Inactive => {
                    channel.status = ChannelStatus::Active;
                    if channel.deposited == Coins::ZERO {
                        channel.deposited = DEPLOY_DEPOSIT;
                    }
                }
                ChannelStatus::Active if !channel.is_ready() => {
                    channel.our_ready = true;
                    channel.their_ready = true;
                }
                ChannelStatus::Active => {
                    self.spend(&channel);
                    continue;
                }
                ChannelStatus::Closing => continue,
            }
            debug!(
                "channel {} advanced to {} ready={}",
                channel.address,
                channel.status,
                channel.is_ready()
            );
            self.db.put_channel(&channel)?;
            advanced += 1;
        }
        Ok(advanced)
    }
}

#[async_trait]
impl PaymentService for LoopbackPaymentService {
    fn node_key(&self) -> NodeKey {
        self.node_key
    }

    async fn start(&self) -> Result<(), PaymentError> {
        info!("loopback payment service started");
        loop {
            self.clock.sleep(PROCESS_INTERVAL).await;
            if let Err(e) = self.process_once() {
                warn!("channel processing failed: {}", e);
            }
        }
    }

    async fn list_channels(
        &self,
        status: Option<ChannelStatus>,
    ) -> Result<Vec<Channel>, PaymentError> {
        Ok(self.db.get_channels(status)?)
    }

    async fn get_channel(&self, address: &ChannelAddress) -> Result<Channel, PaymentError> {
        Ok(self.db.get_channel(address)?)
    }

    async fn open_channel_with_node(
        &self,
        counterparty: &NodeKey,
    ) -> Result<ChannelAddress, PaymentError> {
        if *counterparty == self.node_key {
            return Err(PaymentError::Deploy("cannot open a channel with ourselves".into()));
        }
        let address = self.channel_address(counterparty);
        match self.db.get_channel(&address) {
            Ok(existing) if existing.status != ChannelStatus::Closing => {
                debug!("channel {} already deployed", address);
                return Ok(address);
            }
            Ok(_) | Err(DbError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }
        let channel = Channel {
            address: address.clone(),
            counterparty: *counterparty,
            deposited: Coins::ZERO,
            status: ChannelStatus::Inactive,
            our_ready: false,
            their_ready: false,
            created_at: unix_now(),
        };
        self.db.put_channel(&channel)?;
        Ok(address)
    }

    /// The deposit as balance; capacity is what is left of it after payouts
    async fn calc_balance(&self, channel: &Channel, capacity: bool) -> Result<Coins, PaymentError> {
        if channel.status != ChannelStatus::Active {
            let msg = format!("channel {} is not active", channel.address);
            return Err(PaymentError::Balance(msg));
        }
        if capacity {
            Ok(channel.deposited.saturating_sub(self.spent(&channel.address)))
        } else {
            Ok(channel.deposited)
        }
    }
}
