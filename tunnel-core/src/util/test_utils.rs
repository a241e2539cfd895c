//! In-memory collaborators for unit and integration tests

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;

use crate::gateway::{GatewayError, TunnelGateway};
use crate::model::{
    BlockId, Channel, ChannelAddress, ChannelStatus, Coins, NodeKey, TxHash, WalletAddress,
};
use crate::payments::{ChannelDb, ChannelObserver, DbError, PaymentError, PaymentService};
use crate::scanner::{ChainScanner, ScanError};
use crate::stats::{PacketStats, SectionId, StatsSnapshot};
use crate::wallet::{ChainClient, Wallet, WalletError, WalletHandle, WalletProvider};

/// Build a channel with the given address, counterparty byte and deposit in nano-units
pub fn make_channel(address: &str, counterparty: u8, deposited: u128) -> Channel {
    Channel {
        address: ChannelAddress::new(address),
        counterparty: NodeKey::new([counterparty; 32]),
        deposited: Coins::from_nano(deposited),
        status: ChannelStatus::Active,
        our_ready: true,
        their_ready: true,
        created_at: 0,
    }
}

/// Build a snapshot with a single section
pub fn make_snapshot(section: u8, routed: u64, sent: u64, received: u64) -> StatsSnapshot {
    let mut snapshot = StatsSnapshot::new();
    snapshot.insert(
        SectionId(vec![section]),
        PacketStats { routed, sent, received, ..Default::default() },
    );
    snapshot
}

#[derive(Default)]
struct DbState {
    version: u64,
    cursor: Option<u32>,
    channels: BTreeMap<ChannelAddress, Channel>,
}

/// An in-memory [`ChannelDb`] with failure injection
#[derive(Default)]
pub struct TestChannelDb {
    state: Mutex<DbState>,
    observer: RwLock<Option<Arc<dyn ChannelObserver>>>,
    failing: Mutex<HashSet<&'static str>>,
}

impl TestChannelDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the named operation fail with a storage error
    pub fn fail_on(&self, op: &'static str) {
        self.failing.lock().unwrap().insert(op);
    }

    /// Insert a channel without notifying the observer
    pub fn insert(&self, channel: Channel) {
        self.state.lock().unwrap().channels.insert(channel.address.clone(), channel);
    }

    pub fn has_observer(&self) -> bool {
        self.observer.read().unwrap().is_some()
    }

    fn check(&self, op: &'static str) -> Result<(), DbError> {
        if self.failing.lock().unwrap().contains(op) {
            Err(DbError::Storage(format!("injected failure in {}", op)))
        } else {
            Ok(())
        }
    }
}

impl ChannelDb for TestChannelDb {
    fn get_migration_version(&self) -> Result<u64, DbError> {
        self.check("get_migration_version")?;
        Ok(self.state.lock().unwrap().version)
    }

    fn set_migration_version(&self, version: u64) -> Result<(), DbError> {
        self.check("set_migration_version")?;
        self.state.lock().unwrap().version = version;
        Ok(())
    }

    fn get_scan_cursor(&self) -> Result<u32, DbError> {
        self.check("get_scan_cursor")?;
        self.state.lock().unwrap().cursor.ok_or(DbError::NotFound)
    }

    fn set_scan_cursor(&self, seqno: u32) -> Result<(), DbError> {
        self.check("set_scan_cursor")?;
        let mut state = self.state.lock().unwrap();
        match state.cursor {
            Some(stored) if seqno < stored =>
                Err(DbError::CursorRegression { stored, requested: seqno }),
            _ => {
                state.cursor = Some(seqno);
                Ok(())
            }
        }
    }

    fn get_channels(&self, status: Option<ChannelStatus>) -> Result<Vec<Channel>, DbError> {
        self.check("get_channels")?;
        let state = self.state.lock().unwrap();
        Ok(state
            .channels
            .values()
            .filter(|c| status.map_or(true, |s| c.status == s))
            .cloned()
            .collect())
    }

    fn get_channel(&self, address: &ChannelAddress) -> Result<Channel, DbError> {
        self.check("get_channel")?;
        self.state.lock().unwrap().channels.get(address).cloned().ok_or(DbError::NotFound)
    }

    fn put_channel(&self, channel: &Channel) -> Result<(), DbError> {
        self.check("put_channel")?;
        self.insert(channel.clone());
        if let Some(observer) = self.observer.read().unwrap().as_ref() {
            observer.on_channel_update(channel, false);
        }
        Ok(())
    }

    fn set_channel_observer(&self, observer: Arc<dyn ChannelObserver>) {
        *self.observer.write().unwrap() = Some(observer);
    }
}

/// What [`MockPaymentService::open_channel_with_node`] does
#[derive(Clone, Debug)]
pub enum OpenBehavior {
    Succeed(ChannelAddress),
    Fail,
    Hang,
}

/// One answer of [`MockPaymentService::get_channel`] during a readiness wait
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadinessStep {
    NotFound,
    /// only our side is ready
    Pending,
    Ready,
    Error,
}

/// A scripted [`PaymentService`]
pub struct MockPaymentService {
    pub node_key: NodeKey,
    channels: Mutex<Vec<Channel>>,
    open: Mutex<OpenBehavior>,
    readiness: Mutex<VecDeque<ReadinessStep>>,
    failing_balance: Mutex<HashSet<ChannelAddress>>,
    fail_list: AtomicBool,
    pub opened: Mutex<Vec<NodeKey>>,
    pub get_channel_calls: AtomicUsize,
}

impl MockPaymentService {
    /// Channels are listed in the given order
    pub fn new(channels: Vec<Channel>) -> Self {
        MockPaymentService {
            node_key: NodeKey::new([0xee; 32]),
            channels: Mutex::new(channels),
            open: Mutex::new(OpenBehavior::Fail),
            readiness: Mutex::new(VecDeque::new()),
            failing_balance: Mutex::new(HashSet::new()),
            fail_list: AtomicBool::new(false),
            opened: Mutex::new(Vec::new()),
            get_channel_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_open(&self, behavior: OpenBehavior) {
        *self.open.lock().unwrap() = behavior;
    }

    /// Answers for successive `get_channel` calls; the last one repeats
    pub fn set_readiness(&self, steps: &[ReadinessStep]) {
        *self.readiness.lock().unwrap() = steps.iter().copied().collect();
    }

    pub fn fail_balance(&self, address: &str) {
        self.failing_balance.lock().unwrap().insert(ChannelAddress::new(address));
    }

    pub fn fail_list(&self) {
        self.fail_list.store(true, Ordering::SeqCst);
    }

    fn next_readiness(&self) -> ReadinessStep {
        let mut steps = self.readiness.lock().unwrap();
        if steps.len() > 1 {
            steps.pop_front().unwrap_or(ReadinessStep::Ready)
        } else {
            steps.front().copied().unwrap_or(ReadinessStep::Ready)
        }
    }
}

#[async_trait]
impl PaymentService for MockPaymentService {
    fn node_key(&self) -> NodeKey {
        self.node_key
    }

    async fn start(&self) -> Result<(), PaymentError> {
        std::future::pending::<()>().await;
        Ok(())
    }

    async fn list_channels(
        &self,
        status: Option<ChannelStatus>,
    ) -> Result<Vec<Channel>, PaymentError> {
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(PaymentError::Network("list unavailable".into()));
        }
        let channels = self.channels.lock().unwrap();
        Ok(channels.iter().filter(|c| status.map_or(true, |s| c.status == s)).cloned().collect())
    }

    async fn get_channel(&self, address: &ChannelAddress) -> Result<Channel, PaymentError> {
        self.get_channel_calls.fetch_add(1, Ordering::SeqCst);
        let counterparty = self.opened.lock().unwrap().last().copied().unwrap_or(self.node_key);
        let mut channel = Channel {
            address: address.clone(),
            counterparty,
            deposited: Coins::ZERO,
            status: ChannelStatus::Active,
            our_ready: true,
            their_ready: false,
            created_at: 0,
        };
        match self.next_readiness() {
            ReadinessStep::NotFound => Err(PaymentError::NotFound),
            ReadinessStep::Error => Err(PaymentError::Network("unreachable".into())),
            ReadinessStep::Pending => Ok(channel),
            ReadinessStep::Ready => {
                channel.their_ready = true;
                Ok(channel)
            }
        }
    }

    async fn open_channel_with_node(
        &self,
        counterparty: &NodeKey,
    ) -> Result<ChannelAddress, PaymentError> {
        self.opened.lock().unwrap().push(*counterparty);
        let behavior = self.open.lock().unwrap().clone();
        match behavior {
            OpenBehavior::Succeed(address) => Ok(address),
            OpenBehavior::Fail => Err(PaymentError::Deploy("rejected".into())),
            OpenBehavior::Hang => {
                std::future::pending::<()>().await;
                Err(PaymentError::Stopped)
            }
        }
    }

    /// The balance is the deposit; the capacity is twice the deposit
    async fn calc_balance(&self, channel: &Channel, capacity: bool) -> Result<Coins, PaymentError> {
        if self.failing_balance.lock().unwrap().contains(&channel.address) {
            return Err(PaymentError::Balance("state unavailable".into()));
        }
        let nano = channel.deposited.nano();
        Ok(Coins::from_nano(if capacity { nano * 2 } else { nano }))
    }
}

/// What a [`RecordingScanner`] saw, in order
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScanEvent {
    Start(u32),
    Stop,
    Update { address: ChannelAddress, resumed: bool },
}

#[derive(Default)]
pub struct RecordingScanner {
    pub events: Mutex<Vec<ScanEvent>>,
    pub fail_start: AtomicBool,
}

impl RecordingScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ScanEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl ChannelObserver for RecordingScanner {
    fn on_channel_update(&self, channel: &Channel, resumed: bool) {
        self.events
            .lock()
            .unwrap()
            .push(ScanEvent::Update { address: channel.address.clone(), resumed });
    }
}

impl ChainScanner for RecordingScanner {
    fn start(&self, from_seqno: u32) -> Result<(), ScanError> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(ScanError::Network("no liteserver".into()));
        }
        self.events.lock().unwrap().push(ScanEvent::Start(from_seqno));
        Ok(())
    }

    fn stop(&self) {
        self.events.lock().unwrap().push(ScanEvent::Stop);
    }
}

/// A gateway serving scripted snapshots; the last one repeats
pub struct RecordingGateway {
    snapshots: Mutex<VecDeque<StatsSnapshot>>,
    pub calls: AtomicUsize,
}

impl RecordingGateway {
    pub fn new(snapshots: Vec<StatsSnapshot>) -> Self {
        RecordingGateway { snapshots: Mutex::new(snapshots.into()), calls: AtomicUsize::new(0) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TunnelGateway for RecordingGateway {
    async fn start(&self) -> Result<(), GatewayError> {
        std::future::pending::<()>().await;
        Ok(())
    }

    fn packets_stats(&self) -> StatsSnapshot {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut snapshots = self.snapshots.lock().unwrap();
        if snapshots.len() > 1 {
            snapshots.pop_front().unwrap_or_default()
        } else {
            snapshots.front().cloned().unwrap_or_default()
        }
    }
}

/// A wallet that records transfers
pub struct MockWallet {
    pub address: WalletAddress,
    pub balance: Coins,
    pub transfers: Mutex<Vec<(WalletAddress, Coins, String)>>,
    pub fail_transfer: AtomicBool,
}

impl MockWallet {
    pub fn new(balance: Coins) -> Self {
        MockWallet {
            address: WalletAddress::new(0, [0x42; 32]),
            balance,
            transfers: Mutex::new(Vec::new()),
            fail_transfer: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Wallet for MockWallet {
    fn address(&self) -> WalletAddress {
        self.address
    }

    async fn balance_at(&self, _block: &BlockId) -> Result<Coins, WalletError> {
        Ok(self.balance)
    }

    async fn transfer_wait(
        &self,
        to: &WalletAddress,
        amount: Coins,
        comment: &str,
    ) -> Result<TxHash, WalletError> {
        if self.fail_transfer.load(Ordering::SeqCst) {
            return Err(WalletError::NotConfirmed("expired".into()));
        }
        self.transfers.lock().unwrap().push((*to, amount, comment.to_string()));
        Ok(TxHash(vec![0xfb; 32]))
    }
}

pub struct MockChain {
    pub fail: AtomicBool,
}

#[async_trait]
impl ChainClient for MockChain {
    async fn current_block(&self) -> Result<BlockId, WalletError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(WalletError::Network("no liteserver".into()));
        }
        Ok(BlockId { workchain: -1, shard: i64::MIN, seqno: 1000 })
    }
}

/// A wallet handle over a [`MockWallet`], returning the wallet for inspection
pub fn mock_wallet_handle(balance: Coins) -> (WalletHandle, Arc<MockWallet>, Arc<MockChain>) {
    let wallet = Arc::new(MockWallet::new(balance));
    let chain = Arc::new(MockChain { fail: AtomicBool::new(false) });
    (WalletHandle { wallet: wallet.clone(), chain: chain.clone() }, wallet, chain)
}

pub struct MockWalletProvider {
    pub fail: bool,
}

#[async_trait]
impl WalletProvider for MockWalletProvider {
    async fn init_wallet(&self) -> Result<WalletHandle, WalletError> {
        if self.fail {
            return Err(WalletError::Init("no seed".into()));
        }
        Ok(mock_wallet_handle(Coins::ZERO).0)
    }
}
