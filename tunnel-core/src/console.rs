use std::io;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use triggered::Listener;

use crate::gateway::TunnelGateway;
use crate::model::{ChannelStatus, Coins, ParseError, TxHash, WalletAddress};
use crate::payments::{PaymentConfig, PaymentError};
use crate::sampler::{SamplerState, StatsSampler};
use crate::stats::{format_count, format_signed};
use crate::util::Clock;
use crate::wallet::{WalletError, WalletHandle};

pub const DEFAULT_TRANSFER_GRACE: Duration = Duration::from_secs(3);
const READ_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("payments are not enabled")]
    PaymentsDisabled,
    #[error("wallet is not initialized")]
    WalletDisabled,
    #[error("failed to list channels: {0}")]
    ListChannels(PaymentError),
    #[error("failed to get current masterchain info: {0}")]
    ChainInfo(WalletError),
    #[error("failed to get balance: {0}")]
    WalletBalance(WalletError),
    #[error("incorrect format of address: {0}")]
    Address(ParseError),
    #[error("incorrect format of amount: {0}")]
    Amount(ParseError),
    #[error("failed to transfer: {0}")]
    Transfer(WalletError),
    #[error("transfer cancelled")]
    TransferCancelled,
    #[error("input failure: {0}")]
    Input(#[from] io::Error),
    #[error("input closed")]
    InputClosed,
    #[error("expected a single command, got {0:?}")]
    MultipleTokens(String),
    #[error("amount overflow")]
    Overflow,
}

/// Operator commands, matched case-sensitively
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Speed,
    Stats,
    Balance,
    Capacity,
    WalletBalance,
    WalletTransfer,
    Unknown(String),
}

impl Command {
    /// Parse one input line; `None` for a blank line
    pub fn parse(line: &str) -> Result<Option<Command>, ConsoleError> {
        let mut tokens = line.split_whitespace();
        let token = match tokens.next() {
            Some(t) => t,
            None => return Ok(None),
        };
        if tokens.next().is_some() {
            return Err(ConsoleError::MultipleTokens(line.trim().to_string()));
        }
        Ok(Some(match token {
            "speed" => Command::Speed,
            "stats" => Command::Stats,
            "balance" => Command::Balance,
            "capacity" => Command::Capacity,
            "wallet-ton-balance" => Command::WalletBalance,
            "wallet-ton-transfer" => Command::WalletTransfer,
            other => Command::Unknown(other.to_string()),
        }))
    }
}

/// Everything the console commands act on, read-only after construction
pub struct ConsoleContext {
    pub gateway: Arc<dyn TunnelGateway>,
    pub sampler: Arc<StatsSampler>,
    pub payments: Option<Arc<PaymentConfig>>,
    pub wallet: Option<WalletHandle>,
    pub clock: Arc<dyn Clock>,
    /// delay before a transfer is submitted, during which shutdown cancels it
    pub transfer_grace: Duration,
}

impl ConsoleContext {
    pub fn new(
        gateway: Arc<dyn TunnelGateway>,
        sampler: Arc<StatsSampler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        ConsoleContext {
            gateway,
            sampler,
            payments: None,
            wallet: None,
            clock,
            transfer_grace: DEFAULT_TRANSFER_GRACE,
        }
    }
}

/// Line-oriented operator command loop
pub struct Console<R> {
    input: R,
    ctx: ConsoleContext,
}

impl<R: AsyncBufRead + Unpin> Console<R> {
    pub fn new(input: R, ctx: ConsoleContext) -> Self {
        Console { input, ctx }
    }

    /// Serve commands until the input is closed or `shutdown` fires
    pub async fn run(&mut self, shutdown: Listener) {
        loop {
            info!("input a command:");
            let line = tokio::select! {
                biased;
                _ = shutdown.clone() => break,
                line = self.read_line() => line,
            };
            match line {
                Ok(Some(line)) =>
                    if let Err(e) = self.dispatch(&line, &shutdown).await {
                        error!("{}", e);
                    },
                Ok(None) => {
                    info!("console input closed");
                    break;
                }
                Err(e) => {
                    error!("input failure: {}", e);
                    self.ctx.clock.sleep(READ_RETRY_DELAY).await;
                }
            }
        }
    }

    async fn dispatch(&mut self, line: &str, shutdown: &Listener) -> Result<(), ConsoleError> {
        let command = match Command::parse(line)? {
            Some(c) => c,
            None => return Ok(()),
        };
        match command {
            Command::Speed => {
                self.toggle_speed();
            }
            Command::Stats => self.print_stats(),
            Command::Balance => {
                let total = self.sum_channels(false).await?;
                info!("summarized balance: {} TON", total);
            }
            Command::Capacity => {
                let total = self.sum_channels(true).await?;
                info!("capacity left: {} TON", total);
            }
            Command::WalletBalance => {
                let balance = self.wallet_balance().await?;
                info!("wallet balance: {} TON", balance);
            }
            Command::WalletTransfer => {
                let hash = self.wallet_transfer(shutdown).await?;
                info!("transfer committed, transaction hash {}", hash);
            }
            Command::Unknown(token) => debug!("unknown command {:?}", token),
        }
        Ok(())
    }

    pub fn toggle_speed(&self) -> SamplerState {
        self.ctx.sampler.toggle()
    }

    /// Log cumulative counters of every section
    pub fn print_stats(&self) {
        for (section, st) in self.ctx.gateway.packets_stats() {
            info!(
                "stats summarized section={} routed={} sent={} received={} prepaid_routes={:?} \
                 prepaid_out={} prepaid_in={}",
                section,
                format_count(st.routed),
                format_count(st.sent),
                format_count(st.received),
                st.prepaid_packets_route,
                format_signed(st.prepaid_packets_out),
                format_signed(st.prepaid_packets_in)
            );
        }
    }

    /// Sum balance, or capacity, over active channels, skipping channels that fail
    pub async fn sum_channels(&self, capacity: bool) -> Result<Coins, ConsoleError> {
        let payments = self.ctx.payments.as_ref().ok_or(ConsoleError::PaymentsDisabled)?;
        let channels = payments
            .service
            .list_channels(Some(ChannelStatus::Active))
            .await
            .map_err(ConsoleError::ListChannels)?;
        let mut total = Coins::ZERO;
        for channel in &channels {
            match payments.service.calc_balance(channel, capacity).await {
                Ok(amount) => total = total.checked_add(amount).ok_or(ConsoleError::Overflow)?,
                Err(e) => error!("failed to calc balance of channel {}: {}", channel.address, e),
            }
        }
        Ok(total)
    }

    pub async fn wallet_balance(&self) -> Result<Coins, ConsoleError> {
        let handle = self.ctx.wallet.as_ref().ok_or(ConsoleError::WalletDisabled)?;
        let block = handle.chain.current_block().await.map_err(ConsoleError::ChainInfo)?;
        handle.wallet.balance_at(&block).await.map_err(ConsoleError::WalletBalance)
    }

    /// Prompt for address, amount and comment, then transfer after the grace period
    pub async fn wallet_transfer(&mut self, shutdown: &Listener) -> Result<TxHash, ConsoleError> {
        let handle = self.ctx.wallet.clone().ok_or(ConsoleError::WalletDisabled)?;

        info!("enter address to transfer to:");
        let to: WalletAddress =
            self.read_required().await?.parse().map_err(ConsoleError::Address)?;
        info!("input amount:");
        let amount: Coins = self.read_required().await?.parse().map_err(ConsoleError::Amount)?;
        info!("input comment:");
        let comment = self.read_required().await?;

        info!("transferring {} TON to {}", amount, to);
        tokio::select! {
            biased;
            _ = shutdown.clone() => return Err(ConsoleError::TransferCancelled),
            _ = self.ctx.clock.sleep(self.ctx.transfer_grace) => {}
        }

        handle.wallet.transfer_wait(&to, amount, &comment).await.map_err(ConsoleError::Transfer)
    }

    async fn read_line(&mut self) -> Result<Option<String>, io::Error> {
        let mut line = String::new();
        if self.input.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }

    async fn read_required(&mut self) -> Result<String, ConsoleError> {
        self.read_line().await?.ok_or(ConsoleError::InputClosed)
    }
}
