use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::instrument;

use crate::model::{Channel, ChannelAddress, ChannelStatus, NodeKey, ParseError};
use crate::payments::{PaymentError, PaymentService};
use crate::util::Clock;

pub const DEFAULT_READINESS_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_DEPLOY_TIMEOUT: Duration = Duration::from_secs(150);

#[derive(Debug, Error)]
pub enum SelectError {
    #[error("failed to list channels: {0}")]
    ListChannels(PaymentError),
    #[error("failed to read input: {0}")]
    Prompt(io::Error),
    #[error("invalid node key: {0}")]
    InvalidInput(#[from] ParseError),
    #[error("channel deploy timed out after {0:?}")]
    DeployTimeout(Duration),
    #[error("failed to deploy channel with node: {0}")]
    Deploy(PaymentError),
    #[error("failed to get channel: {0}")]
    GetChannel(PaymentError),
    #[error("channel {0} not ready after {1:?}")]
    ReadinessTimeout(ChannelAddress, Duration),
}

/// Asks the operator for a counterparty when there is nothing to select
#[async_trait]
pub trait CounterpartyPrompt: Send {
    /// One line of input, expected to be a base64 node key
    async fn read_counterparty(&mut self) -> Result<String, io::Error>;
}

/// A prompt reading lines from an async reader, such as stdin
pub struct LinePrompt<R> {
    input: R,
}

impl<R: AsyncBufRead + Unpin + Send> LinePrompt<R> {
    pub fn new(input: R) -> Self {
        LinePrompt { input }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> CounterpartyPrompt for LinePrompt<R> {
    async fn read_counterparty(&mut self) -> Result<String, io::Error> {
        warn!(
            "no active onchain payment channel found, please input payment node id (pub key) \
             in base64 format, to deploy channel with:"
        );
        let mut line = String::new();
        if self.input.read_line(&mut line).await? == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "input closed"));
        }
        Ok(line.trim().to_string())
    }
}

/// The channel the node will prioritize
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectedChannel {
    pub address: ChannelAddress,
    pub counterparty: NodeKey,
    /// whether the channel was deployed by this call
    pub deployed: bool,
}

impl SelectedChannel {
    fn existing(channel: &Channel) -> Self {
        SelectedChannel {
            address: channel.address.clone(),
            counterparty: channel.counterparty,
            deployed: false,
        }
    }
}

/// Attaches the node to an active payment channel, deploying one if needed
pub struct ChannelSelector {
    service: Arc<dyn PaymentService>,
    clock: Arc<dyn Clock>,
    readiness_interval: Duration,
    readiness_deadline: Option<Duration>,
    deploy_timeout: Duration,
}

impl ChannelSelector {
    pub fn new(service: Arc<dyn PaymentService>, clock: Arc<dyn Clock>) -> Self {
        ChannelSelector {
            service,
            clock,
            readiness_interval: DEFAULT_READINESS_INTERVAL,
            readiness_deadline: None,
            deploy_timeout: DEFAULT_DEPLOY_TIMEOUT,
        }
    }

    pub fn readiness_interval(mut self, interval: Duration) -> Self {
        self.readiness_interval = interval;
        self
    }

    /// Bound the readiness wait, which is unbounded by default
    pub fn readiness_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.readiness_deadline = deadline;
        self
    }

    pub fn deploy_timeout(mut self, timeout: Duration) -> Self {
        self.deploy_timeout = timeout;
        self
    }

    /// Select an active channel, or deploy one and wait until both sides are ready.
    ///
    /// With an explicit counterparty, its channel is selected if active, otherwise a channel
    /// with it is deployed. Without one, the active channel with the largest deposit wins; on
    /// equal deposits the last one listed wins. If there are no active channels the prompt
    /// supplies the counterparty.
    #[instrument(skip(self, prompt))]
    pub async fn select_or_deploy(
        &self,
        explicit: Option<NodeKey>,
        prompt: &mut dyn CounterpartyPrompt,
    ) -> Result<SelectedChannel, SelectError> {
        let channels = self
            .service
            .list_channels(Some(ChannelStatus::Active))
            .await
            .map_err(SelectError::ListChannels)?;

        let target = match explicit {
            Some(key) => {
                if let Some(channel) = channels.iter().find(|c| c.counterparty == key) {
                    debug!("requested channel {} is already active", channel.address);
                    return Ok(SelectedChannel::existing(channel));
                }
                key
            }
            None => {
                if let Some(best) = best_by_deposit(&channels) {
                    debug!("selected channel {} with deposit {}", best.address, best.deposited);
                    return Ok(SelectedChannel::existing(best));
                }
                let input = prompt.read_counterparty().await.map_err(SelectError::Prompt)?;
                NodeKey::from_base64(&input)?
            }
        };

        let address = self.deploy(&target).await?;
        info!("onchain channel deployed at address {}, waiting for states exchange", address);
        self.wait_ready(&address).await?;
        info!("channel states exchange completed, address {}", address);

        Ok(SelectedChannel { address, counterparty: target, deployed: true })
    }

    async fn deploy(&self, counterparty: &NodeKey) -> Result<ChannelAddress, SelectError> {
        tokio::select! {
            biased;
            res = self.service.open_channel_with_node(counterparty) =>
                res.map_err(SelectError::Deploy),
            _ = self.clock.sleep(self.deploy_timeout) =>
                Err(SelectError::DeployTimeout(self.deploy_timeout)),
        }
    }

    /// Poll until both readiness flags are set; a channel not yet visible is retried
    async fn wait_ready(&self, address: &ChannelAddress) -> Result<(), SelectError> {
        let started = self.clock.now();
        loop {
            match self.service.get_channel(address).await {
                Ok(channel) if channel.is_ready() => return Ok(()),
                Ok(channel) => debug!(
                    "channel {} not ready yet, ours {} theirs {}",
                    address, channel.our_ready, channel.their_ready
                ),
                Err(PaymentError::NotFound) => debug!("channel {} not visible yet", address),
                Err(e) => return Err(SelectError::GetChannel(e)),
            }
            if let Some(deadline) = self.readiness_deadline {
                if self.clock.now().saturating_sub(started) >= deadline {
                    return Err(SelectError::ReadinessTimeout(address.clone(), deadline));
                }
            }
            self.clock.sleep(self.readiness_interval).await;
        }
    }
}

fn best_by_deposit(channels: &[Channel]) -> Option<&Channel> {
    let mut best: Option<&Channel> = None;
    for channel in channels {
        if best.map_or(true, |b| channel.deposited >= b.deposited) {
            best = Some(channel);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::test_utils::*;
    use crate::util::ManualClock;
    use std::sync::atomic::Ordering;
    use test_log::test;

    struct ScriptedPrompt {
        answer: Option<String>,
        asked: usize,
    }

    impl ScriptedPrompt {
        fn new(answer: Option<&str>) -> Self {
            ScriptedPrompt { answer: answer.map(str::to_string), asked: 0 }
        }
    }

    #[async_trait]
    impl CounterpartyPrompt for ScriptedPrompt {
        async fn read_counterparty(&mut self) -> Result<String, io::Error> {
            self.asked += 1;
            self.answer.clone().ok_or_else(|| io::Error::from(io::ErrorKind::UnexpectedEof))
        }
    }

    fn selector(service: &Arc<MockPaymentService>) -> (ChannelSelector, ManualClock) {
        let clock = ManualClock::new(Duration::ZERO);
        (ChannelSelector::new(service.clone(), Arc::new(clock.clone())), clock)
    }

    #[test(tokio::test)]
    async fn explicit_counterparty_test() {
        let service = Arc::new(MockPaymentService::new(vec![
            make_channel("0:01", 1, 1000),
            make_channel("0:02", 2, 5),
        ]));
        let (selector, _) = selector(&service);
        let mut prompt = ScriptedPrompt::new(None);
        let selected =
            selector.select_or_deploy(Some(NodeKey::new([2; 32])), &mut prompt).await.unwrap();
        assert_eq!(selected.address, ChannelAddress::new("0:02"));
        assert!(!selected.deployed);
        assert!(service.opened.lock().unwrap().is_empty());
        assert_eq!(prompt.asked, 0);
    }

    #[test(tokio::test)]
    async fn largest_deposit_last_tie_wins_test() {
        let service = Arc::new(MockPaymentService::new(vec![
            make_channel("0:01", 1, 10),
            make_channel("0:02", 2, 50),
            make_channel("0:03", 3, 50),
            make_channel("0:04", 4, 20),
        ]));
        let (selector, _) = selector(&service);
        let selected =
            selector.select_or_deploy(None, &mut ScriptedPrompt::new(None)).await.unwrap();
        assert_eq!(selected.address, ChannelAddress::new("0:03"));
        assert_eq!(selected.counterparty, NodeKey::new([3; 32]));
    }

    #[test(tokio::test)]
    async fn deploy_with_prompted_key_test() {
        let service = Arc::new(MockPaymentService::new(vec![]));
        service.set_open(OpenBehavior::Succeed(ChannelAddress::new("0:new")));
        service.set_readiness(&[
            ReadinessStep::NotFound,
            ReadinessStep::Pending,
            ReadinessStep::Pending,
            ReadinessStep::Ready,
        ]);
        let (selector, clock) = selector(&service);
        let key = NodeKey::new([9; 32]);
        let mut prompt = ScriptedPrompt::new(Some(&key.to_base64()));

        let selected = selector.select_or_deploy(None, &mut prompt).await.unwrap();
        assert_eq!(
            selected,
            SelectedChannel {
                address: ChannelAddress::new("0:new"),
                counterparty: key,
                deployed: true
            }
        );
        assert_eq!(*service.opened.lock().unwrap(), vec![key]);
        assert_eq!(service.get_channel_calls.load(Ordering::SeqCst), 4);
        // three failed polls, each followed by one interval
        assert_eq!(clock.now(), Duration::from_millis(1500));
    }

    #[test(tokio::test)]
    async fn explicit_missing_deploys_test() {
        let service = Arc::new(MockPaymentService::new(vec![make_channel("0:01", 1, 10)]));
        service.set_open(OpenBehavior::Succeed(ChannelAddress::new("0:77")));
        let (selector, _) = selector(&service);
        let key = NodeKey::new([7; 32]);
        let mut prompt = ScriptedPrompt::new(None);
        let selected = selector.select_or_deploy(Some(key), &mut prompt).await.unwrap();
        assert!(selected.deployed);
        assert_eq!(selected.address, ChannelAddress::new("0:77"));
        assert_eq!(*service.opened.lock().unwrap(), vec![key]);
        assert_eq!(prompt.asked, 0);
    }

    #[test(tokio::test)]
    async fn invalid_prompted_key_test() {
        let service = Arc::new(MockPaymentService::new(vec![]));
        let (selector, _) = selector(&service);
        let short = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, [1u8; 16]);
        let mut prompt = ScriptedPrompt::new(Some(&short));
        let err = selector.select_or_deploy(None, &mut prompt).await.unwrap_err();
        assert!(matches!(err, SelectError::InvalidInput(ParseError::KeyLength { .. })));
        assert!(service.opened.lock().unwrap().is_empty());

        let mut prompt = ScriptedPrompt::new(Some("not base64!"));
        let err = selector.select_or_deploy(None, &mut prompt).await.unwrap_err();
        assert!(matches!(err, SelectError::InvalidInput(ParseError::Encoding(_))));

        let mut prompt = ScriptedPrompt::new(None);
        let err = selector.select_or_deploy(None, &mut prompt).await.unwrap_err();
        assert!(matches!(err, SelectError::Prompt(_)));
    }

    #[test(tokio::test)]
    async fn deploy_timeout_test() {
        let service = Arc::new(MockPaymentService::new(vec![]));
        service.set_open(OpenBehavior::Hang);
        let (selector, clock) = selector(&service);
        let err = selector
            .select_or_deploy(Some(NodeKey::new([5; 32])), &mut ScriptedPrompt::new(None))
            .await
            .unwrap_err();
        assert!(matches!(err, SelectError::DeployTimeout(t) if t == DEFAULT_DEPLOY_TIMEOUT));
        assert_eq!(clock.now(), DEFAULT_DEPLOY_TIMEOUT);
        assert_eq!(service.opened.lock().unwrap().len(), 1);
    }

    #[test(tokio::test)]
    async fn deploy_failure_test() {
        let service = Arc::new(MockPaymentService::new(vec![]));
        let (selector, _) = selector(&service);
        let err = selector
            .select_or_deploy(Some(NodeKey::new([5; 32])), &mut ScriptedPrompt::new(None))
            .await
            .unwrap_err();
        assert!(matches!(err, SelectError::Deploy(_)));
        assert_eq!(service.get_channel_calls.load(Ordering::SeqCst), 0);
    }

    #[test(tokio::test)]
    async fn readiness_error_aborts_test() {
        let service = Arc::new(MockPaymentService::new(vec![]));
        service.set_open(OpenBehavior::Succeed(ChannelAddress::new("0:aa")));
        service.set_readiness(&[ReadinessStep::NotFound, ReadinessStep::Error]);
        let (selector, _) = selector(&service);
        let err = selector
            .select_or_deploy(Some(NodeKey::new([5; 32])), &mut ScriptedPrompt::new(None))
            .await
            .unwrap_err();
        assert!(matches!(err, SelectError::GetChannel(_)));
        assert_eq!(service.get_channel_calls.load(Ordering::SeqCst), 2);
    }

    #[test(tokio::test)]
    async fn readiness_deadline_test() {
        let service = Arc::new(MockPaymentService::new(vec![]));
        service.set_open(OpenBehavior::Succeed(ChannelAddress::new("0:aa")));
        service.set_readiness(&[ReadinessStep::Pending]);
        let (selector, _) = selector(&service);
        let selector = selector.readiness_deadline(Some(Duration::from_secs(2)));
        let err = selector
            .select_or_deploy(Some(NodeKey::new([5; 32])), &mut ScriptedPrompt::new(None))
            .await
            .unwrap_err();
        assert!(matches!(err, SelectError::ReadinessTimeout(..)));
        // polls at 0, 0.5, 1, 1.5 and 2 seconds
        assert_eq!(service.get_channel_calls.load(Ordering::SeqCst), 5);
    }

    #[test(tokio::test)]
    async fn list_failure_test() {
        let service = Arc::new(MockPaymentService::new(vec![]));
        service.fail_list();
        let (selector, _) = selector(&service);
        let mut prompt = ScriptedPrompt::new(None);
        let err = selector.select_or_deploy(None, &mut prompt).await.unwrap_err();
        assert!(matches!(err, SelectError::ListChannels(_)));
    }

    #[test(tokio::test)]
    async fn line_prompt_test() {
        let input: &[u8] = b"  AQID  \n";
        let mut prompt = LinePrompt::new(input);
        assert_eq!(prompt.read_counterparty().await.unwrap(), "AQID");
        let err = prompt.read_counterparty().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
