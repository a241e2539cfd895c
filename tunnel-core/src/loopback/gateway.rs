use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use log::info;

use crate::gateway::{GatewayError, TunnelGateway};
use crate::payments::PaymentConfig;
use crate::stats::{PacketStats, SectionId, StatsSnapshot};
use crate::util::Clock;

const TICK: Duration = Duration::from_millis(250);

/// Synthetic traffic per tick: routed, sent, received
const TRAFFIC: (u64, u64, u64) = (120, 40, 55);

/// Packets prepaid per counter when payments are enabled
pub const INITIAL_PREPAID: i64 = 10_000;

/// A gateway that forwards nothing but advances its counters as if it did.
///
/// Prepaid counters are only drawn down when payments are enabled.
pub struct LoopbackGateway {
    stats: Mutex<StatsSnapshot>,
    payments: Option<Arc<PaymentConfig>>,
    clock: Arc<dyn Clock>,
    running: AtomicBool,
}

impl LoopbackGateway {
    pub fn new(
        sections: &[SectionId],
        payments: Option<Arc<PaymentConfig>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let prepaid = if payments.is_some() { INITIAL_PREPAID } else { 0 };
        let stats = sections
            .iter()
            .map(|id| {
                let st = PacketStats {
                    prepaid_packets_route: vec![prepaid; 3],
                    prepaid_packets_out: prepaid,
                    prepaid_packets_in: prepaid,
                    ..Default::default()
                };
                (id.clone(), st)
            })
            .collect();
        let running = AtomicBool::new(false);
        LoopbackGateway { stats: Mutex::new(stats), payments, clock, running }
    }

    pub fn tick(&self) {
        let (routed, sent, received) = TRAFFIC;
        let paid = self.payments.is_some();
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        for st in stats.values_mut() {
            st.routed += routed;
            st.sent += sent;
            st.received += received;
            if !paid {
                continue;
            }
            for hop in st.prepaid_packets_route.iter_mut() {
                *hop -= routed as i64;
            }
            st.prepaid_packets_out -= sent as i64;
            st.prepaid_packets_in -= received as i64;
        }
    }
}

#[async_trait]
impl TunnelGateway for LoopbackGateway {
    async fn start(&self) -> Result<(), GatewayError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(GatewayError::AlreadyRunning);
        }
        match &self.payments {
            Some(cfg) => info!(
                "loopback gateway started, min price per packet route {} in/out {}",
                cfg.min_price_per_packet_route, cfg.min_price_per_packet_in_out
            ),
            None => info!("loopback gateway started, payments disabled"),
        }
        loop {
            self.clock.sleep(TICK).await;
            self.tick();
        }
    }

    fn packets_stats(&self) -> StatsSnapshot {
        self.stats.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Coins;
    use crate::util::test_utils::MockPaymentService;
    use crate::util::TokioClock;

    fn payments() -> Arc<PaymentConfig> {
        Arc::new(PaymentConfig {
            service: Arc::new(MockPaymentService::new(vec![])),
            min_price_per_packet_route: Coins::from_nano(10),
            min_price_per_packet_in_out: Coins::from_nano(5),
        })
    }

    #[test]
    fn tick_test() {
        let id = SectionId(vec![1, 2]);
        let gw = LoopbackGateway::new(&[id.clone()], Some(payments()), Arc::new(TokioClock::new()));
        let before = gw.packets_stats();
        gw.tick();
        gw.tick();
        let after = gw.packets_stats();
        assert_eq!(before[&id].routed, 0);
        assert_eq!(after[&id].routed, 240);
        assert_eq!(after[&id].prepaid_packets_out, INITIAL_PREPAID - 80);
        assert_eq!(after[&id].prepaid_packets_route, vec![INITIAL_PREPAID - 240; 3]);
    }

    #[test]
    fn unpaid_tick_test() {
        let id = SectionId(vec![1]);
        let gw = LoopbackGateway::new(&[id.clone()], None, Arc::new(TokioClock::new()));
        gw.tick();
        let after = gw.packets_stats();
        assert_eq!(after[&id].sent, 40);
        assert_eq!(after[&id].prepaid_packets_in, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn start_twice_test() {
        let gw = Arc::new(LoopbackGateway::new(&[], None, Arc::new(TokioClock::new())));
        let running = gw.clone();
        let task = tokio::spawn(async move { running.start().await });
        tokio::task::yield_now().await;
        assert!(matches!(gw.start().await, Err(GatewayError::AlreadyRunning)));
        task.abort();
    }
}
