use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use triggered::{Listener, Trigger};

use crate::gateway::TunnelGateway;
use crate::stats::{format_count, SectionId, StatsSnapshot};
use crate::util::Clock;

pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SamplerState {
    On,
    Off,
}

/// Per-second deltas of one section
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SectionRate {
    pub section: SectionId,
    pub routed: u64,
    pub sent: u64,
    pub received: u64,
}

/// First differences for every section present in both snapshots.
///
/// A counter that went backwards yields 0.
pub fn compute_rates(prev: &StatsSnapshot, cur: &StatsSnapshot) -> Vec<SectionRate> {
    cur.iter()
        .filter_map(|(section, now)| {
            prev.get(section).map(|before| SectionRate {
                section: section.clone(),
                routed: now.routed.saturating_sub(before.routed),
                sent: now.sent.saturating_sub(before.sent),
                received: now.received.saturating_sub(before.received),
            })
        })
        .collect()
}

struct Running {
    trigger: Trigger,
    task: JoinHandle<()>,
}

/// Logs packet rates once per interval while switched on
pub struct StatsSampler {
    gateway: Arc<dyn TunnelGateway>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    sink: Option<UnboundedSender<Vec<SectionRate>>>,
    running: Mutex<Option<Running>>,
}

impl StatsSampler {
    pub fn new(gateway: Arc<dyn TunnelGateway>, clock: Arc<dyn Clock>) -> Self {
        StatsSampler {
            gateway,
            clock,
            interval: SAMPLE_INTERVAL,
            sink: None,
            running: Mutex::new(None),
        }
    }

    /// Also send each interval's rates to `sink`, after they are logged
    pub fn report_to(mut self, sink: UnboundedSender<Vec<SectionRate>>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn state(&self) -> SamplerState {
        match *self.lock() {
            Some(_) => SamplerState::On,
            None => SamplerState::Off,
        }
    }

    /// Switch sampling on if off, off if on.
    ///
    /// Must be called within a tokio runtime. The stopped task exits within one interval.
    pub fn toggle(&self) -> SamplerState {
        let mut running = self.lock();
        match running.take() {
            Some(r) => {
                r.trigger.trigger();
                info!("speed sampling stopped");
                SamplerState::Off
            }
            None => {
                let (trigger, listener) = triggered::trigger();
                // the first delta is taken against the state at enable time
                let initial = self.gateway.packets_stats();
                let task = tokio::spawn(sample_loop(
                    self.gateway.clone(),
                    self.clock.clone(),
                    self.interval,
                    self.sink.clone(),
                    initial,
                    listener,
                ));
                *running = Some(Running { trigger, task });
                info!("speed sampling started");
                SamplerState::On
            }
        }
    }

    /// Stop sampling if on and wait for the task to exit
    pub async fn stop(&self) {
        let running = self.lock().take();
        if let Some(r) = running {
            r.trigger.trigger();
            if let Err(e) = r.task.await {
                debug!("sampler task ended abnormally: {}", e);
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }
}

async fn sample_loop(
    gateway: Arc<dyn TunnelGateway>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    sink: Option<UnboundedSender<Vec<SectionRate>>>,
    mut prev: StatsSnapshot,
    listener: Listener,
) {
    loop {
        if listener.is_triggered() {
            break;
        }
        tokio::select! {
            biased;
            _ = listener.clone() => break,
            _ = clock.sleep(interval) => {}
        }
        let cur = gateway.packets_stats();
        let rates = compute_rates(&prev, &cur);
        for rate in &rates {
            info!(
                "per second section={} routed={}/s sent={}/s received={}/s",
                rate.section,
                format_count(rate.routed),
                format_count(rate.sent),
                format_count(rate.received)
            );
        }
        if let Some(sink) = &sink {
            // a dropped receiver only stops the reporting
            let _ = sink.send(rates);
        }
        prev = cur;
    }
    debug!("sampler task exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::PacketStats;
    use crate::util::test_utils::*;
    use crate::util::TokioClock;
    use test_log::test;

    fn sampler(snapshots: Vec<StatsSnapshot>) -> (StatsSampler, Arc<RecordingGateway>) {
        let gateway = Arc::new(RecordingGateway::new(snapshots));
        (StatsSampler::new(gateway.clone(), Arc::new(TokioClock::new())), gateway)
    }

    #[test]
    fn compute_rates_test() {
        let mut prev = make_snapshot(1, 100, 10, 5);
        prev.insert(SectionId(vec![2]), PacketStats::default());
        let mut cur = make_snapshot(1, 150, 30, 4);
        cur.insert(SectionId(vec![3]), PacketStats { routed: 99, ..Default::default() });
        let rates = compute_rates(&prev, &cur);
        assert_eq!(
            rates,
            vec![SectionRate { section: SectionId(vec![1]), routed: 50, sent: 20, received: 0 }]
        );
    }

    #[test(tokio::test(start_paused = true))]
    async fn toggle_runs_and_stops_test() {
        let (sampler, gateway) = sampler(vec![
            make_snapshot(1, 0, 0, 0),
            make_snapshot(1, 1000, 10, 10),
            make_snapshot(1, 3000, 20, 20),
        ]);
        assert_eq!(sampler.state(), SamplerState::Off);
        assert_eq!(sampler.toggle(), SamplerState::On);
        assert_eq!(gateway.calls(), 1);

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(gateway.calls(), 3);

        assert_eq!(sampler.toggle(), SamplerState::Off);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(gateway.calls(), 3);
        assert_eq!(sampler.state(), SamplerState::Off);
    }

    #[test(tokio::test(start_paused = true))]
    async fn reported_rates_test() {
        let gateway = Arc::new(RecordingGateway::new(vec![
            make_snapshot(1, 0, 0, 0),
            make_snapshot(1, 1000, 10, 10),
            make_snapshot(1, 3000, 20, 20),
        ]));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let sampler = StatsSampler::new(gateway, Arc::new(TokioClock::new())).report_to(tx);
        sampler.toggle();

        tokio::time::sleep(Duration::from_millis(2500)).await;
        let rate = |routed, sent, received| SectionRate {
            section: SectionId(vec![1]),
            routed,
            sent,
            received,
        };
        assert_eq!(rx.recv().await.unwrap(), vec![rate(1000, 10, 10)]);
        assert_eq!(rx.recv().await.unwrap(), vec![rate(2000, 10, 10)]);
        assert!(rx.try_recv().is_err());

        sampler.stop().await;
        // nothing is reported once stopped
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(rx.try_recv().is_err());
    }

    #[test(tokio::test(start_paused = true))]
    async fn double_toggle_test() {
        let (sampler, gateway) = sampler(vec![make_snapshot(1, 0, 0, 0)]);
        sampler.toggle();
        assert_eq!(sampler.toggle(), SamplerState::Off);
        tokio::time::sleep(Duration::from_secs(3)).await;
        // only the enable-time snapshot was taken
        assert_eq!(gateway.calls(), 1);
    }

    #[test(tokio::test(start_paused = true))]
    async fn re_enable_test() {
        let (sampler, gateway) = sampler(vec![make_snapshot(1, 0, 0, 0)]);
        sampler.toggle();
        sampler.toggle();
        assert_eq!(sampler.toggle(), SamplerState::On);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(gateway.calls(), 3);
        sampler.stop().await;
        assert_eq!(sampler.state(), SamplerState::Off);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(gateway.calls(), 3);
    }
}
