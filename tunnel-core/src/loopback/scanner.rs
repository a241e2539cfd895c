use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, warn};
use triggered::{Listener, Trigger};

use crate::model::{Channel, ChannelAddress};
use crate::payments::{ChannelDb, ChannelObserver};
use crate::scanner::{ChainScanner, ScanError};
use crate::util::Clock;

/// Masterchain block interval
pub const BLOCK_INTERVAL: Duration = Duration::from_secs(5);

/// A scanner that "sees" one new masterchain block per interval and persists the cursor
pub struct LoopbackScanner {
    db: Arc<dyn ChannelDb>,
    clock: Arc<dyn Clock>,
    stop: Mutex<Option<Trigger>>,
    channels: Mutex<BTreeMap<ChannelAddress, Channel>>,
}

impl LoopbackScanner {
    pub fn new(db: Arc<dyn ChannelDb>, clock: Arc<dyn Clock>) -> Self {
        LoopbackScanner { db, clock, stop: Mutex::new(None), channels: Mutex::new(BTreeMap::new()) }
    }

    /// Number of channels the scanner keeps state for
    pub fn tracked(&self) -> usize {
        self.channels.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl ChannelObserver for LoopbackScanner {
    fn on_channel_update(&self, channel: &Channel, resumed: bool) {
        debug!("scanner tracking channel {} resumed={}", channel.address, resumed);
        self.channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(channel.address.clone(), channel.clone());
    }
}

impl ChainScanner for LoopbackScanner {
    fn start(&self, from_seqno: u32) -> Result<(), ScanError> {
        let mut stop = self.stop.lock().unwrap_or_else(|e| e.into_inner());
        if stop.is_some() {
            return Err(ScanError::AlreadyStarted);
        }
        let (trigger, listener) = triggered::trigger();
        tokio::spawn(scan_loop(self.db.clone(), self.clock.clone(), from_seqno, listener));
        *stop = Some(trigger);
        Ok(())
    }

    fn stop(&self) {
        if let Some(trigger) = self.stop.lock().unwrap_or_else(|e| e.into_inner()).take() {
            trigger.trigger();
            info!("scanner stopped");
        }
    }
}

async fn scan_loop(
    db: Arc<dyn ChannelDb>,
    clock: Arc<dyn Clock>,
    mut seqno: u32,
    listener: Listener,
) {
    loop {
        tokio::select! {
            biased;
            _ = listener.clone() => break,
            _ = clock.sleep(BLOCK_INTERVAL) => {}
        }
        seqno = seqno.saturating_add(1);
        if let Err(e) = db.set_scan_cursor(seqno) {
            warn!("failed to persist scan cursor {}: {}", seqno, e);
        }
    }
    debug!("scan loop exited at seqno {}", seqno);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::test_utils::{make_channel, TestChannelDb};
    use crate::util::TokioClock;
    use test_log::test;

    #[test(tokio::test(start_paused = true))]
    async fn advances_cursor_test() {
        let db = Arc::new(TestChannelDb::new());
        let scanner = LoopbackScanner::new(db.clone(), Arc::new(TokioClock::new()));
        scanner.start(10).unwrap();
        assert!(matches!(scanner.start(10), Err(ScanError::AlreadyStarted)));

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(db.get_scan_cursor().unwrap(), 12);

        scanner.stop();
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(db.get_scan_cursor().unwrap(), 12);
    }

    #[test]
    fn tracks_updates_test() {
        let db = Arc::new(TestChannelDb::new());
        let scanner = LoopbackScanner::new(db, Arc::new(TokioClock::new()));
        scanner.on_channel_update(&make_channel("0:01", 1, 1), true);
        scanner.on_channel_update(&make_channel("0:01", 1, 2), false);
        assert_eq!(scanner.tracked(), 1);
    }
}
