use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::types::SequenceCursor;
use crate::gateway::payloads::GatewayPayload;

/// Ack bookkeeping shared by the heartbeat task and the read loop.
#[derive(Debug, Default)]
pub(super) struct HeartbeatMonitor {
    awaiting_ack: AtomicBool,
    missed: AtomicU32,
    last_sent: Mutex<Option<Instant>>,
}

impl HeartbeatMonitor {
    /// Called when a beat is due. Returns how many beats in a row went
    /// unacknowledged, counting the previous one.
    fn due(&self) -> u32 {
        if self.awaiting_ack.load(Ordering::Acquire) {
            self.missed.fetch_add(1, Ordering::AcqRel) + 1
        } else {
            self.missed.load(Ordering::Acquire)
        }
    }

    pub(super) fn mark_sent(&self) {
        *self.last_sent.lock() = Some(Instant::now());
        self.awaiting_ack.store(true, Ordering::Release);
    }

    /// Records an ACK and returns the round trip of the last beat.
    pub(super) fn acknowledge(&self) -> Option<Duration> {
        self.awaiting_ack.store(false, Ordering::Release);
        self.missed.store(0, Ordering::Release);
        let sent = *self.last_sent.lock();
        sent.map(|sent| sent.elapsed())
    }
}

/// Sends a heartbeat every `interval`, the first one after a random fraction
/// of it. Cancels `zombie` and stops once `max_missed` beats in a row went
/// unacknowledged.
pub(super) fn spawn_heartbeat(
    tx_hb: tokio::sync::mpsc::UnboundedSender<Message>,
    sequence: SequenceCursor,
    monitor: Arc<HeartbeatMonitor>,
    interval: Duration,
    max_missed: u32,
    zombie: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let jitter: f64 = rand::random();
        tokio::time::sleep(interval.mul_f64(jitter)).await;

        loop {
            let missed = monitor.due();
            if missed >= max_missed.max(1) {
                warn!("{} heartbeats went unacknowledged; connection is a zombie", missed);
                zombie.cancel();
                break;
            }

            let hb = GatewayPayload::heartbeat(sequence.get());
            let Ok(msg) = hb.to_message() else { break };
            monitor.mark_sent();
            if tx_hb.send(msg).is_err() {
                break;
            }
            debug!("Sent heartbeat (seq {:?})", sequence.get());

            tokio::time::sleep(interval).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_clears_missed_count() {
        let monitor = HeartbeatMonitor::default();
        assert_eq!(monitor.due(), 0);
        monitor.mark_sent();
        assert_eq!(monitor.due(), 1);
        monitor.mark_sent();
        assert_eq!(monitor.due(), 2);

        assert!(monitor.acknowledge().is_some());
        assert_eq!(monitor.due(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn beats_carry_sequence() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let zombie = CancellationToken::new();
        let sequence = SequenceCursor::new();
        sequence.advance(5);
        let monitor = Arc::new(HeartbeatMonitor::default());

        let handle = spawn_heartbeat(
            tx,
            sequence,
            monitor.clone(),
            Duration::from_millis(1_000),
            2,
            zombie,
        );

        let Message::Text(text) = rx.recv().await.unwrap() else {
            panic!("expected text frame");
        };
        assert_eq!(text.as_str(), r#"{"op":1,"d":5}"#);
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn unacknowledged_beats_trip_zombie() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let zombie = CancellationToken::new();
        let monitor = Arc::new(HeartbeatMonitor::default());

        let _handle = spawn_heartbeat(
            tx,
            SequenceCursor::new(),
            monitor,
            Duration::from_millis(1_000),
            2,
            zombie.clone(),
        );

        zombie.cancelled().await;
        let mut beats = 0;
        while rx.try_recv().is_ok() {
            beats += 1;
        }
        assert_eq!(beats, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn acknowledged_beats_keep_running() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let zombie = CancellationToken::new();
        let monitor = Arc::new(HeartbeatMonitor::default());

        let handle = spawn_heartbeat(
            tx,
            SequenceCursor::new(),
            monitor.clone(),
            Duration::from_millis(1_000),
            2,
            zombie.clone(),
        );

        for _ in 0..5 {
            rx.recv().await.unwrap();
            monitor.acknowledge();
        }
        assert!(!zombie.is_cancelled());
        handle.abort();
    }
}
