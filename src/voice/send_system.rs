use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::{task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::{
    common::types::AnyResult,
    voice::{
        SpeakingFlags, VoiceSession,
        constants::{FRAME_DURATION_MS, MAX_SILENCE_FRAMES, RESYNC_AFTER_FRAMES, SILENCE_FRAME},
    },
};

/// Supplies encoded Opus frames, one per 20ms tick.
///
/// `None` or an empty frame means there is nothing to play right now.
#[async_trait]
pub trait FrameProvider: Send + 'static {
    async fn provide_opus(&mut self) -> AnyResult<Option<Bytes>>;
}

/// Which speaking update the loop sent last.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpeakingEdge {
    Unsignaled,
    Started,
    Stopped,
}

/// Paces frames from a [`FrameProvider`] onto a [`VoiceSession`].
pub struct SendSystem {
    session: Arc<VoiceSession>,
    provider: Option<Box<dyn FrameProvider>>,
    stop: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl SendSystem {
    pub fn new(provider: impl FrameProvider, session: Arc<VoiceSession>) -> Self {
        Self {
            session,
            provider: Some(Box::new(provider)),
            stop: CancellationToken::new(),
            handle: None,
        }
    }

    /// Spawns the pacing loop. The provider is moved into the loop, so a
    /// system runs at most once.
    pub fn start(&mut self) {
        let Some(provider) = self.provider.take() else {
            warn!(
                "[{}] Send system already started",
                self.session.guild_id()
            );
            return;
        };

        let pacer = Pacer {
            provider,
            session: self.session.clone(),
            stop: self.stop.clone(),
            silent_frames_remaining: MAX_SILENCE_FRAMES,
            edge: SpeakingEdge::Unsignaled,
        };
        self.handle = Some(tokio::spawn(pacer.run()));
    }

    /// Trips the stop latch. The loop finishes its current tick and exits.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for SendSystem {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

struct Pacer {
    provider: Box<dyn FrameProvider>,
    session: Arc<VoiceSession>,
    stop: CancellationToken,
    silent_frames_remaining: u8,
    edge: SpeakingEdge,
}

impl Pacer {
    async fn run(mut self) {
        let period = Duration::from_millis(FRAME_DURATION_MS);
        let resync_after = period * RESYNC_AFTER_FRAMES;
        let mut last_frame_sent = Instant::now();
        debug!("[{}] Send loop started", self.session.guild_id());

        while !self.stop.is_cancelled() {
            self.tick().await;

            let elapsed = last_frame_sent.elapsed();
            if elapsed < period {
                tokio::select! {
                    _ = self.stop.cancelled() => break,
                    _ = tokio::time::sleep(period - elapsed) => {}
                }
            }

            let now = Instant::now();
            if now < last_frame_sent + resync_after {
                last_frame_sent += period;
            } else {
                last_frame_sent = now;
            }
        }

        debug!("[{}] Send loop stopped", self.session.guild_id());
    }

    async fn tick(&mut self) {
        let frame = match self.provider.provide_opus().await {
            Ok(frame) => frame.filter(|f| !f.is_empty()),
            Err(e) => {
                error!(
                    "[{}] Failed to provide opus data: {}",
                    self.session.guild_id(),
                    e
                );
                return;
            }
        };
        if self.stop.is_cancelled() {
            return;
        }

        let Some(frame) = frame else {
            self.idle().await;
            return;
        };

        if self.edge != SpeakingEdge::Started {
            self.signal(SpeakingFlags::MICROPHONE | SpeakingFlags::PRIORITY);
            self.edge = SpeakingEdge::Started;
            self.silent_frames_remaining = MAX_SILENCE_FRAMES;
        }

        if let Err(e) = self.session.write_frame(&frame).await {
            error!(
                "[{}] Failed to send opus frame: {}",
                self.session.guild_id(),
                e
            );
        }
    }

    /// Pads a finished burst with silence, then stops speaking once.
    async fn idle(&mut self) {
        if self.silent_frames_remaining > 0 {
            if let Err(e) = self.session.write_frame(&SILENCE_FRAME).await {
                error!(
                    "[{}] Failed to send silence frame: {}",
                    self.session.guild_id(),
                    e
                );
            }
            self.silent_frames_remaining -= 1;
        } else if self.edge != SpeakingEdge::Stopped {
            self.signal(SpeakingFlags::empty());
            self.edge = SpeakingEdge::Stopped;
        }
    }

    fn signal(&self, flags: SpeakingFlags) {
        if let Err(e) = self.session.speaking(flags) {
            error!(
                "[{}] Failed to send speaking {:?}: {}",
                self.session.guild_id(),
                flags,
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        common::{errors::VoiceError, types::GuildId},
        voice::{
            session::{Speaking, VoiceSignaling},
            udp::VoiceTransport,
        },
    };
    use parking_lot::Mutex;

    type Log<T> = Arc<Mutex<Vec<T>>>;

    struct RecordingTransport(Log<(Instant, Vec<u8>)>);

    #[async_trait]
    impl VoiceTransport for RecordingTransport {
        async fn send(&mut self, payload: &[u8]) -> Result<(), VoiceError> {
            self.0.lock().push((Instant::now(), payload.to_vec()));
            Ok(())
        }
        async fn close(&mut self) -> Result<(), VoiceError> {
            Ok(())
        }
    }

    struct RecordingSignaling(Log<SpeakingFlags>);

    impl VoiceSignaling for RecordingSignaling {
        fn send_speaking(&self, speaking: &Speaking) -> Result<(), VoiceError> {
            self.0.lock().push(speaking.speaking);
            Ok(())
        }
    }

    enum Step {
        Frame,
        Silence,
        Fail,
        Stall(Duration),
    }

    /// Answers call `n` with `script(n)` and records when each call happened.
    struct Scripted<F> {
        calls: u64,
        script: F,
        called_at: Log<Instant>,
    }

    #[async_trait]
    impl<F: FnMut(u64) -> Step + Send + 'static> FrameProvider for Scripted<F> {
        async fn provide_opus(&mut self) -> AnyResult<Option<Bytes>> {
            self.called_at.lock().push(Instant::now());
            let step = (self.script)(self.calls);
            self.calls += 1;
            match step {
                Step::Frame => Ok(Some(Bytes::from_static(&[0xAA, 0xBB]))),
                Step::Silence => Ok(None),
                Step::Fail => Err("decoder hiccup".into()),
                Step::Stall(d) => {
                    tokio::time::sleep(d).await;
                    Ok(Some(Bytes::from_static(&[0xAA, 0xBB])))
                }
            }
        }
    }

    struct Rig {
        system: SendSystem,
        writes: Log<(Instant, Vec<u8>)>,
        signals: Log<SpeakingFlags>,
        calls: Log<Instant>,
    }

    fn rig(script: impl FnMut(u64) -> Step + Send + 'static) -> Rig {
        let writes: Log<(Instant, Vec<u8>)> = Arc::default();
        let signals: Log<SpeakingFlags> = Arc::default();
        let calls: Log<Instant> = Arc::default();
        let session = Arc::new(VoiceSession::new(
            GuildId::from("1"),
            1,
            RecordingSignaling(signals.clone()),
            RecordingTransport(writes.clone()),
        ));
        let provider = Scripted {
            calls: 0,
            script,
            called_at: calls.clone(),
        };
        Rig {
            system: SendSystem::new(provider, session),
            writes,
            signals,
            calls,
        }
    }

    fn talking() -> SpeakingFlags {
        SpeakingFlags::MICROPHONE | SpeakingFlags::PRIORITY
    }

    #[tokio::test(start_paused = true)]
    async fn paces_fifty_frames_per_second() {
        let mut rig = rig(|_| Step::Frame);
        rig.system.start();
        assert!(rig.system.is_running());

        tokio::time::sleep(Duration::from_millis(1_000)).await;
        rig.system.stop();

        let sent = rig.writes.lock().len();
        assert!((49..=51).contains(&sent), "sent {} frames", sent);
        assert_eq!(*rig.signals.lock(), vec![talking()]);
    }

    #[tokio::test(start_paused = true)]
    async fn burst_ends_with_five_silence_frames_then_stop() {
        let mut rig = rig(|n| if n < 10 { Step::Frame } else { Step::Silence });
        rig.system.start();

        tokio::time::sleep(Duration::from_millis(1_000)).await;
        rig.system.stop();

        let writes = rig.writes.lock();
        assert_eq!(writes.len(), 15);
        assert!(writes[..10].iter().all(|(_, f)| f == &[0xAA, 0xBB]));
        assert!(writes[10..].iter().all(|(_, f)| f == &SILENCE_FRAME));
        assert_eq!(
            *rig.signals.lock(),
            vec![talking(), SpeakingFlags::empty()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn new_burst_restarts_speaking_and_silence_budget() {
        // talk 3, quiet 10, talk 3, quiet forever
        let mut rig = rig(|n| match n {
            0..3 | 13..16 => Step::Frame,
            _ => Step::Silence,
        });
        rig.system.start();

        tokio::time::sleep(Duration::from_millis(1_000)).await;
        rig.system.stop();

        let silence = rig
            .writes
            .lock()
            .iter()
            .filter(|(_, f)| f == &SILENCE_FRAME)
            .count();
        assert_eq!(silence, 10);
        assert_eq!(
            *rig.signals.lock(),
            vec![
                talking(),
                SpeakingFlags::empty(),
                talking(),
                SpeakingFlags::empty()
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_is_written_after_stop() {
        let mut rig = rig(|_| Step::Frame);
        rig.system.start();

        tokio::time::sleep(Duration::from_millis(205)).await;
        rig.system.stop();
        let at_stop = rig.writes.lock().len();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(rig.writes.lock().len(), at_stop);
        assert!(!rig.system.is_running());

        // A stopped system does not start again.
        rig.system.start();
        assert!(!rig.system.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn resyncs_after_stall() {
        let mut rig = rig(|n| {
            if n == 10 {
                Step::Stall(Duration::from_millis(200))
            } else {
                Step::Frame
            }
        });
        rig.system.start();

        tokio::time::sleep(Duration::from_millis(1_000)).await;
        rig.system.stop();

        let calls = rig.calls.lock();
        assert!(calls.len() > 20);
        let gaps: Vec<Duration> = calls.windows(2).map(|w| w[1] - w[0]).collect();
        assert!(gaps[..10].iter().all(|g| *g == Duration::from_millis(20)));
        assert_eq!(gaps[10], Duration::from_millis(200));
        // No catch-up burst once the stall is over.
        assert!(
            gaps[11..].iter().all(|g| *g >= Duration::from_millis(20)),
            "gaps after stall: {:?}",
            &gaps[11..]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn provider_errors_skip_the_tick() {
        let mut rig = rig(|n| if n % 2 == 1 { Step::Fail } else { Step::Frame });
        rig.system.start();

        tokio::time::sleep(Duration::from_millis(390)).await;
        rig.system.stop();

        let calls = rig.calls.lock().len();
        let writes = rig.writes.lock().len();
        assert_eq!(calls, 20);
        assert_eq!(writes, 10);
        assert_eq!(*rig.signals.lock(), vec![talking()]);
    }
}
