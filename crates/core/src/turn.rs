use std::collections::VecDeque;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::{BoxStream, Stream};
use meditation_types::AudioFrame;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::capability::VoiceActivity;
use crate::error::DetectorError;
use crate::events::{DetectorOutput, TurnEvent, TurnId};
use crate::session::SessionState;

/// Hysteresis applied on top of the per-frame speech probability.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnConfig {
    /// Activation threshold for the speech probability (0.0-1.0).
    /// A higher threshold requires louder audio to count as speech.
    pub threshold: f32,

    /// Continuous speech required before a turn is confirmed as started.
    pub min_speech: Duration,

    /// Continuous silence required before a turn is confirmed as ended.
    pub silence: Duration,

    /// Audio kept from before the speech onset and included with the turn.
    pub prefix_padding: Duration,

    /// Longest a turn may stay open. Speech that runs past it, like steady
    /// background noise, ends the turn and later audio starts a new one.
    pub max_turn: Duration,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            min_speech: Duration::from_millis(250),
            silence: Duration::from_millis(600),
            prefix_padding: Duration::from_millis(300),
            max_turn: Duration::from_secs(60),
        }
    }
}

impl TurnConfig {
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_min_speech(mut self, min_speech: Duration) -> Self {
        self.min_speech = min_speech;
        self
    }

    pub fn with_silence(mut self, silence: Duration) -> Self {
        self.silence = silence;
        self
    }

    pub fn with_prefix_padding(mut self, prefix_padding: Duration) -> Self {
        self.prefix_padding = prefix_padding;
        self
    }

    pub fn with_max_turn(mut self, max_turn: Duration) -> Self {
        self.max_turn = max_turn;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    Idle,
    /// Speech heard, but not yet long enough to confirm a turn.
    Pending { since: Duration, speech: Duration },
    Speaking,
    /// Silence after speech, waiting to see if it persists.
    Trailing { since: Duration },
}

/// Turns a sequence of audio frames into turn-start and turn-end events.
///
/// One detector serves exactly one session; it cannot be restarted.
pub struct TurnDetector {
    vad: Box<dyn VoiceActivity>,
    config: TurnConfig,
    phase: Phase,
    next_turn: u64,
    current: Option<TurnId>,
    /// Speech onset of the open turn.
    started: Duration,
    preroll: VecDeque<AudioFrame>,
    buffered: Vec<AudioFrame>,
}

impl TurnDetector {
    pub fn new(vad: Box<dyn VoiceActivity>, config: TurnConfig) -> Self {
        Self {
            vad,
            config,
            phase: Phase::Idle,
            next_turn: 0,
            current: None,
            started: Duration::ZERO,
            preroll: VecDeque::new(),
            buffered: Vec::new(),
        }
    }

    pub fn is_in_turn(&self) -> bool {
        self.current.is_some()
    }

    /// Feeds one frame. A detector error leaves the detector state untouched,
    /// so the caller can report it and keep going with the next frame.
    pub fn process(&mut self, frame: AudioFrame) -> Result<Option<TurnEvent>, DetectorError> {
        let probability = self.vad.evaluate(&frame)?;
        let speech = probability >= self.config.threshold;
        Ok(self.advance(frame, speech))
    }

    /// Drops any partial or open turn along with its buffered audio.
    pub fn reset(&mut self) {
        if let Some(turn) = self.current.take() {
            tracing::debug!(%turn, "Discarding open turn");
        }
        self.phase = Phase::Idle;
        self.preroll.clear();
        self.buffered.clear();
    }

    fn advance(&mut self, frame: AudioFrame, speech: bool) -> Option<TurnEvent> {
        match self.phase {
            Phase::Idle => {
                if !speech {
                    self.remember(frame);
                    return None;
                }
                self.phase = Phase::Pending {
                    since: frame.timestamp(),
                    speech: frame.duration(),
                };
                self.buffered.extend(self.preroll.drain(..));
                self.buffered.push(frame);
                self.confirm_start()
            }
            Phase::Pending { since, speech: heard } => {
                if !speech {
                    // A blip too short to be a turn; keep its audio as padding only.
                    self.phase = Phase::Idle;
                    for buffered in std::mem::take(&mut self.buffered) {
                        self.remember(buffered);
                    }
                    self.remember(frame);
                    return None;
                }
                self.phase = Phase::Pending {
                    since,
                    speech: heard + frame.duration(),
                };
                self.buffered.push(frame);
                self.confirm_start()
            }
            Phase::Speaking => {
                let end = frame.end();
                if !speech {
                    self.phase = Phase::Trailing {
                        since: frame.timestamp(),
                    };
                }
                self.buffered.push(frame);
                self.limit_turn(end)
            }
            Phase::Trailing { since } => {
                let end = frame.end();
                self.buffered.push(frame);
                if speech {
                    self.phase = Phase::Speaking;
                } else if end.saturating_sub(since) >= self.config.silence {
                    return self.confirm_end(end);
                }
                self.limit_turn(end)
            }
        }
    }

    fn confirm_start(&mut self) -> Option<TurnEvent> {
        let Phase::Pending { since, speech } = self.phase else {
            return None;
        };
        if speech < self.config.min_speech {
            return None;
        }

        self.next_turn += 1;
        let turn = TurnId(self.next_turn);
        self.current = Some(turn);
        self.started = since;
        self.phase = Phase::Speaking;
        tracing::debug!(%turn, at = ?since, "Turn started");
        Some(TurnEvent::Started { turn, at: since })
    }

    fn limit_turn(&mut self, end: Duration) -> Option<TurnEvent> {
        if end.saturating_sub(self.started) < self.config.max_turn {
            return None;
        }
        tracing::warn!(
            turn = ?self.current,
            length = ?end.saturating_sub(self.started),
            "Turn hit its maximum length"
        );
        self.confirm_end(end)
    }

    fn confirm_end(&mut self, at: Duration) -> Option<TurnEvent> {
        let turn = self.current.take()?;
        self.phase = Phase::Idle;
        let audio = std::mem::take(&mut self.buffered);
        tracing::debug!(%turn, at = ?at, frames = audio.len(), "Turn ended");
        Some(TurnEvent::Ended { turn, at, audio })
    }

    fn remember(&mut self, frame: AudioFrame) {
        self.preroll.push_back(frame);
        let mut kept: Duration = self.preroll.iter().map(AudioFrame::duration).sum();
        while kept > self.config.prefix_padding {
            match self.preroll.pop_front() {
                Some(old) => kept = kept.saturating_sub(old.duration()),
                None => break,
            }
        }
    }

    /// Lazily maps a frame stream to detector output, ignoring session state.
    pub fn into_stream<S>(self, frames: S) -> BoxStream<'static, DetectorOutput>
    where
        S: Stream<Item = AudioFrame> + Send + 'static,
    {
        futures::stream::unfold(
            (self, frames.boxed()),
            |(mut detector, mut frames)| async move {
                while let Some(frame) = frames.next().await {
                    match detector.process(frame) {
                        Ok(Some(event)) => {
                            return Some((DetectorOutput::Turn(event), (detector, frames)));
                        }
                        Ok(None) => continue,
                        Err(e) => return Some((DetectorOutput::Fault(e), (detector, frames))),
                    }
                }
                None
            },
        )
        .boxed()
    }

    /// Runs the detector for a session until the frame channel closes or the
    /// session is cancelled. Frames that arrive while the session does not
    /// accept speech reset the detector instead of being scored.
    pub async fn run(
        mut self,
        mut frames: mpsc::Receiver<AudioFrame>,
        state: watch::Receiver<SessionState>,
        events: mpsc::Sender<DetectorOutput>,
        cancel: CancellationToken,
    ) {
        loop {
            let frame = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                frame = frames.recv() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
            };

            if !state.borrow().accepts_speech() {
                if self.phase != Phase::Idle {
                    self.reset();
                }
                continue;
            }

            let output = match self.process(frame) {
                Ok(Some(event)) => DetectorOutput::Turn(event),
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!("Turn detector error: {}", e);
                    DetectorOutput::Fault(e)
                }
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                sent = events.send(output) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("Turn detector stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::MockVoiceActivity;

    const RATE: u32 = 16_000;
    const FRAME: usize = 320; // 20 ms

    fn frame(index: u64, level: i16) -> AudioFrame {
        AudioFrame::new(Duration::from_millis(index * 20), RATE, vec![level; FRAME])
    }

    fn loudness_vad() -> Box<dyn VoiceActivity> {
        let mut vad = MockVoiceActivity::new();
        vad.expect_evaluate()
            .returning(|f| Ok(if f.samples()[0] > 0 { 0.9 } else { 0.1 }));
        Box::new(vad)
    }

    fn config() -> TurnConfig {
        TurnConfig::default()
            .with_min_speech(Duration::from_millis(60))
            .with_silence(Duration::from_millis(100))
            .with_prefix_padding(Duration::from_millis(40))
    }

    fn feed(detector: &mut TurnDetector, levels: &[i16], start: u64) -> Vec<TurnEvent> {
        levels
            .iter()
            .enumerate()
            .filter_map(|(i, &level)| detector.process(frame(start + i as u64, level)).unwrap())
            .collect()
    }

    #[test]
    fn short_blips_do_not_start_a_turn() {
        let mut detector = TurnDetector::new(loudness_vad(), config());
        let events = feed(&mut detector, &[0, 1, 1, 0, 1, 0, 0, 0, 0, 0, 0, 0], 0);
        assert!(events.is_empty());
        assert!(!detector.is_in_turn());
    }

    #[test]
    fn detects_a_full_turn_with_padding() {
        let mut detector = TurnDetector::new(loudness_vad(), config());
        // 3 silent frames, 4 speech frames, a short pause, 1 speech frame, then silence.
        let levels = [0, 0, 0, 1, 1, 1, 1, 0, 0, 1, 0, 0, 0, 0, 0, 0];
        let events = feed(&mut detector, &levels, 0);

        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0],
            TurnEvent::Started {
                turn: TurnId(1),
                at: Duration::from_millis(60)
            }
        );
        let TurnEvent::Ended { turn, at, audio } = &events[1] else {
            panic!("expected turn end, got {:?}", events[1]);
        };
        assert_eq!(*turn, TurnId(1));
        // Silence starts at frame 10 (200 ms) and is confirmed 100 ms later.
        assert_eq!(*at, Duration::from_millis(300));
        // Two frames of padding, then frames 3..=14.
        assert_eq!(audio.len(), 14);
        assert_eq!(audio[0].timestamp(), Duration::from_millis(20));
        assert!(!detector.is_in_turn());
    }

    #[test]
    fn turn_ids_increase() {
        let mut detector = TurnDetector::new(loudness_vad(), config());
        let mut levels = vec![1, 1, 1, 0, 0, 0, 0, 0];
        levels.extend_from_slice(&[1, 1, 1, 0, 0, 0, 0, 0]);
        let turns: Vec<_> = feed(&mut detector, &levels, 0)
            .iter()
            .map(TurnEvent::turn)
            .collect();
        assert_eq!(turns, vec![TurnId(1), TurnId(1), TurnId(2), TurnId(2)]);
    }

    #[test]
    fn endless_speech_is_cut_into_bounded_turns() {
        let config = config().with_max_turn(Duration::from_millis(200));
        let mut detector = TurnDetector::new(loudness_vad(), config);

        let events = feed(&mut detector, &[1; 30], 0);

        let turns: Vec<_> = events.iter().map(TurnEvent::turn).collect();
        assert_eq!(
            turns,
            vec![TurnId(1), TurnId(1), TurnId(2), TurnId(2), TurnId(3), TurnId(3)]
        );
        let TurnEvent::Ended { at, audio, .. } = &events[1] else {
            panic!("expected turn end, got {:?}", events[1]);
        };
        assert_eq!(*at, Duration::from_millis(200));
        assert_eq!(audio.len(), 10);
        for event in &events {
            if let TurnEvent::Ended { audio, .. } = event {
                assert!(audio.len() <= 10);
            }
        }
        assert!(!detector.is_in_turn());
    }

    #[test]
    fn detector_errors_are_not_fatal() {
        let mut vad = MockVoiceActivity::new();
        let mut calls = 0;
        vad.expect_evaluate().returning(move |f| {
            calls += 1;
            if calls == 2 {
                Err(DetectorError("model unavailable".into()))
            } else {
                Ok(if f.samples()[0] > 0 { 0.9 } else { 0.1 })
            }
        });
        let mut detector = TurnDetector::new(Box::new(vad), config());

        assert!(detector.process(frame(0, 1)).unwrap().is_none());
        assert!(detector.process(frame(1, 1)).is_err());
        assert!(detector.process(frame(2, 1)).unwrap().is_none());
        assert!(matches!(
            detector.process(frame(3, 1)).unwrap(),
            Some(TurnEvent::Started { .. })
        ));
    }

    #[tokio::test]
    async fn stream_reports_faults_and_turns() {
        let mut vad = MockVoiceActivity::new();
        vad.expect_evaluate().returning(|f| match f.samples()[0] {
            -1 => Err(DetectorError("bad frame".into())),
            0 => Ok(0.0),
            _ => Ok(1.0),
        });
        let detector = TurnDetector::new(Box::new(vad), config());
        let levels = [-1, 1, 1, 1, 0, 0, 0, 0, 0];
        let frames = futures::stream::iter(
            levels
                .into_iter()
                .enumerate()
                .map(|(i, level)| frame(i as u64, level))
                .collect::<Vec<_>>(),
        );

        let outputs: Vec<_> = detector.into_stream(frames).collect().await;
        assert_eq!(outputs.len(), 3);
        assert!(matches!(outputs[0], DetectorOutput::Fault(_)));
        assert!(matches!(outputs[1], DetectorOutput::Turn(TurnEvent::Started { .. })));
        assert!(matches!(outputs[2], DetectorOutput::Turn(TurnEvent::Ended { .. })));
    }

    #[tokio::test]
    async fn frames_are_ignored_while_speech_is_not_accepted() {
        let (frames_tx, frames_rx) = mpsc::channel(32);
        let (state_tx, state_rx) = watch::channel(SessionState::Greeting);
        let (events_tx, mut events_rx) = mpsc::channel(8);
        let detector = TurnDetector::new(loudness_vad(), config());
        let task = tokio::spawn(detector.run(
            frames_rx,
            state_rx,
            events_tx,
            CancellationToken::new(),
        ));

        for i in 0..5 {
            frames_tx.send(frame(i, 1)).await.unwrap();
        }
        // Let the detector drain the frames sent while greeting.
        while frames_tx.capacity() < 32 {
            tokio::task::yield_now().await;
        }
        state_tx.send_replace(SessionState::Listening);
        for i in 5..8 {
            frames_tx.send(frame(i, 1)).await.unwrap();
        }
        drop(frames_tx);
        task.await.unwrap();

        match events_rx.recv().await {
            Some(DetectorOutput::Turn(TurnEvent::Started { turn, at })) => {
                assert_eq!(turn, TurnId(1));
                assert_eq!(at, Duration::from_millis(100));
            }
            other => panic!("expected turn start, got {other:?}"),
        }
        assert!(events_rx.recv().await.is_none());
    }
}
