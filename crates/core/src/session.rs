use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use meditation_types::{AudioFrame, OutboundMessage, SessionParams};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::capability::{Capabilities, SpeechDelivery, VoiceActivity};
use crate::control::ControlListener;
use crate::events::{
    Cause, CommandRequest, DetectorOutput, GenerationHandle, GenerationOutcome, GenerationStatus,
    SessionId, TurnEvent, TurnId,
};
use crate::history::{ConversationHistory, DEFAULT_HISTORY_LIMIT};
use crate::instructions;
use crate::pipeline::{PipelineCoordinator, ReplyContext};
use crate::publisher::EventPublisher;
use crate::turn::{TurnConfig, TurnDetector};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Greeting,
    Listening,
    GeneratingFromTurn,
    GeneratingFromCommand,
    Closed,
}

impl SessionState {
    /// Whether user speech is turned into turns in this state.
    pub fn accepts_speech(self) -> bool {
        matches!(
            self,
            Self::Listening | Self::GeneratingFromTurn | Self::GeneratingFromCommand
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelCapacities {
    /// Inbound audio frames waiting for the turn detector.
    pub audio: usize,
    /// Inbound control payloads waiting to be decoded.
    pub control: usize,
    pub detector_events: usize,
    pub commands: usize,
}

impl Default for ChannelCapacities {
    fn default() -> Self {
        Self {
            audio: 256,
            control: 32,
            detector_events: 32,
            commands: 32,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub turn: TurnConfig,
    pub capacities: ChannelCapacities,
    /// Messages of earlier exchanges sent along with each reasoning request.
    pub history_limit: usize,
    /// Preamble of the session instructions.
    pub persona: String,
    pub speech_speed: f32,
    pub speech_instructions: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            turn: TurnConfig::default(),
            capacities: ChannelCapacities::default(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            persona: instructions::PERSONA.to_string(),
            speech_speed: instructions::DELIVERY_SPEED,
            speech_instructions: instructions::DELIVERY.to_string(),
        }
    }
}

/// Counters reported when a session closes.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct SessionReport {
    pub session_id: String,
    pub turns: u64,
    pub generations_started: u64,
    pub generations_completed: u64,
    pub generations_cancelled: u64,
    pub generations_failed: u64,
    pub detector_errors: u64,
    pub dropped_control_messages: u64,
}

/// The session record. Only the controller mutates it.
struct Session {
    id: SessionId,
    params: SessionParams,
    state: SessionState,
    active: Option<GenerationHandle>,
    instructions: String,
    history: ConversationHistory,
}

/// The caller's side of a running session.
pub struct SessionHandle {
    id: SessionId,
    audio: mpsc::Sender<AudioFrame>,
    control: mpsc::Sender<Vec<u8>>,
    state: watch::Receiver<SessionState>,
    shutdown: CancellationToken,
    task: JoinHandle<SessionReport>,
}

impl SessionHandle {
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Sender for inbound user audio.
    pub fn audio_sender(&self) -> mpsc::Sender<AudioFrame> {
        self.audio.clone()
    }

    /// Sender for raw control payloads.
    pub fn control_sender(&self) -> mpsc::Sender<Vec<u8>> {
        self.control.clone()
    }

    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Asks the session to close. Any active generation is cancelled.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Waits for the session to close, which happens on shutdown or once
    /// every audio and control sender has been dropped.
    pub async fn join(self) -> SessionReport {
        let Self {
            id,
            audio,
            control,
            task,
            ..
        } = self;
        drop(audio);
        drop(control);

        match task.await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(session = %id, "Session task failed: {}", e);
                SessionReport {
                    session_id: id.to_string(),
                    ..SessionReport::default()
                }
            }
        }
    }

    pub async fn close(self) -> SessionReport {
        self.shutdown();
        self.join().await
    }
}

/// Starts a session and its supervised tasks: the turn detector, the control
/// listener, and the controller that owns the session record.
pub fn start_session(
    params: SessionParams,
    capabilities: Capabilities,
    vad: Box<dyn VoiceActivity>,
    config: SessionConfig,
    outbound: mpsc::Sender<OutboundMessage>,
) -> SessionHandle {
    let id = SessionId::new();
    let span = tracing::info_span!("session", id = %id);
    let shutdown = CancellationToken::new();
    let capacities = &config.capacities;

    let (audio_tx, audio_rx) = mpsc::channel(capacities.audio);
    let (control_tx, control_rx) = mpsc::channel(capacities.control);
    let (events_tx, events_rx) = mpsc::channel(capacities.detector_events);
    let (commands_tx, commands_rx) = mpsc::channel(capacities.commands);
    let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(SessionState::Connecting);

    let mut tasks = JoinSet::new();
    let detector = TurnDetector::new(vad, config.turn.clone());
    tasks.spawn(
        detector
            .run(audio_rx, state_rx.clone(), events_tx, shutdown.child_token())
            .instrument(span.clone()),
    );

    let listener = ControlListener::new(control_rx, commands_tx);
    let dropped = listener.dropped_counter();
    tasks.spawn(listener.run(shutdown.child_token()).instrument(span.clone()));

    let publisher = EventPublisher::new(id.clone(), outbound);
    let coordinator =
        PipelineCoordinator::new(capabilities, publisher, outcomes_tx, shutdown.child_token());

    tracing::info!(
        parent: &span,
        voice = params.preferred_voice(),
        language = params.language(),
        conversation_type = params.conversation_type(),
        duration_minutes = params.duration_minutes(),
        "Session starting"
    );

    let delivery = SpeechDelivery {
        voice: params.preferred_voice().to_string(),
        speed: config.speech_speed,
        instructions: config.speech_instructions.clone(),
    };
    let controller = SessionController {
        report: SessionReport {
            session_id: id.to_string(),
            ..SessionReport::default()
        },
        session: Session {
            id: id.clone(),
            instructions: instructions::session_instructions(&config.persona, &params),
            params,
            state: SessionState::Connecting,
            active: None,
            history: ConversationHistory::new(config.history_limit),
        },
        state_tx,
        coordinator,
        outcomes: outcomes_rx,
        detector_events: events_rx,
        commands: commands_rx,
        tasks,
        shutdown: shutdown.clone(),
        delivery,
        open_turn: None,
        dropped,
    };
    let task = tokio::spawn(controller.run().instrument(span));

    SessionHandle {
        id,
        audio: audio_tx,
        control: control_tx,
        state: state_rx,
        shutdown,
        task,
    }
}

struct SessionController {
    session: Session,
    state_tx: watch::Sender<SessionState>,
    coordinator: PipelineCoordinator,
    outcomes: mpsc::UnboundedReceiver<GenerationOutcome>,
    detector_events: mpsc::Receiver<DetectorOutput>,
    commands: mpsc::Receiver<CommandRequest>,
    tasks: JoinSet<()>,
    shutdown: CancellationToken,
    delivery: SpeechDelivery,
    open_turn: Option<TurnId>,
    report: SessionReport,
    dropped: Arc<AtomicU64>,
}

impl SessionController {
    async fn run(mut self) -> SessionReport {
        self.greet().await;

        let mut detector_open = true;
        let mut commands_open = true;
        while detector_open || commands_open {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                Some(outcome) = self.outcomes.recv() => self.on_outcome(outcome).await,
                output = self.detector_events.recv(), if detector_open => match output {
                    Some(output) => self.on_detector(output).await,
                    None => detector_open = false,
                },
                request = self.commands.recv(), if commands_open => match request {
                    Some(request) => self.on_command(request).await,
                    None => commands_open = false,
                },
            }
        }

        self.close().await
    }

    async fn greet(&mut self) {
        self.set_state(SessionState::Greeting);
        self.trigger(Cause::System, Some(instructions::GREETING.to_string()))
            .await;
        self.set_state(SessionState::Listening);
    }

    async fn on_detector(&mut self, output: DetectorOutput) {
        match output {
            DetectorOutput::Fault(e) => {
                self.report.detector_errors += 1;
                tracing::warn!("Turn detection fault: {}", e);
            }
            DetectorOutput::Turn(TurnEvent::Started { turn, at }) => {
                if let Some(previous) = self.open_turn.replace(turn) {
                    tracing::debug!(%previous, %turn, "New turn closes the open turn");
                }
                self.report.turns += 1;
                tracing::info!(%turn, at = ?at, "User started speaking");

                // Barge-in: the reply in flight stops as soon as the user speaks.
                if let Some(cancelled) = self.coordinator.cancel_active().await {
                    tracing::info!(generation = %cancelled, %turn, "Barge-in");
                    self.session.active = None;
                }
            }
            DetectorOutput::Turn(TurnEvent::Ended { turn, at, audio }) => {
                if self.open_turn != Some(turn) {
                    tracing::debug!(%turn, "Ignoring end of a turn that is not open");
                    return;
                }
                self.open_turn = None;
                tracing::info!(%turn, at = ?at, frames = audio.len(), "User finished speaking");

                self.set_state(SessionState::GeneratingFromTurn);
                self.trigger(Cause::Turn { turn, audio }, None).await;
                self.set_state(SessionState::Listening);
            }
        }
    }

    async fn on_command(&mut self, request: CommandRequest) {
        self.set_state(SessionState::GeneratingFromCommand);
        self.trigger(
            Cause::Command(request.command),
            Some(request.instructions.to_string()),
        )
        .await;
        self.set_state(SessionState::Listening);
    }

    async fn on_outcome(&mut self, outcome: GenerationOutcome) {
        self.record_outcome(&outcome);
        self.coordinator.reap(outcome.id).await;
    }

    fn record_outcome(&mut self, outcome: &GenerationOutcome) {
        match &outcome.status {
            GenerationStatus::Completed(exchange) => {
                self.report.generations_completed += 1;
                self.session.history.record(exchange);
            }
            GenerationStatus::Cancelled => self.report.generations_cancelled += 1,
            GenerationStatus::Failed(e) => {
                self.report.generations_failed += 1;
                tracing::warn!(generation = %outcome.id, cause = %outcome.kind, "Generation failed: {}", e);
            }
        }
        if self.session.active.is_some_and(|active| active.id() == outcome.id) {
            self.session.active = None;
        }
    }

    /// The single entry point for starting generations. A closed session
    /// never starts one.
    async fn trigger(&mut self, cause: Cause, instructions: Option<String>) {
        if self.session.state == SessionState::Closed {
            tracing::debug!(cause = %cause.kind(), "Session closed, not triggering");
            return;
        }
        let context = ReplyContext {
            session_instructions: self.session.instructions.clone(),
            history: self.session.history.snapshot(),
            locale: self.session.params.language_code().to_string(),
            delivery: self.delivery.clone(),
        };
        if let Some(handle) = self.coordinator.trigger(cause, instructions, context).await {
            self.report.generations_started += 1;
            self.session.active = Some(handle);
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.session.state == SessionState::Closed || self.session.state == state {
            return;
        }
        tracing::debug!(from = ?self.session.state, to = ?state, "Session state changed");
        self.session.state = state;
        self.state_tx.send_replace(state);
    }

    async fn close(mut self) -> SessionReport {
        self.set_state(SessionState::Closed);
        self.shutdown.cancel();
        self.coordinator.shutdown().await;

        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Session task failed: {}", e);
            }
        }
        while let Ok(outcome) = self.outcomes.try_recv() {
            self.record_outcome(&outcome);
        }

        self.report.dropped_control_messages = self.dropped.load(Ordering::Relaxed);
        tracing::info!(
            session = %self.session.id,
            history = self.session.history.len(),
            report = ?self.report,
            "Session closed"
        );
        self.report
    }
}
