use futures::StreamExt;
use meditation_types::AudioFrame;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::capability::{
    AudioStream, Capabilities, ChatMessage, Prompt, ReasoningRequest, SpeechDelivery, TextStream,
};
use crate::error::ProviderError;
use crate::events::{
    Cause, CauseKind, Exchange, GenerationHandle, GenerationId, GenerationOutcome,
    GenerationStatus,
};
use crate::instructions;
use crate::publisher::EventPublisher;

/// Session context a generation replies within.
#[derive(Debug, Clone)]
pub struct ReplyContext {
    pub session_instructions: String,
    pub history: Vec<ChatMessage>,
    /// Language code passed to the transcriber.
    pub locale: String,
    pub delivery: SpeechDelivery,
}

struct ActiveGeneration {
    id: GenerationId,
    kind: CauseKind,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Runs generations one at a time.
///
/// Starting a generation first cancels the active one and waits for its task
/// to finish, so two generations never produce output at the same time.
pub struct PipelineCoordinator {
    capabilities: Capabilities,
    publisher: EventPublisher,
    outcomes: mpsc::UnboundedSender<GenerationOutcome>,
    session_cancel: CancellationToken,
    next_id: u64,
    active: Option<ActiveGeneration>,
    closed: bool,
}

impl PipelineCoordinator {
    pub fn new(
        capabilities: Capabilities,
        publisher: EventPublisher,
        outcomes: mpsc::UnboundedSender<GenerationOutcome>,
        session_cancel: CancellationToken,
    ) -> Self {
        Self {
            capabilities,
            publisher,
            outcomes,
            session_cancel,
            next_id: 0,
            active: None,
            closed: false,
        }
    }

    /// Starts a generation for `cause`, replacing any active one.
    ///
    /// Command generations without explicit `instructions` use the command's
    /// fixed instruction. System generations require `instructions`. For turn
    /// generations, `instructions` is appended to the session instructions.
    /// Returns `None` without starting anything once the coordinator is shut
    /// down.
    pub async fn trigger(
        &mut self,
        cause: Cause,
        instructions: Option<String>,
        context: ReplyContext,
    ) -> Option<GenerationHandle> {
        let kind = cause.kind();
        if self.closed || self.session_cancel.is_cancelled() {
            tracing::debug!(cause = %kind, "Ignoring trigger on closed session");
            return None;
        }

        let mut context = context;
        let plan = match cause {
            Cause::Turn { audio, .. } => {
                if let Some(extra) = instructions {
                    context.session_instructions.push_str("\n\n");
                    context.session_instructions.push_str(&extra);
                }
                Plan::Transcribe(audio)
            }
            Cause::Command(command) => Plan::Instruct(
                instructions.unwrap_or_else(|| instructions::for_command(command).to_string()),
            ),
            Cause::System => match instructions {
                Some(text) => Plan::Instruct(text),
                None => {
                    tracing::warn!("System generation requested without instructions");
                    return None;
                }
            },
        };

        if let Some(previous) = self.cancel_active().await {
            tracing::info!(previous = %previous, cause = %kind, "Pre-empted active generation");
        }

        self.next_id += 1;
        let id = GenerationId(self.next_id);
        let cancel = self.session_cancel.child_token();
        let job = GenerationJob {
            id,
            kind,
            context,
            capabilities: self.capabilities.clone(),
            publisher: self.publisher.clone(),
            cancel: cancel.clone(),
        };
        let outcomes = self.outcomes.clone();
        let span = tracing::info_span!("generation", id = %id, cause = %kind);
        let task = tokio::spawn(
            async move {
                let outcome = job.run(plan).await;
                let _ = outcomes.send(outcome);
            }
            .instrument(span),
        );

        self.active = Some(ActiveGeneration {
            id,
            kind,
            cancel,
            task,
        });
        Some(GenerationHandle::new(id, kind))
    }

    /// Cancels the active generation, waits for it to stop, then drops any
    /// audio still queued for playback. Returns the cancelled generation.
    pub async fn cancel_active(&mut self) -> Option<GenerationId> {
        let cancelled = match self.active.take() {
            Some(active) => {
                active.cancel.cancel();
                if let Err(e) = active.task.await {
                    tracing::error!(generation = %active.id, "Generation task failed: {}", e);
                }
                tracing::debug!(generation = %active.id, cause = %active.kind, "Generation stopped");
                Some(active.id)
            }
            None => None,
        };
        self.capabilities.sink.clear().await;
        cancelled
    }

    /// Forgets a generation that reported its outcome.
    pub async fn reap(&mut self, id: GenerationId) {
        if self.active.as_ref().is_some_and(|active| active.id == id) {
            if let Some(active) = self.active.take() {
                let _ = active.task.await;
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| !active.task.is_finished())
    }

    pub fn active_id(&self) -> Option<GenerationId> {
        self.active.as_ref().map(|active| active.id)
    }

    /// Cancels the active generation and refuses every later trigger.
    pub async fn shutdown(&mut self) {
        self.closed = true;
        self.cancel_active().await;
    }
}

enum Plan {
    Transcribe(Vec<AudioFrame>),
    Instruct(String),
}

#[derive(Debug)]
enum StageError {
    Cancelled,
    Provider(ProviderError),
}

impl From<ProviderError> for StageError {
    fn from(e: ProviderError) -> Self {
        Self::Provider(e)
    }
}

struct GenerationJob {
    id: GenerationId,
    kind: CauseKind,
    context: ReplyContext,
    capabilities: Capabilities,
    publisher: EventPublisher,
    cancel: CancellationToken,
}

impl GenerationJob {
    async fn run(self, plan: Plan) -> GenerationOutcome {
        tracing::info!("Generation started");
        let status = match self.execute(plan).await {
            Ok(exchange) => {
                tracing::info!(chars = exchange.reply.len(), "Generation completed");
                GenerationStatus::Completed(exchange)
            }
            Err(StageError::Cancelled) => {
                tracing::info!("Generation cancelled");
                GenerationStatus::Cancelled
            }
            Err(StageError::Provider(e)) => {
                tracing::warn!("Generation failed: {}", e);
                self.capabilities.sink.clear().await;
                GenerationStatus::Failed(e)
            }
        };
        GenerationOutcome {
            id: self.id,
            kind: self.kind,
            status,
        }
    }

    async fn execute(&self, plan: Plan) -> Result<Exchange, StageError> {
        let (user, prompt) = match plan {
            Plan::Transcribe(audio) => {
                let transcript = self.transcribe(audio).await?;
                if transcript.is_empty() {
                    tracing::info!("Turn transcribed to nothing, not replying");
                    return Ok(Exchange::default());
                }
                tracing::debug!(transcript = %transcript, "Turn transcribed");
                (Some(transcript.clone()), Prompt::User(transcript))
            }
            Plan::Instruct(text) => (None, Prompt::Instruction(text)),
        };

        let reply = self.reply(prompt).await?;
        Ok(Exchange { user, reply })
    }

    async fn transcribe(&self, audio: Vec<AudioFrame>) -> Result<String, StageError> {
        let frames = futures::stream::iter(audio).boxed();
        let mut increments = self
            .capabilities
            .transcriber
            .transcribe(frames, &self.context.locale);

        let mut transcript = String::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(StageError::Cancelled),
                next = increments.next() => next,
            };
            match next {
                Some(Ok(text)) => transcript.push_str(&text),
                Some(Err(e)) => return Err(e.into()),
                None => break,
            }
        }
        Ok(transcript.trim().to_string())
    }

    /// Streams reasoning output to the client and the synthesizer at once.
    async fn reply(&self, prompt: Prompt) -> Result<String, StageError> {
        let request = ReasoningRequest {
            instructions: self.context.session_instructions.clone(),
            history: self.context.history.clone(),
            prompt,
        };
        let increments = self.capabilities.reasoner.generate(request);

        let (text_tx, text_rx) = mpsc::channel::<String>(32);
        let audio = self
            .capabilities
            .synthesizer
            .synthesize(ReceiverStream::new(text_rx).boxed(), &self.context.delivery);

        let (reply, ()) = tokio::try_join!(self.reason(increments, text_tx), self.play(audio))?;
        Ok(reply)
    }

    async fn reason(
        &self,
        mut increments: TextStream,
        speech: mpsc::Sender<String>,
    ) -> Result<String, StageError> {
        let mut reply = String::new();
        let mut sequence = 0;
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(StageError::Cancelled),
                next = increments.next() => next,
            };
            let text = match next {
                Some(Ok(text)) if text.is_empty() => continue,
                Some(Ok(text)) => text,
                Some(Err(e)) => return Err(e.into()),
                None => break,
            };

            let event = self.publisher.event(self.id, sequence, &text);
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(StageError::Cancelled),
                published = self.publisher.publish(event) => published?,
            }
            sequence += 1;
            reply.push_str(&text);

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(StageError::Cancelled),
                sent = speech.send(text) => {
                    if sent.is_err() {
                        tracing::debug!("Synthesizer stopped taking text");
                    }
                }
            }
        }
        Ok(reply)
    }

    async fn play(&self, mut audio: AudioStream) -> Result<(), StageError> {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(StageError::Cancelled),
                next = audio.next() => next,
            };
            let chunk = match next {
                Some(Ok(chunk)) if chunk.is_empty() => continue,
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(()),
            };
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(StageError::Cancelled),
                queued = self.capabilities.sink.enqueue(chunk) => queued?,
            }
        }
    }
}
