use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use meditation_types::{AudioChunk, AudioFrame};

use crate::error::{DetectorError, ProviderError};
use crate::instructions;

pub type TextStream = BoxStream<'static, Result<String, ProviderError>>;
pub type AudioStream = BoxStream<'static, Result<AudioChunk, ProviderError>>;
pub type FrameStream = BoxStream<'static, AudioFrame>;

/// Scores a single frame with the probability that it contains speech.
#[cfg_attr(test, mockall::automock)]
pub trait VoiceActivity: Send {
    fn evaluate(&mut self, frame: &AudioFrame) -> Result<f32, DetectorError>;
}

/// Streams a turn's audio into transcript increments.
///
/// Dropping the returned stream stops the underlying request.
#[cfg_attr(test, mockall::automock)]
pub trait SpeechToText: Send + Sync {
    fn transcribe(&self, audio: FrameStream, locale: &str) -> TextStream;
}

/// Produces reply text increments for a request.
#[cfg_attr(test, mockall::automock)]
pub trait Reasoner: Send + Sync {
    fn generate(&self, request: ReasoningRequest) -> TextStream;
}

/// Turns a stream of reply text into speech audio.
#[cfg_attr(test, mockall::automock)]
pub trait SpeechSynthesizer: Send + Sync {
    fn synthesize(&self, text: BoxStream<'static, String>, delivery: &SpeechDelivery) -> AudioStream;
}

/// Where synthesized audio is queued for playback to the user.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AudioSink: Send + Sync {
    async fn enqueue(&self, chunk: AudioChunk) -> Result<(), ProviderError>;

    /// Drops every chunk queued but not yet played.
    async fn clear(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub text: String,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

/// What the model is asked to respond to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prompt {
    /// Words the user spoke during a turn.
    User(String),
    /// A fixed instruction from a command or the system.
    Instruction(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReasoningRequest {
    /// Persona preamble plus session parameters.
    pub instructions: String,
    /// Earlier exchanges of this session, oldest first.
    pub history: Vec<ChatMessage>,
    pub prompt: Prompt,
}

/// How synthesized speech should sound.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechDelivery {
    pub voice: String,
    pub speed: f32,
    pub instructions: String,
}

impl SpeechDelivery {
    pub fn new(voice: &str) -> Self {
        Self {
            voice: voice.to_string(),
            speed: instructions::DELIVERY_SPEED,
            instructions: instructions::DELIVERY.to_string(),
        }
    }
}

/// The providers a session runs its generations on.
#[derive(Clone)]
pub struct Capabilities {
    pub transcriber: Arc<dyn SpeechToText>,
    pub reasoner: Arc<dyn Reasoner>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub sink: Arc<dyn AudioSink>,
}
