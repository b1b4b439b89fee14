pub mod capability;
pub mod control;
pub mod error;
pub mod events;
pub mod history;
pub mod instructions;
pub mod pipeline;
pub mod playback;
pub mod publisher;
pub mod session;
pub mod turn;

pub use capability::{
    AudioSink, AudioStream, Capabilities, ChatMessage, FrameStream, Prompt, ReasoningRequest,
    Reasoner, Role, SpeechDelivery, SpeechSynthesizer, SpeechToText, TextStream, VoiceActivity,
};
pub use error::{DetectorError, ProviderError};
pub use events::{
    Cause, CauseKind, Exchange, GenerationHandle, GenerationId, GenerationOutcome,
    GenerationStatus, SessionId, TranscriptEvent, TurnEvent, TurnId,
};
pub use playback::{Pacing, PlaybackQueue};
pub use session::{
    ChannelCapacities, SessionConfig, SessionHandle, SessionReport, SessionState, start_session,
};
pub use turn::{TurnConfig, TurnDetector};
