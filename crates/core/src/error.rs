/// Failures raised by the speech and reasoning providers a generation runs on.
///
/// None of these are fatal to a session: they end the current generation only.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    #[error("transcription failed: {0}")]
    Transcription(String),
    #[error("reasoning failed: {0}")]
    Reasoning(String),
    #[error("synthesis failed: {0}")]
    Synthesis(String),
    #[error("playback failed: {0}")]
    Playback(String),
    #[error("network error: {0}")]
    Network(String),
}

/// The voice-activity model could not score a frame.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("turn detection failed: {0}")]
pub struct DetectorError(pub String);
