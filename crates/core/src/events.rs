use std::fmt;
use std::time::Duration;

use meditation_types::{AudioFrame, ControlCommand};

use crate::error::{DetectorError, ProviderError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GenerationId(pub u64);

impl fmt::Display for GenerationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TurnId(pub u64);

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "turn-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A turn boundary emitted by the turn detector. Offsets are relative to the
/// start of the inbound audio stream.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    Started {
        turn: TurnId,
        at: Duration,
    },
    Ended {
        turn: TurnId,
        at: Duration,
        /// Every frame of the turn, including the leading padding.
        audio: Vec<AudioFrame>,
    },
}

impl TurnEvent {
    pub fn turn(&self) -> TurnId {
        match self {
            Self::Started { turn, .. } | Self::Ended { turn, .. } => *turn,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DetectorOutput {
    Turn(TurnEvent),
    Fault(DetectorError),
}

/// Why a generation was started.
#[derive(Debug, Clone, PartialEq)]
pub enum Cause {
    Turn { turn: TurnId, audio: Vec<AudioFrame> },
    Command(ControlCommand),
    /// Initiated by the session itself, such as the opening greeting.
    System,
}

impl Cause {
    pub fn kind(&self) -> CauseKind {
        match self {
            Self::Turn { turn, .. } => CauseKind::Turn(*turn),
            Self::Command(command) => CauseKind::Command(*command),
            Self::System => CauseKind::System,
        }
    }
}

/// A `Cause` without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CauseKind {
    Turn(TurnId),
    Command(ControlCommand),
    System,
}

impl fmt::Display for CauseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Turn(turn) => write!(f, "{turn}"),
            Self::Command(command) => write!(f, "command:{}", command.name()),
            Self::System => f.write_str("system"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationHandle {
    id: GenerationId,
    kind: CauseKind,
}

impl GenerationHandle {
    pub fn new(id: GenerationId, kind: CauseKind) -> Self {
        Self { id, kind }
    }

    pub fn id(&self) -> GenerationId {
        self.id
    }

    pub fn kind(&self) -> CauseKind {
        self.kind
    }
}

/// What a completed generation heard and said.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Exchange {
    /// The user's transcript; `None` for command and system generations.
    pub user: Option<String>,
    pub reply: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GenerationStatus {
    Completed(Exchange),
    Cancelled,
    Failed(ProviderError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOutcome {
    pub id: GenerationId,
    pub kind: CauseKind,
    pub status: GenerationStatus,
}

/// Reply text produced by a generation, in production order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEvent {
    pub session_id: SessionId,
    pub generation: GenerationId,
    pub sequence: u64,
    pub text: String,
}

/// A recognized control command and the instruction it maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandRequest {
    pub command: ControlCommand,
    pub instructions: &'static str,
}
