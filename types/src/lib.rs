pub mod audio;
pub mod control;
pub mod outbound;
pub mod program;
pub mod session;

pub use audio::{AudioChunk, AudioFrame};
pub use control::{ControlCommand, ControlMessage};
pub use outbound::OutboundMessage;
pub use program::{BreathingAction, BreathingProgram, TimerPattern};
pub use session::SessionParams;
