/// A message received on the control side channel: `{"command": "..."}`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ControlMessage {
    command: String,
}

impl ControlMessage {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
        }
    }

    /// Decodes a raw payload. Anything that is not a JSON object with a string
    /// `command` field yields `None`.
    pub fn decode(payload: &[u8]) -> Option<Self> {
        let value: serde_json::Value = serde_json::from_slice(payload).ok()?;
        let command = value.as_object()?.get("command")?.as_str()?;
        Some(Self::new(command))
    }

    pub fn command_name(&self) -> &str {
        &self.command
    }

    /// The recognized command, if any.
    pub fn command(&self) -> Option<ControlCommand> {
        ControlCommand::from_name(&self.command)
    }
}

/// Commands that steer the conversation without spoken input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlCommand {
    /// Explain the upcoming exercise.
    StartPrep,
    /// Start guiding the exercise.
    StartBreathing,
}

impl ControlCommand {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "start_prep" => Some(Self::StartPrep),
            "start_breathing" => Some(Self::StartBreathing),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::StartPrep => "start_prep",
            Self::StartBreathing => "start_breathing",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_known_commands() {
        let message = ControlMessage::decode(br#"{"command":"start_breathing"}"#).unwrap();
        assert_eq!(message.command(), Some(ControlCommand::StartBreathing));

        let message = ControlMessage::decode(br#"{"command":"start_prep","extra":1}"#).unwrap();
        assert_eq!(message.command(), Some(ControlCommand::StartPrep));
    }

    #[test]
    fn unknown_command_decodes_but_is_unrecognized() {
        let message = ControlMessage::decode(br#"{"command":"dance"}"#).unwrap();
        assert_eq!(message.command_name(), "dance");
        assert!(message.command().is_none());
    }

    #[test]
    fn malformed_payloads_do_not_decode() {
        for payload in [
            &b"not json"[..],
            br#"["start_prep"]"#,
            br#"["start_breathing", 1]"#,
            br#""start_prep""#,
            br#"{"command":null}"#,
            br#"{"command":5}"#,
            br#"{"cmd":"start_prep"}"#,
            b"",
            &[0xff, 0xfe, 0x00],
        ] {
            assert!(ControlMessage::decode(payload).is_none(), "{payload:?}");
        }
    }

    #[test]
    fn names_round_trip() {
        for command in [ControlCommand::StartPrep, ControlCommand::StartBreathing] {
            assert_eq!(ControlCommand::from_name(command.name()), Some(command));
        }
    }
}
