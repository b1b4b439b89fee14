use meditation_types::{ControlCommand, SessionParams, program};

/// Persona preamble prepended to every reasoning request.
pub const PERSONA: &str = "You are a calm meditation voice guide.
You speak gently, slowly and clearly.
Keep responses short and natural for spoken audio.
Do not use emojis or special characters.
Create a peaceful atmosphere in every response.";

pub const GREETING: &str = "Greet the user calmly and say we will begin shortly.";
pub const PREPARATION: &str = "Explain what this breathing exercise is about.";
pub const BREATHING: &str = "Begin guiding the breathing exercise now.";

/// Delivery hint for the speech synthesizer.
pub const DELIVERY: &str = "Speak slowly and calmly.";
pub const DELIVERY_SPEED: f32 = 0.92;

/// The fixed instruction a control command maps to.
pub fn for_command(command: ControlCommand) -> &'static str {
    match command {
        ControlCommand::StartPrep => PREPARATION,
        ControlCommand::StartBreathing => BREATHING,
    }
}

/// Builds the instructions shared by every generation of a session.
pub fn session_instructions(persona: &str, params: &SessionParams) -> String {
    let mut text = format!(
        "{}\n\nMeditation type: {}\nDuration: {} minutes.\n\nGuide the user through the session calmly.",
        persona.trim(),
        params.conversation_type(),
        params.duration_minutes()
    );

    if let Some(program) = program::find_program(params.conversation_type()) {
        text.push_str("\n\n");
        text.push_str(&program.rhythm());
    }
    text
}
