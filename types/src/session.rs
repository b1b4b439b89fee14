use serde_json::Value;

pub const DEFAULT_VOICE: &str = "alloy";
pub const DEFAULT_LANGUAGE: &str = "en-US";
pub const DEFAULT_CONVERSATION_TYPE: &str = "breathing";
pub const DEFAULT_DURATION_MINUTES: f64 = 5.0;

/// Parameters supplied once by the client when the session starts.
///
/// Decoding never fails: every field that is missing, empty or of the wrong
/// type falls back to its default independently of the others.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionParams {
    /// The voice used for synthesized speech. ex: "alloy"
    preferred_voice: String,

    /// Locale tag of the user's speech. ex: "en-US"
    language: String,

    /// Kind of session, or a breathing program slug. ex: "4-7-8-breathing"
    conversation_type: String,

    /// Advisory only; it is passed to the model and never enforced.
    duration_minutes: f64,
}

impl Default for SessionParams {
    fn default() -> Self {
        Self {
            preferred_voice: DEFAULT_VOICE.to_string(),
            language: DEFAULT_LANGUAGE.to_string(),
            conversation_type: DEFAULT_CONVERSATION_TYPE.to_string(),
            duration_minutes: DEFAULT_DURATION_MINUTES,
        }
    }
}

fn string_field(object: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| object.get(*k))
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

fn duration_field(object: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter()
        .filter_map(|k| object.get(*k))
        .filter_map(Value::as_f64)
        .find(|d| d.is_finite() && *d > 0.0)
}

impl SessionParams {
    /// Decodes the raw metadata payload attached to the session.
    pub fn from_metadata(raw: &str) -> Self {
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => Self::from_value(&value),
            Err(e) => {
                if !raw.trim().is_empty() {
                    tracing::warn!("Session metadata is not valid JSON, using defaults: {}", e);
                }
                Self::default()
            }
        }
    }

    pub fn from_value(value: &Value) -> Self {
        let Some(object) = value.as_object() else {
            if !value.is_null() {
                tracing::warn!("Session metadata is not an object, using defaults");
            }
            return Self::default();
        };

        let defaults = Self::default();
        Self {
            preferred_voice: string_field(object, &["preferredVoice"])
                .unwrap_or(defaults.preferred_voice),
            language: string_field(object, &["language"]).unwrap_or(defaults.language),
            conversation_type: string_field(object, &["conversationType", "meditationType"])
                .unwrap_or(defaults.conversation_type),
            duration_minutes: duration_field(object, &["durationMinutes", "duration"])
                .unwrap_or(defaults.duration_minutes),
        }
    }

    pub fn with_preferred_voice(mut self, voice: &str) -> Self {
        self.preferred_voice = voice.to_string();
        self
    }

    pub fn with_language(mut self, language: &str) -> Self {
        self.language = language.to_string();
        self
    }

    pub fn with_conversation_type(mut self, conversation_type: &str) -> Self {
        self.conversation_type = conversation_type.to_string();
        self
    }

    pub fn with_duration_minutes(mut self, minutes: f64) -> Self {
        self.duration_minutes = minutes;
        self
    }

    pub fn preferred_voice(&self) -> &str {
        &self.preferred_voice
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    /// Primary language subtag, ex: "en-US" -> "en".
    pub fn language_code(&self) -> &str {
        self.language
            .split(['-', '_'])
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.language)
    }

    pub fn conversation_type(&self) -> &str {
        &self.conversation_type
    }

    pub fn duration_minutes(&self) -> f64 {
        self.duration_minutes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_or_malformed_payload_yields_defaults() {
        for raw in ["", "not json", "[1,2,3]", "42", "null", "{}"] {
            assert_eq!(SessionParams::from_metadata(raw), SessionParams::default(), "{raw}");
        }
    }

    #[test]
    fn documented_keys_are_read() {
        let params = SessionParams::from_value(&json!({
            "preferredVoice": "verse",
            "language": "fr-FR",
            "conversationType": "4-7-8-breathing",
            "durationMinutes": 10
        }));
        assert_eq!(params.preferred_voice(), "verse");
        assert_eq!(params.language(), "fr-FR");
        assert_eq!(params.language_code(), "fr");
        assert_eq!(params.conversation_type(), "4-7-8-breathing");
        assert_eq!(params.duration_minutes(), 10.0);
    }

    #[test]
    fn legacy_keys_are_accepted() {
        let params = SessionParams::from_value(&json!({
            "meditationType": "sleep",
            "duration": 7.5
        }));
        assert_eq!(params.conversation_type(), "sleep");
        assert_eq!(params.duration_minutes(), 7.5);
    }

    #[test]
    fn bad_fields_fall_back_individually() {
        let params = SessionParams::from_value(&json!({
            "preferredVoice": 3,
            "language": "",
            "conversationType": "body-scan",
            "durationMinutes": -2
        }));
        assert_eq!(params.preferred_voice(), DEFAULT_VOICE);
        assert_eq!(params.language(), DEFAULT_LANGUAGE);
        assert_eq!(params.conversation_type(), "body-scan");
        assert_eq!(params.duration_minutes(), DEFAULT_DURATION_MINUTES);

        let params = SessionParams::from_value(&json!({ "durationMinutes": "ten" }));
        assert_eq!(params.duration_minutes(), DEFAULT_DURATION_MINUTES);
    }

    #[test]
    fn language_code_without_region() {
        let params = SessionParams::default().with_language("de");
        assert_eq!(params.language_code(), "de");
        assert_eq!(SessionParams::default().language_code(), "en");
    }
}
