//! Application Configuration Module
//!
//! Loads the service settings from environment variables into a single
//! struct that is shared by the transport and the provider adapters.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use meditation_core::{SessionConfig, TurnConfig};
use meditation_types::audio::DEFAULT_INPUT_SAMPLE_RATE;
use secrecy::SecretString;
use tracing::Level;

pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:3000";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_STT_MODEL: &str = "gpt-4o-mini-transcribe";
pub const DEFAULT_LLM_MODEL: &str = "gpt-4.1-mini";
pub const DEFAULT_LLM_TEMPERATURE: f32 = 0.4;
pub const DEFAULT_TTS_MODEL: &str = "gpt-4o-mini-tts";

/// Holds all configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    pub openai_api_key: SecretString,
    pub openai_base_url: String,
    pub stt_model: String,
    pub llm_model: String,
    pub llm_temperature: f32,
    pub tts_model: String,
    pub input_sample_rate: u32,
    pub turn: TurnConfig,
    pub prompts_dir: Option<PathBuf>,
    pub log_level: Level,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid log level provided for RUST_LOG: {0}")]
    InvalidLogLevel(String),
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    // *   `OPENAI_API_KEY`: Secret key for the OpenAI API. Required.
    // *   `BIND_ADDRESS`: (Optional) Listen address. Defaults to "0.0.0.0:3000".
    // *   `OPENAI_BASE_URL`: (Optional) Defaults to "https://api.openai.com/v1".
    // *   `STT_MODEL`, `LLM_MODEL`, `LLM_TEMPERATURE`, `TTS_MODEL`: (Optional) Provider models.
    // *   `INPUT_SAMPLE_RATE`: (Optional) Sample rate of inbound client audio. Defaults to 24000.
    // *   `VAD_THRESHOLD`, `MIN_SPEECH_MS`, `SILENCE_MS`, `PREFIX_PADDING_MS`: (Optional) Turn detection.
    // *   `PROMPTS_DIR`: (Optional) Directory of `.md` prompt overrides.
    // *   `RUST_LOG`: (Optional) The logging level. Defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file. This is useful for local development and is ignored if not present.
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from any variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let or_default = |name: &str, default: &str| var(name).unwrap_or_else(|| default.to_string());

        let openai_api_key = var("OPENAI_API_KEY")
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))?;

        let defaults = TurnConfig::default();
        let turn = TurnConfig::default()
            .with_threshold(parse(&var, "VAD_THRESHOLD", defaults.threshold)?)
            .with_min_speech(parse_millis(&var, "MIN_SPEECH_MS", defaults.min_speech)?)
            .with_silence(parse_millis(&var, "SILENCE_MS", defaults.silence)?)
            .with_prefix_padding(parse_millis(
                &var,
                "PREFIX_PADDING_MS",
                defaults.prefix_padding,
            )?)
            .with_max_turn(parse_millis(&var, "MAX_TURN_MS", defaults.max_turn)?);
        if !(0.0..=1.0).contains(&turn.threshold) {
            return Err(ConfigError::InvalidValue {
                name: "VAD_THRESHOLD".to_string(),
                value: turn.threshold.to_string(),
            });
        }

        if turn.max_turn.is_zero() {
            return Err(ConfigError::InvalidValue {
                name: "MAX_TURN_MS".to_string(),
                value: "0".to_string(),
            });
        }

        let input_sample_rate = parse(&var, "INPUT_SAMPLE_RATE", DEFAULT_INPUT_SAMPLE_RATE)?;
        if input_sample_rate == 0 {
            return Err(ConfigError::InvalidValue {
                name: "INPUT_SAMPLE_RATE".to_string(),
                value: "0".to_string(),
            });
        }

        let log_level_str = or_default("RUST_LOG", "INFO");
        let log_level = log_level_str
            .parse::<Level>()
            .map_err(|_| ConfigError::InvalidLogLevel(log_level_str))?;

        Ok(Self {
            bind_address: or_default("BIND_ADDRESS", DEFAULT_BIND_ADDRESS),
            openai_api_key,
            openai_base_url: or_default("OPENAI_BASE_URL", DEFAULT_OPENAI_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            stt_model: or_default("STT_MODEL", DEFAULT_STT_MODEL),
            llm_model: or_default("LLM_MODEL", DEFAULT_LLM_MODEL),
            llm_temperature: parse(&var, "LLM_TEMPERATURE", DEFAULT_LLM_TEMPERATURE)?,
            tts_model: or_default("TTS_MODEL", DEFAULT_TTS_MODEL),
            input_sample_rate,
            turn,
            prompts_dir: var("PROMPTS_DIR").map(PathBuf::from),
            log_level,
        })
    }

    /// Engine settings for a new session, with the persona preamble in effect.
    pub fn session_config(&self, persona: &str) -> SessionConfig {
        SessionConfig {
            turn: self.turn.clone(),
            persona: persona.to_string(),
            ..SessionConfig::default()
        }
    }
}

fn parse<T, V>(var: &V, name: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    V: Fn(&str) -> Option<String>,
{
    match var(name) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue {
                name: name.to_string(),
                value,
            }),
    }
}

fn parse_millis<V>(var: &V, name: &str, default: Duration) -> Result<Duration, ConfigError>
where
    V: Fn(&str) -> Option<String>,
{
    parse(var, name, default.as_millis() as u64).map(Duration::from_millis)
}
