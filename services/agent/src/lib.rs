pub mod chunker;
pub mod config;
pub mod openai;
pub mod prompt_loader;
pub mod server;
pub mod vad;

pub use config::{Config, ConfigError};
pub use server::{AppState, CapabilityProvider, router, serve};
