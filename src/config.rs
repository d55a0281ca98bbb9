//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER_HOST, APP_MODEL_NAME, etc.)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)
//!
//! The Gemini API key is read from `GEMINI_API_KEY` and never written back
//! out through the REST config endpoints.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration that contains all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub session: SessionConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Upstream generative model configuration.
///
/// ## Fields:
/// - `api_base`: Base URL of the Gemini `generateContent` REST API
/// - `api_key`: API key sent as the `x-goog-api-key` header
/// - `name`: Model identifier (e.g. "gemini-2.0-flash")
/// - `max_output_tokens` / `temperature`: Default generation parameters,
///   overridable per session at start time
/// - `request_timeout_secs`: Hard deadline for a single model call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub api_base: String,
    pub api_key: String,
    pub name: String,
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub request_timeout_secs: u64,
}

/// Session registry limits and idle-eviction settings.
///
/// When a buffer cap is hit, further buffering is rejected with an explicit
/// error rather than silently truncated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Maximum number of concurrently live sessions
    pub max_concurrent_sessions: usize,

    /// Maximum buffered text fragments per session between turns
    pub max_pending_texts: usize,

    /// Maximum buffered audio chunks per session between turns
    pub max_pending_audio_chunks: usize,

    /// Maximum size of a single decoded audio chunk in bytes
    pub max_audio_chunk_bytes: usize,

    /// Sessions idle longer than this are evicted
    pub idle_timeout_secs: u64,

    /// How often the idle-eviction sweep runs
    pub idle_sweep_interval_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            model: ModelConfig {
                api_base: "https://generativelanguage.googleapis.com/v1beta/models".to_string(),
                api_key: String::new(),
                name: "gemini-2.0-flash".to_string(),
                max_output_tokens: 2048,
                temperature: 0.7,
                request_timeout_secs: 120,
            },
            session: SessionConfig {
                max_concurrent_sessions: 50,
                max_pending_texts: 256,
                max_pending_audio_chunks: 1024,
                max_audio_chunk_bytes: 1024 * 1024, // 1 MiB decoded
                idle_timeout_secs: 600,
                idle_sweep_interval_secs: 60,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, config.toml, and the environment.
    ///
    /// ## Special-cased environment variables:
    /// - `HOST` / `PORT`: used by deployment platforms, override server binding
    /// - `GEMINI_API_KEY`: overrides `model.api_key`
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Ok(key) = env::var("GEMINI_API_KEY") {
            settings = settings.set_override("model.api_key", key)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// Catching bad values here keeps the session registry and model client
    /// from failing at request time with confusing errors.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.model.name.is_empty() {
            return Err(anyhow::anyhow!("Model name cannot be empty"));
        }

        if self.model.max_output_tokens == 0 {
            return Err(anyhow::anyhow!("max_output_tokens must be greater than 0"));
        }

        if !(0.0..=2.0).contains(&self.model.temperature) {
            return Err(anyhow::anyhow!("Temperature must be between 0.0 and 2.0"));
        }

        if self.session.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        if self.session.max_pending_texts == 0 || self.session.max_pending_audio_chunks == 0 {
            return Err(anyhow::anyhow!("Pending buffer caps must be greater than 0"));
        }

        if self.session.max_audio_chunk_bytes == 0 {
            return Err(anyhow::anyhow!("max_audio_chunk_bytes must be greater than 0"));
        }

        if self.session.idle_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Idle timeout must be greater than 0"));
        }

        Ok(())
    }

    /// Update configuration from a JSON string (used for runtime config updates).
    ///
    /// Only model and session settings can be changed at runtime; the server
    /// binding is fixed once the listener is up. Updates apply to sessions
    /// created after the change.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(model) = partial.get("model") {
            if let Some(name) = model.get("name").and_then(|v| v.as_str()) {
                self.model.name = name.to_string();
            }
            if let Some(tokens) = model.get("max_output_tokens").and_then(|v| v.as_u64()) {
                self.model.max_output_tokens = tokens as u32;
            }
            if let Some(temp) = model.get("temperature").and_then(|v| v.as_f64()) {
                self.model.temperature = temp as f32;
            }
        }

        if let Some(session) = partial.get("session") {
            if let Some(max) = session
                .get("max_concurrent_sessions")
                .and_then(|v| v.as_u64())
            {
                self.session.max_concurrent_sessions = max as usize;
            }
            if let Some(max) = session.get("max_pending_texts").and_then(|v| v.as_u64()) {
                self.session.max_pending_texts = max as usize;
            }
            if let Some(max) = session
                .get("max_pending_audio_chunks")
                .and_then(|v| v.as_u64())
            {
                self.session.max_pending_audio_chunks = max as usize;
            }
            if let Some(secs) = session.get("idle_timeout_secs").and_then(|v| v.as_u64()) {
                self.session.idle_timeout_secs = secs;
            }
        }

        self.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.model.name, "gemini-2.0-flash");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.model.temperature = 3.5;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.session.max_concurrent_sessions = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_update() {
        let mut config = AppConfig::default();
        let json = r#"{"model": {"temperature": 0.2}, "session": {"max_pending_texts": 8}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert!((config.model.temperature - 0.2).abs() < f32::EPSILON);
        assert_eq!(config.session.max_pending_texts, 8);
        // Untouched fields keep their values
        assert_eq!(config.model.name, "gemini-2.0-flash");
    }

    #[test]
    fn test_config_update_rejects_invalid() {
        let mut config = AppConfig::default();
        let json = r#"{"session": {"max_concurrent_sessions": 0}}"#;
        assert!(config.update_from_json(json).is_err());
    }
}
