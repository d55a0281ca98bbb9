//! # Upstream Generative Model
//!
//! Conversation data model and the client used to talk to the external
//! generative model. The model is stateless between calls: the full
//! accumulated history is resent on every turn, and one reply turn comes back.
//!
//! ## Key Components:
//! - **Turn / Part / Role**: the role-tagged conversation history entries
//! - **GenerativeClient**: trait boundary so the turn processor can be tested
//!   against a mock instead of the real API
//! - **GeminiClient**: `generateContent` REST implementation over reqwest

pub mod gemini;

pub use gemini::GeminiClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Role tag of a conversation turn.
///
/// History roles strictly alternate `User`, `Model`, `User`, ... starting
/// with `User`; the turn processor maintains that invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
        }
    }
}

/// One part of a turn: plain text or an inline binary payload with its MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    Text(String),
    InlineData { mime_type: String, data: Vec<u8> },
}

/// One role-tagged entry in the conversation history.
#[derive(Debug, Clone)]
pub struct Turn {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Turn {
    pub fn user(parts: Vec<Part>) -> Self {
        Self {
            role: Role::User,
            parts,
        }
    }

    pub fn model(texts: Vec<String>) -> Self {
        Self {
            role: Role::Model,
            parts: texts.into_iter().map(Part::Text).collect(),
        }
    }
}

/// Generation parameters resolved per session (config defaults merged with
/// client overrides at session start).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub model: String,
    pub max_output_tokens: u32,
    pub temperature: f32,
}

/// The model's reply turn. Text-only in this transport: the REST
/// `generateContent` surface does not return inline binary output.
#[derive(Debug, Clone, Default)]
pub struct ModelReply {
    pub parts: Vec<String>,
}

/// Errors from the upstream model call. No automatic retry is performed;
/// failures surface to the caller as turn-level errors.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("API error: {0}")]
    Api(String),
    #[error("Rate limited")]
    RateLimited,
    #[error("Network error: {0}")]
    Network(String),
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Client boundary for the external generative model.
///
/// Takes the full ordered history and per-session generation parameters and
/// returns a single reply turn. Assumed synchronous-per-call; no streaming
/// partials in this configuration.
#[async_trait]
pub trait GenerativeClient: Send + Sync {
    async fn generate(
        &self,
        history: &[Turn],
        params: &GenerationParams,
    ) -> Result<ModelReply, ModelError>;
}
