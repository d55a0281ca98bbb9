//! Gemini API client: request building, HTTP transport, and response parsing.
//!
//! Talks to the `generateContent` REST endpoint. Text parts are sent as
//! `{"text": ...}` and buffered audio chunks as `{"inlineData": {"mimeType",
//! "data"}}` with base64-encoded payloads.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use tracing::debug;

use crate::config::ModelConfig;
use crate::model::{GenerationParams, GenerativeClient, ModelError, ModelReply, Part, Turn};

/// Gemini `generateContent` client.
pub struct GeminiClient {
    api_base: String,
    api_key: String,
    http: reqwest::Client,
}

impl GeminiClient {
    pub fn new(config: &ModelConfig) -> Result<Self, ModelError> {
        let http = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ModelError::Network(e.to_string()))?;

        Ok(Self {
            api_base: config.api_base.clone(),
            api_key: config.api_key.clone(),
            http,
        })
    }

    fn api_url(&self, model: &str) -> String {
        format!("{}/{}:generateContent", self.api_base, model)
    }

    /// Build the JSON request body for the Gemini API.
    fn build_request_body(history: &[Turn], params: &GenerationParams) -> serde_json::Value {
        let mut contents = Vec::new();

        for turn in history {
            let parts: Vec<serde_json::Value> = turn
                .parts
                .iter()
                .map(|part| match part {
                    Part::Text(text) => serde_json::json!({ "text": text }),
                    Part::InlineData { mime_type, data } => serde_json::json!({
                        "inlineData": {
                            "mimeType": mime_type,
                            "data": BASE64.encode(data),
                        }
                    }),
                })
                .collect();

            contents.push(serde_json::json!({
                "role": turn.role.as_str(),
                "parts": parts,
            }));
        }

        serde_json::json!({
            "contents": contents,
            "generationConfig": {
                "maxOutputTokens": params.max_output_tokens,
                "temperature": params.temperature,
            }
        })
    }

    /// Parse a Gemini response into the reply's text parts.
    fn parse_response(json: serde_json::Value) -> Result<ModelReply, ModelError> {
        let candidates = json["candidates"]
            .as_array()
            .ok_or_else(|| ModelError::Parse("no candidates in response".to_string()))?;

        let first = candidates
            .first()
            .ok_or_else(|| ModelError::Parse("empty candidates".to_string()))?;

        let raw_parts = first["content"]["parts"]
            .as_array()
            .cloned()
            .unwrap_or_default();

        let mut parts = Vec::new();
        for part in &raw_parts {
            if let Some(text) = part["text"].as_str() {
                if !text.is_empty() {
                    parts.push(text.to_string());
                }
            }
        }

        if parts.is_empty() {
            return Err(ModelError::Parse("no text parts in reply".to_string()));
        }

        Ok(ModelReply { parts })
    }
}

#[async_trait]
impl GenerativeClient for GeminiClient {
    async fn generate(
        &self,
        history: &[Turn],
        params: &GenerationParams,
    ) -> Result<ModelReply, ModelError> {
        let body = Self::build_request_body(history, params);
        let url = self.api_url(&params.model);

        debug!(model = %params.model, turns = history.len(), "Gemini API request");

        let response = self
            .http
            .post(&url)
            .header("content-type", "application/json")
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelError::Network(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ModelError::RateLimited);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ModelError::Api(format!("HTTP {status}: {text}")));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ModelError::Parse(e.to_string()))?;

        Self::parse_response(json)
    }
}
