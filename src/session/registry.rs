//! # Session Registry
//!
//! Concurrency-safe mapping from session id to session state. Constructed
//! once at startup and injected into the transport layer as shared data, so
//! every connection sees the same registry.
//!
//! ## Thread Safety:
//! Uses RwLock to allow multiple readers (looking sessions up) or one writer
//! (creating/removing sessions) at a time. The lock only guards the map
//! itself; per-session mutation goes through the `Arc<SessionState>` handles.
//!
//! ## Resource Management:
//! - Enforces a maximum concurrent session limit
//! - Evicts sessions idle longer than the configured timeout
//! - Destroying an unknown or already-destroyed session is a no-op

use crate::config::SessionConfig;
use crate::error::{AppError, AppResult};
use crate::model::GenerationParams;
use crate::session::state::{AudioChunk, BufferLimits, SessionState};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

pub struct SessionRegistry {
    /// Active sessions mapped by session id
    sessions: RwLock<HashMap<String, Arc<SessionState>>>,

    /// Maximum number of concurrent sessions allowed
    max_concurrent_sessions: usize,

    /// Caps applied to every buffering call
    limits: BufferLimits,
}

impl SessionRegistry {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_concurrent_sessions: config.max_concurrent_sessions,
            limits: BufferLimits {
                max_pending_texts: config.max_pending_texts,
                max_pending_audio_chunks: config.max_pending_audio_chunks,
                max_audio_chunk_bytes: config.max_audio_chunk_bytes,
            },
        }
    }

    /// Create a new session with empty history and buffers.
    ///
    /// A fresh UUID is generated for every session, so no two live sessions
    /// share an identifier. An optional initial text fragment is buffered
    /// immediately, as if the client had sent it right after starting.
    pub fn create_session(
        &self,
        params: GenerationParams,
        initial_text: Option<String>,
    ) -> AppResult<String> {
        let mut sessions = self.sessions.write().unwrap();

        if sessions.len() >= self.max_concurrent_sessions {
            return Err(AppError::SessionLimitReached(self.max_concurrent_sessions));
        }

        let session_id = Uuid::new_v4().to_string();
        let session = SessionState::new(session_id.clone(), params);

        if let Some(text) = initial_text {
            session.buffer_text(text, &self.limits)?;
        }

        sessions.insert(session_id.clone(), Arc::new(session));
        Ok(session_id)
    }

    /// Look a session up by id.
    pub fn get_session(&self, session_id: &str) -> AppResult<Arc<SessionState>> {
        let sessions = self.sessions.read().unwrap();
        sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| AppError::SessionNotFound(session_id.to_string()))
    }

    /// Remove a session. Idempotent: destroying an unknown or already
    /// destroyed session returns false instead of an error.
    pub fn destroy_session(&self, session_id: &str) -> bool {
        let mut sessions = self.sessions.write().unwrap();
        sessions.remove(session_id).is_some()
    }

    /// Buffer a text fragment for the given session.
    pub fn buffer_text(&self, session_id: &str, text: String) -> AppResult<()> {
        let session = self.get_session(session_id)?;
        session.buffer_text(text, &self.limits)
    }

    /// Buffer an audio chunk (decoded payload + MIME type) for the given session.
    pub fn buffer_audio(&self, session_id: &str, chunk: AudioChunk) -> AppResult<()> {
        let session = self.get_session(session_id)?;
        session.buffer_audio(chunk, &self.limits)
    }

    /// Number of live sessions.
    pub fn active_session_count(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    /// Ids of all live sessions.
    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.read().unwrap().keys().cloned().collect()
    }

    pub fn max_concurrent_sessions(&self) -> usize {
        self.max_concurrent_sessions
    }

    /// Remove sessions whose last interaction is older than `max_idle`.
    /// Returns the number of evicted sessions.
    pub fn evict_idle_sessions(&self, max_idle: chrono::Duration) -> usize {
        let deadline = chrono::Utc::now() - max_idle;
        let mut sessions = self.sessions.write().unwrap();

        let stale: Vec<String> = sessions
            .iter()
            .filter(|(_, session)| session.last_interaction() < deadline)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &stale {
            sessions.remove(id);
            tracing::info!(session_id = %id, "Evicted idle session");
        }

        stale.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(max_sessions: usize) -> SessionRegistry {
        SessionRegistry::new(&SessionConfig {
            max_concurrent_sessions: max_sessions,
            max_pending_texts: 8,
            max_pending_audio_chunks: 8,
            max_audio_chunk_bytes: 64,
            idle_timeout_secs: 600,
            idle_sweep_interval_secs: 60,
        })
    }

    fn params() -> GenerationParams {
        GenerationParams {
            model: "gemini-2.0-flash".to_string(),
            max_output_tokens: 128,
            temperature: 0.7,
        }
    }

    #[test]
    fn test_create_and_get_session() {
        let registry = registry(4);
        let id = registry.create_session(params(), None).unwrap();
        assert!(registry.get_session(&id).is_ok());
        assert_eq!(registry.active_session_count(), 1);
    }

    #[test]
    fn test_session_ids_are_unique() {
        let registry = registry(16);
        let a = registry.create_session(params(), None).unwrap();
        let b = registry.create_session(params(), None).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_initial_text_is_buffered() {
        let registry = registry(4);
        let id = registry
            .create_session(params(), Some("hello".into()))
            .unwrap();
        let session = registry.get_session(&id).unwrap();
        assert_eq!(session.pending_counts(), (1, 0));
    }

    #[test]
    fn test_session_limit_enforced() {
        let registry = registry(2);
        registry.create_session(params(), None).unwrap();
        registry.create_session(params(), None).unwrap();
        let err = registry.create_session(params(), None);
        assert!(matches!(err, Err(AppError::SessionLimitReached(2))));
    }

    #[test]
    fn test_destroy_session_is_idempotent() {
        let registry = registry(4);
        let id = registry.create_session(params(), None).unwrap();
        assert!(registry.destroy_session(&id));
        // Second destroy is a no-op, not an error
        assert!(!registry.destroy_session(&id));
        assert!(!registry.destroy_session("never-existed"));
    }

    #[test]
    fn test_buffering_against_missing_session_fails() {
        let registry = registry(4);
        let err = registry.buffer_text("nope", "hello".into());
        assert!(matches!(err, Err(AppError::SessionNotFound(_))));

        let id = registry.create_session(params(), None).unwrap();
        registry.destroy_session(&id);
        let err = registry.buffer_text(&id, "hello".into());
        assert!(matches!(err, Err(AppError::SessionNotFound(_))));
    }

    #[test]
    fn test_evict_idle_sessions() {
        let registry = registry(4);
        let id = registry.create_session(params(), None).unwrap();

        // A session touched just now is not idle
        assert_eq!(registry.evict_idle_sessions(chrono::Duration::seconds(60)), 0);
        assert!(registry.get_session(&id).is_ok());

        // With a zero-width idle window everything is stale
        assert_eq!(
            registry.evict_idle_sessions(chrono::Duration::seconds(-1)),
            1
        );
        assert!(registry.get_session(&id).is_err());
    }
}
