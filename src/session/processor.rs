//! # Turn Processor
//!
//! Drains a session's pending buffers into one coalesced `user` turn, submits
//! the full conversation history to the external model in a single stateless
//! call, and appends the reply as a `model` turn.
//!
//! ## Policies (fixed, and asserted by tests):
//! - A process-turn request with empty buffers short-circuits: it returns an
//!   empty result and never calls the model. History role alternation is
//!   preserved by construction.
//! - Concurrent process-turn requests for one session serialize on the
//!   session's turn gate; the second caller waits for the first to finish.
//! - On a model failure the already-appended user turn stays in the history
//!   and the buffers stay cleared: at-most-once user turn, best-effort reply.
//!   The session remains usable for subsequent turns.
//! - A session destroyed while its model call is in flight has the reply
//!   discarded; the caller sees `SessionNotFound`.

use crate::error::{AppError, AppResult};
use crate::model::GenerativeClient;
use crate::session::registry::SessionRegistry;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of one processed turn, as exposed to the transport layer.
#[derive(Debug, Clone)]
pub struct TurnResult {
    /// Text parts of the model's reply; empty for a no-op turn
    pub parts: Vec<String>,

    /// Whether the model finished its turn (always true in this
    /// non-streaming configuration)
    pub turn_complete: bool,
}

impl TurnResult {
    fn empty() -> Self {
        Self {
            parts: Vec::new(),
            turn_complete: true,
        }
    }
}

pub struct TurnProcessor {
    registry: Arc<SessionRegistry>,
    client: Arc<dyn GenerativeClient>,
}

impl TurnProcessor {
    pub fn new(registry: Arc<SessionRegistry>, client: Arc<dyn GenerativeClient>) -> Self {
        Self { registry, client }
    }

    /// Process one turn for the given session.
    ///
    /// Suspends on the model call only; buffer drains and history appends are
    /// synchronous under the session's state lock.
    pub async fn process_turn(&self, session_id: &str) -> AppResult<TurnResult> {
        let session = self.registry.get_session(session_id)?;

        // Serialize turns for this session. Held across the model call.
        let _gate = session.turn_gate().lock().await;
        session.touch();

        let history = match session.begin_turn() {
            Some(history) => history,
            None => {
                debug!(session_id, "Process turn with empty buffers, skipping model call");
                return Ok(TurnResult::empty());
            }
        };

        debug!(session_id, turns = history.len(), "Submitting history to model");

        let reply = match self.client.generate(&history, &session.params).await {
            Ok(reply) => reply,
            Err(err) => {
                // The user turn is not rolled back; the session stays usable.
                warn!(session_id, error = %err, "Model call failed");
                return Err(AppError::from(err));
            }
        };

        // The session may have been destroyed while the call was in flight;
        // the reply is discarded rather than written into dead state.
        if self.registry.get_session(session_id).is_err() {
            info!(session_id, "Session destroyed mid-turn, discarding model reply");
            return Err(AppError::SessionNotFound(session_id.to_string()));
        }

        session.complete_turn(reply.parts.clone());
        info!(session_id, reply_parts = reply.parts.len(), "Turn completed");

        Ok(TurnResult {
            parts: reply.parts,
            turn_complete: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::model::{
        GenerationParams, GenerativeClient, ModelError, ModelReply, Role, Turn,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Scripted stand-in for the Gemini client: counts calls, optionally
    /// fails, optionally sleeps to widen race windows.
    struct MockClient {
        calls: AtomicUsize,
        fail: bool,
        delay_ms: u64,
    }

    impl MockClient {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: false,
                delay_ms: 0,
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new()
            }
        }

        fn slow(delay_ms: u64) -> Self {
            Self {
                delay_ms,
                ..Self::new()
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl GenerativeClient for MockClient {
        async fn generate(
            &self,
            history: &[Turn],
            _params: &GenerationParams,
        ) -> Result<ModelReply, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            if self.fail {
                return Err(ModelError::Api("HTTP 500: boom".to_string()));
            }
            Ok(ModelReply {
                parts: vec![format!("reply after {} turns", history.len())],
            })
        }
    }

    fn setup(client: Arc<MockClient>) -> (Arc<SessionRegistry>, TurnProcessor) {
        let registry = Arc::new(SessionRegistry::new(&SessionConfig {
            max_concurrent_sessions: 8,
            max_pending_texts: 32,
            max_pending_audio_chunks: 32,
            max_audio_chunk_bytes: 1024,
            idle_timeout_secs: 600,
            idle_sweep_interval_secs: 60,
        }));
        let processor = TurnProcessor::new(registry.clone(), client);
        (registry, processor)
    }

    fn params() -> GenerationParams {
        GenerationParams {
            model: "gemini-2.0-flash".to_string(),
            max_output_tokens: 128,
            temperature: 0.7,
        }
    }

    #[tokio::test]
    async fn test_turn_drains_buffers_and_appends_reply() {
        let client = Arc::new(MockClient::new());
        let (registry, processor) = setup(client.clone());
        let id = registry.create_session(params(), None).unwrap();
        registry.buffer_text(&id, "hello".into()).unwrap();
        registry.buffer_text(&id, "world".into()).unwrap();

        let result = processor.process_turn(&id).await.unwrap();
        assert!(result.turn_complete);
        assert_eq!(result.parts.len(), 1);
        assert_eq!(client.call_count(), 1);

        let session = registry.get_session(&id).unwrap();
        assert_eq!(session.pending_counts(), (0, 0));

        let history = session.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1].role, Role::Model);
    }

    #[tokio::test]
    async fn test_empty_buffers_short_circuit_without_model_call() {
        let client = Arc::new(MockClient::new());
        let (registry, processor) = setup(client.clone());
        let id = registry.create_session(params(), None).unwrap();

        let result = processor.process_turn(&id).await.unwrap();
        assert!(result.parts.is_empty());
        assert!(result.turn_complete);
        assert_eq!(client.call_count(), 0);
        assert!(registry.get_session(&id).unwrap().history().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_session_fails() {
        let client = Arc::new(MockClient::new());
        let (_registry, processor) = setup(client);
        let err = processor.process_turn("missing").await;
        assert!(matches!(err, Err(AppError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn test_model_failure_keeps_user_turn_and_clears_buffers() {
        let client = Arc::new(MockClient::failing());
        let (registry, processor) = setup(client);
        let id = registry.create_session(params(), None).unwrap();
        registry.buffer_text(&id, "hello".into()).unwrap();

        let err = processor.process_turn(&id).await;
        assert!(matches!(err, Err(AppError::UpstreamModel(_))));

        let session = registry.get_session(&id).unwrap();
        // At-most-once user turn: kept despite the failed reply
        let history = session.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(session.pending_counts(), (0, 0));
    }

    #[tokio::test]
    async fn test_session_stays_usable_after_model_failure() {
        let client = Arc::new(MockClient::failing());
        let (registry, processor) = setup(client);
        let id = registry.create_session(params(), None).unwrap();
        registry.buffer_text(&id, "hello".into()).unwrap();
        assert!(processor.process_turn(&id).await.is_err());

        // Subsequent buffering and turn processing still work
        assert!(registry.buffer_text(&id, "again".into()).is_ok());
        let ok_client = Arc::new(MockClient::new());
        let processor = TurnProcessor::new(registry.clone(), ok_client);
        assert!(processor.process_turn(&id).await.is_ok());
    }

    #[tokio::test]
    async fn test_reply_discarded_when_session_destroyed_mid_turn() {
        let client = Arc::new(MockClient::slow(100));
        let (registry, processor) = setup(client);
        let processor = Arc::new(processor);
        let id = registry.create_session(params(), None).unwrap();
        registry.buffer_text(&id, "hello".into()).unwrap();

        let task = {
            let processor = processor.clone();
            let id = id.clone();
            tokio::spawn(async move { processor.process_turn(&id).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        registry.destroy_session(&id);

        let result = task.await.unwrap();
        assert!(matches!(result, Err(AppError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn test_concurrent_turns_serialize() {
        let client = Arc::new(MockClient::slow(50));
        let (registry, processor) = setup(client.clone());
        let processor = Arc::new(processor);
        let id = registry.create_session(params(), None).unwrap();

        registry.buffer_text(&id, "first".into()).unwrap();
        registry.buffer_text(&id, "second".into()).unwrap();

        let t1 = {
            let (p, id) = (processor.clone(), id.clone());
            tokio::spawn(async move { p.process_turn(&id).await })
        };
        // Give the first turn a head start so it drains both fragments,
        // then race a second turn against it.
        tokio::time::sleep(Duration::from_millis(10)).await;
        registry.buffer_text(&id, "third".into()).unwrap();
        let t2 = {
            let (p, id) = (processor.clone(), id.clone());
            tokio::spawn(async move { p.process_turn(&id).await })
        };

        let (r1, r2) = tokio::join!(t1, t2);
        assert!(r1.unwrap().is_ok());
        assert!(r2.unwrap().is_ok());
        assert_eq!(client.call_count(), 2);

        // Serialized turns: strict user/model alternation, no interleaved drain
        let history = registry.get_session(&id).unwrap().history();
        assert_eq!(history.len(), 4);
        for (i, turn) in history.iter().enumerate() {
            let expected = if i % 2 == 0 { Role::User } else { Role::Model };
            assert_eq!(turn.role, expected, "turn {} out of order", i);
        }
    }
}
