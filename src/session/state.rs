//! # Session State
//!
//! Per-session mutable state: the append-only conversation history and the
//! pending text/audio buffers accumulated between "process turn" signals.
//!
//! ## Locking:
//! Buffers and history live behind a `std::sync::Mutex` that is never held
//! across an await point; buffering operations are synchronous. A separate
//! `tokio::sync::Mutex` turn gate is held across the model call so that
//! concurrent `process_turn` requests against the same session serialize
//! instead of interleaving their buffer drains.

use crate::error::{AppError, AppResult};
use crate::model::{GenerationParams, Part, Turn};
use chrono::{DateTime, Utc};
use std::sync::Mutex;

/// One buffered audio fragment. The MIME type is tracked per chunk, not per
/// session, so mixed formats within a turn are representable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    pub payload: Vec<u8>,
    pub mime_type: String,
}

/// Mutable portion of a session, guarded by one lock.
#[derive(Debug, Default)]
struct SessionInner {
    history: Vec<Turn>,
    pending_texts: Vec<String>,
    pending_audio: Vec<AudioChunk>,
    last_interaction: Option<DateTime<Utc>>,
}

/// Buffer caps applied on every buffering call.
#[derive(Debug, Clone, Copy)]
pub struct BufferLimits {
    pub max_pending_texts: usize,
    pub max_pending_audio_chunks: usize,
    pub max_audio_chunk_bytes: usize,
}

/// State of one live session.
///
/// Logically owned by its session id: only operations addressed to that id
/// mutate it. The registry hands out `Arc<SessionState>` clones.
pub struct SessionState {
    /// Opaque unique identifier, immutable after creation
    pub session_id: String,

    /// When the session was created
    pub created_at: DateTime<Utc>,

    /// Generation parameters resolved at session start
    pub params: GenerationParams,

    inner: Mutex<SessionInner>,

    /// Serializes process-turn operations for this session
    turn_gate: tokio::sync::Mutex<()>,
}

impl SessionState {
    pub fn new(session_id: String, params: GenerationParams) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            created_at: now,
            params,
            inner: Mutex::new(SessionInner {
                last_interaction: Some(now),
                ..SessionInner::default()
            }),
            turn_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// The per-session turn gate. Held by the processor for the whole
    /// drain/call/append sequence.
    pub fn turn_gate(&self) -> &tokio::sync::Mutex<()> {
        &self.turn_gate
    }

    /// Record an inbound client action for idle-eviction purposes.
    pub fn touch(&self) {
        self.inner.lock().unwrap().last_interaction = Some(Utc::now());
    }

    pub fn last_interaction(&self) -> DateTime<Utc> {
        self.inner
            .lock()
            .unwrap()
            .last_interaction
            .unwrap_or(self.created_at)
    }

    /// Append a text fragment to the pending buffer. Insertion order is
    /// preserved; the fragment is rejected once the cap is reached.
    pub fn buffer_text(&self, text: String, limits: &BufferLimits) -> AppResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.pending_texts.len() >= limits.max_pending_texts {
            return Err(AppError::BufferLimitExceeded(format!(
                "session {} already holds {} pending text fragments",
                self.session_id, limits.max_pending_texts
            )));
        }
        inner.pending_texts.push(text);
        inner.last_interaction = Some(Utc::now());
        Ok(())
    }

    /// Append an audio chunk to the pending buffer.
    pub fn buffer_audio(&self, chunk: AudioChunk, limits: &BufferLimits) -> AppResult<()> {
        if chunk.payload.len() > limits.max_audio_chunk_bytes {
            return Err(AppError::BufferLimitExceeded(format!(
                "audio chunk of {} bytes exceeds the {}-byte limit",
                chunk.payload.len(),
                limits.max_audio_chunk_bytes
            )));
        }
        let mut inner = self.inner.lock().unwrap();
        if inner.pending_audio.len() >= limits.max_pending_audio_chunks {
            return Err(AppError::BufferLimitExceeded(format!(
                "session {} already holds {} pending audio chunks",
                self.session_id, limits.max_pending_audio_chunks
            )));
        }
        inner.pending_audio.push(chunk);
        inner.last_interaction = Some(Utc::now());
        Ok(())
    }

    /// Drain the pending buffers into a single coalesced `user` turn.
    ///
    /// All buffered text fragments become one newline-joined text part and
    /// each audio chunk becomes one inline-data part, combined into one user
    /// turn appended to the history. Both buffers are cleared. Returns a
    /// snapshot of the full history for the model call, or `None` when both
    /// buffers were empty (nothing to process).
    pub fn begin_turn(&self) -> Option<Vec<Turn>> {
        let mut inner = self.inner.lock().unwrap();
        if inner.pending_texts.is_empty() && inner.pending_audio.is_empty() {
            return None;
        }

        let mut parts = Vec::new();
        if !inner.pending_texts.is_empty() {
            let combined = inner.pending_texts.join("\n");
            parts.push(Part::Text(combined));
            inner.pending_texts.clear();
        }
        for chunk in inner.pending_audio.drain(..) {
            parts.push(Part::InlineData {
                mime_type: chunk.mime_type,
                data: chunk.payload,
            });
        }

        inner.history.push(Turn::user(parts));
        Some(inner.history.clone())
    }

    /// Append the model's reply turn after a successful model call.
    pub fn complete_turn(&self, reply_parts: Vec<String>) {
        let mut inner = self.inner.lock().unwrap();
        inner.history.push(Turn::model(reply_parts));
    }

    /// Snapshot of the conversation history.
    pub fn history(&self) -> Vec<Turn> {
        self.inner.lock().unwrap().history.clone()
    }

    /// Current pending-buffer sizes as (texts, audio chunks).
    pub fn pending_counts(&self) -> (usize, usize) {
        let inner = self.inner.lock().unwrap();
        (inner.pending_texts.len(), inner.pending_audio.len())
    }
}
