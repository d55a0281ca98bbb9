//! Session inspection endpoint, useful for development and monitoring
//! without opening a WebSocket connection.

use crate::session::SessionRegistry;
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn list_sessions(registry: web::Data<SessionRegistry>) -> HttpResponse {
    let mut sessions = Vec::new();

    for id in registry.session_ids() {
        if let Ok(session) = registry.get_session(&id) {
            let (pending_texts, pending_audio) = session.pending_counts();
            sessions.push(json!({
                "session_id": session.session_id,
                "created_at": session.created_at.to_rfc3339(),
                "last_interaction": session.last_interaction().to_rfc3339(),
                "history_turns": session.history().len(),
                "pending_texts": pending_texts,
                "pending_audio_chunks": pending_audio,
                "model": session.params.model,
            }));
        }
    }

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "active_sessions": registry.active_session_count(),
        "max_sessions": registry.max_concurrent_sessions(),
        "sessions": sessions,
    }))
}
