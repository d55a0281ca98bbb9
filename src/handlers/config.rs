//! Runtime configuration endpoints. The API key is never echoed back;
//! server binding changes require a restart and are rejected here.

use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": {
            "server": {
                "host": config.server.host,
                "port": config.server.port
            },
            "model": {
                "name": config.model.name,
                "api_base": config.model.api_base,
                "max_output_tokens": config.model.max_output_tokens,
                "temperature": config.model.temperature,
                "request_timeout_secs": config.model.request_timeout_secs
            },
            "session": {
                "max_concurrent_sessions": config.session.max_concurrent_sessions,
                "max_pending_texts": config.session.max_pending_texts,
                "max_pending_audio_chunks": config.session.max_pending_audio_chunks,
                "max_audio_chunk_bytes": config.session.max_audio_chunk_bytes,
                "idle_timeout_secs": config.session.idle_timeout_secs
            }
        }
    })))
}

pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Json<serde_json::Value>,
) -> Result<HttpResponse, AppError> {
    let payload = body.into_inner();

    if payload.get("server").is_some() {
        return Err(AppError::ValidationError(
            "Server binding cannot be changed at runtime".to_string(),
        ));
    }

    let json_str = serde_json::to_string(&payload)?;

    let mut current_config = state.get_config();
    current_config
        .update_from_json(&json_str)
        .map_err(|e| AppError::ValidationError(e.to_string()))?;

    state
        .update_config(current_config.clone())
        .map_err(AppError::ValidationError)?;

    tracing::info!("Runtime configuration updated");

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Configuration updated; applies to sessions created from now on",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "updated_config": {
            "model": {
                "name": current_config.model.name,
                "max_output_tokens": current_config.model.max_output_tokens,
                "temperature": current_config.model.temperature
            },
            "session": {
                "max_concurrent_sessions": current_config.session.max_concurrent_sessions,
                "max_pending_texts": current_config.session.max_pending_texts,
                "max_pending_audio_chunks": current_config.session.max_pending_audio_chunks,
                "idle_timeout_secs": current_config.session.idle_timeout_secs
            }
        }
    })))
}
