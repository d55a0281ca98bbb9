//! # WebSocket Live-Session Handler
//!
//! Speaks the live-session protocol over a persistent bidirectional
//! connection at `/ws/live`. Every message is an internally-tagged JSON
//! object; inbound audio chunks are base64 strings with a MIME type.
//!
//! ## Protocol:
//! 1. **start_session**: allocates a registry entry, returns `session_started`
//! 2. **send_text / send_audio**: buffer fragments, acked per message
//! 3. **process_turn**: drains the buffer through the model, returns
//!    `ai_response` with the reply parts and a turn-complete marker
//! 4. **end_session**: destroys the registry entry
//! 5. Any failure is reported as an `error` event; the connection stays open
//!
//! Sessions started on a connection are destroyed when that connection drops;
//! a model call already in flight is not cancelled, its result is discarded.

use crate::config::AppConfig;
use crate::error::AppError;
use crate::model::GenerationParams;
use crate::session::{AudioChunk, SessionRegistry, TurnProcessor, TurnResult};
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// How often the server pings the client.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Connections silent for longer than this are closed.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-session generation overrides a client may pass at start time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionOverrides {
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
}

/// One entry of an `ai_response` payload. Field names follow the wire
/// contract of the original client (`serverContent`, `turnComplete`).
#[derive(Debug, Serialize, Deserialize)]
pub struct ResponseMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(rename = "serverContent", skip_serializing_if = "Option::is_none")]
    pub server_content: Option<ServerContent>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServerContent {
    #[serde(rename = "turnComplete", skip_serializing_if = "Option::is_none")]
    pub turn_complete: Option<bool>,
}

/// WebSocket message types for client-server communication.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WsMessage {
    /// Open a new session; optional generation overrides and a first fragment
    #[serde(rename = "start_session")]
    StartSession {
        config: Option<SessionOverrides>,
        initial_text: Option<String>,
    },

    /// Buffer a text fragment for a session
    #[serde(rename = "send_text")]
    SendText { session_id: String, text: String },

    /// Buffer a base64-encoded audio chunk for a session
    #[serde(rename = "send_audio")]
    SendAudio {
        session_id: String,
        audio_chunk: String,
        mime_type: String,
    },

    /// Drain the buffers and run one model turn
    #[serde(rename = "process_turn")]
    ProcessTurn { session_id: String },

    /// Destroy a session
    #[serde(rename = "end_session")]
    EndSession { session_id: String },

    /// Session allocated
    #[serde(rename = "session_started")]
    SessionStarted { session_id: String },

    /// Text fragment accepted
    #[serde(rename = "text_buffered")]
    TextBuffered { session_id: String, success: bool },

    /// Audio chunk accepted
    #[serde(rename = "audio_buffered")]
    AudioBuffered { session_id: String, success: bool },

    /// Model reply for one processed turn
    #[serde(rename = "ai_response")]
    AiResponse {
        session_id: String,
        messages: Vec<ResponseMessage>,
    },

    /// Session destroyed
    #[serde(rename = "session_ended")]
    SessionEnded { session_id: String },

    /// Any failure, with a machine-readable code
    #[serde(rename = "error")]
    Error {
        code: String,
        message: String,
        session_id: Option<String>,
    },

    /// Heartbeat ping
    #[serde(rename = "ping")]
    Ping { timestamp: u64 },

    /// Heartbeat pong
    #[serde(rename = "pong")]
    Pong { timestamp: u64 },
}

/// WebSocket actor for one live-session connection.
pub struct LiveSessionSocket {
    /// Shared session registry, injected from main
    registry: Arc<SessionRegistry>,

    /// Turn processor, injected from main
    processor: Arc<TurnProcessor>,

    /// Shared application state for config defaults and metrics
    app_state: AppState,

    /// Sessions started on this connection, destroyed when it drops
    owned_sessions: HashSet<String>,

    /// Last heartbeat time
    last_heartbeat: Instant,
}

/// Message for pushing serialized JSON to the client from spawned tasks.
#[derive(Message)]
#[rtype(result = "()")]
struct PushJson(String);

impl LiveSessionSocket {
    pub fn new(
        registry: Arc<SessionRegistry>,
        processor: Arc<TurnProcessor>,
        app_state: AppState,
    ) -> Self {
        Self {
            registry,
            processor,
            app_state,
            owned_sessions: HashSet::new(),
            last_heartbeat: Instant::now(),
        }
    }

    fn send(&self, ctx: &mut ws::WebsocketContext<Self>, msg: &WsMessage) {
        if let Ok(json) = serde_json::to_string(msg) {
            ctx.text(json);
        }
    }

    fn send_error(
        &self,
        ctx: &mut ws::WebsocketContext<Self>,
        err: &AppError,
        session_id: Option<String>,
    ) {
        warn!(code = err.code(), %err, "WebSocket error");
        self.send(
            ctx,
            &WsMessage::Error {
                code: err.code().to_string(),
                message: err.to_string(),
                session_id,
            },
        );
    }

    fn handle_start_session(
        &mut self,
        overrides: Option<SessionOverrides>,
        initial_text: Option<String>,
        ctx: &mut ws::WebsocketContext<Self>,
    ) {
        let config = self.app_state.get_config();
        let params = resolve_params(&config, overrides.as_ref());

        match self.registry.create_session(params, initial_text) {
            Ok(session_id) => {
                info!(session_id = %session_id, "Session started");
                self.owned_sessions.insert(session_id.clone());
                self.app_state.increment_active_sessions();
                self.send(ctx, &WsMessage::SessionStarted { session_id });
            }
            Err(err) => self.send_error(ctx, &err, None),
        }
    }

    fn handle_send_text(
        &mut self,
        session_id: String,
        text: String,
        ctx: &mut ws::WebsocketContext<Self>,
    ) {
        match self.registry.buffer_text(&session_id, text) {
            Ok(()) => {
                debug!(session_id = %session_id, "Text fragment buffered");
                self.send(
                    ctx,
                    &WsMessage::TextBuffered {
                        session_id,
                        success: true,
                    },
                );
            }
            Err(err) => self.send_error(ctx, &err, Some(session_id)),
        }
    }

    fn handle_send_audio(
        &mut self,
        session_id: String,
        audio_chunk: String,
        mime_type: String,
        ctx: &mut ws::WebsocketContext<Self>,
    ) {
        let payload = match BASE64.decode(audio_chunk.as_bytes()) {
            Ok(payload) => payload,
            Err(err) => {
                let err = AppError::BadRequest(format!("Invalid base64 audio chunk: {}", err));
                self.send_error(ctx, &err, Some(session_id));
                return;
            }
        };

        let chunk = AudioChunk { payload, mime_type };
        match self.registry.buffer_audio(&session_id, chunk) {
            Ok(()) => {
                debug!(session_id = %session_id, "Audio chunk buffered");
                self.send(
                    ctx,
                    &WsMessage::AudioBuffered {
                        session_id,
                        success: true,
                    },
                );
            }
            Err(err) => self.send_error(ctx, &err, Some(session_id)),
        }
    }

    /// Run one turn in a spawned task; the actor stays responsive while the
    /// model call is in flight and the result is pushed back via PushJson.
    fn handle_process_turn(&self, session_id: String, ctx: &mut ws::WebsocketContext<Self>) {
        let processor = self.processor.clone();
        let app_state = self.app_state.clone();
        let addr = ctx.address();

        tokio::spawn(async move {
            let reply = match processor.process_turn(&session_id).await {
                Ok(result) => {
                    app_state.record_turn(true);
                    WsMessage::AiResponse {
                        session_id,
                        messages: response_messages(&result),
                    }
                }
                Err(err) => {
                    app_state.record_turn(false);
                    WsMessage::Error {
                        code: err.code().to_string(),
                        message: err.to_string(),
                        session_id: Some(session_id),
                    }
                }
            };

            if let Ok(json) = serde_json::to_string(&reply) {
                addr.do_send(PushJson(json));
            }
        });
    }

    fn handle_end_session(&mut self, session_id: String, ctx: &mut ws::WebsocketContext<Self>) {
        // Idempotent: ending an unknown session still acks
        if self.registry.destroy_session(&session_id) {
            info!(session_id = %session_id, "Session ended");
            if self.owned_sessions.remove(&session_id) {
                self.app_state.decrement_active_sessions();
            }
        }
        self.send(ctx, &WsMessage::SessionEnded { session_id });
    }
}

impl Actor for LiveSessionSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("WebSocket connection started");

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!("WebSocket heartbeat timeout, closing connection");
                ctx.stop();
                return;
            }

            let ping = WsMessage::Ping {
                timestamp: chrono::Utc::now().timestamp_millis() as u64,
            };
            if let Ok(json) = serde_json::to_string(&ping) {
                ctx.text(json);
            }
        });
    }

    /// Transport disconnect: implicit cleanup of every session this
    /// connection started.
    fn stopped(&mut self, _ctx: &mut Self::Context) {
        for session_id in self.owned_sessions.drain() {
            if self.registry.destroy_session(&session_id) {
                self.app_state.decrement_active_sessions();
                info!(session_id = %session_id, "Session cleaned up on disconnect");
            }
        }
        info!("WebSocket connection stopped");
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for LiveSessionSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                match serde_json::from_str::<WsMessage>(&text) {
                    Ok(WsMessage::StartSession {
                        config,
                        initial_text,
                    }) => self.handle_start_session(config, initial_text, ctx),
                    Ok(WsMessage::SendText { session_id, text }) => {
                        self.handle_send_text(session_id, text, ctx)
                    }
                    Ok(WsMessage::SendAudio {
                        session_id,
                        audio_chunk,
                        mime_type,
                    }) => self.handle_send_audio(session_id, audio_chunk, mime_type, ctx),
                    Ok(WsMessage::ProcessTurn { session_id }) => {
                        self.handle_process_turn(session_id, ctx)
                    }
                    Ok(WsMessage::EndSession { session_id }) => {
                        self.handle_end_session(session_id, ctx)
                    }
                    Ok(WsMessage::Pong { .. }) => {
                        self.last_heartbeat = Instant::now();
                    }
                    Ok(WsMessage::Ping { timestamp }) => {
                        self.send(ctx, &WsMessage::Pong { timestamp });
                    }
                    Ok(_) => {
                        warn!("Received unexpected message type from client");
                    }
                    Err(err) => {
                        let err = AppError::BadRequest(format!("Invalid JSON: {}", err));
                        self.send_error(ctx, &err, None);
                    }
                }
            }
            Ok(ws::Message::Binary(_)) => {
                let err = AppError::BadRequest(
                    "Binary frames are not supported; send audio as base64 via send_audio"
                        .to_string(),
                );
                self.send_error(ctx, &err, None);
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!("WebSocket closed: {:?}", reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!("Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!("WebSocket protocol error: {}", err);
                ctx.stop();
            }
        }
    }
}

impl Handler<PushJson> for LiveSessionSocket {
    type Result = ();

    fn handle(&mut self, msg: PushJson, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

/// Resolve the session's generation parameters from the current config
/// defaults plus any client-supplied overrides.
fn resolve_params(config: &AppConfig, overrides: Option<&SessionOverrides>) -> GenerationParams {
    let mut params = GenerationParams {
        model: config.model.name.clone(),
        max_output_tokens: config.model.max_output_tokens,
        temperature: config.model.temperature,
    };

    if let Some(overrides) = overrides {
        if let Some(temperature) = overrides.temperature {
            params.temperature = temperature;
        }
        if let Some(max_tokens) = overrides.max_output_tokens {
            params.max_output_tokens = max_tokens;
        }
    }

    params
}

/// Map a turn result onto the wire shape: one message per reply text part,
/// then a final message carrying the turn-complete marker.
fn response_messages(result: &TurnResult) -> Vec<ResponseMessage> {
    let mut messages: Vec<ResponseMessage> = result
        .parts
        .iter()
        .map(|text| ResponseMessage {
            text: Some(text.clone()),
            server_content: None,
        })
        .collect();

    messages.push(ResponseMessage {
        text: None,
        server_content: Some(ServerContent {
            turn_complete: Some(result.turn_complete),
        }),
    });

    messages
}

/// WebSocket endpoint handler: upgrades the HTTP request and hands the
/// connection to a LiveSessionSocket actor backed by the shared registry.
pub async fn live_websocket(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
    registry: web::Data<SessionRegistry>,
    processor: web::Data<TurnProcessor>,
) -> ActixResult<HttpResponse> {
    info!(
        "New WebSocket connection request from: {:?}",
        req.connection_info().peer_addr()
    );

    let socket = LiveSessionSocket::new(
        registry.into_inner(),
        processor.into_inner(),
        app_state.get_ref().clone(),
    );

    ws::start(socket, &req, stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_deserialization() {
        let json = r#"{"type": "start_session", "config": {"temperature": 0.2, "max_output_tokens": null}, "initial_text": "hi"}"#;
        match serde_json::from_str::<WsMessage>(json).unwrap() {
            WsMessage::StartSession {
                config,
                initial_text,
            } => {
                let config = config.unwrap();
                assert_eq!(config.temperature, Some(0.2));
                assert_eq!(config.max_output_tokens, None);
                assert_eq!(initial_text.as_deref(), Some("hi"));
            }
            _ => panic!("Wrong message type"),
        }

        let json = r#"{"type": "send_audio", "session_id": "abc", "audio_chunk": "AAEC", "mime_type": "audio/pcm"}"#;
        match serde_json::from_str::<WsMessage>(json).unwrap() {
            WsMessage::SendAudio {
                session_id,
                audio_chunk,
                mime_type,
            } => {
                assert_eq!(session_id, "abc");
                assert_eq!(BASE64.decode(audio_chunk).unwrap(), vec![0, 1, 2]);
                assert_eq!(mime_type, "audio/pcm");
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_ai_response_wire_shape() {
        let result = TurnResult {
            parts: vec!["hello".to_string()],
            turn_complete: true,
        };
        let msg = WsMessage::AiResponse {
            session_id: "abc".to_string(),
            messages: response_messages(&result),
        };

        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"ai_response""#));
        assert!(json.contains(r#""text":"hello""#));
        assert!(json.contains(r#""serverContent":{"turnComplete":true}"#));
        // Text-only entries must not carry an empty serverContent key
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value["messages"][0].get("serverContent").is_none());
    }

    #[test]
    fn test_error_message_serialization() {
        let msg = WsMessage::Error {
            code: "session_not_found".to_string(),
            message: "Session not found: abc".to_string(),
            session_id: Some("abc".to_string()),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("session_not_found"));
        assert!(json.contains("abc"));
    }

    #[test]
    fn test_resolve_params_overrides() {
        let config = AppConfig::default();
        let params = resolve_params(&config, None);
        assert_eq!(params.model, config.model.name);
        assert_eq!(params.temperature, config.model.temperature);

        let overrides = SessionOverrides {
            temperature: Some(0.1),
            max_output_tokens: Some(64),
        };
        let params = resolve_params(&config, Some(&overrides));
        assert_eq!(params.temperature, 0.1);
        assert_eq!(params.max_output_tokens, 64);
        // Model name is not client-overridable
        assert_eq!(params.model, config.model.name);
    }
}
