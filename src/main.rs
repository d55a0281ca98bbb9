//! # Gemini Live Backend - Main Application Entry Point
//!
//! Actix-web server exposing the live-session WebSocket endpoint plus a small
//! REST surface for health, metrics, and runtime configuration.
//!
//! ## Application Architecture:
//! - **config**: layered configuration (TOML file + environment variables)
//! - **state**: shared application state and metrics
//! - **session**: session registry, turn buffers, and the turn processor
//! - **model**: Gemini generateContent client behind the GenerativeClient trait
//! - **websocket**: the live-session protocol actor
//! - **health / handlers**: REST endpoints
//! - **middleware**: request logging and metrics
//! - **error**: error taxonomy and HTTP/WebSocket error mapping

mod config;
mod error;
mod handlers;
mod health;
mod middleware;
mod model;
mod session;
mod state;
mod websocket;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use model::GeminiClient;
use session::{SessionRegistry, TurnProcessor};
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Global shutdown signal, set by the signal handlers and polled by main.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    if config.model.api_key.is_empty() {
        warn!("No Gemini API key configured; model calls will be rejected upstream");
    }

    info!("Starting gemini-live-backend v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);

    let app_state = AppState::new(config.clone());
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    // One registry and one processor for the whole process, injected into
    // every connection rather than created per request.
    let registry = Arc::new(SessionRegistry::new(&config.session));
    let client = Arc::new(
        GeminiClient::new(&config.model)
            .map_err(|e| anyhow::anyhow!("Failed to build model client: {}", e))?,
    );
    let processor = Arc::new(TurnProcessor::new(registry.clone(), client));

    spawn_idle_eviction(registry.clone(), &config);
    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let registry_data = web::Data::from(registry);
    let processor_data = web::Data::from(processor);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .app_data(registry_data.clone())
            .app_data(processor_data.clone())
            .wrap(cors)
            .wrap(middleware::Telemetry)
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/config", web::put().to(handlers::update_config))
                    .route("/sessions", web::get().to(handlers::list_sessions)),
            )
            .route("/health", web::get().to(health::health_check))
            .route("/ws/live", web::get().to(websocket::live_websocket))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize the tracing subscriber; RUST_LOG overrides the defaults.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gemini_live_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Periodically evict sessions whose last interaction is older than the
/// configured idle timeout.
fn spawn_idle_eviction(registry: Arc<SessionRegistry>, config: &AppConfig) {
    let sweep_interval = std::time::Duration::from_secs(config.session.idle_sweep_interval_secs);
    let max_idle = chrono::Duration::seconds(config.session.idle_timeout_secs as i64);

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_interval);
        // The first tick fires immediately; skip it
        interval.tick().await;

        loop {
            interval.tick().await;
            let evicted = registry.evict_idle_sessions(max_idle);
            if evicted > 0 {
                info!(evicted, "Idle session sweep finished");
            }
        }
    });
}

/// Install SIGTERM/SIGINT handlers that flip the global shutdown flag.
fn setup_signal_handlers() {
    tokio::spawn(async {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM handler");
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Poll the shutdown flag until it is set.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
