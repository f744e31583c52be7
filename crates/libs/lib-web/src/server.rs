//! # Server Setup
//!
//! Tracing initialization, store and pipeline wiring, route registration and
//! HTTP server startup.

// region: --- Imports
use crate::chat::{build_completion_client, BotConfig, ChatAppState, ChatPipeline, ConnectionRegistry};
use crate::handlers::websocket;
use crate::middleware::{log_requests, stamp_req, RequestStamp};
use anyhow::Context;
use axum::{routing::get, Router};
use lib_core::{create_pool, Config, MessageStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tracing::info;
use tracing_subscriber::EnvFilter;
// endregion: --- Imports

// region: --- Server Configuration
/// Server configuration
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1:8000")
    pub bind_address: String,
    /// Allowed CORS origins
    pub allowed_origins: Vec<String>,
    /// Directory served under `/static`
    pub static_dir: PathBuf,
    /// Directory holding `display.html` and `mobile.html`
    pub templates_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8000".to_string(),
            allowed_origins: vec![
                "http://localhost:8000".to_string(),
                "http://127.0.0.1:8000".to_string(),
            ],
            static_dir: PathBuf::from("static"),
            templates_dir: PathBuf::from("templates"),
        }
    }
}
// endregion: --- Server Configuration

// region: --- Server Setup
/// Initialize and start the relay.
///
/// # Errors
///
/// Fails when configuration is invalid, the database cannot be opened or its
/// schema created, the scripted replies file cannot be loaded, or the bind fails.
pub async fn start_server(config: ServerConfig) -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    info!(" PERSONA CHAT RELAY STARTING");

    let app_config = Config::from_env().context("Failed to load configuration")?;
    app_config.validate().context("Invalid configuration")?;

    info!(
        "Persona: {} | reply mode: {} | scope: {} | pacing: {}ms",
        app_config.persona_name,
        app_config.reply_mode,
        app_config.scope_mode,
        app_config.pacing_delay_ms
    );

    ensure_sqlite_dir(&app_config.database_url)?;

    info!("Connecting to database: {}", app_config.database_url);
    let pool = create_pool(&app_config.database_url).await?;
    let store = MessageStore::new(pool);
    store.initialize().await.context("Failed to create message log schema")?;

    let client = build_completion_client(&BotConfig::from_env());
    let registry = Arc::new(ConnectionRegistry::new());
    let pipeline = ChatPipeline::from_config(&app_config, store, registry, client)?;
    let state = ChatAppState::new(pipeline, app_config.scope_mode);

    let app = create_router(state, &config);

    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address))?;

    info!(" SERVER READY: http://{}", config.bind_address);
    log_server_info();

    // ConnectInfo is required by the socket handlers
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;
    Ok(())
}

/// Install the global fmt subscriber, level from `LOG_LEVEL` (default `info`).
///
/// A second call leaves the first subscriber in place.
fn init_tracing() {
    let log_level = std::env::var("LOG_LEVEL")
        .unwrap_or_else(|_| "info".to_string())
        .to_lowercase();

    let filter = EnvFilter::try_new(&log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_line_number(true)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_ok() {
        info!(" Log level: {}", log_level);
    }
}

/// Create the parent directory of a file-backed SQLite database.
fn ensure_sqlite_dir(database_url: &str) -> anyhow::Result<()> {
    let Some(path) = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))
    else {
        return Ok(());
    };

    let path = path.split('?').next().unwrap_or_default();
    if path.is_empty() || path.contains(":memory:") {
        return Ok(());
    }

    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database directory {:?}", parent))?;
            info!("Created database directory: {:?}", parent);
        }
    }

    Ok(())
}

/// Create the application router.
pub fn create_router(state: ChatAppState, config: &ServerConfig) -> Router {
    use axum::http::{header, HeaderValue, Method};

    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    info!("[ROUTE SETUP] Registering HTTP routes...");
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/ws", get(websocket::global_websocket))
        .route("/ws/{session_id}", get(websocket::session_websocket))
        .route_service("/", ServeFile::new(config.templates_dir.join("display.html")))
        .route_service("/mobile", ServeFile::new(config.templates_dir.join("mobile.html")))
        .nest_service("/static", ServeDir::new(&config.static_dir))
        .fallback(|| async { (axum::http::StatusCode::NOT_FOUND, "Route not found") })
        .with_state(state)
        .layer(axum::middleware::from_fn(log_requests))
        .layer(
            tower_http::trace::TraceLayer::new_for_http().make_span_with(
                |request: &axum::http::Request<_>| {
                    let request_id = request
                        .extensions()
                        .get::<RequestStamp>()
                        .map(|s| s.id.clone())
                        .unwrap_or_else(|| "unknown".to_string());
                    tracing::info_span!(
                        "http_request",
                        request_id = %request_id,
                        method = %request.method(),
                        uri = %request.uri(),
                    )
                },
            ),
        )
        // Outermost so the id is visible to the span and the logging middleware
        .layer(axum::middleware::from_fn(stamp_req))
        .layer(cors)
}

fn log_server_info() {
    info!(" PAGES:");
    info!("   • GET  /          (display)");
    info!("   • GET  /mobile    (mobile client)");
    info!("   • GET  /static/*");
    info!(" CHAT:");
    info!("   • WS   /ws");
    info!("   • WS   /ws/{{session_id}}");
    info!(" HEALTH:");
    info!("   • GET  /health");
}
// endregion: --- Server Setup
