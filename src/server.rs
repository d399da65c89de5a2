//! Server module for Databoard
//!
//! Contains configuration loading, the HTTP layer (dashboard config
//! endpoint and static assets) and the broker wiring.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{routing::get, Extension, Json, Router};
use config::{Config, Environment, File, FileFormat};
use databoard_broker::Broker;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::providers;
use crate::transport;

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    /// Directory of prebuilt dashboard assets served at the root path.
    #[serde(default = "default_static_dir")]
    pub static_dir: String,
    /// Free-form dashboard configuration served verbatim at `/config`.
    #[serde(default)]
    pub dashboard: Value,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

fn default_static_dir() -> String {
    "build".to_string()
}

/// Embedded default configuration (compiled into binary)
const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

/// Load configuration from files and environment
pub(crate) fn load_config() -> Result<AppConfig> {
    let config = Config::builder()
        // 1. Embedded defaults (always available)
        .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
        // 2. External overrides (optional)
        .add_source(File::with_name("config/default").required(false))
        .add_source(File::with_name("config/local").required(false))
        // 3. Environment variables (highest priority)
        .add_source(
            Environment::with_prefix("DATABOARD")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build configuration")?;

    config
        .try_deserialize()
        .context("Failed to deserialize configuration")
}

/// Serve the dashboard configuration to remote clients.
async fn config_endpoint(Extension(config): Extension<Arc<AppConfig>>) -> Json<Value> {
    Json(config.dashboard.clone())
}

/// Build the application router.
pub(crate) fn router(broker: Broker, config: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/config", get(config_endpoint))
        .route("/ws", get(transport::ws_handler))
        .fallback_service(ServeDir::new(&config.static_dir))
        .layer(Extension(config))
        .layer(Extension(broker))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Run the server until ctrl-c.
pub async fn run(host_override: Option<String>, port_override: Option<u16>) -> Result<()> {
    let mut config = load_config().context("Failed to load configuration")?;
    if let Some(host) = host_override {
        config.server.host = host;
    }
    if let Some(port) = port_override {
        config.server.port = port;
    }

    let broker = Broker::new();
    providers::register_builtin(&broker)
        .await
        .context("Failed to register built-in providers")?;

    info!("serving static contents from {}", config.static_dir);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;
    let app = router(broker.clone(), Arc::new(config));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!("Server running on port {}", addr.port());

    let shutdown = CancellationToken::new();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => signal_shutdown.cancel(),
            Err(err) => warn!("Failed to listen for shutdown signal: {err}"),
        }
    });

    let serve_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { serve_shutdown.cancelled().await })
        .await
        .context("HTTP server error")?;

    broker.shutdown().await;
    info!("Databoard shutdown complete");
    Ok(())
}
