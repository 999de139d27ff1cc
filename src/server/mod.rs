//! HTTP server module
//!
//! Provides the Axum-based HTTP server for the metrics endpoint, the
//! dashboard APIs, and static file serving.

pub mod handlers;
pub mod webui;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use axum::{routing::get, Router};
use tokio::signal;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::TokenManager;
use crate::collector::EnvoyClient;
use crate::config::Config;
use crate::history::{self, ProductionTracker};
use crate::monitor::{self, SharedMonitor};
use crate::mqtt::MqttPublisher;
use crate::scrape::Scraper;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    /// Scrape orchestrator
    pub scraper: Arc<Scraper>,
    /// Bearer-token manager
    pub tokens: Arc<TokenManager>,
    /// Latest monitor snapshot
    pub monitor: SharedMonitor,
    /// Production history tracker
    pub tracker: Arc<ProductionTracker>,
    /// MQTT publisher, present when enabled
    pub mqtt: Option<Arc<MqttPublisher>>,
}

/// Run the HTTP server
///
/// Obtains the initial bearer token (startup fails without one), spawns the
/// background refresh, monitor, and tracking loops, then serves until a
/// shutdown signal arrives.
///
/// # Arguments
/// * `config` - Application configuration
/// * `port` - Server port to bind to (overrides config.server.port)
pub async fn run(config: Config, port: u16) -> Result<()> {
    let bind_address = config.server.bind_address.clone();
    let metrics_path = config.server.metrics_path.clone();
    let web_dir = config.server.web_dir.clone();

    let tokens = Arc::new(TokenManager::new(
        &config.envoy.username,
        &config.envoy.password,
        &config.envoy.serial,
    )?);
    tokens
        .refresh()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to get initial token: {}", e))?;
    tokens.spawn_refresh_loop();

    let client = Arc::new(EnvoyClient::new(
        &config.envoy.ip,
        config.envoy.timeout_ms,
        Arc::clone(&tokens),
    )?);

    let config = Arc::new(config);
    let scraper = Arc::new(Scraper::new(Arc::clone(&config), Arc::clone(&client)));

    let shared_monitor = monitor::shared();
    monitor::spawn_refresh_loop(
        Arc::clone(&client),
        config.location.clone(),
        Arc::clone(&shared_monitor),
    );

    webui::ensure_web_files(Path::new(&web_dir))?;

    let tracker = Arc::new(ProductionTracker::new(Path::new(&web_dir)));
    history::spawn_tracking_loop(Arc::clone(&tracker), Arc::clone(&shared_monitor));

    let mqtt = if config.mqtt.enabled {
        info!(
            broker = %config.mqtt.broker,
            port = config.mqtt.effective_port(),
            topic_prefix = %config.mqtt.topic_prefix,
            interval_secs = config.mqtt.publish_interval_secs,
            "MQTT publishing enabled"
        );
        Some(MqttPublisher::start(
            config.mqtt.clone(),
            Arc::clone(&shared_monitor),
        ))
    } else {
        info!("MQTT publishing disabled");
        None
    };

    let state = AppState {
        config: Arc::clone(&config),
        scraper,
        tokens,
        monitor: shared_monitor,
        tracker: Arc::clone(&tracker),
        mqtt: mqtt.clone(),
    };

    let app = Router::new()
        .route(&metrics_path, get(handlers::metrics))
        .route("/health", get(handlers::health))
        .route("/debug", get(handlers::debug_info))
        .route("/api/monitor", get(handlers::api_monitor))
        .route("/api/daily-production", get(handlers::api_daily_production))
        .route("/api/mqtt-status", get(handlers::api_mqtt_status))
        .route("/api/version", get(handlers::api_version))
        .route("/version", get(handlers::version_text))
        .fallback_service(ServeDir::new(&web_dir))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let bind_addr: std::net::IpAddr = if bind_address == "localhost" {
        std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST)
    } else {
        bind_address.parse().map_err(|e| {
            anyhow::anyhow!(
                "Invalid bind_address '{}': {}. Use an IP address (e.g., '0.0.0.0', '127.0.0.1') or 'localhost'.",
                bind_address,
                e
            )
        })?
    };
    let addr = SocketAddr::from((bind_addr, port));
    info!(
        address = %addr,
        metrics_path = %metrics_path,
        envoy_ip = %config.envoy.ip,
        web_dir = %web_dir,
        "Server listening"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(publisher) = mqtt {
        publisher.shutdown().await;
    }
    tracker.save();

    info!("Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        }
    }
}
