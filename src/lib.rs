//! envoy-exporter library
//!
//! This crate polls an Enphase Envoy gateway's local JSON REST API,
//! transforms the responses into Prometheus exposition format through a
//! configuration-driven extraction engine, and serves them over HTTP
//! alongside a small dashboard and optional MQTT republishing.

pub mod auth;
pub mod cli;
pub mod collector;
pub mod config;
pub mod engine;
pub mod error;
pub mod history;
pub mod monitor;
pub mod mqtt;
pub mod scrape;
pub mod server;
pub mod solar;
pub mod version;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the logging subsystem
///
/// # Arguments
/// * `level` - Log level string (trace, debug, info, warn, error)
///
/// # Errors
/// Returns an error if the logging system fails to initialize
pub fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}
