//! envoy-exporter - Configuration-driven Envoy Prometheus exporter
//!
//! This binary serves a Prometheus-compatible metrics endpoint backed by an
//! Enphase Envoy solar gateway, plus a live dashboard and optional MQTT
//! republishing.

use anyhow::Result;
use clap::Parser;
use tracing::info;

use envoy_exporter::{cli::Cli, config::Config, server, version};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    envoy_exporter::init_logging(&args.log_level.to_string())?;
    version::mark_start();

    info!(version = env!("CARGO_PKG_VERSION"), "Starting envoy-exporter");
    info!(config = %args.config.display(), "Using configuration file");

    let mut config = Config::load_or_default(&args.config)?;

    if let Some(envoy_ip) = args.envoy_ip {
        config.envoy.ip = envoy_ip;
    }
    let port = args.port.unwrap_or(config.server.port);

    if args.validate {
        config.validate()?;
        println!("Configuration is valid");
        return Ok(());
    }

    server::run(config, port).await?;

    Ok(())
}
