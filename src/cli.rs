//! CLI argument parsing for envoy-exporter
//!
//! # Options
//!
//! - `--config` / `-c`: Configuration file path (default: envoy.yaml, env: ENVOY_CONFIG)
//! - `--port` / `-p`: Server port (overrides config file, env: ENVOY_PORT)
//! - `--envoy-ip`: Envoy gateway IP (overrides config file, env: ENVOY_IP)
//! - `--validate`: Validate configuration without starting the server
//! - `--log-level` / `-l`: Log level (trace/debug/info/warn/error, env: ENVOY_LOG_LEVEL)
//!
//! # Precedence
//!
//! CLI arguments take precedence over environment variables, which take
//! precedence over config file values.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Configuration-driven Prometheus exporter for Enphase Envoy solar gateways
#[derive(Parser, Debug)]
#[command(name = "envoy-exporter")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        value_name = "FILE",
        default_value = "envoy.yaml",
        env = "ENVOY_CONFIG"
    )]
    pub config: PathBuf,

    /// Server port (overrides config file)
    #[arg(short, long, value_name = "PORT", env = "ENVOY_PORT")]
    pub port: Option<u16>,

    /// Envoy gateway IP address (overrides config file)
    #[arg(long, value_name = "ADDRESS", env = "ENVOY_IP")]
    pub envoy_ip: Option<String>,

    /// Validate configuration without starting the server
    #[arg(long)]
    pub validate: bool,

    /// Log level
    #[arg(
        short,
        long,
        value_enum,
        default_value = "info",
        env = "ENVOY_LOG_LEVEL"
    )]
    pub log_level: LogLevel,
}

/// Log level options
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    /// Trace level - most verbose
    Trace,
    /// Debug level
    Debug,
    /// Info level - default
    Info,
    /// Warn level
    Warn,
    /// Error level - least verbose
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}
