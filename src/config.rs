//! Configuration management for envoy-exporter
//!
//! Handles loading and validating configuration from YAML files.
//!
//! The configuration carries the full metric extraction rule set: the ordered
//! query list, per-query metric definitions with their field specs, the
//! calculated-metric expressions, and the condition table. The `transforms`
//! section is documentation-only; the transform set itself is fixed in code
//! (see [`crate::engine::transform`]).

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Prometheus metric names must match `[a-zA-Z_:][a-zA-Z0-9_:]*`
static METRIC_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z_:][a-zA-Z0-9_:]*$").expect("invalid metric name regex"));

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Error reading the configuration file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Error parsing the configuration file
    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// Configuration validation error
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Envoy gateway connection settings
    #[serde(default)]
    pub envoy: EnvoyConfig,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Site location, used for the solar-position dashboard data
    #[serde(default)]
    pub location: LocationConfig,

    /// MQTT republishing configuration
    #[serde(default)]
    pub mqtt: MqttConfig,

    /// Ordered list of device endpoints to scrape
    #[serde(default)]
    pub queries: Vec<QueryDef>,

    /// Metrics derived from other metrics' cached values
    #[serde(default)]
    pub calculated_metrics: Vec<CalculatedMetricDef>,

    /// Named condition table referenced by queries and metrics
    #[serde(default)]
    pub conditions: Vec<ConditionDef>,

    /// Documentation-only transform descriptions
    #[serde(default)]
    pub transforms: Vec<TransformDoc>,
}

/// Envoy gateway connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvoyConfig {
    /// Local IP address of the Envoy gateway
    #[serde(default)]
    pub ip: String,

    /// Envoy serial number, required for token enrollment
    #[serde(default)]
    pub serial: String,

    /// Enlighten account username (email)
    #[serde(default)]
    pub username: String,

    /// Enlighten account password
    #[serde(default)]
    pub password: String,

    /// Request timeout in milliseconds
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Server bind address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Metrics endpoint path
    #[serde(default = "default_metrics_path")]
    pub metrics_path: String,

    /// Directory for dashboard static files and production history
    #[serde(default = "default_web_dir")]
    pub web_dir: String,
}

/// Site location configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocationConfig {
    /// Latitude in decimal degrees
    #[serde(default)]
    pub latitude: f64,

    /// Longitude in decimal degrees
    #[serde(default)]
    pub longitude: f64,

    /// IANA timezone name (informational)
    #[serde(default)]
    pub timezone: String,
}

/// MQTT republishing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Enable MQTT publishing
    #[serde(default)]
    pub enabled: bool,

    /// Broker hostname or IP
    #[serde(default)]
    pub broker: String,

    /// Broker port; 0 selects 8883 for TLS, 1883 otherwise
    #[serde(default)]
    pub port: u16,

    /// Optional broker username
    pub username: Option<String>,

    /// Optional broker password
    pub password: Option<String>,

    /// Client identifier; generated from the process id when empty
    #[serde(default)]
    pub client_id: String,

    /// Topic prefix for all published topics
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,

    /// QoS level (0, 1, or 2)
    #[serde(default = "default_qos")]
    pub qos: u8,

    /// Publish messages with the retain flag
    #[serde(default)]
    pub retain: bool,

    /// Connect over TLS
    #[serde(default)]
    pub tls: bool,

    /// Publish interval in seconds
    #[serde(default = "default_publish_interval")]
    pub publish_interval_secs: u64,
}

/// Prometheus metric kind, carried opaquely into the `# TYPE` line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MetricKind {
    /// A value that can go up and down
    #[default]
    Gauge,
    /// A monotonically increasing value
    Counter,
    /// Observations counted in buckets
    Histogram,
    /// A sampled distribution summary
    Summary,
}

impl MetricKind {
    /// Returns the Prometheus type string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
            MetricKind::Histogram => "histogram",
            MetricKind::Summary => "summary",
        }
    }
}

impl Serialize for MetricKind {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MetricKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        match s.to_lowercase().as_str() {
            "gauge" => Ok(MetricKind::Gauge),
            "counter" => Ok(MetricKind::Counter),
            "histogram" => Ok(MetricKind::Histogram),
            "summary" => Ok(MetricKind::Summary),
            other => Err(serde::de::Error::custom(format!(
                "unknown metric type '{}', expected one of: gauge, counter, histogram, summary",
                other
            ))),
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One device endpoint to scrape
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryDef {
    /// Query name, used in logs
    pub name: String,

    /// Endpoint URL; `{envoy_ip}` is substituted at request time
    pub url: String,

    /// The response is a JSON array; each element is rendered independently
    #[serde(default)]
    pub array: bool,

    /// Optional condition name gating the whole query
    #[serde(default)]
    pub condition: String,

    /// Ordered metric definitions rendered against the response
    #[serde(default)]
    pub metrics: Vec<MetricDef>,
}

/// One configured metric
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricDef {
    /// Prometheus metric name
    pub name: String,

    /// Metric kind for the `# TYPE` line
    #[serde(rename = "type", default)]
    pub kind: MetricKind,

    /// Help text for the `# HELP` line
    #[serde(default)]
    pub help: String,

    /// Optional condition name gating this metric
    #[serde(default)]
    pub condition: String,

    /// Ordered field specs; empty means a single static sample
    #[serde(default)]
    pub fields: Vec<FieldSpec>,

    /// Static sample value, used when no field produces one
    #[serde(default)]
    pub value: String,
}

/// One extraction field of a metric: a label source or the value source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Dotted path into the JSON document. The multi-input signal-strength
    /// transform takes two comma-joined paths here.
    #[serde(default)]
    pub json_path: String,

    /// Label name; when set this field contributes a label, not the value
    #[serde(default)]
    pub label: String,

    /// Fixed label value overriding extraction
    #[serde(default)]
    pub label_value: String,

    /// Named transform applied to the extracted value
    #[serde(default)]
    pub transform: String,
}

impl FieldSpec {
    /// True when this field contributes a label rather than the sample value
    pub fn is_label(&self) -> bool {
        !self.label.is_empty()
    }
}

/// A metric computed from other metrics' cached values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalculatedMetricDef {
    /// Prometheus metric name
    pub name: String,

    /// Metric kind for the `# TYPE` line
    #[serde(rename = "type", default)]
    pub kind: MetricKind,

    /// Help text for the `# HELP` line
    #[serde(default)]
    pub help: String,

    /// Fixed-vocabulary condition: pv_producing, load_present, storage_present
    #[serde(default)]
    pub condition: String,

    /// Arithmetic expression over other metric names
    pub calculation: String,
}

/// A named condition with its check expression
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionDef {
    /// Condition name referenced from queries and metrics
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Check mini-language, e.g. `json_path_exists(wattsNow)`
    #[serde(default)]
    pub check: String,
}

/// Documentation-only transform description
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformDoc {
    /// Transform name as used in field specs
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,
}

// Default value functions
fn default_timeout() -> u64 {
    30_000
}

fn default_port() -> u16 {
    8080
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

fn default_web_dir() -> String {
    "./web".to_string()
}

fn default_topic_prefix() -> String {
    "solar/envoy".to_string()
}

fn default_qos() -> u8 {
    1
}

fn default_publish_interval() -> u64 {
    60
}

impl Default for EnvoyConfig {
    fn default() -> Self {
        Self {
            ip: String::new(),
            serial: String::new(),
            username: String::new(),
            password: String::new(),
            timeout_ms: default_timeout(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: default_bind_address(),
            metrics_path: default_metrics_path(),
            web_dir: default_web_dir(),
        }
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            broker: String::new(),
            port: 0,
            username: None,
            password: None,
            client_id: String::new(),
            topic_prefix: default_topic_prefix(),
            qos: default_qos(),
            retain: false,
            tls: false,
            publish_interval_secs: default_publish_interval(),
        }
    }
}

impl MqttConfig {
    /// Effective broker port, defaulting by transport
    pub fn effective_port(&self) -> u16 {
        if self.port != 0 {
            self.port
        } else if self.tls {
            8883
        } else {
            1883
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, or fails
    /// validation.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file, falling back to defaults if not found
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::warn!(
                path = %path.display(),
                "Config file not found, using defaults"
            );
            return Ok(Self::default());
        }

        Self::load(path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::ValidationError(
                "Server port must be greater than 0".to_string(),
            ));
        }

        if !self.server.metrics_path.starts_with('/') {
            return Err(ConfigError::ValidationError(
                "Metrics path must start with '/'".to_string(),
            ));
        }

        for query in &self.queries {
            for metric in &query.metrics {
                if !METRIC_NAME_RE.is_match(&metric.name) {
                    return Err(ConfigError::ValidationError(format!(
                        "Invalid metric name '{}' in query '{}'",
                        metric.name, query.name
                    )));
                }
            }
        }

        for calc in &self.calculated_metrics {
            if !METRIC_NAME_RE.is_match(&calc.name) {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid calculated metric name '{}'",
                    calc.name
                )));
            }
        }

        if self.mqtt.enabled && self.mqtt.broker.is_empty() {
            return Err(ConfigError::ValidationError(
                "MQTT broker must be set when MQTT is enabled".to_string(),
            ));
        }

        Ok(())
    }

    /// Total number of configured (non-calculated) metrics
    pub fn metric_count(&self) -> usize {
        self.queries.iter().map(|q| q.metrics.len()).sum()
    }
}
