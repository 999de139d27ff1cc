//! Version and build information

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::Serialize;

static START_TIME: Lazy<DateTime<Utc>> = Lazy::new(Utc::now);

/// Build and runtime information served by the version endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct BuildInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub platform: &'static str,
    pub architecture: &'static str,
    pub start_time: DateTime<Utc>,
    pub uptime_seconds: i64,
}

/// Record the process start time. Called once from `main`; later calls are
/// no-ops.
pub fn mark_start() {
    Lazy::force(&START_TIME);
}

/// Current build information.
pub fn build_info() -> BuildInfo {
    let start = *START_TIME;
    BuildInfo {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        platform: std::env::consts::OS,
        architecture: std::env::consts::ARCH,
        start_time: start,
        uptime_seconds: (Utc::now() - start).num_seconds(),
    }
}

/// Short one-line version string for logs.
pub fn version_string() -> String {
    format!("{} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

/// Multi-line version report for the `/version` endpoint.
pub fn detailed_version_string() -> String {
    let info = build_info();
    format!(
        "{} v{}\nplatform: {}/{}\nstarted: {}\nuptime: {}s\n",
        info.name,
        info.version,
        info.platform,
        info.architecture,
        info.start_time.to_rfc3339(),
        info.uptime_seconds
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_info_populated() {
        let info = build_info();
        assert_eq!(info.name, "envoy-exporter");
        assert!(!info.version.is_empty());
        assert!(info.uptime_seconds >= 0);
    }

    #[test]
    fn test_version_string() {
        let s = version_string();
        assert!(s.starts_with("envoy-exporter v"));
        assert!(detailed_version_string().contains(&s));
    }
}
