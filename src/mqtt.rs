//! MQTT republishing of the monitor snapshot
//!
//! Publishes a JSON snapshot plus one topic per value under the configured
//! prefix on a fixed interval, with an online/offline status topic backed by
//! a last-will message. Only a fixed subset of the monitor data is
//! republished; Prometheus remains the full-fidelity interface.

use std::process;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rumqttc::{AsyncClient, Event, LastWill, MqttOptions, Packet, QoS, Transport};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::MqttConfig;
use crate::monitor::SharedMonitor;

/// Grid flows within this band count as idle rather than import/export
const GRID_DEADBAND_WATTS: f64 = 10.0;

/// The fixed metric subset published as the JSON snapshot.
#[derive(Debug, Serialize)]
struct MqttMetrics {
    timestamp: i64,
    current_watts: f64,
    today_wh: f64,
    lifetime_wh: f64,
    inverters_online: usize,
    inverters_total: usize,
    grid_watts: f64,
    load_watts: f64,
    system_efficiency: f64,
    self_consumption: f64,
    solar_coverage: f64,
}

/// Connected MQTT publisher.
pub struct MqttPublisher {
    client: AsyncClient,
    config: MqttConfig,
    connected: Arc<AtomicBool>,
    last_publish: AtomicI64,
}

impl MqttPublisher {
    /// Connect to the broker and spawn the event and publish loops.
    pub fn start(config: MqttConfig, monitor: SharedMonitor) -> Arc<Self> {
        let client_id = if config.client_id.is_empty() {
            format!("envoy-exporter-{}", process::id())
        } else {
            config.client_id.clone()
        };

        let mut options = MqttOptions::new(client_id, &config.broker, config.effective_port());
        options.set_keep_alive(Duration::from_secs(60));
        options.set_clean_session(true);
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username.clone(), password.clone());
        }
        if config.tls {
            options.set_transport(Transport::tls_with_default_config());
        }
        options.set_last_will(LastWill::new(
            format!("{}/status", config.topic_prefix),
            "offline",
            qos(config.qos),
            config.retain,
        ));

        let (client, mut event_loop) = AsyncClient::new(options, 16);
        let connected = Arc::new(AtomicBool::new(false));

        let publisher = Arc::new(Self {
            client,
            config,
            connected: Arc::clone(&connected),
            last_publish: AtomicI64::new(0),
        });

        // Event loop task: drives the connection and tracks its state
        {
            let connected = Arc::clone(&connected);
            let status_publisher = Arc::clone(&publisher);
            tokio::spawn(async move {
                loop {
                    match event_loop.poll().await {
                        Ok(Event::Incoming(Packet::ConnAck(_))) => {
                            connected.store(true, Ordering::Relaxed);
                            info!("MQTT connected to broker");
                            status_publisher.publish_status("online").await;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            if connected.swap(false, Ordering::Relaxed) {
                                warn!(error = %e, "MQTT connection lost");
                            }
                            tokio::time::sleep(Duration::from_secs(10)).await;
                        }
                    }
                }
            });
        }

        // Publish loop task
        {
            let publisher = Arc::clone(&publisher);
            tokio::spawn(async move {
                let interval = Duration::from_secs(publisher.config.publish_interval_secs.max(1));
                loop {
                    publisher.publish_metrics(&monitor).await;
                    tokio::time::sleep(interval).await;
                }
            });
        }

        publisher
    }

    /// Whether the broker connection is currently up.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Unix timestamp of the last successful publish cycle.
    pub fn last_publish(&self) -> i64 {
        self.last_publish.load(Ordering::Relaxed)
    }

    /// Broker address as `host:port`.
    pub fn broker_address(&self) -> String {
        format!("{}:{}", self.config.broker, self.config.effective_port())
    }

    /// Topic prefix in use.
    pub fn topic_prefix(&self) -> &str {
        &self.config.topic_prefix
    }

    /// Configured publish interval in seconds.
    pub fn publish_interval_secs(&self) -> u64 {
        self.config.publish_interval_secs
    }

    /// Publish `offline` and disconnect cleanly.
    pub async fn shutdown(&self) {
        info!("MQTT shutting down publisher");
        self.publish_status("offline").await;
        let _ = self.client.disconnect().await;
    }

    async fn publish_metrics(&self, monitor: &SharedMonitor) {
        if !self.is_connected() {
            debug!("MQTT not connected, skipping publish");
            return;
        }

        let (metrics, is_daytime) = {
            let data = monitor.read().expect("RwLock poisoned");
            (
                MqttMetrics {
                    timestamp: Utc::now().timestamp(),
                    current_watts: data.production.current_watts,
                    today_wh: data.production.today_wh,
                    lifetime_wh: data.production.lifetime_wh,
                    inverters_online: data.summary.active_inverters,
                    inverters_total: data.summary.total_inverters,
                    grid_watts: data.power_flow.grid_watts,
                    load_watts: data.power_flow.load_watts,
                    system_efficiency: data.summary.system_efficiency,
                    self_consumption: data.summary.self_consumption,
                    solar_coverage: data.summary.solar_coverage,
                },
                data.solar_position.is_daytime,
            )
        };

        if let Ok(payload) = serde_json::to_vec(&metrics) {
            self.publish("metrics", payload).await;
        }

        self.publish_float("current_watts", metrics.current_watts).await;
        self.publish_float("today_wh", metrics.today_wh).await;
        self.publish_float("lifetime_wh", metrics.lifetime_wh).await;
        self.publish("inverters_online", metrics.inverters_online.to_string())
            .await;
        self.publish("inverters_total", metrics.inverters_total.to_string())
            .await;
        self.publish_float("grid_watts", metrics.grid_watts).await;
        self.publish_float("load_watts", metrics.load_watts).await;
        self.publish_float("system_efficiency", metrics.system_efficiency)
            .await;
        self.publish_float("self_consumption", metrics.self_consumption)
            .await;
        self.publish_float("solar_coverage", metrics.solar_coverage)
            .await;

        self.publish("power_flow", power_flow_state(metrics.grid_watts))
            .await;
        self.publish(
            "system_status",
            system_status(metrics.inverters_online, is_daytime),
        )
        .await;

        self.last_publish
            .store(Utc::now().timestamp(), Ordering::Relaxed);
        debug!(
            watts = metrics.current_watts,
            online = metrics.inverters_online,
            total = metrics.inverters_total,
            "MQTT published metrics"
        );
    }

    async fn publish_status(&self, status: &str) {
        self.publish("status", status).await;
    }

    async fn publish_float(&self, subtopic: &str, value: f64) {
        self.publish(subtopic, format!("{:.2}", value)).await;
    }

    async fn publish(&self, subtopic: &str, payload: impl Into<Vec<u8>>) {
        let topic = format!("{}/{}", self.config.topic_prefix, subtopic);
        let payload: Vec<u8> = payload.into();
        if let Err(e) = self
            .client
            .publish(&topic, qos(self.config.qos), self.config.retain, payload)
            .await
        {
            warn!(topic = %topic, error = %e, "MQTT publish failed");
        }
    }
}

fn qos(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    }
}

/// Grid flow direction with a small deadband around zero.
fn power_flow_state(grid_watts: f64) -> &'static str {
    if grid_watts > GRID_DEADBAND_WATTS {
        "importing"
    } else if grid_watts < -GRID_DEADBAND_WATTS {
        "exporting"
    } else {
        "idle"
    }
}

fn system_status(inverters_online: usize, is_daytime: bool) -> &'static str {
    if inverters_online > 0 {
        "producing"
    } else if is_daytime {
        "daylight"
    } else {
        "night"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_flow_state_deadband() {
        assert_eq!(power_flow_state(500.0), "importing");
        assert_eq!(power_flow_state(-500.0), "exporting");
        assert_eq!(power_flow_state(5.0), "idle");
        assert_eq!(power_flow_state(-5.0), "idle");
    }

    #[test]
    fn test_system_status() {
        assert_eq!(system_status(3, true), "producing");
        assert_eq!(system_status(0, true), "daylight");
        assert_eq!(system_status(0, false), "night");
    }

    #[test]
    fn test_qos_mapping() {
        assert_eq!(qos(0), QoS::AtMostOnce);
        assert_eq!(qos(1), QoS::AtLeastOnce);
        assert_eq!(qos(2), QoS::ExactlyOnce);
        assert_eq!(qos(9), QoS::AtLeastOnce);
    }
}
